//! Postgres unit of work for books and loans

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::{map_contention, AppError, AppResult},
    models::{
        Book, BookStatus, CreateBook, Lending, Loan, LoanEvent, LoanStatus, LoanSummary, NewLoan,
    },
    services::notifications::EventEmitter,
};

use super::{sealed::LendingWrite, LoanStore};

const SUMMARY_COLUMNS: &str = r#"
    l.id, l.book_id, b.title AS book_title, l.borrower_id, l.lender_id, l.status,
    l.requested_at, l.approved_at, l.due_date, l.returned_at,
    (l.status = 'active' AND l.due_date IS NOT NULL AND l.due_date < NOW()) AS is_overdue
"#;

/// A single Postgres transaction. Dropping it without `commit` rolls back
/// and discards the recorded events.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    events: EventEmitter,
    pending: Vec<LoanEvent>,
}

impl PgUnitOfWork {
    pub async fn begin(pool: &PgPool, lock_timeout_ms: u64, events: EventEmitter) -> AppResult<Self> {
        let mut tx = pool.begin().await?;

        // SET does not take bind parameters
        let statement = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms);
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(Self {
            tx,
            events,
            pending: Vec::new(),
        })
    }

    /// Commit, then publish the recorded events
    pub async fn commit(self) -> AppResult<()> {
        let Self { tx, events, pending } = self;
        tx.commit().await.map_err(map_contention)?;
        events.emit_all(pending);
        Ok(())
    }

    pub async fn rollback(self) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Register a book (catalog side; the ledger only reads books)
    pub async fn insert_book(&mut self, book: &CreateBook) -> AppResult<Book> {
        let created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (id, owner_id, title, author, isbn, status, is_archived, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(book.owner_id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(BookStatus::Available)
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(created)
    }

    /// Archive a book, excluding it from every loan operation
    pub async fn archive_book(&mut self, book_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE books SET is_archived = TRUE WHERE id = $1")
            .bind(book_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl LoanStore for PgUnitOfWork {
    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
            .bind(book_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_contention)
    }

    async fn get_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(book_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(book)
    }

    async fn set_lending(&mut self, book_id: Uuid, lending: Lending, _: LendingWrite) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE books SET status = $2, current_borrower_id = $3 WHERE id = $1",
        )
        .bind(book_id)
        .bind(lending.status())
        .bind(lending.borrower_id())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }
        Ok(())
    }

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn open_loan_for_book(&mut self, book_id: Uuid) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE book_id = $1 AND status IN ($2, $3)
            ORDER BY requested_at DESC
            LIMIT 1
            "#,
        )
        .bind(book_id)
        .bind(LoanStatus::Requested)
        .bind(LoanStatus::Active)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(loan)
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (id, book_id, borrower_id, lender_id, status, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(loan.book_id)
        .bind(loan.borrower_id)
        .bind(loan.lender_id)
        .bind(LoanStatus::Requested)
        .bind(loan.requested_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_contention)
    }

    async fn save_loan(&mut self, loan: &Loan) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $2, approved_at = $3, due_date = $4, returned_at = $5
            WHERE id = $1
            "#,
        )
        .bind(loan.id)
        .bind(loan.status)
        .bind(loan.approved_at)
        .bind(loan.due_date)
        .bind(loan.returned_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_contention)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Loan with id {} not found", loan.id)));
        }
        Ok(())
    }

    async fn delete_loan(&mut self, loan_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM loans WHERE id = $1")
            .bind(loan_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        let query = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE l.borrower_id = $1 OR l.lender_id = $1
            ORDER BY l.requested_at DESC, l.id DESC
            "#
        );

        let loans = sqlx::query_as::<_, LoanSummary>(&query)
            .bind(user_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(loans)
    }

    async fn loans_for_book(&mut self, book_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        let query = format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM loans l
            JOIN books b ON b.id = l.book_id
            WHERE l.book_id = $1
            ORDER BY l.requested_at DESC, l.id DESC
            "#
        );

        let loans = sqlx::query_as::<_, LoanSummary>(&query)
            .bind(book_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(loans)
    }

    fn record_event(&mut self, event: LoanEvent) {
        self.pending.push(event);
    }
}
