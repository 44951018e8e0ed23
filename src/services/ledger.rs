//! Loan lifecycle engine
//!
//! Every operation runs against a caller-owned unit of work and locks the
//! book row before it looks at loan state, so all mutations touching one
//! book are serialized. Business-rule failures come back as `NotFound`,
//! `Conflict` or `Unauthorized` and leave nothing written; the caller is
//! expected to drop (roll back) the unit of work on any error. Events are
//! recorded on the unit of work and only go out once it commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Book, Lending, Loan, LoanEvent, LoanStatus, NewLoan},
    repository::{LoanStore, UserDirectory},
    services::guard::BookAvailabilityGuard,
};

#[derive(Clone)]
pub struct LoanLedger {
    users: Arc<dyn UserDirectory>,
}

impl LoanLedger {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Ask the owner of a book to lend it to `borrower_id`.
    ///
    /// Re-requesting while the previous request is still pending returns
    /// that same loan.
    pub async fn request_loan<S>(&self, store: &mut S, book_id: Uuid, borrower_id: Uuid) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        if self.users.contact(borrower_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User with id {} not found", borrower_id)));
        }

        let book = lock_lendable_book(store, book_id).await?;

        if book.owner_id == borrower_id {
            return Err(AppError::Conflict("Owners cannot borrow their own book".to_string()));
        }
        if book.is_loaned() {
            tracing::debug!(book_id = %book_id, borrower_id = %borrower_id, "Request refused, book is loaned");
            return Err(AppError::Conflict(format!("Book {} is already loaned", book_id)));
        }

        if let Some(open) = store.open_loan_for_book(book_id).await? {
            if open.borrower_id != borrower_id {
                return Err(AppError::Conflict(format!(
                    "Book {} already has a pending request",
                    book_id
                )));
            }
            return match open.status {
                LoanStatus::Requested => {
                    tracing::debug!(loan_id = %open.id, "Repeated loan request, returning pending loan");
                    Ok(open)
                }
                LoanStatus::Active => Err(AppError::Conflict(format!(
                    "User {} already holds book {}",
                    borrower_id, book_id
                ))),
                LoanStatus::Returned => Err(AppError::Internal(format!(
                    "Returned loan {} reported as open",
                    open.id
                ))),
            };
        }

        let loan = store
            .insert_loan(NewLoan {
                book_id,
                borrower_id,
                lender_id: book.owner_id,
                requested_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            loan_id = %loan.id,
            book_id = %book_id,
            borrower_id = %borrower_id,
            lender_id = %loan.lender_id,
            "Loan requested"
        );

        store.record_event(LoanEvent::Requested {
            loan: loan.clone(),
            book_title: book.title,
        });

        Ok(loan)
    }

    /// Hand the book to the borrower: the loan becomes active and the book loaned
    pub async fn approve_loan<S>(
        &self,
        store: &mut S,
        loan_id: Uuid,
        lender_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        let (mut loan, mut book) = lock_loan_for_lender(store, loan_id, lender_id).await?;

        match loan.status {
            LoanStatus::Requested => {}
            LoanStatus::Active | LoanStatus::Returned => {
                return Err(AppError::Conflict(format!(
                    "Loan {} is {} and cannot be approved",
                    loan_id, loan.status
                )));
            }
        }
        if book.is_loaned() {
            return Err(AppError::Conflict(format!("Book {} is already loaned", book.id)));
        }

        loan.status = LoanStatus::Active;
        loan.approved_at = Some(Utc::now());
        if due_date.is_some() {
            loan.due_date = due_date;
        }

        store.save_loan(&loan).await?;
        BookAvailabilityGuard::write(store, &mut book, Lending::LoanedTo(loan.borrower_id)).await?;
        BookAvailabilityGuard::verify(&book, Some(&loan))?;

        tracing::info!(
            loan_id = %loan.id,
            book_id = %book.id,
            borrower_id = %loan.borrower_id,
            due_date = ?loan.due_date,
            "Loan approved"
        );

        store.record_event(LoanEvent::Approved {
            loan: loan.clone(),
            book_title: book.title,
        });

        Ok(loan)
    }

    /// Decline a pending request. The loan row is deleted; the book is untouched.
    pub async fn reject_loan<S>(&self, store: &mut S, loan_id: Uuid, lender_id: Uuid) -> AppResult<()>
    where
        S: LoanStore + ?Sized,
    {
        let (loan, book) = lock_loan_for_lender(store, loan_id, lender_id).await?;

        match loan.status {
            LoanStatus::Requested => {}
            LoanStatus::Active | LoanStatus::Returned => {
                return Err(AppError::Conflict(format!(
                    "Loan {} is {} and cannot be rejected",
                    loan_id, loan.status
                )));
            }
        }

        if !store.delete_loan(loan_id).await? {
            return Err(AppError::NotFound(format!("Loan with id {} not found", loan_id)));
        }

        tracing::info!(loan_id = %loan_id, book_id = %book.id, "Loan request rejected");

        store.record_event(LoanEvent::Rejected {
            loan,
            book_title: book.title,
        });

        Ok(())
    }

    /// Close the active loan of a book. Only its lender or borrower may do so.
    pub async fn return_book<S>(&self, store: &mut S, book_id: Uuid, caller_id: Uuid) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        let mut book = lock_lendable_book(store, book_id).await?;

        if !book.is_loaned() {
            return Err(AppError::Conflict(format!("Book {} is not loaned", book_id)));
        }

        let mut loan = match store.open_loan_for_book(book_id).await? {
            Some(loan) if loan.status == LoanStatus::Active => loan,
            _ => {
                return Err(AppError::Internal(format!(
                    "Book {} is loaned without an active loan",
                    book_id
                )))
            }
        };

        if !loan.involves(caller_id) {
            return Err(AppError::Unauthorized(format!(
                "User {} is neither lender nor borrower of loan {}",
                caller_id, loan.id
            )));
        }

        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(Utc::now());

        store.save_loan(&loan).await?;
        BookAvailabilityGuard::write(store, &mut book, Lending::Available).await?;
        BookAvailabilityGuard::verify(&book, None)?;

        tracing::info!(
            loan_id = %loan.id,
            book_id = %book_id,
            returned_by = %caller_id,
            "Book returned"
        );

        store.record_event(LoanEvent::Returned {
            loan: loan.clone(),
            book_title: book.title,
        });

        Ok(loan)
    }

    /// Change the due date of an active loan
    pub async fn set_due_date<S>(
        &self,
        store: &mut S,
        loan_id: Uuid,
        lender_id: Uuid,
        due_date: DateTime<Utc>,
    ) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        let (mut loan, book) = lock_loan_for_lender(store, loan_id, lender_id).await?;

        match loan.status {
            LoanStatus::Active => {}
            LoanStatus::Requested | LoanStatus::Returned => {
                return Err(AppError::Conflict(format!(
                    "Loan {} is {}; only active loans have a due date",
                    loan_id, loan.status
                )));
            }
        }

        loan.due_date = Some(due_date);
        store.save_loan(&loan).await?;

        tracing::info!(loan_id = %loan_id, due_date = %due_date, "Loan due date changed");

        store.record_event(LoanEvent::DueDateChanged {
            loan: loan.clone(),
            book_title: book.title,
        });

        Ok(loan)
    }
}

/// Lock a book that takes part in lending (exists and is not archived)
async fn lock_lendable_book<S>(store: &mut S, book_id: Uuid) -> AppResult<Book>
where
    S: LoanStore + ?Sized,
{
    let book = store
        .lock_book(book_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;

    if book.is_archived {
        return Err(AppError::NotFound(format!("Book with id {} is archived", book_id)));
    }
    Ok(book)
}

/// Load a loan on behalf of its lender, lock its book, then re-read the loan
/// so the returned state cannot change before the unit of work ends.
async fn lock_loan_for_lender<S>(store: &mut S, loan_id: Uuid, lender_id: Uuid) -> AppResult<(Loan, Book)>
where
    S: LoanStore + ?Sized,
{
    let loan = store
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;

    // lender_id is a snapshot and never changes, so checking before the lock is safe
    if loan.lender_id != lender_id {
        tracing::debug!(loan_id = %loan_id, caller = %lender_id, "Caller is not the recorded lender");
        return Err(AppError::Unauthorized(format!(
            "User {} is not the lender of loan {}",
            lender_id, loan_id
        )));
    }

    let book = lock_lendable_book(store, loan.book_id).await?;

    let loan = store
        .get_loan(loan_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;

    Ok((loan, book))
}
