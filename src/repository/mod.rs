//! Repository layer for database operations
//!
//! The ledger never opens connections. It works against a [`LoanStore`], a
//! unit of work that the caller begins and later commits or drops. Loan
//! events recorded on a unit of work are only published by a successful
//! commit.

pub mod loans;
pub mod memory;
pub mod notifications;
pub mod users;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Book, Lending, Loan, LoanEvent, LoanSummary, NewLoan},
    services::notifications::EventEmitter,
};

pub use loans::PgUnitOfWork;
pub use memory::{MemoryStore, MemoryUnitOfWork, MemoryUserDirectory};
pub use notifications::PgNotificationSink;
pub use users::{PgUserDirectory, UserDirectory};

pub(crate) mod sealed {
    /// Write permission for a book's lending state. Only the crate can
    /// construct it, which also keeps [`LoanStore`](super::LoanStore)
    /// implementations inside the crate.
    #[derive(Debug, Clone, Copy)]
    pub struct LendingWrite(pub(crate) ());
}

/// One transaction's view of books and loans
#[async_trait]
pub trait LoanStore: Send {
    /// Load a book and hold its row lock until the unit of work ends
    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;

    /// Load a book without locking it
    async fn get_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>>;

    /// Write the `(status, current_borrower_id)` pair of a book.
    ///
    /// Only the ledger holds the permit:
    ///
    /// ```compile_fail
    /// let _ = shelfshare_loans::repository::sealed::LendingWrite(());
    /// ```
    ///
    /// ```compile_fail
    /// use shelfshare_loans::{models::{Book, Lending}, services::guard::BookAvailabilityGuard, MemoryStore};
    ///
    /// async fn lend(store: MemoryStore, mut book: Book) {
    ///     let mut uow = store.begin().await;
    ///     BookAvailabilityGuard::write(&mut uow, &mut book, Lending::Available).await.ok();
    /// }
    /// ```
    async fn set_lending(
        &mut self,
        book_id: Uuid,
        lending: Lending,
        permit: sealed::LendingWrite,
    ) -> AppResult<()>;

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>>;

    /// The requested or active loan of a book, if any
    async fn open_loan_for_book(&mut self, book_id: Uuid) -> AppResult<Option<Loan>>;

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan>;

    /// Persist status and date fields of an existing loan
    async fn save_loan(&mut self, loan: &Loan) -> AppResult<()>;

    /// Returns false when no row was deleted
    async fn delete_loan(&mut self, loan_id: Uuid) -> AppResult<bool>;

    /// Loans where the user is borrower or lender, newest first
    async fn loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<LoanSummary>>;

    /// Every loan of a book, newest first
    async fn loans_for_book(&mut self, book_id: Uuid) -> AppResult<Vec<LoanSummary>>;

    /// Hold an event until the unit of work commits; discarded otherwise
    fn record_event(&mut self, event: LoanEvent);
}

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub users: PgUserDirectory,
    pub notifications: PgNotificationSink,
    events: EventEmitter,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            users: PgUserDirectory::new(pool.clone()),
            notifications: PgNotificationSink::new(pool.clone()),
            pool,
            events: EventEmitter::disabled(),
        }
    }

    /// Publish events of committed units of work to `events`
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Start a unit of work whose book locks wait at most `lock_timeout_ms`
    pub async fn begin(&self, lock_timeout_ms: u64) -> AppResult<PgUnitOfWork> {
        PgUnitOfWork::begin(&self.pool, lock_timeout_ms, self.events.clone()).await
    }
}
