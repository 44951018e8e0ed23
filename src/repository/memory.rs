//! In-memory store for embedding and tests
//!
//! A unit of work holds the whole store exclusively and edits a private copy
//! of it; `commit` publishes the copy and then the recorded events, dropping
//! the unit of work discards both.
//! That is stricter than per-book row locks but gives the same guarantees.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        loan::sort_newest_first, Book, BookStatus, CreateBook, Lending, Loan, LoanEvent,
        LoanStatus, LoanSummary, NewLoan, UserContact,
    },
    services::notifications::EventEmitter,
};

use super::{sealed::LendingWrite, LoanStore, UserDirectory};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    books: HashMap<Uuid, Book>,
    loans: HashMap<Uuid, Loan>,
}

impl MemoryState {
    fn summaries<F>(&self, filter: F) -> Vec<LoanSummary>
    where
        F: Fn(&Loan) -> bool,
    {
        let now = Utc::now();
        let mut rows: Vec<LoanSummary> = self
            .loans
            .values()
            .filter(|loan| filter(*loan))
            .map(|loan| {
                let title = self
                    .books
                    .get(&loan.book_id)
                    .map(|b| b.title.as_str())
                    .unwrap_or_default();
                LoanSummary::from_loan(loan, title, now)
            })
            .collect();
        sort_newest_first(&mut rows);
        rows
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    events: EventEmitter,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            events: EventEmitter::disabled(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose committed units of work publish their events to `events`
    pub fn with_events(events: EventEmitter) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Wait for exclusive access and start a unit of work
    pub async fn begin(&self) -> MemoryUnitOfWork {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        MemoryUnitOfWork {
            guard,
            working,
            events: self.events.clone(),
            pending: Vec::new(),
        }
    }

    /// Register a book owned by `book.owner_id`
    pub async fn insert_book(&self, book: CreateBook) -> Book {
        let created = Book {
            id: Uuid::new_v4(),
            owner_id: book.owner_id,
            title: book.title,
            author: book.author,
            isbn: book.isbn,
            current_borrower_id: None,
            status: BookStatus::Available,
            is_archived: false,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .books
            .insert(created.id, created.clone());
        created
    }

    pub async fn archive_book(&self, book_id: Uuid) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let book = state
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.is_archived = true;
        Ok(())
    }

    /// Committed state of a book
    pub async fn book(&self, book_id: Uuid) -> Option<Book> {
        self.state.lock().await.books.get(&book_id).cloned()
    }

    /// Committed state of a loan
    pub async fn loan(&self, loan_id: Uuid) -> Option<Loan> {
        self.state.lock().await.loans.get(&loan_id).cloned()
    }

    /// Committed loans of a book, in no particular order
    pub async fn loans_of_book(&self, book_id: Uuid) -> Vec<Loan> {
        self.state
            .lock()
            .await
            .loans
            .values()
            .filter(|loan| loan.book_id == book_id)
            .cloned()
            .collect()
    }
}

/// Exclusive, isolated view of a [`MemoryStore`]
pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    events: EventEmitter,
    pending: Vec<LoanEvent>,
}

impl MemoryUnitOfWork {
    pub fn commit(self) {
        let Self {
            mut guard,
            working,
            events,
            pending,
        } = self;
        *guard = working;
        drop(guard);
        events.emit_all(pending);
    }

    pub fn rollback(self) {}
}

#[async_trait]
impl LoanStore for MemoryUnitOfWork {
    async fn lock_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&book_id).cloned())
    }

    async fn get_book(&mut self, book_id: Uuid) -> AppResult<Option<Book>> {
        Ok(self.working.books.get(&book_id).cloned())
    }

    async fn set_lending(&mut self, book_id: Uuid, lending: Lending, _: LendingWrite) -> AppResult<()> {
        let book = self
            .working
            .books
            .get_mut(&book_id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        book.apply(lending);
        Ok(())
    }

    async fn get_loan(&mut self, loan_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self.working.loans.get(&loan_id).cloned())
    }

    async fn open_loan_for_book(&mut self, book_id: Uuid) -> AppResult<Option<Loan>> {
        Ok(self
            .working
            .loans
            .values()
            .find(|loan| loan.book_id == book_id && loan.status.is_open())
            .cloned())
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> AppResult<Loan> {
        // Same guarantee as the partial unique index on the loans table
        if self.open_loan_for_book(loan.book_id).await?.is_some() {
            return Err(AppError::Conflict("Book already has an open loan".to_string()));
        }

        let created = Loan {
            id: Uuid::new_v4(),
            book_id: loan.book_id,
            borrower_id: loan.borrower_id,
            lender_id: loan.lender_id,
            status: LoanStatus::Requested,
            requested_at: loan.requested_at,
            approved_at: None,
            due_date: None,
            returned_at: None,
        };
        self.working.loans.insert(created.id, created.clone());
        Ok(created)
    }

    async fn save_loan(&mut self, loan: &Loan) -> AppResult<()> {
        let stored = self
            .working
            .loans
            .get_mut(&loan.id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan.id)))?;
        stored.status = loan.status;
        stored.approved_at = loan.approved_at;
        stored.due_date = loan.due_date;
        stored.returned_at = loan.returned_at;
        Ok(())
    }

    async fn delete_loan(&mut self, loan_id: Uuid) -> AppResult<bool> {
        Ok(self.working.loans.remove(&loan_id).is_some())
    }

    async fn loans_for_user(&mut self, user_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        Ok(self.working.summaries(|loan| loan.involves(user_id)))
    }

    async fn loans_for_book(&mut self, book_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        Ok(self.working.summaries(|loan| loan.book_id == book_id))
    }

    fn record_event(&mut self, event: LoanEvent) {
        self.pending.push(event);
    }
}

/// User directory backed by a map
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<Uuid, UserContact>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user: UserContact) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user.id, user);
        }
    }

    /// Register a user named `display_name` without an email address
    pub fn add_named(&self, display_name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.add(UserContact::new(id, display_name, None));
        id
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn contact(&self, user_id: Uuid) -> AppResult<Option<UserContact>> {
        let users = self
            .users
            .read()
            .map_err(|_| AppError::Internal("user directory lock poisoned".to_string()))?;
        Ok(users.get(&user_id).cloned())
    }
}
