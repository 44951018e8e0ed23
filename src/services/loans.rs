//! Loan management service
//!
//! Runs each ledger operation in its own Postgres transaction, for callers
//! that do not manage units of work themselves.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Loan, LoanSummary},
    repository::{PgUnitOfWork, Repository},
    services::{history::LoanHistory, ledger::LoanLedger},
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    ledger: LoanLedger,
    history: LoanHistory,
    lock_timeout_ms: u64,
}

impl LoansService {
    pub fn new(repository: Repository, ledger: LoanLedger, history: LoanHistory, lock_timeout_ms: u64) -> Self {
        Self {
            repository,
            ledger,
            history,
            lock_timeout_ms,
        }
    }

    async fn begin(&self) -> AppResult<PgUnitOfWork> {
        self.repository.begin(self.lock_timeout_ms).await
    }

    /// Request to borrow a book; returns the (possibly pre-existing) pending loan
    pub async fn request_loan(&self, book_id: Uuid, borrower_id: Uuid) -> AppResult<Loan> {
        let mut uow = self.begin().await?;
        let loan = self.ledger.request_loan(&mut uow, book_id, borrower_id).await?;
        uow.commit().await?;
        Ok(loan)
    }

    pub async fn approve_loan(
        &self,
        loan_id: Uuid,
        lender_id: Uuid,
        due_date: Option<DateTime<Utc>>,
    ) -> AppResult<Loan> {
        let mut uow = self.begin().await?;
        let loan = self.ledger.approve_loan(&mut uow, loan_id, lender_id, due_date).await?;
        uow.commit().await?;
        Ok(loan)
    }

    pub async fn reject_loan(&self, loan_id: Uuid, lender_id: Uuid) -> AppResult<()> {
        let mut uow = self.begin().await?;
        self.ledger.reject_loan(&mut uow, loan_id, lender_id).await?;
        uow.commit().await
    }

    pub async fn return_book(&self, book_id: Uuid, caller_id: Uuid) -> AppResult<Loan> {
        let mut uow = self.begin().await?;
        let loan = self.ledger.return_book(&mut uow, book_id, caller_id).await?;
        uow.commit().await?;
        Ok(loan)
    }

    pub async fn set_due_date(&self, loan_id: Uuid, lender_id: Uuid, due_date: DateTime<Utc>) -> AppResult<Loan> {
        let mut uow = self.begin().await?;
        let loan = self.ledger.set_due_date(&mut uow, loan_id, lender_id, due_date).await?;
        uow.commit().await?;
        Ok(loan)
    }

    /// Get loans for a user
    pub async fn get_user_loans(&self, user_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        let mut uow = self.begin().await?;
        let loans = self.history.get_user_loans(&mut uow, user_id).await?;
        uow.rollback().await?;
        Ok(loans)
    }

    pub async fn get_book_history(&self, book_id: Uuid) -> AppResult<Vec<LoanSummary>> {
        let mut uow = self.begin().await?;
        let loans = self.history.get_book_history(&mut uow, book_id).await?;
        uow.rollback().await?;
        Ok(loans)
    }
}
