//! Read-only loan history

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::LoanSummary,
    repository::{LoanStore, UserDirectory},
};

#[derive(Clone)]
pub struct LoanHistory {
    users: Arc<dyn UserDirectory>,
}

impl LoanHistory {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    /// Every loan the user borrowed or lent, newest first
    pub async fn get_user_loans<S>(&self, store: &mut S, user_id: Uuid) -> AppResult<Vec<LoanSummary>>
    where
        S: LoanStore + ?Sized,
    {
        // Verify user exists
        if self.users.contact(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
        }
        store.loans_for_user(user_id).await
    }

    /// Every borrower a book has had, newest first. Archived books keep
    /// their history.
    pub async fn get_book_history<S>(&self, store: &mut S, book_id: Uuid) -> AppResult<Vec<LoanSummary>>
    where
        S: LoanStore + ?Sized,
    {
        store
            .get_book(book_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", book_id)))?;
        store.loans_for_book(book_id).await
    }
}
