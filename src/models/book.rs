//! Book model and lending state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Availability of a book for lending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "book_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Available,
    Loaned,
    Reserved,
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BookStatus::Available => "available",
            BookStatus::Loaned => "loaned",
            BookStatus::Reserved => "reserved",
        };
        write!(f, "{}", label)
    }
}

/// The `(status, current_borrower_id)` pair of a book, as written by the ledger.
///
/// Lending state only ever reaches storage through this type, so a loaned
/// book without a borrower (or the reverse) cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lending {
    Available,
    LoanedTo(Uuid),
}

impl Lending {
    pub fn status(&self) -> BookStatus {
        match self {
            Lending::Available => BookStatus::Available,
            Lending::LoanedTo(_) => BookStatus::Loaned,
        }
    }

    pub fn borrower_id(&self) -> Option<Uuid> {
        match self {
            Lending::Available => None,
            Lending::LoanedTo(borrower) => Some(*borrower),
        }
    }
}

/// Book model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub current_borrower_id: Option<Uuid>,
    pub status: BookStatus,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Book {
    pub fn is_loaned(&self) -> bool {
        self.status == BookStatus::Loaned
    }

    /// `status == loaned` exactly when a borrower is recorded
    pub fn lending_is_consistent(&self) -> bool {
        self.is_loaned() == self.current_borrower_id.is_some()
    }

    pub(crate) fn apply(&mut self, lending: Lending) {
        self.status = lending.status();
        self.current_borrower_id = lending.borrower_id();
    }
}

/// Create book request (catalog side, used to seed stores)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBook {
    pub owner_id: Uuid,
    pub title: String,
    pub author: Option<String>,
    pub isbn: Option<String>,
}

impl CreateBook {
    pub fn new(owner_id: Uuid, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            title: title.into(),
            author: None,
            isbn: None,
        }
    }
}
