//! Loan model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Loan lifecycle status
///
/// `requested --approve--> active --return--> returned`. A requested loan
/// can also be rejected, which deletes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Requested,
    Active,
    Returned,
}

impl LoanStatus {
    /// Requested and active loans are open; a book has at most one
    pub fn is_open(&self) -> bool {
        match self {
            LoanStatus::Requested | LoanStatus::Active => true,
            LoanStatus::Returned => false,
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LoanStatus::Requested => "requested",
            LoanStatus::Active => "active",
            LoanStatus::Returned => "returned",
        };
        write!(f, "{}", label)
    }
}

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: Uuid,
    pub book_id: Uuid,
    pub borrower_id: Uuid,
    /// Owner of the book at request time
    pub lender_id: Uuid,
    pub status: LoanStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Active && self.due_date.map(|d| d < now).unwrap_or(false)
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.borrower_id == user_id || self.lender_id == user_id
    }
}

/// Row inserted by `request_loan`
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub book_id: Uuid,
    pub borrower_id: Uuid,
    pub lender_id: Uuid,
    pub requested_at: DateTime<Utc>,
}

/// Loan with display details, returned by history queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LoanSummary {
    pub id: Uuid,
    pub book_id: Uuid,
    pub book_title: String,
    pub borrower_id: Uuid,
    pub lender_id: Uuid,
    pub status: LoanStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub is_overdue: bool,
}

impl LoanSummary {
    pub fn from_loan(loan: &Loan, book_title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: loan.id,
            book_id: loan.book_id,
            book_title: book_title.into(),
            borrower_id: loan.borrower_id,
            lender_id: loan.lender_id,
            status: loan.status,
            requested_at: loan.requested_at,
            approved_at: loan.approved_at,
            due_date: loan.due_date,
            returned_at: loan.returned_at,
            is_overdue: loan.is_overdue_at(now),
        }
    }
}

/// Newest first, with the id as a stable tiebreak
pub(crate) fn sort_newest_first(loans: &mut [LoanSummary]) {
    loans.sort_by(|a, b| {
        b.requested_at
            .cmp(&a.requested_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
