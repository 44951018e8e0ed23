//! Loan events and the notifications derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::loan::Loan;

/// Notification event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    LoanRequest,
    LoanApproved,
    LoanRejected,
    LoanReturned,
    DueDateChanged,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::LoanRequest => "LOAN_REQUEST",
            NotificationType::LoanApproved => "LOAN_APPROVED",
            NotificationType::LoanRejected => "LOAN_REJECTED",
            NotificationType::LoanReturned => "LOAN_RETURNED",
            NotificationType::DueDateChanged => "DUE_DATE_CHANGED",
        }
    }
}

/// A state transition performed by the ledger
#[derive(Debug, Clone, PartialEq)]
pub enum LoanEvent {
    Requested { loan: Loan, book_title: String },
    Approved { loan: Loan, book_title: String },
    Rejected { loan: Loan, book_title: String },
    Returned { loan: Loan, book_title: String },
    DueDateChanged { loan: Loan, book_title: String },
}

impl LoanEvent {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            LoanEvent::Requested { .. } => NotificationType::LoanRequest,
            LoanEvent::Approved { .. } => NotificationType::LoanApproved,
            LoanEvent::Rejected { .. } => NotificationType::LoanRejected,
            LoanEvent::Returned { .. } => NotificationType::LoanReturned,
            LoanEvent::DueDateChanged { .. } => NotificationType::DueDateChanged,
        }
    }

    pub fn loan(&self) -> &Loan {
        match self {
            LoanEvent::Requested { loan, .. }
            | LoanEvent::Approved { loan, .. }
            | LoanEvent::Rejected { loan, .. }
            | LoanEvent::Returned { loan, .. }
            | LoanEvent::DueDateChanged { loan, .. } => loan,
        }
    }

    pub fn book_title(&self) -> &str {
        match self {
            LoanEvent::Requested { book_title, .. }
            | LoanEvent::Approved { book_title, .. }
            | LoanEvent::Rejected { book_title, .. }
            | LoanEvent::Returned { book_title, .. }
            | LoanEvent::DueDateChanged { book_title, .. } => book_title,
        }
    }

    /// Requests and returns go to the lender, everything else to the borrower
    pub fn recipient_id(&self) -> Uuid {
        let loan = self.loan();
        match self {
            LoanEvent::Requested { .. } | LoanEvent::Returned { .. } => loan.lender_id,
            LoanEvent::Approved { .. }
            | LoanEvent::Rejected { .. }
            | LoanEvent::DueDateChanged { .. } => loan.borrower_id,
        }
    }

    pub fn to_notification(&self) -> Notification {
        let loan = self.loan();
        Notification {
            event_type: self.notification_type(),
            recipient_id: self.recipient_id(),
            payload: json!({
                "loan_id": loan.id,
                "book_id": loan.book_id,
                "book_title": self.book_title(),
                "borrower_id": loan.borrower_id,
                "lender_id": loan.lender_id,
                "status": loan.status,
                "due_date": loan.due_date,
            }),
            created_at: Utc::now(),
        }
    }
}

/// What a notification sink receives: `(event_type, recipient_id, payload)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event_type: NotificationType,
    pub recipient_id: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
