//! Data models for the loan ledger

pub mod book;
pub mod loan;
pub mod notification;
pub mod user;

// Re-export commonly used types
pub use book::{Book, BookStatus, CreateBook, Lending};
pub use loan::{Loan, LoanStatus, LoanSummary, NewLoan};
pub use notification::{LoanEvent, Notification, NotificationType};
pub use user::UserContact;
