//! Shelfshare loan ledger
//!
//! Tracks who owns a book, who holds it, and the requests, approvals and
//! returns in between, while guaranteeing a book is never lent to two
//! people at once.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{LoanStore, MemoryStore, PgUnitOfWork, Repository};
pub use services::{history::LoanHistory, ledger::LoanLedger, Services};
