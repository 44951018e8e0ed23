//! Loan ledger against a live Postgres database

use std::sync::Arc;

use chrono::{Duration, Utc};
use shelfshare_loans::{
    config::{AppConfig, DatabaseConfig},
    db,
    models::{BookStatus, CreateBook, LoanStatus, UserContact},
    repository::MemoryUserDirectory,
    services::notifications::EventEmitter,
    AppError, LoanLedger, Repository, Services,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for --ignored tests");
    let config = DatabaseConfig {
        url,
        max_connections: 5,
        min_connections: 1,
    };
    let pool = db::connect(&config).await.expect("Failed to connect");
    db::migrate(&pool).await.expect("Failed to migrate");
    pool
}

async fn seed_user(pool: &PgPool, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, display_name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .expect("Failed to insert user");
    id
}

struct Seeded {
    repository: Repository,
    owner: Uuid,
    borrower: Uuid,
    book_id: Uuid,
}

async fn seed() -> Seeded {
    let pool = pool().await;
    let owner = seed_user(&pool, "Owner").await;
    let borrower = seed_user(&pool, "Borrower").await;

    let repository = Repository::new(pool);
    let mut uow = repository.begin(1_000).await.unwrap();
    let book = uow
        .insert_book(&CreateBook::new(owner, "The Left Hand of Darkness"))
        .await
        .unwrap();
    uow.commit().await.unwrap();

    Seeded {
        repository,
        owner,
        borrower,
        book_id: book.id,
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.lock_timeout_ms = 1_000;
    config
}

async fn book_state(pool: &PgPool, book_id: Uuid) -> (BookStatus, Option<Uuid>) {
    sqlx::query_as("SELECT status, current_borrower_id FROM books WHERE id = $1")
        .bind(book_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_loan_lifecycle() {
    let s = seed().await;
    let pool = s.repository.pool.clone();
    let notifications = s.repository.notifications.clone();
    let (services, worker) = Services::new(s.repository, &config());
    let loans = &services.loans;

    let loan = loans.request_loan(s.book_id, s.borrower).await.unwrap();
    assert_eq!(loan.status, LoanStatus::Requested);

    let due = Utc::now() + Duration::days(21);
    let active = loans.approve_loan(loan.id, s.owner, Some(due)).await.unwrap();
    assert_eq!(active.status, LoanStatus::Active);
    assert_eq!(book_state(&pool, s.book_id).await, (BookStatus::Loaned, Some(s.borrower)));

    let returned = loans.return_book(s.book_id, s.borrower).await.unwrap();
    assert!(returned.returned_at.is_some());
    assert_eq!(book_state(&pool, s.book_id).await, (BookStatus::Available, None));

    let history = loans.get_book_history(s.book_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, LoanStatus::Returned);

    drop(services);
    worker.await.unwrap();

    let inbox = notifications.unread(s.owner).await.unwrap();
    let kinds: Vec<&str> = inbox.iter().map(|(kind, _)| kind.as_str()).collect();
    assert!(kinds.contains(&"LOAN_REQUEST"));
    assert!(kinds.contains(&"LOAN_RETURNED"));
}

#[tokio::test]
#[ignore]
async fn test_reject_removes_row() {
    let s = seed().await;
    let pool = s.repository.pool.clone();
    let (services, _worker) = Services::new(s.repository, &config());

    let loan = services.loans.request_loan(s.book_id, s.borrower).await.unwrap();
    services.loans.reject_loan(loan.id, s.owner).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE id = $1")
        .bind(loan.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore]
async fn test_failed_operation_rolls_back() {
    let s = seed().await;
    let (services, _worker) = Services::new(s.repository, &config());

    let loan = services.loans.request_loan(s.book_id, s.borrower).await.unwrap();
    let result = services.loans.approve_loan(loan.id, s.borrower, None).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));

    let rows = services.loans.get_user_loans(s.borrower).await.unwrap();
    assert_eq!(rows[0].status, LoanStatus::Requested);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_requests_single_winner() {
    let s = seed().await;
    let pool = s.repository.pool.clone();
    let other = seed_user(&pool, "Other").await;
    let (services, _worker) = Services::new(s.repository, &config());

    let a = services.loans.clone();
    let b = services.loans.clone();
    let (first, second) = tokio::join!(
        a.request_loan(s.book_id, s.borrower),
        b.request_loan(s.book_id, other)
    );

    assert!(first.is_ok() != second.is_ok());
    let loser = if first.is_ok() { second } else { first };
    assert!(matches!(loser, Err(AppError::Conflict(_))));

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM loans WHERE book_id = $1 AND status IN ('requested', 'active')",
    )
    .bind(s.book_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open, 1);
}

#[tokio::test]
#[ignore]
async fn test_rolled_back_transaction_publishes_nothing() {
    let s = seed().await;
    let (emitter, mut events) = EventEmitter::bounded(8);
    let repository = s.repository.with_events(emitter);

    let users = MemoryUserDirectory::new();
    users.add(UserContact::new(s.borrower, "Borrower", None));
    let ledger = LoanLedger::new(Arc::new(users));

    let mut uow = repository.begin(1_000).await.unwrap();
    let loan = ledger.request_loan(&mut uow, s.book_id, s.borrower).await.unwrap();
    uow.rollback().await.unwrap();

    assert!(events.try_recv().is_err());
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE id = $1")
        .bind(loan.id)
        .fetch_one(&repository.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let mut uow = repository.begin(1_000).await.unwrap();
    ledger.request_loan(&mut uow, s.book_id, s.borrower).await.unwrap();
    uow.commit().await.unwrap();
    assert!(events.try_recv().is_ok());
}
