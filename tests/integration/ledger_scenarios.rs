//! Lending lifecycle scenarios against the in-memory store

use std::sync::Arc;

use chrono::{Duration, Utc};
use shelfshare_loans::{
    models::{Book, BookStatus, CreateBook, LoanEvent, LoanStatus},
    repository::{MemoryStore, MemoryUserDirectory},
    services::{guard::BookAvailabilityGuard, history::LoanHistory, ledger::LoanLedger, notifications::EventEmitter},
    AppError,
};
use tokio::sync::mpsc::Receiver;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

struct World {
    store: MemoryStore,
    ledger: LoanLedger,
    history: LoanHistory,
    events: Receiver<LoanEvent>,
    owner: Uuid,
    u1: Uuid,
    u2: Uuid,
    book: Book,
}

async fn world() -> World {
    let users = MemoryUserDirectory::new();
    let owner = users.add_named("Owner");
    let u1 = users.add_named("First borrower");
    let u2 = users.add_named("Second borrower");
    let users = Arc::new(users);

    let (emitter, events) = EventEmitter::bounded(64);
    let store = MemoryStore::with_events(emitter);
    let book = store.insert_book(CreateBook::new(owner, "A Wizard of Earthsea")).await;

    World {
        store,
        ledger: LoanLedger::new(users.clone()),
        history: LoanHistory::new(users),
        events,
        owner,
        u1,
        u2,
        book,
    }
}

/// Run one ledger call in its own unit of work, committing only on success
macro_rules! tx {
    ($world:expr, |$uow:ident| $call:expr) => {{
        let mut $uow = $world.store.begin().await;
        let result = $call.await;
        if result.is_ok() {
            $uow.commit();
        }
        result
    }};
}

async fn assert_book_consistent(world: &World) {
    let book = world.store.book(world.book.id).await.unwrap();
    let loans = world.store.loans_of_book(world.book.id).await;
    let open: Vec<_> = loans.iter().filter(|l| l.status.is_open()).collect();

    assert!(open.len() <= 1, "more than one open loan: {:?}", open);
    assert!(book.lending_is_consistent());
    BookAvailabilityGuard::verify(&book, open.first().copied()).unwrap();
}

#[tokio::test]
async fn scenario_request_creates_pending_loan_for_owner() {
    let w = world().await;

    let loan = assert_ok!(tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)));

    assert_eq!(loan.status, LoanStatus::Requested);
    assert_eq!(loan.lender_id, w.book.owner_id);
    assert!(loan.approved_at.is_none());
    assert_eq!(w.store.book(w.book.id).await.unwrap().status, BookStatus::Available);
    assert_book_consistent(&w).await;
}

#[tokio::test]
async fn scenario_full_lifecycle() {
    let mut w = world().await;
    let due = Utc::now() + Duration::days(14);

    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();

    // approve with a due date
    let approved = tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, Some(due))).unwrap();
    assert_eq!(approved.status, LoanStatus::Active);
    assert_eq!(approved.due_date, Some(due));
    let book = w.store.book(w.book.id).await.unwrap();
    assert_eq!(book.status, BookStatus::Loaned);
    assert_eq!(book.current_borrower_id, Some(w.u1));
    assert_book_consistent(&w).await;

    // a second borrower is refused while the book is out
    let second = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u2));
    assert!(matches!(second, Err(AppError::Conflict(_))));

    // the borrower returns it
    let returned = tx!(w, |uow| w.ledger.return_book(&mut uow, w.book.id, w.u1)).unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);
    assert!(returned.returned_at.is_some());

    let book = w.store.book(w.book.id).await.unwrap();
    assert_eq!(book.status, BookStatus::Available);
    assert_eq!(book.current_borrower_id, None);
    assert_book_consistent(&w).await;

    let loans = w.store.loans_of_book(w.book.id).await;
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].status, LoanStatus::Returned);

    let kinds: Vec<_> = std::iter::from_fn(|| w.events.try_recv().ok())
        .map(|e| e.notification_type().as_str())
        .collect();
    assert_eq!(kinds, vec!["LOAN_REQUEST", "LOAN_APPROVED", "LOAN_RETURNED"]);
}

#[tokio::test]
async fn scenario_reject_deletes_pending_loan() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();

    tx!(w, |uow| w.ledger.reject_loan(&mut uow, l1.id, w.owner)).unwrap();

    assert!(w.store.loan(l1.id).await.is_none());
    let book = w.store.book(w.book.id).await.unwrap();
    assert_eq!(book.status, BookStatus::Available);
    assert_eq!(book.current_borrower_id, None);

    // the book can be requested again afterwards
    let again = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u2)).unwrap();
    assert_ne!(again.id, l1.id);
}

#[tokio::test]
async fn failed_or_abandoned_work_sends_no_notification() {
    let mut w = world().await;

    // abandoned after a successful call
    let mut uow = w.store.begin().await;
    let loan = w.ledger.request_loan(&mut uow, w.book.id, w.u1).await.unwrap();
    uow.rollback();
    assert!(w.store.loan(loan.id).await.is_none());
    assert!(w.events.try_recv().is_err());

    // committed
    let loan = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    assert_eq!(w.events.try_recv().unwrap().loan().id, loan.id);

    // refused by the ledger
    let refused = tx!(w, |uow| w.ledger.approve_loan(&mut uow, loan.id, w.u2, None));
    assert!(matches!(refused, Err(AppError::Unauthorized(_))));
    assert!(w.events.try_recv().is_err());
}

#[tokio::test]
async fn repeated_request_returns_same_loan() {
    let w = world().await;

    let first = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    let second = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(w.store.loans_of_book(w.book.id).await.len(), 1);
}

#[tokio::test]
async fn borrower_holding_book_cannot_request_again() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, None)).unwrap();

    let again = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1));
    assert!(matches!(again, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn pending_request_blocks_other_borrowers() {
    let w = world().await;
    tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();

    let other = assert_err!(tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u2)));
    assert!(matches!(other, AppError::Conflict(_)));
    assert_book_consistent(&w).await;
}

#[tokio::test]
async fn mismatched_lender_mutates_nothing() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    let stranger = w.u2;

    let approve = tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, stranger, None));
    let reject = tx!(w, |uow| w.ledger.reject_loan(&mut uow, l1.id, stranger));
    assert!(matches!(approve, Err(AppError::Unauthorized(_))));
    assert!(matches!(reject, Err(AppError::Unauthorized(_))));

    tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, None)).unwrap();
    let due = tx!(w, |uow| w.ledger.set_due_date(&mut uow, l1.id, stranger, Utc::now()));
    assert!(matches!(due, Err(AppError::Unauthorized(_))));

    let stored = w.store.loan(l1.id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Active);
    assert_eq!(stored.due_date, None);
}

#[tokio::test]
async fn approving_active_loan_fails_cleanly() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    let first = tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, None)).unwrap();

    let second = tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, Some(Utc::now())));
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let stored = w.store.loan(l1.id).await.unwrap();
    assert_eq!(stored.approved_at, first.approved_at);
    assert_eq!(stored.due_date, None);
}

#[tokio::test]
async fn lender_may_record_the_return() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, None)).unwrap();

    let returned = tx!(w, |uow| w.ledger.return_book(&mut uow, w.book.id, w.owner)).unwrap();
    assert_eq!(returned.id, l1.id);
    assert_book_consistent(&w).await;
}

#[tokio::test]
async fn book_history_lists_every_borrower_newest_first() {
    let w = world().await;

    for borrower in [w.u1, w.u2] {
        let loan = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, borrower)).unwrap();
        tx!(w, |uow| w.ledger.approve_loan(&mut uow, loan.id, w.owner, None)).unwrap();
        tx!(w, |uow| w.ledger.return_book(&mut uow, w.book.id, borrower)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let rows = tx!(w, |uow| w.history.get_book_history(&mut uow, w.book.id)).unwrap();
    let borrowers: Vec<Uuid> = rows.iter().map(|r| r.borrower_id).collect();
    assert_eq!(borrowers, vec![w.u2, w.u1]);
    assert!(rows.iter().all(|r| r.status == LoanStatus::Returned));

    let owner_view = tx!(w, |uow| w.history.get_user_loans(&mut uow, w.owner)).unwrap();
    assert_eq!(owner_view.len(), 2);
    let u1_view = tx!(w, |uow| w.history.get_user_loans(&mut uow, w.u1)).unwrap();
    assert_eq!(u1_view.len(), 1);
}

#[tokio::test]
async fn overdue_flag_in_history() {
    let w = world().await;
    let l1 = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap();
    let yesterday = Utc::now() - Duration::days(1);
    tx!(w, |uow| w.ledger.approve_loan(&mut uow, l1.id, w.owner, Some(yesterday))).unwrap();

    let rows = tx!(w, |uow| w.history.get_user_loans(&mut uow, w.u1)).unwrap();
    assert!(rows[0].is_overdue);
}

#[tokio::test]
async fn concurrent_requests_leave_one_open_loan() {
    let w = world().await;

    let mut handles = Vec::new();
    for borrower in [w.u1, w.u2] {
        let (store, ledger, book_id) = (w.store.clone(), w.ledger.clone(), w.book.id);
        handles.push(tokio::spawn(async move {
            let mut uow = store.begin().await;
            let result = ledger.request_loan(&mut uow, book_id, borrower).await;
            if result.is_ok() {
                uow.commit();
            }
            result
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(AppError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(ok, 1);
    assert_book_consistent(&w).await;
}

#[tokio::test]
async fn concurrent_approvals_lend_once() {
    let w = world().await;
    let loan_id = tx!(w, |uow| w.ledger.request_loan(&mut uow, w.book.id, w.u1)).unwrap().id;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let (store, ledger, owner) = (w.store.clone(), w.ledger.clone(), w.owner);
        handles.push(tokio::spawn(async move {
            let mut uow = store.begin().await;
            let result = ledger.approve_loan(&mut uow, loan_id, owner, None).await;
            if result.is_ok() {
                uow.commit();
            }
            result.is_ok()
        }));
    }

    let mut approved = 0;
    for handle in handles {
        if handle.await.unwrap() {
            approved += 1;
        }
    }

    assert_eq!(approved, 1);
    assert_book_consistent(&w).await;
}
