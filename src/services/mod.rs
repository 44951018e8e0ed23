//! Business logic services

pub mod email;
pub mod guard;
pub mod history;
pub mod ledger;
pub mod loans;
pub mod notifications;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{config::AppConfig, repository::Repository, repository::UserDirectory};

use notifications::{EventEmitter, NotificationDispatcher};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub ledger: ledger::LoanLedger,
    pub history: history::LoanHistory,
    pub loans: loans::LoansService,
}

impl Services {
    /// Wire the ledger to the database and start the notification dispatcher.
    ///
    /// The returned handle finishes once every clone of `Services` is dropped
    /// and the queued events are delivered.
    pub fn new(repository: Repository, config: &AppConfig) -> (Self, JoinHandle<()>) {
        let users: Arc<dyn UserDirectory> = Arc::new(repository.users.clone());

        let mut dispatcher = NotificationDispatcher::new(users.clone());
        if config.notifications.in_app {
            dispatcher = dispatcher.with_sink(Arc::new(repository.notifications.clone()));
        }
        if let Some(email) = email::SmtpEmailSink::from_config(&config.email) {
            tracing::info!("Email notifications enabled via {}", config.email.smtp_host);
            dispatcher = dispatcher.with_email(Arc::new(email));
        }

        let (emitter, receiver) = EventEmitter::bounded(config.notifications.queue_capacity);
        let worker = notifications::spawn_dispatcher(dispatcher, receiver);
        let repository = repository.with_events(emitter);

        let ledger = ledger::LoanLedger::new(users.clone());
        let history = history::LoanHistory::new(users);
        let loans = loans::LoansService::new(
            repository,
            ledger.clone(),
            history.clone(),
            config.ledger.lock_timeout_ms,
        );

        (Self { ledger, history, loans }, worker)
    }
}
