//! Fire-and-forget delivery of loan events
//!
//! A unit of work hands the events recorded by the ledger to an
//! [`EventEmitter`] once it has committed. The emitter is a bounded queue
//! that never blocks and never fails the caller. One dispatcher task drains
//! the queue and fans each event out to the notification sinks and, when
//! enabled, to email. Every delivery failure ends up in [`DeliveryReport`]
//! and is logged in one place.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::{
    error::{AppError, AppResult},
    models::{LoanEvent, Notification, UserContact},
    repository::UserDirectory,
};

/// Receives `(event_type, recipient_id, payload)` notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Sends plain-text mail to one address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSink: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}

/// Producer side of the loan event queue
#[derive(Clone, Debug)]
pub struct EventEmitter {
    sender: Option<mpsc::Sender<LoanEvent>>,
}

impl EventEmitter {
    /// Queue holding at most `capacity` undelivered events
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<LoanEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender: Some(sender) }, receiver)
    }

    /// Emitter that discards every event
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Enqueue an event. Never blocks; a full or closed queue drops the event.
    pub fn emit(&self, event: LoanEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    event_type = event.notification_type().as_str(),
                    loan_id = %event.loan().id,
                    "Loan event queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(
                    event_type = event.notification_type().as_str(),
                    loan_id = %event.loan().id,
                    "Loan event queue closed, dropping event"
                );
            }
        }
    }

    /// Enqueue events in order
    pub fn emit_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = LoanEvent>,
    {
        for event in events {
            self.emit(event);
        }
    }
}

/// Outcome of delivering one event
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failures: Vec<String>,
}

impl DeliveryReport {
    fn record(&mut self, channel: &str, result: AppResult<()>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(e) => self.failures.push(format!("{}: {}", channel, e)),
        }
    }
}

/// Fans loan events out to every configured channel
#[derive(Clone)]
pub struct NotificationDispatcher {
    users: Arc<dyn UserDirectory>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    email: Option<Arc<dyn EmailSink>>,
}

impl NotificationDispatcher {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self {
            users,
            sinks: Vec::new(),
            email: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_email(mut self, email: Arc<dyn EmailSink>) -> Self {
        self.email = Some(email);
        self
    }

    /// Deliver one event to every channel. Failures are logged and reported,
    /// never returned as errors.
    pub async fn dispatch(&self, event: &LoanEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let notification = event.to_notification();

        for sink in &self.sinks {
            let result = sink.notify(&notification).await;
            report.record(sink.name(), result);
        }

        if let Some(email) = &self.email {
            match self.send_email(email.as_ref(), event).await {
                Ok(true) => report.delivered += 1,
                Ok(false) => {}
                Err(e) => report.failures.push(format!("email: {}", e)),
            }
        }

        for failure in &report.failures {
            tracing::warn!(
                event_type = notification.event_type.as_str(),
                recipient_id = %notification.recipient_id,
                loan_id = %event.loan().id,
                "Notification delivery failed: {}",
                failure
            );
        }

        report
    }

    /// Returns false when the recipient has no address on file
    async fn send_email(&self, email: &dyn EmailSink, event: &LoanEvent) -> AppResult<bool> {
        let recipient = self
            .users
            .contact(event.recipient_id())
            .await?
            .ok_or_else(|| {
                AppError::Unavailable(format!("Unknown recipient {}", event.recipient_id()))
            })?;

        let Some(to) = recipient.mailbox() else {
            tracing::debug!(recipient_id = %recipient.id, "No email address, skipping mail");
            return Ok(false);
        };

        let (subject, body) = render_email(event, &recipient);
        email.send(&to, &subject, &body).await?;
        Ok(true)
    }
}

/// Subject and plain-text body for an event
pub fn render_email(event: &LoanEvent, recipient: &UserContact) -> (String, String) {
    let title = event.book_title();
    let loan = event.loan();

    let (subject, line) = match event {
        LoanEvent::Requested { .. } => (
            format!("Loan request for \"{}\"", title),
            format!("Someone would like to borrow \"{}\". Open Shelfshare to approve or decline.", title),
        ),
        LoanEvent::Approved { .. } => (
            format!("Your request for \"{}\" was approved", title),
            match loan.due_date {
                Some(due) => format!(
                    "Your loan of \"{}\" is active. Please return it by {}.",
                    title,
                    due.format("%Y-%m-%d")
                ),
                None => format!("Your loan of \"{}\" is active.", title),
            },
        ),
        LoanEvent::Rejected { .. } => (
            format!("Your request for \"{}\" was declined", title),
            format!("The owner of \"{}\" declined your loan request.", title),
        ),
        LoanEvent::Returned { .. } => (
            format!("\"{}\" was returned", title),
            format!("\"{}\" is back on your shelf and available again.", title),
        ),
        LoanEvent::DueDateChanged { .. } => (
            format!("New due date for \"{}\"", title),
            match loan.due_date {
                Some(due) => format!("\"{}\" is now due on {}.", title, due.format("%Y-%m-%d")),
                None => format!("\"{}\" no longer has a due date.", title),
            },
        ),
    };

    let body = format!("Hello {},\n\n{}\n", recipient.display_name, line);
    (subject, body)
}

/// Drain the queue until every emitter is dropped
pub fn spawn_dispatcher(
    dispatcher: NotificationDispatcher,
    mut receiver: mpsc::Receiver<LoanEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            dispatcher.dispatch(&event).await;
        }
        tracing::debug!("Loan event queue closed, dispatcher stopping");
    })
}
