//! User contact details as seen by the ledger

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The slice of a user profile the ledger needs: existence and how to reach them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserContact {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
}

impl UserContact {
    pub fn new(id: Uuid, display_name: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email,
        }
    }

    /// `Name <address>` mailbox string, when an address is known
    pub fn mailbox(&self) -> Option<String> {
        self.email
            .as_ref()
            .map(|email| format!("{} <{}>", self.display_name, email))
    }
}
