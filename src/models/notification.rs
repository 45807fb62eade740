//! Stored notification records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Email,
    InApp,
}

/// Notification stored in Firestore after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    /// Notification ID (also used as document ID)
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
    /// Whether the EMAIL channel actually delivered it
    pub sent: bool,
    #[serde(default)]
    pub is_read: bool,
    /// When it was dispatched (ISO 8601)
    pub created_at: String,
}
