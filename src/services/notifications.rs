// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fire-and-forget notification queue.
//!
//! Callers enqueue without waiting; a background worker looks up the
//! recipient, delivers the email (when the user accepts emails) and stores a
//! [`Notification`] record for the in-app inbox.

use crate::db::Store;
use crate::error::Result;
use crate::models::{Notification, NotificationKind, User};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A message waiting to be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub user_id: Uuid,
    pub message: String,
    pub kind: NotificationKind,
}

impl NotificationRequest {
    pub fn email(user_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            kind: NotificationKind::Email,
        }
    }

    pub fn in_app(user_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
            kind: NotificationKind::InApp,
        }
    }
}

#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationRequest>,
    store: Arc<dyn Store>,
}

impl NotificationQueue {
    /// Create the queue and spawn its worker on the current runtime.
    ///
    /// The worker exits once every queue handle has been dropped and the
    /// channel is drained.
    pub fn start(store: Arc<dyn Store>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver, store.clone()));
        (Self { sender, store }, worker)
    }

    /// Queue a notification. Never blocks; drops the request when full.
    pub fn enqueue(&self, request: NotificationRequest) {
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                tracing::warn!(
                    user_id = %request.user_id,
                    "Notification queue full, dropping notification"
                );
            }
            Err(TrySendError::Closed(request)) => {
                tracing::warn!(
                    user_id = %request.user_id,
                    "Notification worker stopped, dropping notification"
                );
            }
        }
    }

    /// Queue the same message for several users.
    pub fn enqueue_all(&self, user_ids: &[Uuid], kind: NotificationKind, message: &str) {
        for user_id in user_ids {
            self.enqueue(NotificationRequest {
                user_id: *user_id,
                message: message.to_string(),
                kind,
            });
        }
    }

    pub async fn list_unread(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let mut notifications = self.store.list_unread_notifications(user_id).await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        self.store.mark_notifications_read(user_id).await
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<NotificationRequest>, store: Arc<dyn Store>) {
    tracing::debug!("Notification worker started");

    while let Some(request) = receiver.recv().await {
        let user_id = request.user_id;
        if let Err(e) = dispatch(store.as_ref(), request).await {
            tracing::warn!(error = %e, %user_id, "Failed to dispatch notification");
        }
    }

    tracing::debug!("Notification worker stopped");
}

async fn dispatch(store: &dyn Store, request: NotificationRequest) -> Result<()> {
    let Some(user) = store.get_user(request.user_id).await? else {
        tracing::warn!(user_id = %request.user_id, "Notification for unknown user");
        return Ok(());
    };

    let sent = match request.kind {
        NotificationKind::Email if user.receive_emails => {
            send_email(&user, &request.message);
            true
        }
        NotificationKind::Email => {
            tracing::debug!(user_id = %user.id, "User opted out of emails");
            false
        }
        NotificationKind::InApp => false,
    };

    store
        .insert_notification(&Notification {
            id: Uuid::new_v4(),
            user_id: user.id,
            message: request.message,
            kind: request.kind,
            sent,
            is_read: false,
            created_at: Utc::now().to_rfc3339(),
        })
        .await
}

/// Email delivery hook. No transport is wired up; the message is logged.
fn send_email(user: &User, message: &str) {
    tracing::info!(to = %user.email, message, "Sending email notification");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_worker_persists_and_respects_opt_out() {
        let store = Arc::new(MemoryStore::new());
        let mut quiet = User::new("quiet", "quiet@example.com");
        quiet.receive_emails = false;
        let loud = User::new("loud", "loud@example.com");
        store.upsert_user(&quiet).await.unwrap();
        store.upsert_user(&loud).await.unwrap();

        let (queue, worker) = NotificationQueue::start(store.clone(), 8);
        queue.enqueue(NotificationRequest::email(quiet.id, "hello"));
        queue.enqueue(NotificationRequest::email(loud.id, "hello"));
        queue.enqueue(NotificationRequest::email(Uuid::new_v4(), "nobody"));
        drop(queue);
        worker.await.unwrap();

        let quiet_inbox = store.list_unread_notifications(quiet.id).await.unwrap();
        assert_eq!(quiet_inbox.len(), 1);
        assert!(!quiet_inbox[0].sent);

        let loud_inbox = store.list_unread_notifications(loud.id).await.unwrap();
        assert_eq!(loud_inbox.len(), 1);
        assert!(loud_inbox[0].sent);
    }

    #[tokio::test]
    async fn test_enqueue_drops_when_full() {
        let store = Arc::new(MemoryStore::new());
        let (sender, mut receiver) = mpsc::channel(1);
        let queue = NotificationQueue {
            sender,
            store: store as Arc<dyn Store>,
        };

        let user_id = Uuid::new_v4();
        queue.enqueue(NotificationRequest::in_app(user_id, "first"));
        queue.enqueue(NotificationRequest::in_app(user_id, "second"));

        assert_eq!(receiver.recv().await.unwrap().message, "first");
        assert!(receiver.try_recv().is_err());
    }
}
