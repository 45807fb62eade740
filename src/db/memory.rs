// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory store for tests and local development.
//!
//! All collections live behind one lock, so every trait method is atomic.

use super::{filter_users, sort_bookings, Store};
use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingStatus, Credential, CredentialUpdate, Notification, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Collections {
    users: HashMap<Uuid, User>,
    credentials: HashMap<Uuid, Credential>,
    bookings: HashMap<Uuid, Booking>,
    notifications: Vec<Notification>,
}

/// Shared in-memory store; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>> {
        let inner = self.inner.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.inner.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>> {
        let inner = self.inner.read().await;
        Ok(filter_users(inner.users.values().cloned(), query, limit))
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.users.remove(&user_id);
        inner.credentials.remove(&user_id);
        inner.notifications.retain(|n| n.user_id != user_id);
        Ok(())
    }

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        Ok(self.inner.read().await.credentials.get(&user_id).cloned())
    }

    async fn upsert_credential(
        &self,
        user_id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Credential> {
        let mut inner = self.inner.write().await;
        let existing = inner.credentials.remove(&user_id);
        let credential = Credential::apply(existing, user_id, update);
        inner.credentials.insert(user_id, credential.clone());
        Ok(credential)
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        Ok(self.inner.read().await.bookings.get(&booking_id).cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.bookings.contains_key(&booking.id) {
            return Err(AppError::Conflict(format!(
                "Booking {} already exists",
                booking.id
            )));
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn save_booking(&self, booking: &Booking) -> Result<Booking> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| AppError::NotFound(format!("Booking {}", booking.id)))?;

        if stored.version != booking.version {
            return Err(AppError::ConcurrentModification(booking.id));
        }

        let mut saved = booking.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        *stored = saved.clone();
        Ok(saved)
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<()> {
        self.inner.write().await.bookings.remove(&booking_id);
        Ok(())
    }

    async fn list_bookings_for_user(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.involves(user_id))
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_bookings_organized_by(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.organizer_id == user_id)
            .cloned()
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_unsynced_bookings(&self) -> Result<Vec<Booking>> {
        let inner = self.inner.read().await;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.external_event_id.is_none())
            .cloned()
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_unsynced_bookings_for(&self, organizer_id: Uuid) -> Result<Vec<Booking>> {
        let mut bookings = self.list_unsynced_bookings().await?;
        bookings.retain(|b| b.organizer_id == organizer_id);
        Ok(bookings)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.inner
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn list_unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .inner
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .cloned()
            .collect())
    }

    async fn mark_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let mut count = 0;
        for notification in inner
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingInput, CredentialUpdate};
    use chrono::Duration;

    fn booking(organizer: Uuid, participants: &[Uuid]) -> Booking {
        let input = BookingInput {
            title: "Sync".to_string(),
            description: None,
            duration: 30,
            platform: "Meet".to_string(),
            start_time: "2030-01-07T10:00:00Z".to_string(),
            end_time: "2030-01-07T10:30:00Z".to_string(),
            participant_ids: participants.to_vec(),
        };
        Booking::new(organizer, input.to_event(organizer).unwrap(), participants)
    }

    #[tokio::test]
    async fn test_save_booking_checks_version() {
        let store = MemoryStore::new();
        let original = booking(Uuid::new_v4(), &[Uuid::new_v4()]);
        store.insert_booking(&original).await.unwrap();

        let saved = store.save_booking(&original).await.unwrap();
        assert_eq!(saved.version, 1);

        // A second writer still holding version 0 loses.
        let err = store.save_booking(&original).await.unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification(id) if id == original.id));
    }

    #[tokio::test]
    async fn test_insert_booking_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let b = booking(Uuid::new_v4(), &[Uuid::new_v4()]);
        store.insert_booking(&b).await.unwrap();

        let err = store.insert_booking(&b).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_bookings_for_user_covers_both_roles() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let organized = booking(alice, &[bob]);
        let invited = booking(bob, &[alice]);
        let unrelated = booking(bob, &[Uuid::new_v4()]);
        for b in [&organized, &invited, &unrelated] {
            store.insert_booking(b).await.unwrap();
        }

        let listed = store.list_bookings_for_user(alice, None).await.unwrap();
        assert_eq!(listed.len(), 2);

        let confirmed = store
            .list_bookings_for_user(alice, Some(BookingStatus::Confirmed))
            .await
            .unwrap();
        assert!(confirmed.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_credential_preserves_refresh_token() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();

        let issued = CredentialUpdate {
            access_token: "a1".to_string(),
            refresh_token: Some("r1".to_string()),
            token_type: "Bearer".to_string(),
            expiry_date: Utc::now(),
            scope: Some("calendar".to_string()),
        };
        store.upsert_credential(user_id, &issued).await.unwrap();

        let refreshed = CredentialUpdate {
            access_token: "a2".to_string(),
            refresh_token: None,
            expiry_date: Utc::now() + Duration::hours(1),
            ..issued
        };
        let stored = store.upsert_credential(user_id, &refreshed).await.unwrap();

        assert_eq!(stored.access_token, "a2");
        assert_eq!(stored.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_mark_notifications_read() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        for message in ["one", "two"] {
            store
                .insert_notification(&Notification {
                    id: Uuid::new_v4(),
                    user_id,
                    message: message.to_string(),
                    kind: crate::models::NotificationKind::InApp,
                    sent: false,
                    is_read: false,
                    created_at: Utc::now().to_rfc3339(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.mark_notifications_read(user_id).await.unwrap(), 2);
        assert!(store
            .list_unread_notifications(user_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_search_users_case_insensitive_and_limited() {
        let store = MemoryStore::new();
        for name in ["Annabel", "hannah", "Bob", "Joanna"] {
            store
                .upsert_user(&User::new(name, format!("{}@example.com", name)))
                .await
                .unwrap();
        }

        let found = store.search_users("ANN", 10).await.unwrap();
        let names: Vec<&str> = found.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["Annabel", "Joanna", "hannah"]);

        assert_eq!(store.search_users("ann", 2).await.unwrap().len(), 2);
        assert!(store.search_users("zed", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_user_removes_credential_and_notifications() {
        let store = MemoryStore::new();
        let user = User::new("gone", "gone@example.com");
        store.upsert_user(&user).await.unwrap();
        store
            .upsert_credential(
                user.id,
                &CredentialUpdate {
                    access_token: "a".to_string(),
                    refresh_token: Some("r".to_string()),
                    token_type: "Bearer".to_string(),
                    expiry_date: Utc::now(),
                    scope: None,
                },
            )
            .await
            .unwrap();
        store
            .insert_notification(&Notification {
                id: Uuid::new_v4(),
                user_id: user.id,
                message: "bye".to_string(),
                kind: crate::models::NotificationKind::InApp,
                sent: false,
                is_read: false,
                created_at: Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();

        store.delete_user(user.id).await.unwrap();

        assert!(store.get_user(user.id).await.unwrap().is_none());
        assert!(store.get_credential(user.id).await.unwrap().is_none());
        assert!(store
            .list_unread_notifications(user.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unsynced_bookings_for_organizer() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut mine = booking(alice, &[bob]);
        mine.status = BookingStatus::Confirmed;
        let mut theirs = booking(bob, &[alice]);
        theirs.status = BookingStatus::Confirmed;
        store.insert_booking(&mine).await.unwrap();
        store.insert_booking(&theirs).await.unwrap();

        let scoped = store.list_unsynced_bookings_for(alice).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, mine.id);
        assert_eq!(store.list_unsynced_bookings().await.unwrap().len(), 2);
    }
}
