// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides the [`Store`] operations for:
//! - Users (profile storage)
//! - Credentials (Google OAuth tokens)
//! - Bookings (event and participants embedded in one document)
//! - Notifications (dispatched messages)

use super::{collections, filter_users, sort_bookings, Store};
use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingStatus, Credential, CredentialUpdate, Notification, User,
};
use async_trait::async_trait;
use firestore::errors::FirestoreError;
use firestore::{FirestoreConsistencySelector, FirestoreResult, FirestoreTransaction};
use std::collections::HashMap;
use uuid::Uuid;

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Attempts at a credential read-merge-write before giving up.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Commit lost to a concurrent transaction touching the same document.
fn is_aborted(e: &FirestoreError) -> bool {
    matches!(e, FirestoreError::DatabaseError(db) if db.public.code == "Aborted")
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    /// Client whose reads join `transaction`, so the commit fails if a read
    /// document changed in between.
    fn in_transaction(&self, transaction: &FirestoreTransaction<'_>) -> firestore::FirestoreDb {
        self.client
            .clone_with_consistency_selector(FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ))
    }

    /// One transactional read-merge-write of a credential.
    async fn try_upsert_credential(
        &self,
        user_id: Uuid,
        update: &CredentialUpdate,
    ) -> FirestoreResult<Credential> {
        let mut transaction = self.client.begin_transaction().await?;

        let existing: Option<Credential> = match self
            .in_transaction(&transaction)
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(&user_id.to_string())
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(e);
            }
        };

        let credential = Credential::apply(existing, user_id, update);

        self.client
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(user_id.to_string())
            .object(&credential)
            .add_to_transaction(&mut transaction)?;

        transaction.commit().await?;
        Ok(credential)
    }

    /// Query bookings where `field` equals `user_id`.
    async fn bookings_where_user(&self, field: &'static str, user_id: Uuid) -> Result<Vec<Booking>> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::BOOKINGS)
            .filter(move |q| q.field(field).eq(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Bookings whose participant list contains `user_id`.
    async fn bookings_with_participant(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::BOOKINGS)
            .filter(move |q| q.field("participant_ids").array_contains(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn list_notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete documents by ID in transactional batches.
    async fn batch_delete(&self, collection: &str, doc_ids: &[String]) -> Result<()> {
        for chunk in doc_ids.chunks(BATCH_SIZE) {
            let mut transaction = self
                .client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for doc_id in chunk {
                self.client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add delete to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch delete: {}", e))
            })?;
        }

        Ok(())
    }

    /// Write documents in transactional batches.
    async fn batch_write<T, F>(&self, items: &[T], collection: &str, id_extractor: F) -> Result<()>
    where
        T: serde::Serialize + Sync + Send,
        for<'de> T: serde::Deserialize<'de>,
        F: Fn(&T) -> String,
    {
        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = self
                .client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                self.client
                    .fluent()
                    .update()
                    .in_col(collection)
                    .document_id(&doc_id)
                    .object(item)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add write to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch write: {}", e))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl Store for FirestoreDb {
    // ─── User Operations ─────────────────────────────────────────

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(&user_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn get_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(user) = self.get_user(*user_id).await? {
                users.push(user);
            }
        }
        Ok(users)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        let users: Vec<User> = self
            .client
            .fluent()
            .select()
            .from(collections::USERS)
            .filter(move |q| q.field("email").eq(email.clone()))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(users.into_iter().next())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(user.id.to_string())
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Firestore has no substring match, so the username filter runs here.
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>> {
        let users: Vec<User> = self
            .client
            .fluent()
            .select()
            .from(collections::USERS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(filter_users(users.into_iter(), query, limit))
    }

    async fn delete_user(&self, user_id: Uuid) -> Result<()> {
        let notifications = self.list_notifications_for(user_id).await?;
        let notification_ids: Vec<String> =
            notifications.iter().map(|n| n.id.to_string()).collect();
        self.batch_delete(collections::NOTIFICATIONS, &notification_ids)
            .await?;

        let user_id = user_id.to_string();
        self.batch_delete(collections::CREDENTIALS, std::slice::from_ref(&user_id))
            .await?;
        self.batch_delete(collections::USERS, std::slice::from_ref(&user_id))
            .await?;

        tracing::info!(%user_id, notifications = notification_ids.len(), "User deleted");
        Ok(())
    }

    // ─── Credential Operations ───────────────────────────────────

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(&user_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Read, merge and write in one transaction, so a refresh racing a new
    /// sign-in cannot write back a stale refresh token.
    async fn upsert_credential(
        &self,
        user_id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Credential> {
        let mut attempt = 1;
        loop {
            match self.try_upsert_credential(user_id, update).await {
                Ok(credential) => return Ok(credential),
                Err(e) if is_aborted(&e) && attempt < MAX_CREDENTIAL_ATTEMPTS => {
                    tracing::debug!(%user_id, attempt, "Credential transaction aborted, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(AppError::Database(format!(
                        "Failed to store credential: {}",
                        e
                    )))
                }
            }
        }
    }

    // ─── Booking Operations ──────────────────────────────────────

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::BOOKINGS)
            .obj()
            .one(&booking_id.to_string())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<()> {
        let _: Booking = self
            .client
            .fluent()
            .insert()
            .into(collections::BOOKINGS)
            .document_id(booking.id.to_string())
            .object(booking)
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataConflictError(_) => {
                    AppError::Conflict(format!("Booking {} already exists", booking.id))
                }
                other => AppError::Database(other.to_string()),
            })?;
        Ok(())
    }

    /// Versioned write inside a transaction.
    ///
    /// The booking is read through the transaction, so the version check and
    /// the write commit together: a writer on another instance that commits
    /// first aborts this one, which surfaces as `ConcurrentModification`.
    async fn save_booking(&self, booking: &Booking) -> Result<Booking> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<Booking> = match self
            .in_transaction(&transaction)
            .fluent()
            .select()
            .by_id_in(collections::BOOKINGS)
            .obj()
            .one(&booking.id.to_string())
            .await
        {
            Ok(current) => current,
            Err(e) => {
                let _ = transaction.rollback().await;
                return Err(AppError::Database(format!(
                    "Failed to read booking in transaction: {}",
                    e
                )));
            }
        };

        let current = match current {
            Some(current) => current,
            None => {
                let _ = transaction.rollback().await;
                return Err(AppError::NotFound(format!("Booking {}", booking.id)));
            }
        };

        if current.version != booking.version {
            tracing::debug!(
                booking_id = %booking.id,
                expected = booking.version,
                found = current.version,
                "Booking version mismatch"
            );
            let _ = transaction.rollback().await;
            return Err(AppError::ConcurrentModification(booking.id));
        }

        let mut saved = booking.clone();
        saved.version += 1;
        saved.updated_at = chrono::Utc::now();

        self.client
            .fluent()
            .update()
            .in_col(collections::BOOKINGS)
            .document_id(saved.id.to_string())
            .object(&saved)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add booking to transaction: {}", e))
            })?;

        transaction.commit().await.map_err(|e| {
            if is_aborted(&e) {
                AppError::ConcurrentModification(booking.id)
            } else {
                AppError::Database(format!("Transaction commit failed: {}", e))
            }
        })?;

        Ok(saved)
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<()> {
        self.client
            .fluent()
            .delete()
            .from(collections::BOOKINGS)
            .document_id(booking_id.to_string())
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_bookings_for_user(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        // Firestore cannot OR an equality with an array-contains cheaply,
        // so run both queries and merge by ID.
        let organized = self.bookings_where_user("organizer_id", user_id).await?;
        let invited = self.bookings_with_participant(user_id).await?;

        let mut by_id: HashMap<Uuid, Booking> = HashMap::new();
        for booking in organized.into_iter().chain(invited) {
            by_id.entry(booking.id).or_insert(booking);
        }

        let mut bookings: Vec<Booking> = by_id
            .into_values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_bookings_organized_by(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let mut bookings = self.bookings_where_user("organizer_id", user_id).await?;
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_unsynced_bookings(&self) -> Result<Vec<Booking>> {
        let confirmed: Vec<Booking> = self
            .client
            .fluent()
            .select()
            .from(collections::BOOKINGS)
            .filter(|q| q.field("status").eq(BookingStatus::Confirmed.as_str()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut bookings: Vec<Booking> = confirmed
            .into_iter()
            .filter(|b| b.external_event_id.is_none())
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    async fn list_unsynced_bookings_for(&self, organizer_id: Uuid) -> Result<Vec<Booking>> {
        let organizer_id = organizer_id.to_string();
        let confirmed: Vec<Booking> = self
            .client
            .fluent()
            .select()
            .from(collections::BOOKINGS)
            .filter(move |q| {
                q.for_all([
                    q.field("organizer_id").eq(organizer_id.clone()),
                    q.field("status").eq(BookingStatus::Confirmed.as_str()),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut bookings: Vec<Booking> = confirmed
            .into_iter()
            .filter(|b| b.external_event_id.is_none())
            .collect();
        sort_bookings(&mut bookings);
        Ok(bookings)
    }

    // ─── Notification Operations ─────────────────────────────────

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let _: () = self
            .client
            .fluent()
            .update()
            .in_col(collections::NOTIFICATIONS)
            .document_id(notification.id.to_string())
            .object(notification)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let user_id = user_id.to_string();
        self.client
            .fluent()
            .select()
            .from(collections::NOTIFICATIONS)
            .filter(move |q| {
                q.for_all([
                    q.field("user_id").eq(user_id.clone()),
                    q.field("is_read").eq(false),
                ])
            })
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn mark_notifications_read(&self, user_id: Uuid) -> Result<usize> {
        let mut unread = self.list_unread_notifications(user_id).await?;
        for notification in unread.iter_mut() {
            notification.is_read = true;
        }

        self.batch_write(&unread, collections::NOTIFICATIONS, |n: &Notification| {
            n.id.to_string()
        })
        .await?;

        tracing::debug!(%user_id, count = unread.len(), "Marked notifications read");
        Ok(unread.len())
    }
}
