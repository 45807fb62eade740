//! Database layer.
//!
//! [`Store`] is the persistence boundary handed to every service. Production
//! uses [`FirestoreDb`]; tests and local development use [`MemoryStore`].

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{Booking, BookingStatus, Credential, CredentialUpdate, Notification, User};
use async_trait::async_trait;
use uuid::Uuid;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    pub const CREDENTIALS: &str = "credentials";
    pub const BOOKINGS: &str = "bookings";
    pub const NOTIFICATIONS: &str = "notifications";
}

#[async_trait]
pub trait Store: Send + Sync {
    // ─── Users ───────────────────────────────────────────────────

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Users for the given IDs; unknown IDs are skipped.
    async fn get_users(&self, user_ids: &[Uuid]) -> Result<Vec<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn upsert_user(&self, user: &User) -> Result<()>;

    /// Users whose username contains `query` (case-insensitive), by
    /// username, at most `limit`.
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>>;

    /// Remove the user with their credential and notifications.
    async fn delete_user(&self, user_id: Uuid) -> Result<()>;

    // ─── Credentials ─────────────────────────────────────────────

    async fn get_credential(&self, user_id: Uuid) -> Result<Option<Credential>>;

    /// Merge `update` into the stored credential (see [`Credential::apply`]).
    async fn upsert_credential(
        &self,
        user_id: Uuid,
        update: &CredentialUpdate,
    ) -> Result<Credential>;

    // ─── Bookings ────────────────────────────────────────────────

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>>;

    /// Store a new booking. Fails with `Conflict` if the ID exists.
    async fn insert_booking(&self, booking: &Booking) -> Result<()>;

    /// Versioned write.
    ///
    /// Succeeds only if the stored version equals `booking.version`; returns
    /// the saved copy with the version bumped. A mismatch is
    /// `ConcurrentModification`, a missing booking is `NotFound`.
    async fn save_booking(&self, booking: &Booking) -> Result<Booking>;

    async fn delete_booking(&self, booking_id: Uuid) -> Result<()>;

    /// Bookings the user organizes or participates in.
    async fn list_bookings_for_user(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>>;

    /// Bookings organized by the user.
    async fn list_bookings_organized_by(&self, user_id: Uuid) -> Result<Vec<Booking>>;

    /// CONFIRMED bookings that have no external event ID yet.
    async fn list_unsynced_bookings(&self) -> Result<Vec<Booking>>;

    /// Unsynced CONFIRMED bookings organized by the user.
    async fn list_unsynced_bookings_for(&self, organizer_id: Uuid) -> Result<Vec<Booking>>;

    // ─── Notifications ───────────────────────────────────────────

    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    async fn list_unread_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>>;

    /// Returns how many notifications were marked read.
    async fn mark_notifications_read(&self, user_id: Uuid) -> Result<usize>;
}

/// Case-insensitive username match, sorted by username and truncated.
pub(crate) fn filter_users(users: impl Iterator<Item = User>, query: &str, limit: usize) -> Vec<User> {
    let needle = query.to_lowercase();
    let mut found: Vec<User> = users
        .filter(|u| u.username.to_lowercase().contains(&needle))
        .collect();
    found.sort_by(|a, b| a.username.cmp(&b.username).then_with(|| a.id.cmp(&b.id)));
    found.truncate(limit);
    found
}

/// Newest event first, ties broken by booking ID for a stable order.
pub(crate) fn sort_bookings(bookings: &mut [Booking]) {
    bookings.sort_by(|a, b| {
        b.event
            .start_time
            .cmp(&a.event.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}
