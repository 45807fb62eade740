// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use rendezvous::config::Config;
use rendezvous::db::{FirestoreDb, MemoryStore, Store};
use rendezvous::error::{AppError, Result};
use rendezvous::middleware::auth::create_jwt;
use rendezvous::models::{Booking, BookingInput, User};
use rendezvous::routes::create_router;
use rendezvous::services::{CalendarSync, GoogleClient, GoogleEndpoints};
use rendezvous::AppState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

// ─── Fake calendar ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum CalendarCall {
    Create(Uuid),
    Update(Uuid),
    Delete(Uuid),
    Invite(Uuid),
}

/// Records every gateway call; can be switched to fail or to create slowly.
#[derive(Default)]
pub struct FakeCalendar {
    calls: Mutex<Vec<CalendarCall>>,
    failing: AtomicBool,
    next_id: AtomicUsize,
    create_delay_ms: AtomicU64,
}

#[allow(dead_code)]
impl FakeCalendar {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every `create_event` take `delay` before answering.
    pub fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CalendarCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&CalendarCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: CalendarCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::CalendarSync("calendar unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarSync for FakeCalendar {
    async fn create_event(&self, booking: &Booking) -> Result<String> {
        self.record(CalendarCall::Create(booking.id))?;
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("evt-{}", n))
    }

    async fn update_event(&self, booking: &Booking) -> Result<()> {
        self.record(CalendarCall::Update(booking.id))
    }

    async fn delete_event(&self, booking: &Booking) -> Result<()> {
        self.record(CalendarCall::Delete(booking.id))
    }

    async fn invite_participants(&self, booking: &Booking) -> Result<()> {
        self.record(CalendarCall::Invite(booking.id))
    }
}

// ─── App harness ─────────────────────────────────────────────────────────────

#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub calendar: Arc<FakeCalendar>,
}

/// App over the in-memory store and a fake calendar.
///
/// Must be called inside a Tokio runtime (the notification worker is spawned).
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    let config = Config::test_default();
    let store = Arc::new(MemoryStore::new());
    let calendar = Arc::new(FakeCalendar::default());

    // Nothing listens on port 9; any real Google call fails fast.
    let google = GoogleClient::with_endpoints(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        GoogleEndpoints::with_base("http://127.0.0.1:9"),
    );

    let state = Arc::new(AppState::new(
        config,
        store.clone(),
        google,
        Some(calendar.clone() as Arc<dyn CalendarSync>),
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        calendar,
    }
}

/// Session token for `user_id` signed with the test key.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: Uuid) -> String {
    create_jwt(user_id, &Config::test_default().jwt_signing_key).unwrap()
}

#[allow(dead_code)]
pub async fn seed_user(store: &dyn Store, name: &str) -> User {
    let user = User::new(name, format!("{}@example.com", name));
    store.upsert_user(&user).await.unwrap();
    user
}

/// A valid booking request one hour long.
#[allow(dead_code)]
pub fn booking_input(participants: &[Uuid]) -> BookingInput {
    BookingInput {
        title: "Project sync".to_string(),
        description: Some("Weekly check-in".to_string()),
        duration: 60,
        platform: "Meet".to_string(),
        start_time: "2030-01-08T10:00:00Z".to_string(),
        end_time: "2030-01-08T11:00:00Z".to_string(),
        participant_ids: participants.to_vec(),
    }
}

/// Wait until the notification worker has stored `count` unread notifications.
#[allow(dead_code)]
pub async fn wait_for_notifications(store: &dyn Store, user_id: Uuid, count: usize) -> bool {
    for _ in 0..200 {
        let unread = store.list_unread_notifications(user_id).await.unwrap();
        if unread.len() >= count {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
