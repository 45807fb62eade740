// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (`FIRESTORE_EMULATOR_HOST` set); they skip otherwise.

use chrono::{Duration, Utc};
use rendezvous::db::Store;
use rendezvous::error::AppError;
use rendezvous::models::{
    Booking, BookingStatus, CredentialUpdate, Notification, NotificationKind, ParticipantResponse,
    User,
};
use uuid::Uuid;

mod common;
use common::{booking_input, test_db};

/// Unique email so runs against a long-lived emulator don't collide.
fn test_user(name: &str) -> User {
    User::new(name, format!("{}+{}@example.com", name, Uuid::new_v4()))
}

fn test_booking(organizer: Uuid, participants: &[Uuid]) -> Booking {
    let event = booking_input(participants).to_event(organizer).unwrap();
    Booking::new(organizer, event, participants)
}

fn update(access: &str, refresh: Option<&str>) -> CredentialUpdate {
    CredentialUpdate {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        token_type: "Bearer".to_string(),
        expiry_date: Utc::now() + Duration::hours(1),
        scope: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// USERS AND CREDENTIALS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_user_round_trip_and_lookup() {
    require_emulator!();

    let db = test_db().await;
    let user = test_user("ana");

    assert!(db.get_user(user.id).await.unwrap().is_none());
    db.upsert_user(&user).await.unwrap();

    assert_eq!(db.get_user(user.id).await.unwrap(), Some(user.clone()));
    assert_eq!(
        db.find_user_by_email(&user.email).await.unwrap(),
        Some(user.clone())
    );

    let other = test_user("bo");
    db.upsert_user(&other).await.unwrap();
    let found = db.get_users(&[user.id, Uuid::new_v4(), other.id]).await.unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_credential_keeps_refresh_token() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();

    db.upsert_credential(user_id, &update("first", Some("refresh-1")))
        .await
        .unwrap();
    let merged = db
        .upsert_credential(user_id, &update("second", None))
        .await
        .unwrap();
    assert_eq!(merged.access_token, "second");
    assert_eq!(merged.refresh_token, "refresh-1");

    let stored = db.get_credential(user_id).await.unwrap().unwrap();
    assert_eq!(stored, merged);
}

#[tokio::test]
async fn test_concurrent_credential_writes_keep_refresh_token() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();
    db.upsert_credential(user_id, &update("seed", Some("refresh-1")))
        .await
        .unwrap();

    let new_grant = update("signin", Some("refresh-2"));
    let refresh = update("refreshed", None);
    let (a, b) = tokio::join!(
        db.upsert_credential(user_id, &new_grant),
        db.upsert_credential(user_id, &refresh),
    );
    a.unwrap();
    b.unwrap();

    // Whichever order the writes landed in, the newer refresh token survives.
    let stored = db.get_credential(user_id).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token, "refresh-2");
}

#[tokio::test]
async fn test_search_and_delete_user() {
    require_emulator!();

    let db = test_db().await;
    let tag = Uuid::new_v4().simple().to_string();
    let user = test_user(&format!("Searchable{}", tag));
    db.upsert_user(&user).await.unwrap();
    db.upsert_credential(user.id, &update("a", Some("r")))
        .await
        .unwrap();
    db.insert_notification(&Notification {
        id: Uuid::new_v4(),
        user_id: user.id,
        message: "hello".to_string(),
        kind: NotificationKind::InApp,
        sent: false,
        is_read: false,
        created_at: Utc::now().to_rfc3339(),
    })
    .await
    .unwrap();

    let found = db.search_users(&tag.to_uppercase(), 10).await.unwrap();
    assert_eq!(found, vec![user.clone()]);

    db.delete_user(user.id).await.unwrap();
    assert!(db.get_user(user.id).await.unwrap().is_none());
    assert!(db.get_credential(user.id).await.unwrap().is_none());
    assert!(db.list_unread_notifications(user.id).await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// BOOKINGS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_booking_versioned_save() {
    require_emulator!();

    let db = test_db().await;
    let organizer = Uuid::new_v4();
    let participant = Uuid::new_v4();
    let booking = test_booking(organizer, &[participant]);

    db.insert_booking(&booking).await.unwrap();
    let err = db.insert_booking(&booking).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let mut edited = booking.clone();
    edited.participant_mut(participant).unwrap().response = ParticipantResponse::Confirmed;
    edited.status = BookingStatus::Confirmed;
    let saved = db.save_booking(&edited).await.unwrap();
    assert_eq!(saved.version, booking.version + 1);

    // Writing from the stale copy loses.
    let err = db.save_booking(&booking).await.unwrap_err();
    assert!(matches!(err, AppError::ConcurrentModification(id) if id == booking.id));

    let stored = db.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.version, saved.version);
}

#[tokio::test]
async fn test_concurrent_saves_from_same_version() {
    require_emulator!();

    let db = test_db().await;
    let organizer = Uuid::new_v4();
    let participant = Uuid::new_v4();
    let booking = test_booking(organizer, &[participant]);
    db.insert_booking(&booking).await.unwrap();

    let mut confirm = booking.clone();
    confirm.status = BookingStatus::Confirmed;
    let mut decline = booking.clone();
    decline.status = BookingStatus::Declined;

    let (a, b) = tokio::join!(db.save_booking(&confirm), db.save_booking(&decline));
    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::ConcurrentModification(_))));

    let stored = db.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(stored.version, booking.version + 1);
}

#[tokio::test]
async fn test_booking_queries() {
    require_emulator!();

    let db = test_db().await;
    let user = Uuid::new_v4();
    let other = Uuid::new_v4();

    let organized = test_booking(user, &[other]);
    let invited = test_booking(other, &[user]);
    let unrelated = test_booking(other, &[Uuid::new_v4()]);
    for booking in [&organized, &invited, &unrelated] {
        db.insert_booking(booking).await.unwrap();
    }

    let mine = db.list_bookings_for_user(user, None).await.unwrap();
    let ids: Vec<Uuid> = mine.iter().map(|b| b.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&organized.id));
    assert!(ids.contains(&invited.id));

    let confirmed = db
        .list_bookings_for_user(user, Some(BookingStatus::Confirmed))
        .await
        .unwrap();
    assert!(confirmed.is_empty());

    let by_me = db.list_bookings_organized_by(user).await.unwrap();
    assert_eq!(by_me.len(), 1);
    assert_eq!(by_me[0].id, organized.id);

    db.delete_booking(invited.id).await.unwrap();
    assert!(db.get_booking(invited.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unsynced_bookings() {
    require_emulator!();

    let db = test_db().await;
    let mut booking = test_booking(Uuid::new_v4(), &[Uuid::new_v4()]);
    booking.status = BookingStatus::Confirmed;
    db.insert_booking(&booking).await.unwrap();

    let unsynced = db.list_unsynced_bookings().await.unwrap();
    assert!(unsynced.iter().any(|b| b.id == booking.id));

    let mut synced = booking.clone();
    synced.external_event_id = Some("evt-1".to_string());
    db.save_booking(&synced).await.unwrap();

    let unsynced = db.list_unsynced_bookings().await.unwrap();
    assert!(!unsynced.iter().any(|b| b.id == booking.id));
}

#[tokio::test]
async fn test_unsynced_bookings_scoped_to_organizer() {
    require_emulator!();

    let db = test_db().await;
    let organizer = Uuid::new_v4();
    let mut mine = test_booking(organizer, &[Uuid::new_v4()]);
    mine.status = BookingStatus::Confirmed;
    let mut theirs = test_booking(Uuid::new_v4(), &[Uuid::new_v4()]);
    theirs.status = BookingStatus::Confirmed;
    db.insert_booking(&mine).await.unwrap();
    db.insert_booking(&theirs).await.unwrap();

    let unsynced = db.list_unsynced_bookings_for(organizer).await.unwrap();
    let ids: Vec<Uuid> = unsynced.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![mine.id]);
}

// ═══════════════════════════════════════════════════════════════════════════
// NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_notifications_mark_read() {
    require_emulator!();

    let db = test_db().await;
    let user_id = Uuid::new_v4();

    for message in ["first", "second"] {
        db.insert_notification(&Notification {
            id: Uuid::new_v4(),
            user_id,
            message: message.to_string(),
            kind: NotificationKind::InApp,
            sent: false,
            is_read: false,
            created_at: Utc::now().to_rfc3339(),
        })
        .await
        .unwrap();
    }

    assert_eq!(db.list_unread_notifications(user_id).await.unwrap().len(), 2);
    assert_eq!(db.mark_notifications_read(user_id).await.unwrap(), 2);
    assert!(db.list_unread_notifications(user_id).await.unwrap().is_empty());
    assert_eq!(db.mark_notifications_read(user_id).await.unwrap(), 0);
}
