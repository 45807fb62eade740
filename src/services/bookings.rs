// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Booking lifecycle engine.
//!
//! Owns every status change of a booking:
//!
//! ```text
//! PENDING ──all confirmed──▶ CONFIRMED ──update──▶ PENDING
//!    │ ──organizer rejects──▶ REJECTED
//!    └ ──all answered, one declined──▶ DECLINED
//! ```
//!
//! Local state is committed first. Calendar sync and notifications follow
//! and never fail the operation.
//!
//! Remote calendar work for a booking runs under a per-booking sync claim,
//! taken before the write lock when both are needed. The claim is what keeps
//! a confirmation, the resync loop and a delete from each acting on the same
//! remote event at once.

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{
    Booking, BookingInput, BookingStatus, Event, NotificationKind, ParticipantResponse,
};
use crate::services::availability::{compute_common_slots, TimeSlot};
use crate::services::calendar::CalendarSync;
use crate::services::locks::KeyedLocks;
use crate::services::notifications::NotificationQueue;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Attempts at a versioned save before giving up.
const MAX_SAVE_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Store>,
    calendar: Arc<dyn CalendarSync>,
    notifications: NotificationQueue,
    /// Serializes read-modify-write of a booking within this instance.
    locks: KeyedLocks<Uuid>,
    /// Held for the whole of any remote calendar operation on a booking.
    sync_locks: KeyedLocks<Uuid>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn Store>,
        calendar: Arc<dyn CalendarSync>,
        notifications: NotificationQueue,
    ) -> Self {
        Self {
            store,
            calendar,
            notifications,
            locks: KeyedLocks::new(),
            sync_locks: KeyedLocks::new(),
        }
    }

    // ─── Lifecycle operations ────────────────────────────────────────────────

    /// Create a PENDING booking and invite every participant.
    pub async fn create_booking(&self, organizer_id: Uuid, input: &BookingInput) -> Result<Booking> {
        let event = input.to_event(organizer_id)?;

        let mut seen = HashSet::new();
        if let Some(dup) = input.participant_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(AppError::Conflict(format!(
                "Participant {} listed more than once",
                dup
            )));
        }

        self.check_participants(organizer_id, &input.participant_ids)
            .await?;

        let booking = Booking::new(organizer_id, event, &input.participant_ids);
        self.store.insert_booking(&booking).await?;

        tracing::info!(
            booking_id = %booking.id,
            %organizer_id,
            participants = booking.participants.len(),
            "Booking created"
        );

        self.notifications.enqueue_all(
            &booking.participant_ids,
            NotificationKind::Email,
            &format!("You have been invited to \"{}\"", booking.event.title),
        );

        Ok(booking)
    }

    /// Record a participant's answer and recompute the aggregate status.
    pub async fn respond(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        response: ParticipantResponse,
    ) -> Result<Booking> {
        if response == ParticipantResponse::Pending {
            return Err(AppError::Validation(
                "Response must be CONFIRMED or DECLINED".to_string(),
            ));
        }

        let (before, saved) = self
            .mutate(booking_id, |booking| {
                if booking.participant(user_id).is_none() {
                    return Err(AppError::Forbidden(
                        "Only participants can respond to a booking".to_string(),
                    ));
                }
                if !matches!(
                    booking.status,
                    BookingStatus::Pending | BookingStatus::Confirmed
                ) {
                    return Err(AppError::State(format!(
                        "Booking is {} and no longer accepts responses",
                        booking.status
                    )));
                }

                if let Some(participant) = booking.participant_mut(user_id) {
                    participant.response = response;
                    participant.responded_at = Some(Utc::now());
                }

                if let Some(next) = booking.aggregate_status() {
                    if booking.status.can_transition_to(next) {
                        booking.status = next;
                    }
                }
                Ok(())
            })
            .await?;

        tracing::info!(
            %booking_id,
            %user_id,
            ?response,
            status = %saved.status,
            "Participant responded"
        );

        if before.status == saved.status {
            return Ok(saved);
        }

        let message = match saved.status {
            BookingStatus::Confirmed => {
                format!("\"{}\" is confirmed by everyone", saved.event.title)
            }
            _ => format!("\"{}\" was declined", saved.event.title),
        };
        self.notifications
            .enqueue_all(&saved.others(user_id), NotificationKind::InApp, &message);

        match saved.status {
            BookingStatus::Confirmed => Ok(self.sync_on_confirm(saved).await),
            BookingStatus::Declined => Ok(self.retire_remote_event(saved).await),
            _ => Ok(saved),
        }
    }

    /// Organizer closes a PENDING booking.
    pub async fn reject_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<Booking> {
        let (_, saved) = self
            .mutate(booking_id, |booking| {
                if !booking.is_organizer(user_id) {
                    return Err(AppError::Forbidden(
                        "Only the organizer can reject a booking".to_string(),
                    ));
                }
                if !booking.status.can_transition_to(BookingStatus::Rejected) {
                    return Err(AppError::State(format!(
                        "Cannot reject a {} booking",
                        booking.status
                    )));
                }
                booking.status = BookingStatus::Rejected;
                Ok(())
            })
            .await?;

        tracing::info!(%booking_id, "Booking rejected");
        self.notifications.enqueue_all(
            &saved.participant_ids,
            NotificationKind::InApp,
            &format!("\"{}\" was cancelled by the organizer", saved.event.title),
        );

        Ok(self.retire_remote_event(saved).await)
    }

    /// Replace the event and participants; the booking goes back to PENDING.
    pub async fn update_booking(
        &self,
        booking_id: Uuid,
        organizer_id: Uuid,
        input: &BookingInput,
    ) -> Result<Booking> {
        let current = self.load(booking_id).await?;
        if !current.is_organizer(organizer_id) {
            return Err(AppError::Forbidden(
                "Only the organizer can update a booking".to_string(),
            ));
        }

        let event = input.to_event(organizer_id)?;
        let participant_ids = dedup(&input.participant_ids);
        self.check_participants(organizer_id, &participant_ids)
            .await?;

        let (before, saved) = self
            .mutate(booking_id, |booking| {
                if !matches!(
                    booking.status,
                    BookingStatus::Pending | BookingStatus::Confirmed
                ) {
                    return Err(AppError::State(format!(
                        "Cannot update a {} booking",
                        booking.status
                    )));
                }
                booking.event = Event {
                    creator_id: booking.event.creator_id,
                    ..event.clone()
                };
                booking.replace_participants(&participant_ids);
                booking.status = BookingStatus::Pending;
                Ok(())
            })
            .await?;

        tracing::info!(
            %booking_id,
            previous = %before.status,
            participants = saved.participants.len(),
            "Booking updated"
        );

        let (added, kept): (Vec<Uuid>, Vec<Uuid>) = saved
            .participant_ids
            .iter()
            .copied()
            .partition(|id| !before.participant_ids.contains(id));
        self.notifications.enqueue_all(
            &added,
            NotificationKind::Email,
            &format!("You have been invited to \"{}\"", saved.event.title),
        );
        self.notifications.enqueue_all(
            &kept,
            NotificationKind::Email,
            &format!("\"{}\" was changed, please respond again", saved.event.title),
        );

        if before.status == BookingStatus::Confirmed && saved.external_event_id.is_some() {
            let _claim = self.sync_locks.lock(booking_id).await;
            match self.store.get_booking(booking_id).await {
                Ok(Some(current)) if current.external_event_id.is_some() => {
                    if let Err(e) = self.calendar.update_event(&current).await {
                        tracing::warn!(error = %e, %booking_id, "Failed to update calendar event");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, %booking_id, "Failed to reload booking for calendar update");
                }
            }
        }

        Ok(saved)
    }

    /// Remove a booking. The remote event goes first; its failure is logged.
    ///
    /// Waits out any calendar sync in flight, so an event created meanwhile
    /// is deleted too.
    pub async fn delete_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<()> {
        let _claim = self.sync_locks.lock(booking_id).await;

        let booking = self.load(booking_id).await?;
        if !booking.involves(user_id) {
            return Err(AppError::Forbidden(
                "Only the organizer or a participant can delete a booking".to_string(),
            ));
        }

        if booking.external_event_id.is_some() {
            if let Err(e) = self.calendar.delete_event(&booking).await {
                tracing::warn!(
                    error = %e,
                    %booking_id,
                    external_event_id = ?booking.external_event_id,
                    "Failed to delete calendar event, deleting locally anyway"
                );
            }
        }

        {
            let _guard = self.locks.lock(booking_id).await;
            self.store.delete_booking(booking_id).await?;
        }

        tracing::info!(%booking_id, %user_id, "Booking deleted");
        self.notifications.enqueue_all(
            &booking.others(user_id),
            NotificationKind::InApp,
            &format!("\"{}\" was deleted", booking.event.title),
        );

        Ok(())
    }

    /// Remove a user and everything that only made sense with them.
    ///
    /// Bookings they organize are deleted. On bookings they were invited to,
    /// their row is dropped and the remaining responses decide the status; a
    /// booking left with nobody invited is deleted.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<()> {
        let bookings = self.store.list_bookings_for_user(user_id, None).await?;

        for booking in &bookings {
            let result = if booking.is_organizer(user_id) {
                self.delete_booking(booking.id, user_id).await
            } else {
                self.leave_booking(booking.id, user_id).await
            };
            match result {
                Ok(()) | Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.store.delete_user(user_id).await?;
        tracing::info!(%user_id, bookings = bookings.len(), "Account deleted");
        Ok(())
    }

    /// Drop `user_id` from a booking they were invited to.
    async fn leave_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<()> {
        let (before, saved) = self
            .mutate(booking_id, |booking| {
                booking.remove_participant(user_id);
                if let Some(next) = booking.aggregate_status() {
                    if booking.status.can_transition_to(next) {
                        booking.status = next;
                    }
                }
                Ok(())
            })
            .await?;

        if saved.participants.is_empty() {
            return self.delete_booking(booking_id, saved.organizer_id).await;
        }

        tracing::info!(%booking_id, %user_id, status = %saved.status, "Participant left booking");
        self.notifications.enqueue_all(
            &[saved.organizer_id],
            NotificationKind::InApp,
            &format!("A participant left \"{}\"", saved.event.title),
        );

        if before.status != saved.status {
            match saved.status {
                BookingStatus::Confirmed => {
                    self.sync_on_confirm(saved).await;
                }
                BookingStatus::Declined => {
                    self.retire_remote_event(saved).await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub async fn list_bookings(
        &self,
        user_id: Uuid,
        status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>> {
        self.store.list_bookings_for_user(user_id, status).await
    }

    /// A booking, visible to its organizer and participants only.
    pub async fn get_booking(&self, booking_id: Uuid, user_id: Uuid) -> Result<Booking> {
        let booking = self.load(booking_id).await?;
        if !booking.involves(user_id) {
            return Err(AppError::Forbidden(
                "Not part of this booking".to_string(),
            ));
        }
        Ok(booking)
    }

    /// Common free slots between two users.
    pub async fn get_availability(
        &self,
        user_id: Uuid,
        target_user_id: Uuid,
        duration_minutes: u32,
    ) -> Result<Vec<TimeSlot>> {
        if self.store.get_user(target_user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("User {}", target_user_id)));
        }

        let mine = self.busy_events(user_id).await?;
        let theirs = self.busy_events(target_user_id).await?;

        Ok(compute_common_slots(
            &mine,
            &theirs,
            duration_minutes,
            Utc::now(),
        ))
    }

    // ─── Calendar sync ───────────────────────────────────────────────────────

    /// Retry calendar sync for confirmed bookings that never got an event.
    ///
    /// Returns how many bookings now have an external event.
    pub async fn resync_unsynced(&self) -> Result<usize> {
        let pending = self.store.list_unsynced_bookings().await?;
        Ok(self.resync(pending).await)
    }

    /// Same as [`Self::resync_unsynced`], limited to one organizer's bookings.
    pub async fn resync_unsynced_for(&self, organizer_id: Uuid) -> Result<usize> {
        let pending = self.store.list_unsynced_bookings_for(organizer_id).await?;
        Ok(self.resync(pending).await)
    }

    /// Bookings whose sync is claimed elsewhere are skipped, not waited on.
    async fn resync(&self, pending: Vec<Booking>) -> usize {
        if pending.is_empty() {
            return 0;
        }

        tracing::info!(count = pending.len(), "Resyncing unsynced bookings");

        let mut synced = 0;
        for booking in pending {
            let booking_id = booking.id;
            let _claim = match self.sync_locks.try_lock(booking_id) {
                Some(claim) => claim,
                None => {
                    tracing::debug!(%booking_id, "Sync already in progress, skipping");
                    continue;
                }
            };

            let booking = self.sync_claimed(booking).await;
            if booking.external_event_id.is_some() {
                synced += 1;
            }
        }

        tracing::info!(synced, "Resync finished");
        synced
    }

    /// Mirror a freshly confirmed booking into the organizer's calendar.
    ///
    /// Failures are logged; the returned booking carries the external ID
    /// when one was stored.
    async fn sync_on_confirm(&self, booking: Booking) -> Booking {
        let _claim = self.sync_locks.lock(booking.id).await;
        self.sync_claimed(booking).await
    }

    /// Sync body; the caller holds the booking's sync claim.
    ///
    /// Works from a fresh read, since another claim holder may have created
    /// the event or the booking may have moved on.
    async fn sync_claimed(&self, fallback: Booking) -> Booking {
        let booking_id = fallback.id;
        let mut booking = match self.store.get_booking(booking_id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => {
                tracing::debug!(%booking_id, "Booking deleted before calendar sync");
                return fallback;
            }
            Err(e) => {
                tracing::warn!(error = %e, %booking_id, "Failed to reload booking for calendar sync");
                return fallback;
            }
        };

        if booking.status != BookingStatus::Confirmed {
            return booking;
        }

        match booking.external_event_id {
            None => {
                let external_id = match self.calendar.create_event(&booking).await {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::warn!(error = %e, %booking_id, "Failed to create calendar event");
                        return booking;
                    }
                };

                match self.attach_external_id(booking_id, external_id.clone()).await {
                    Ok(saved) => booking = saved,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            %booking_id,
                            %external_id,
                            "Calendar event created but its id could not be stored"
                        );
                        return booking;
                    }
                }
            }
            Some(_) => {
                if let Err(e) = self.calendar.update_event(&booking).await {
                    tracing::warn!(error = %e, %booking_id, "Failed to update calendar event");
                }
            }
        }

        if let Err(e) = self.calendar.invite_participants(&booking).await {
            tracing::warn!(error = %e, %booking_id, "Failed to invite participants");
        }

        booking
    }

    /// Remove the remote event of a booking that ended DECLINED or REJECTED.
    ///
    /// The stored external ID is cleared even when the remote delete fails;
    /// the orphaned ID is logged.
    async fn retire_remote_event(&self, fallback: Booking) -> Booking {
        let booking_id = fallback.id;
        let _claim = self.sync_locks.lock(booking_id).await;

        let booking = match self.store.get_booking(booking_id).await {
            Ok(Some(booking)) => booking,
            Ok(None) => return fallback,
            Err(e) => {
                tracing::warn!(error = %e, %booking_id, "Failed to reload booking for calendar cleanup");
                return fallback;
            }
        };

        let external_id = match &booking.external_event_id {
            Some(id) if booking.status.is_closed() => id.clone(),
            _ => return booking,
        };

        if let Err(e) = self.calendar.delete_event(&booking).await {
            tracing::warn!(
                error = %e,
                %booking_id,
                %external_id,
                "Failed to delete calendar event of closed booking, leaving it orphaned"
            );
        }

        let cleared = self
            .mutate(booking_id, |booking| {
                if booking.external_event_id.as_deref() == Some(external_id.as_str()) {
                    booking.external_event_id = None;
                }
                Ok(())
            })
            .await;

        match cleared {
            Ok((_, saved)) => {
                tracing::info!(%booking_id, %external_id, "Calendar event removed from closed booking");
                saved
            }
            Err(e) => {
                tracing::warn!(error = %e, %booking_id, "Failed to clear external event id");
                booking
            }
        }
    }

    async fn attach_external_id(&self, booking_id: Uuid, external_id: String) -> Result<Booking> {
        let (_, saved) = self
            .mutate(booking_id, |booking| {
                if booking.external_event_id.is_none() {
                    booking.external_event_id = Some(external_id.clone());
                }
                Ok(())
            })
            .await?;
        Ok(saved)
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    async fn load(&self, booking_id: Uuid) -> Result<Booking> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Booking {}", booking_id)))
    }

    /// Locked read-modify-write with a versioned save.
    ///
    /// `apply` runs on a fresh copy each attempt and may reject the change.
    /// Returns the booking as read and as saved.
    async fn mutate<F>(&self, booking_id: Uuid, apply: F) -> Result<(Booking, Booking)>
    where
        F: Fn(&mut Booking) -> Result<()> + Send,
    {
        let _guard = self.locks.lock(booking_id).await;

        let mut attempt = 1;
        loop {
            let current = self.load(booking_id).await?;
            let mut next = current.clone();
            apply(&mut next)?;

            match self.store.save_booking(&next).await {
                Ok(saved) => return Ok((current, saved)),
                Err(AppError::ConcurrentModification(_)) if attempt < MAX_SAVE_ATTEMPTS => {
                    tracing::debug!(%booking_id, attempt, "Version conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Participants must exist and must not include the organizer.
    async fn check_participants(&self, organizer_id: Uuid, participant_ids: &[Uuid]) -> Result<()> {
        if participant_ids.contains(&organizer_id) {
            return Err(AppError::Validation(
                "Organizer cannot be a participant".to_string(),
            ));
        }

        let found = self.store.get_users(participant_ids).await?;
        if let Some(missing) = participant_ids
            .iter()
            .find(|id| !found.iter().any(|u| u.id == **id))
        {
            return Err(AppError::Validation(format!(
                "Unknown participant {}",
                missing
            )));
        }
        Ok(())
    }

    /// Events that keep a user busy: bookings they organize that are still live.
    async fn busy_events(&self, user_id: Uuid) -> Result<Vec<Event>> {
        Ok(self
            .store
            .list_bookings_organized_by(user_id)
            .await?
            .into_iter()
            .filter(|b| !b.status.is_closed())
            .map(|b| b.event)
            .collect())
    }
}

/// Drop repeated IDs, keeping first-occurrence order.
fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(dedup(&[b, a, b, a]), vec![b, a]);
    }
}
