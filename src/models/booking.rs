// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Booking, event and participant models.
//!
//! A booking document embeds its event and its participant rows, so a
//! participant-set replacement is a single atomic write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Aggregate status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Declined,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Declined => "DECLINED",
        }
    }

    /// Legal edges of the booking state machine.
    ///
    /// PENDING -> CONFIRMED | REJECTED | DECLINED, and PENDING/CONFIRMED ->
    /// PENDING through an update. Nothing leaves REJECTED or DECLINED.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Declined)
                | (Pending, Pending)
                | (Confirmed, Pending)
        )
    }

    /// REJECTED or DECLINED: terminal, and holds no calendar slot.
    pub fn is_closed(self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Declined)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "REJECTED" => Ok(BookingStatus::Rejected),
            "DECLINED" => Ok(BookingStatus::Declined),
            other => Err(AppError::Validation(format!(
                "Unknown booking status '{}'",
                other
            ))),
        }
    }
}

/// A participant's answer to an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum ParticipantResponse {
    Pending,
    #[serde(alias = "ACCEPTED")]
    Confirmed,
    #[serde(alias = "REJECTED")]
    Declined,
}

/// The time-boxed meeting payload of a booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Meeting length in minutes
    pub duration_minutes: u32,
    /// Meeting platform label ("Zoom", "Meet", "In person", ...)
    pub platform: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub creator_id: Uuid,
}

/// One invited user and their response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub user_id: Uuid,
    pub response: ParticipantResponse,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Participant {
    fn pending(user_id: Uuid) -> Self {
        Self {
            user_id,
            response: ParticipantResponse::Pending,
            responded_at: None,
        }
    }
}

/// Booking document stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    /// Booking ID (also used as document ID)
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub event: Event,
    pub participants: Vec<Participant>,
    /// Participant user IDs, kept in step with `participants` for queries
    pub participant_ids: Vec<Uuid>,
    pub status: BookingStatus,
    /// Google Calendar event ID, set after the first successful sync
    #[serde(default)]
    pub external_event_id: Option<String>,
    /// Optimistic concurrency counter, bumped by every save
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// New PENDING booking with every participant PENDING.
    pub fn new(organizer_id: Uuid, event: Event, participant_ids: &[Uuid]) -> Self {
        let now = Utc::now();
        let mut booking = Self {
            id: Uuid::new_v4(),
            organizer_id,
            event,
            participants: Vec::new(),
            participant_ids: Vec::new(),
            status: BookingStatus::Pending,
            external_event_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        booking.replace_participants(participant_ids);
        booking
    }

    /// Drop every participant row and insert fresh PENDING rows.
    pub fn replace_participants(&mut self, participant_ids: &[Uuid]) {
        self.participants = participant_ids
            .iter()
            .copied()
            .map(Participant::pending)
            .collect();
        self.participant_ids = participant_ids.to_vec();
    }

    /// Drop one participant's row. Returns false if they were not invited.
    pub fn remove_participant(&mut self, user_id: Uuid) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.user_id != user_id);
        self.participant_ids.retain(|id| *id != user_id);
        self.participants.len() != before
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: Uuid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn is_organizer(&self, user_id: Uuid) -> bool {
        self.organizer_id == user_id
    }

    /// Organizer or participant.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.is_organizer(user_id) || self.participant(user_id).is_some()
    }

    /// Participants whose response is CONFIRMED, in booking order.
    pub fn confirmed_participant_ids(&self) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.response == ParticipantResponse::Confirmed)
            .map(|p| p.user_id)
            .collect()
    }

    /// Status the responses call for, if it differs from the current one.
    ///
    /// Only a PENDING booking moves: all CONFIRMED gives CONFIRMED, and
    /// everyone answered with at least one DECLINED gives DECLINED.
    pub fn aggregate_status(&self) -> Option<BookingStatus> {
        if self.status != BookingStatus::Pending || self.participants.is_empty() {
            return None;
        }

        let all_confirmed = self
            .participants
            .iter()
            .all(|p| p.response == ParticipantResponse::Confirmed);
        if all_confirmed {
            return Some(BookingStatus::Confirmed);
        }

        let all_responded = self
            .participants
            .iter()
            .all(|p| p.response != ParticipantResponse::Pending);
        let any_declined = self
            .participants
            .iter()
            .any(|p| p.response == ParticipantResponse::Declined);
        if all_responded && any_declined {
            return Some(BookingStatus::Declined);
        }

        None
    }

    /// Everyone involved except `user_id`.
    pub fn others(&self, user_id: Uuid) -> Vec<Uuid> {
        std::iter::once(self.organizer_id)
            .chain(self.participant_ids.iter().copied())
            .filter(|id| *id != user_id)
            .collect()
    }
}

/// Create/update request body for a booking.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BookingInput {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Meeting length in minutes
    #[validate(range(min = 1, message = "Duration must be positive"))]
    pub duration: u32,
    #[validate(length(min = 1, message = "Platform is required"))]
    pub platform: String,
    /// RFC3339 start time
    pub start_time: String,
    /// RFC3339 end time
    pub end_time: String,
    #[validate(length(min = 1, message = "At least one participant is required"))]
    pub participant_ids: Vec<Uuid>,
}

impl BookingInput {
    /// Check field rules and the time window, then build the event.
    pub fn to_event(&self, creator_id: Uuid) -> Result<Event, AppError> {
        self.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let start_time = parse_time(&self.start_time, "Invalid start time")?;
        let end_time = parse_time(&self.end_time, "Invalid end time")?;
        if start_time >= end_time {
            return Err(AppError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }

        Ok(Event {
            title: self.title.clone(),
            description: self.description.clone(),
            duration_minutes: self.duration,
            platform: self.platform.clone(),
            start_time,
            end_time,
            creator_id,
        })
    }
}

fn parse_time(raw: &str, message: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::Validation(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(participants: Vec<Uuid>) -> BookingInput {
        BookingInput {
            title: "Planning".to_string(),
            description: None,
            duration: 60,
            platform: "Meet".to_string(),
            start_time: "2030-03-04T10:00:00Z".to_string(),
            end_time: "2030-03-04T11:00:00Z".to_string(),
            participant_ids: participants,
        }
    }

    fn booking_with(responses: &[ParticipantResponse]) -> Booking {
        let organizer = Uuid::new_v4();
        let ids: Vec<Uuid> = responses.iter().map(|_| Uuid::new_v4()).collect();
        let event = input(ids.clone()).to_event(organizer).unwrap();
        let mut booking = Booking::new(organizer, event, &ids);
        for (participant, response) in booking.participants.iter_mut().zip(responses) {
            participant.response = *response;
        }
        booking
    }

    #[test]
    fn test_to_event_rejects_inverted_window() {
        let mut body = input(vec![Uuid::new_v4()]);
        body.end_time = body.start_time.clone();

        let err = body.to_event(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_to_event_rejects_bad_timestamp() {
        let mut body = input(vec![Uuid::new_v4()]);
        body.start_time = "tomorrow at ten".to_string();

        let err = body.to_event(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("start time")));
    }

    #[test]
    fn test_to_event_requires_fields() {
        let mut body = input(vec![]);
        body.title = String::new();

        let err = body.to_event(Uuid::new_v4()).unwrap_err();
        match err {
            AppError::Validation(msg) => {
                assert!(msg.contains("Title is required"));
                assert!(msg.contains("At least one participant is required"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_all_confirmed() {
        use ParticipantResponse::*;
        let booking = booking_with(&[Confirmed, Confirmed]);
        assert_eq!(booking.aggregate_status(), Some(BookingStatus::Confirmed));
    }

    #[test]
    fn test_aggregate_declined_only_when_all_responded() {
        use ParticipantResponse::*;
        assert_eq!(booking_with(&[Declined, Pending]).aggregate_status(), None);
        assert_eq!(
            booking_with(&[Confirmed, Confirmed, Declined]).aggregate_status(),
            Some(BookingStatus::Declined)
        );
    }

    #[test]
    fn test_aggregate_ignores_non_pending_booking() {
        use ParticipantResponse::*;
        let mut booking = booking_with(&[Confirmed]);
        booking.status = BookingStatus::Confirmed;
        assert_eq!(booking.aggregate_status(), None);
    }

    #[test]
    fn test_transition_table() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Declined));
        assert!(Confirmed.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Declined));
        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Declined.can_transition_to(Confirmed));
    }

    #[test]
    fn test_response_aliases() {
        let accepted: ParticipantResponse = serde_json::from_str("\"ACCEPTED\"").unwrap();
        let rejected: ParticipantResponse = serde_json::from_str("\"REJECTED\"").unwrap();
        assert_eq!(accepted, ParticipantResponse::Confirmed);
        assert_eq!(rejected, ParticipantResponse::Declined);
    }

    #[test]
    fn test_others_excludes_caller() {
        use ParticipantResponse::*;
        let booking = booking_with(&[Pending, Pending]);
        let caller = booking.participant_ids[0];

        let others = booking.others(caller);
        assert_eq!(others.len(), 2);
        assert!(others.contains(&booking.organizer_id));
        assert!(!others.contains(&caller));
    }

    #[test]
    fn test_remove_participant_lets_rest_decide() {
        use ParticipantResponse::*;
        let mut booking = booking_with(&[Confirmed, Pending]);
        let holdout = booking.participant_ids[1];

        assert!(booking.remove_participant(holdout));
        assert!(!booking.remove_participant(holdout));
        assert_eq!(booking.participant_ids.len(), 1);
        assert_eq!(booking.aggregate_status(), Some(BookingStatus::Confirmed));
    }
}
