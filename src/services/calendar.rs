// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! External calendar gateway.
//!
//! [`CalendarSync`] is what the booking engine calls after a local commit.
//! [`GoogleCalendarGateway`] mirrors bookings into the organizer's Google
//! Calendar.

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{Booking, User};
use crate::services::credentials::CredentialStore;
use crate::services::google::{Attendee, EventDateTime, GoogleClient, GoogleEvent, Reminders};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Mirrors bookings into an external calendar.
///
/// Every error is a `CalendarSync` failure.
#[async_trait]
pub trait CalendarSync: Send + Sync {
    /// Create the remote event and return its external ID.
    async fn create_event(&self, booking: &Booking) -> Result<String>;

    /// Push the booking's current event fields and attendees to the remote event.
    async fn update_event(&self, booking: &Booking) -> Result<()>;

    /// Remove the remote event.
    async fn delete_event(&self, booking: &Booking) -> Result<()>;

    /// Add confirmed participants as attendees.
    async fn invite_participants(&self, booking: &Booking) -> Result<()>;
}

/// Google Calendar implementation of [`CalendarSync`].
#[derive(Clone)]
pub struct GoogleCalendarGateway {
    client: GoogleClient,
    credentials: CredentialStore,
    store: Arc<dyn Store>,
    timeout: Duration,
}

/// What every call needs to talk to the organizer's calendar.
struct OrganizerContext {
    organizer: User,
    access_token: String,
}

impl GoogleCalendarGateway {
    pub fn new(
        client: GoogleClient,
        credentials: CredentialStore,
        store: Arc<dyn Store>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            credentials,
            store,
            timeout,
        }
    }

    /// Run `fut` under the call timeout and fold every failure into
    /// `CalendarSync`.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(AppError::CalendarSync(msg))) => Err(AppError::CalendarSync(msg)),
            Ok(Err(e)) => Err(AppError::CalendarSync(format!("{}: {}", operation, e))),
            Err(_) => Err(AppError::CalendarSync(format!(
                "{} timed out after {:?}",
                operation, self.timeout
            ))),
        }
    }

    async fn organizer_context(&self, booking: &Booking) -> Result<OrganizerContext> {
        let organizer = self
            .store
            .get_user(booking.organizer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Organizer {}", booking.organizer_id)))?;

        let credential = self
            .credentials
            .get_valid_credential(booking.organizer_id)
            .await?;

        Ok(OrganizerContext {
            organizer,
            access_token: credential.access_token,
        })
    }

    /// Emails of CONFIRMED participants, organizer excluded, first occurrence kept.
    async fn confirmed_emails(&self, booking: &Booking, organizer_email: &str) -> Result<Vec<String>> {
        let users = self
            .store
            .get_users(&booking.confirmed_participant_ids())
            .await?;

        let mut emails: Vec<String> = Vec::with_capacity(users.len());
        for user in users {
            if user.email.eq_ignore_ascii_case(organizer_email)
                || emails.iter().any(|e| e.eq_ignore_ascii_case(&user.email))
            {
                continue;
            }
            emails.push(user.email);
        }
        Ok(emails)
    }

    fn external_id(booking: &Booking) -> Result<&str> {
        booking.external_event_id.as_deref().ok_or_else(|| {
            AppError::CalendarSync(format!("Booking {} has no external event", booking.id))
        })
    }
}

/// Event body for a new remote event.
pub fn new_event_body(booking: &Booking) -> GoogleEvent {
    let mut event = GoogleEvent {
        reminders: Some(Reminders {
            use_default: true,
            extra: serde_json::Map::new(),
        }),
        ..GoogleEvent::default()
    };
    apply_booking_fields(&mut event, booking);
    event
}

/// Overwrite summary, description and times from the booking.
pub fn apply_booking_fields(event: &mut GoogleEvent, booking: &Booking) {
    event.summary = Some(booking.event.title.clone());
    event.description = booking.event.description.clone();
    event.start = Some(EventDateTime::utc(booking.event.start_time));
    event.end = Some(EventDateTime::utc(booking.event.end_time));
}

/// Append each email not already an attendee. Returns how many were added.
pub fn merge_attendees(event: &mut GoogleEvent, emails: &[String]) -> usize {
    let mut added = 0;
    for email in emails {
        let present = event
            .attendees
            .iter()
            .any(|a| a.email.eq_ignore_ascii_case(email));
        if !present {
            event.attendees.push(Attendee::new(email.clone()));
            added += 1;
        }
    }
    added
}

#[async_trait]
impl CalendarSync for GoogleCalendarGateway {
    async fn create_event(&self, booking: &Booking) -> Result<String> {
        self.bounded("create_event", async {
            let ctx = self.organizer_context(booking).await?;
            let created = self
                .client
                .insert_event(
                    &ctx.access_token,
                    ctx.organizer.calendar_id(),
                    &new_event_body(booking),
                )
                .await?;

            let event_id = created.id.ok_or_else(|| {
                AppError::CalendarSync("Created event has no id".to_string())
            })?;

            tracing::info!(booking_id = %booking.id, %event_id, "Calendar event created");
            Ok(event_id)
        })
        .await
    }

    async fn update_event(&self, booking: &Booking) -> Result<()> {
        self.bounded("update_event", async {
            let event_id = Self::external_id(booking)?;
            let ctx = self.organizer_context(booking).await?;
            let calendar_id = ctx.organizer.calendar_id();

            let mut event = self
                .client
                .get_event(&ctx.access_token, calendar_id, event_id)
                .await?;
            apply_booking_fields(&mut event, booking);

            let mut wanted = vec![ctx.organizer.email.clone()];
            wanted.extend(self.confirmed_emails(booking, &ctx.organizer.email).await?);
            merge_attendees(&mut event, &wanted);

            self.client
                .update_event(&ctx.access_token, calendar_id, event_id, &event)
                .await?;

            tracing::info!(booking_id = %booking.id, event_id, "Calendar event updated");
            Ok(())
        })
        .await
    }

    async fn delete_event(&self, booking: &Booking) -> Result<()> {
        self.bounded("delete_event", async {
            let event_id = Self::external_id(booking)?;
            let ctx = self.organizer_context(booking).await?;

            self.client
                .delete_event(&ctx.access_token, ctx.organizer.calendar_id(), event_id)
                .await?;

            tracing::info!(booking_id = %booking.id, event_id, "Calendar event deleted");
            Ok(())
        })
        .await
    }

    async fn invite_participants(&self, booking: &Booking) -> Result<()> {
        self.bounded("invite_participants", async {
            let event_id = Self::external_id(booking)?;
            let organizer = self
                .store
                .get_user(booking.organizer_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Organizer {}", booking.organizer_id))
                })?;

            let emails = self.confirmed_emails(booking, &organizer.email).await?;
            if emails.is_empty() {
                tracing::debug!(booking_id = %booking.id, "Nobody to invite");
                return Ok(());
            }

            let access_token = self
                .credentials
                .get_valid_credential(booking.organizer_id)
                .await?
                .access_token;
            let calendar_id = organizer.calendar_id();

            let mut event = self
                .client
                .get_event(&access_token, calendar_id, event_id)
                .await?;
            let added = merge_attendees(&mut event, &emails);
            if added == 0 {
                return Ok(());
            }

            self.client
                .update_event(&access_token, calendar_id, event_id, &event)
                .await?;

            tracing::info!(booking_id = %booking.id, event_id, added, "Participants invited");
            Ok(())
        })
        .await
    }
}
