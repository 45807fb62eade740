// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod booking;
pub mod notification;
pub mod user;

pub use booking::{Booking, BookingInput, BookingStatus, Event, Participant, ParticipantResponse};
pub use notification::{Notification, NotificationKind};
pub use user::{Credential, CredentialUpdate, User};
