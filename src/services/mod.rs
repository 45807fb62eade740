// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod availability;
pub mod bookings;
pub mod calendar;
pub mod credentials;
pub mod google;
pub mod locks;
pub mod notifications;

pub use availability::{compute_common_slots, TimeSlot};
pub use bookings::BookingService;
pub use calendar::{CalendarSync, GoogleCalendarGateway};
pub use credentials::CredentialStore;
pub use google::{GoogleClient, GoogleEndpoints};
pub use notifications::{NotificationQueue, NotificationRequest};
