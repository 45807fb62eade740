// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Rendezvous: meeting bookings synced to Google Calendar
//!
//! This crate provides the backend API for proposing meetings, collecting
//! participant responses, and mirroring confirmed bookings into the
//! organizer's Google Calendar.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::Store;
use services::{
    BookingService, CalendarSync, CredentialStore, GoogleCalendarGateway, GoogleClient,
    NotificationQueue,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub google: GoogleClient,
    pub credentials: CredentialStore,
    pub notifications: NotificationQueue,
    pub bookings: BookingService,
}

impl AppState {
    /// Wire the services around a store.
    ///
    /// With `calendar` unset, bookings sync to Google Calendar through
    /// `google`. Spawns the notification worker, so it must run inside a
    /// Tokio runtime.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        google: GoogleClient,
        calendar: Option<Arc<dyn CalendarSync>>,
    ) -> Self {
        let credentials = CredentialStore::new(google.clone(), store.clone());

        let calendar = calendar.unwrap_or_else(|| {
            Arc::new(GoogleCalendarGateway::new(
                google.clone(),
                credentials.clone(),
                store.clone(),
                config.calendar_timeout,
            ))
        });

        let (notifications, _worker) =
            NotificationQueue::start(store.clone(), config.notification_queue_capacity);

        let bookings = BookingService::new(store.clone(), calendar, notifications.clone());

        Self {
            config,
            store,
            google,
            credentials,
            notifications,
            bookings,
        }
    }
}
