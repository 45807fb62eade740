// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::{AuthUser, SESSION_COOKIE};
use crate::models::{Notification, User};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use uuid::Uuid;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me).delete(delete_me))
        .route("/api/users/search", get(search_users))
        .route("/api/users/{id}", get(get_user))
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read", post(mark_notifications_read))
}

async fn current_user(state: &AppState, user: AuthUser) -> Result<User> {
    state
        .store
        .get_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Whether a Google credential is stored
    pub calendar_connected: bool,
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = current_user(&state, user).await?;
    let calendar_connected = state.store.get_credential(user.user_id).await?.is_some();

    Ok(Json(UserResponse {
        id: profile.id,
        username: profile.username,
        email: profile.email,
        calendar_connected,
    }))
}

/// Delete the caller's account and end the session.
async fn delete_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, StatusCode)> {
    current_user(&state, user).await?;
    state.bookings.delete_account(user.user_id).await?;

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, StatusCode::NO_CONTENT))
}

// ─── User Directory ──────────────────────────────────────────

/// Most results a user search returns.
const MAX_SEARCH_RESULTS: usize = 10;

/// Public view of another user.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
        }
    }
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    query: String,
}

/// Username search for picking participants. The caller is left out.
async fn search_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<UserSummary>>> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(AppError::Validation(
            "Search query cannot be empty.".to_string(),
        ));
    }

    let found = state
        .store
        .search_users(query, MAX_SEARCH_RESULTS + 1)
        .await?;
    Ok(Json(
        found
            .into_iter()
            .filter(|u| u.id != user.user_id)
            .take(MAX_SEARCH_RESULTS)
            .map(UserSummary::from)
            .collect(),
    ))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserSummary>> {
    let found = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
    Ok(Json(UserSummary::from(found)))
}

// ─── Settings ────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SettingsResponse {
    pub calendar_id: String,
    pub receive_emails: bool,
}

impl From<&User> for SettingsResponse {
    fn from(user: &User) -> Self {
        Self {
            calendar_id: user.calendar_id().to_string(),
            receive_emails: user.receive_emails,
        }
    }
}

/// Partial settings update; absent fields are left alone.
#[derive(Deserialize, Validate)]
pub struct SettingsUpdate {
    #[validate(length(min = 1, max = 256, message = "Calendar id must be 1-256 characters"))]
    #[serde(default)]
    pub calendar_id: Option<String>,
    #[serde(default)]
    pub receive_emails: Option<bool>,
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SettingsResponse>> {
    let profile = current_user(&state, user).await?;
    Ok(Json(SettingsResponse::from(&profile)))
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsResponse>> {
    update
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Fetch-modify-write to preserve other fields
    let mut profile = current_user(&state, user).await?;
    if let Some(calendar_id) = update.calendar_id {
        profile.calendar_id = Some(calendar_id);
    }
    if let Some(receive_emails) = update.receive_emails {
        profile.receive_emails = receive_emails;
    }
    state.store.upsert_user(&profile).await?;

    tracing::info!(user_id = %user.user_id, "Settings updated");
    Ok(Json(SettingsResponse::from(&profile)))
}

// ─── Notifications ───────────────────────────────────────────

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.list_unread(user.user_id).await?))
}

#[derive(Serialize)]
struct MarkReadResponse {
    marked: usize,
}

async fn mark_notifications_read(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<MarkReadResponse>> {
    let marked = state.notifications.mark_all_read(user.user_id).await?;
    Ok(Json(MarkReadResponse { marked }))
}
