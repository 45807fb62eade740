// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Booking routes.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Booking, BookingInput, BookingStatus, ParticipantResponse};
use crate::services::TimeSlot;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Booking routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/bookings", get(list_bookings).post(create_booking))
        .route("/api/bookings/resync", post(resync_bookings))
        .route(
            "/api/bookings/{id}",
            get(get_booking).put(update_booking).delete(delete_booking),
        )
        .route("/api/bookings/{id}/respond", post(respond))
        .route("/api/bookings/{id}/reject", post(reject_booking))
        .route("/api/availability", get(get_availability))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    status: Option<String>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Booking>>> {
    let status = query
        .status
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<BookingStatus>())
        .transpose()?;

    let bookings = state.bookings.list_bookings(user.user_id, status).await?;
    Ok(Json(bookings))
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<BookingInput>,
) -> Result<(StatusCode, Json<Booking>)> {
    let booking = state.bookings.create_booking(user.user_id, &input).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.get_booking(id, user.user_id).await?))
}

async fn update_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(input): Json<BookingInput>,
) -> Result<Json<Booking>> {
    Ok(Json(
        state
            .bookings
            .update_booking(id, user.user_id, &input)
            .await?,
    ))
}

async fn delete_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.bookings.delete_booking(id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RespondRequest {
    response: ParticipantResponse,
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<Booking>> {
    Ok(Json(
        state
            .bookings
            .respond(id, user.user_id, body.response)
            .await?,
    ))
}

async fn reject_booking(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>> {
    Ok(Json(state.bookings.reject_booking(id, user.user_id).await?))
}

#[derive(Serialize)]
struct ResyncResponse {
    synced: usize,
}

async fn resync_bookings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ResyncResponse>> {
    tracing::info!(user_id = %user.user_id, "Manual resync requested");
    let synced = state.bookings.resync_unsynced_for(user.user_id).await?;
    Ok(Json(ResyncResponse { synced }))
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    user_id: Uuid,
    #[serde(default = "default_duration")]
    duration: u32,
}

fn default_duration() -> u32 {
    60
}

#[derive(Serialize)]
struct AvailabilityResponse {
    slots: Vec<TimeSlot>,
}

async fn get_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>> {
    if query.user_id == user.user_id {
        return Err(AppError::Validation(
            "Pick another user to compare calendars with".to_string(),
        ));
    }

    let slots = state
        .bookings
        .get_availability(user.user_id, query.user_id, query.duration)
        .await?;
    Ok(Json(AvailabilityResponse { slots }))
}
