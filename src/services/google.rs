// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google API client for OAuth and Calendar v3.
//!
//! Handles:
//! - Authorization code exchange and token refresh
//! - Userinfo lookup after sign-in
//! - Calendar event insert/get/update/delete with `sendUpdates=all`

use crate::error::AppError;
use crate::models::CredentialUpdate;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Scopes requested at sign-in.
pub const GOOGLE_SCOPES: &str = "openid email profile https://www.googleapis.com/auth/calendar";

/// Base URLs for every Google endpoint the client talks to.
///
/// Tests point these at a local mock server.
#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub calendar_base: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            calendar_base: "https://www.googleapis.com/calendar/v3".to_string(),
        }
    }
}

impl GoogleEndpoints {
    /// All endpoints rooted at one base URL (mock servers).
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/o/oauth2/v2/auth", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/v1/userinfo", base),
            calendar_base: format!("{}/calendar/v3", base),
        }
    }
}

/// Google API client.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    endpoints: GoogleEndpoints,
    client_id: String,
    client_secret: String,
}

impl GoogleClient {
    /// Create a new Google client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_endpoints(client_id, client_secret, GoogleEndpoints::default())
    }

    pub fn with_endpoints(
        client_id: String,
        client_secret: String,
        endpoints: GoogleEndpoints,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
            client_id,
            client_secret,
        }
    }

    /// Consent screen URL asking for offline access to the calendar.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.endpoints.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(GOOGLE_SCOPES),
            urlencoding::encode(state),
        )
    }

    // ─── OAuth ───────────────────────────────────────────────────────────────

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(format!("Token exchange failed: {}", e)))?;

        self.check_response_json(response).await
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::CalendarSync(format!("Token refresh request failed: {}", e))
            })?;

        self.check_response_json(response).await
    }

    /// Profile of the signed-in account.
    pub async fn get_userinfo(&self, access_token: &str) -> Result<GoogleUserInfo, AppError> {
        let response = self
            .http
            .get(&self.endpoints.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(e.to_string()))?;

        self.check_response_json(response).await
    }

    // ─── Calendar events ─────────────────────────────────────────────────────

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.endpoints.calendar_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    pub async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, AppError> {
        let response = self
            .http
            .post(self.events_url(calendar_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(e.to_string()))?;

        self.check_response_json(response).await
    }

    pub async fn get_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<GoogleEvent, AppError> {
        let response = self
            .http
            .get(self.event_url(calendar_id, event_id))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Replace the remote event with `event` (full body, not a patch).
    pub async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleEvent,
    ) -> Result<GoogleEvent, AppError> {
        let response = self
            .http
            .put(self.event_url(calendar_id, event_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Delete a remote event. An event that is already gone counts as deleted.
    pub async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), AppError> {
        let response = self
            .http
            .delete(self.event_url(calendar_id, event_id))
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .send()
            .await
            .map_err(|e| AppError::CalendarSync(e.to_string()))?;

        if matches!(response.status().as_u16(), 404 | 410) {
            tracing::debug!(event_id, "Remote event already gone");
            return Ok(());
        }

        self.check_response(response).await
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> Result<(), AppError> {
        if response.status().is_success() {
            return Ok(());
        }

        Err(Self::error_from(response).await)
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| AppError::CalendarSync(format!("JSON parse error: {}", e)))
    }

    async fn error_from(response: reqwest::Response) -> AppError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 {
            tracing::warn!("Google rate limit hit (429)");
            return AppError::CalendarSync("Google rate limit exceeded".to_string());
        }

        // Google answers a dead refresh token with 400 {"error":"invalid_grant"}
        if body.contains(AppError::INVALID_GRANT) {
            return AppError::CalendarSync(format!("{}: {}", AppError::INVALID_GRANT, body));
        }

        AppError::CalendarSync(format!("HTTP {}: {}", status, body))
    }
}

/// Token endpoint response (code exchange and refresh).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Only present on the first grant or when Google rotates it
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// Credential fields to store, with the expiry made absolute.
    pub fn to_update(&self, now: DateTime<Utc>) -> CredentialUpdate {
        CredentialUpdate {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_type: self.token_type.clone(),
            expiry_date: now + Duration::seconds(self.expires_in),
            scope: self.scope.clone(),
        }
    }
}

/// OpenID userinfo response.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Calendar v3 event resource.
///
/// Fields we do not manage are kept in `extra` so a read-modify-write
/// round trip does not drop them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EventDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<Reminders>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventDateTime {
    pub fn utc(at: DateTime<Utc>) -> Self {
        Self {
            date_time: Some(at.to_rfc3339()),
            time_zone: Some("UTC".to_string()),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub email: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Attendee {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    pub use_default: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "id": "evt1",
            "summary": "Standup",
            "start": {"dateTime": "2030-01-07T09:00:00Z", "timeZone": "UTC"},
            "end": {"dateTime": "2030-01-07T09:30:00Z"},
            "attendees": [{"email": "a@example.com", "responseStatus": "accepted"}],
            "hangoutLink": "https://meet.google.com/abc",
            "conferenceData": {"entryPoints": []}
        });

        let event: GoogleEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.attendees[0].email, "a@example.com");

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["hangoutLink"], "https://meet.google.com/abc");
        assert_eq!(back["attendees"][0]["responseStatus"], "accepted");
        assert!(back.get("conferenceData").is_some());
    }

    #[test]
    fn test_token_response_defaults() {
        let body = r#"{"access_token":"at","expires_in":3599}"#;
        let tokens: TokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(tokens.token_type, "Bearer");
        assert!(tokens.refresh_token.is_none());

        let now = Utc::now();
        let update = tokens.to_update(now);
        assert_eq!(update.expiry_date, now + Duration::seconds(3599));
    }

    #[test]
    fn test_authorize_url_requests_offline_calendar_access() {
        let client = GoogleClient::new("cid".to_string(), "secret".to_string());
        let url = client.authorize_url("http://localhost:8080/auth/google/callback", "s1");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("auth%2Fcalendar"));
        assert!(url.contains("state=s1"));
    }
}
