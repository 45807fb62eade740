// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google credential lifecycle: storage and refresh.

use crate::db::Store;
use crate::error::AppError;
use crate::models::Credential;
use crate::services::google::{GoogleClient, TokenResponse};
use crate::services::locks::KeyedLocks;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Margin before token expiration when we proactively refresh.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Hands out credentials whose access token is good for at least the
/// refresh margin.
///
/// Refreshes are serialized per user within the process. Across instances
/// the last successful write wins.
#[derive(Clone)]
pub struct CredentialStore {
    client: GoogleClient,
    store: Arc<dyn Store>,
    /// Per-user mutex to serialize token refresh operations.
    refresh_locks: KeyedLocks<Uuid>,
}

impl CredentialStore {
    pub fn new(client: GoogleClient, store: Arc<dyn Store>) -> Self {
        Self {
            client,
            store,
            refresh_locks: KeyedLocks::new(),
        }
    }

    /// Get a credential with a valid (non-expiring) access token.
    ///
    /// 1. Load the stored credential (fast path when still valid)
    /// 2. Acquire the per-user refresh lock
    /// 3. Re-read: another task may have refreshed while we waited
    /// 4. Refresh with Google and persist the result
    /// 5. On `invalid_grant`, re-read in case another instance won the race
    pub async fn get_valid_credential(&self, user_id: Uuid) -> Result<Credential, AppError> {
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        let credential = self.load(user_id).await?;
        if !credential.needs_refresh(Utc::now(), margin) {
            return Ok(credential);
        }

        let _guard = self.refresh_locks.lock(user_id).await;

        let credential = self.load(user_id).await?;
        if !credential.needs_refresh(Utc::now(), margin) {
            return Ok(credential);
        }

        if credential.refresh_token.is_empty() {
            return Err(AppError::CalendarSync(format!(
                "No refresh token stored for user {}",
                user_id
            )));
        }

        tracing::info!(%user_id, "Access token expiring, refreshing");

        let tokens = match self.client.refresh_token(&credential.refresh_token).await {
            Ok(t) => t,
            Err(e) if e.is_invalid_grant() => {
                tracing::info!(
                    %user_id,
                    "Refresh token rejected, re-reading in case another instance refreshed"
                );
                let latest = self.load(user_id).await?;
                if latest.access_token != credential.access_token
                    && !latest.needs_refresh(Utc::now(), margin)
                {
                    return Ok(latest);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let refreshed = self
            .store
            .upsert_credential(user_id, &tokens.to_update(Utc::now()))
            .await?;

        tracing::info!(%user_id, expiry = %refreshed.expiry_date, "Access token refreshed");
        Ok(refreshed)
    }

    /// Persist tokens from an authorization code exchange.
    pub async fn store_issued(
        &self,
        user_id: Uuid,
        tokens: &TokenResponse,
    ) -> Result<Credential, AppError> {
        if tokens.refresh_token.is_none() {
            tracing::warn!(%user_id, "Code exchange returned no refresh token");
        }

        self.store
            .upsert_credential(user_id, &tokens.to_update(Utc::now()))
            .await
    }

    async fn load(&self, user_id: Uuid) -> Result<Credential, AppError> {
        self.store
            .get_credential(user_id)
            .await?
            .ok_or(AppError::NoCredential(user_id))
    }
}
