// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth authentication routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, SESSION_COOKIE, SESSION_TTL_SECS};
use crate::models::User;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// How long a signed OAuth `state` is accepted, in milliseconds.
const STATE_MAX_AGE_MS: u128 = 10 * 60 * 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google", get(auth_start))
        .route("/auth/google/callback", get(auth_callback))
        .route("/auth/logout", get(logout))
}

/// Query parameters for starting OAuth flow.
#[derive(Deserialize)]
pub struct AuthStartParams {
    /// Frontend URL to redirect back to after OAuth completes. Must share
    /// FRONTEND_URL's origin; defaults to FRONTEND_URL.
    #[serde(default)]
    redirect_uri: Option<String>,
}

fn callback_url(state: &AppState) -> String {
    format!(
        "{}/auth/google/callback",
        state.config.api_url.trim_end_matches('/')
    )
}

/// Start OAuth flow - redirect to Google consent.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuthStartParams>,
) -> Result<Redirect> {
    let frontend_url = match params.redirect_uri {
        Some(uri) if is_allowed_redirect(&uri, &state.config.frontend_url) => uri,
        Some(uri) => {
            tracing::warn!(redirect_uri = %uri, "Rejected redirect outside the frontend origin");
            return Err(AppError::Validation(
                "redirect_uri must be on the frontend origin".to_string(),
            ));
        }
        None => state.config.frontend_url.clone(),
    };

    let oauth_state = sign_state(&frontend_url, &state.config.oauth_state_key)?;
    let auth_url = state
        .google
        .authorize_url(&callback_url(&state), &oauth_state);

    tracing::info!(
        frontend_url = %frontend_url,
        "Starting OAuth flow, redirecting to Google"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange code for tokens, create session.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect)> {
    let frontend_url = verify_and_decode_state(&params.state, &state.config.oauth_state_key)
        .filter(|url| is_allowed_redirect(url, &state.config.frontend_url))
        .unwrap_or_else(|| {
            tracing::warn!(
                "Invalid, expired or tampered state parameter, falling back to default frontend URL"
            );
            state.config.frontend_url.clone()
        });

    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from Google");
        let redirect = format!("{}?error={}", frontend_url, urlencoding::encode(&error));
        return Ok((jar, Redirect::temporary(&redirect)));
    }

    let code = params
        .code
        .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))?;

    tracing::info!("Exchanging authorization code for tokens");

    let tokens = state
        .google
        .exchange_code(&code, &callback_url(&state))
        .await?;
    let profile = state.google.get_userinfo(&tokens.access_token).await?;

    let user = match state.store.find_user_by_email(&profile.email).await? {
        Some(user) => user,
        None => {
            let username = profile
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| profile.email.clone());
            let user = User::new(username, profile.email.clone());
            state.store.upsert_user(&user).await?;
            tracing::info!(user_id = %user.id, "New user created");
            user
        }
    };

    state.credentials.store_issued(user.id, &tokens).await?;

    tracing::info!(user_id = %user.id, "OAuth successful, credential stored");

    let jwt = create_jwt(user.id, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    let cookie = Cookie::build((SESSION_COOKIE, jwt.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(!is_local(&frontend_url))
        .max_age(time::Duration::seconds(SESSION_TTL_SECS as i64));

    let redirect_url = format!("{}/callback?token={}", frontend_url, jwt);
    Ok((jar.add(cookie), Redirect::temporary(&redirect_url)))
}

fn is_local(url: &str) -> bool {
    url.contains("://localhost") || url.contains("://127.0.0.1")
}

/// Post-login redirects may only go back to the configured frontend origin.
pub fn is_allowed_redirect(candidate: &str, frontend_url: &str) -> bool {
    match (reqwest::Url::parse(candidate), reqwest::Url::parse(frontend_url)) {
        (Ok(candidate), Ok(frontend)) => candidate.origin() == frontend.origin(),
        _ => false,
    }
}

fn now_millis() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis())
}

/// Build the signed OAuth `state`: base64("frontend_url|timestamp_hex|signature_hex").
pub fn sign_state(frontend_url: &str, secret: &[u8]) -> Result<String> {
    sign_state_at(frontend_url, secret, now_millis()?)
}

fn sign_state_at(frontend_url: &str, secret: &[u8], timestamp: u128) -> Result<String> {
    let payload = format!("{}|{:x}", frontend_url, timestamp);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature).as_bytes()))
}

/// Verify HMAC signature and age, and decode the frontend URL from the OAuth
/// state parameter.
pub fn verify_and_decode_state(state: &str, secret: &[u8]) -> Option<String> {
    verify_state_at(state, secret, now_millis().ok()?)
}

fn verify_state_at(state: &str, secret: &[u8], now_ms: u128) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // The URL may itself contain '|', so split from the right.
    let mut parts = state_str.rsplitn(3, '|');
    let signature_hex = parts.next()?;
    let timestamp_hex = parts.next()?;
    let frontend_url = parts.next()?;

    let payload = format!("{}|{}", frontend_url, timestamp_hex);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes())) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let issued_at = u128::from_str_radix(timestamp_hex, 16).ok()?;
    if now_ms.saturating_sub(issued_at) > STATE_MAX_AGE_MS {
        tracing::warn!(age_ms = %now_ms.saturating_sub(issued_at), "OAuth state expired");
        return None;
    }

    Some(frontend_url.to_string())
}

/// Logout - clear the session cookie and go back to the frontend.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, Redirect::temporary(&state.config.frontend_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        let secret = b"secret_key";
        let signed = sign_state("https://example.com", secret).unwrap();

        assert_eq!(
            verify_and_decode_state(&signed, secret),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn test_state_wrong_secret() {
        let signed = sign_state("https://example.com", b"secret_key").unwrap();
        assert_eq!(verify_and_decode_state(&signed, b"wrong_key"), None);
    }

    #[test]
    fn test_state_tampered_url() {
        let signed = sign_state("https://example.com", b"secret_key").unwrap();
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(&signed).unwrap()).unwrap();
        let forged = decoded.replacen("example.com", "evil.test", 1);
        let forged = URL_SAFE_NO_PAD.encode(forged.as_bytes());

        assert_eq!(verify_and_decode_state(&forged, b"secret_key"), None);
    }

    #[test]
    fn test_state_malformed() {
        let encoded_state = URL_SAFE_NO_PAD.encode("invalid|format");
        assert_eq!(verify_and_decode_state(&encoded_state, b"secret_key"), None);
        assert_eq!(verify_and_decode_state("%%%", b"secret_key"), None);
    }

    #[test]
    fn test_state_expires() {
        let secret = b"secret_key";
        let issued = 1_000_000;
        let signed = sign_state_at("https://example.com", secret, issued).unwrap();

        assert_eq!(
            verify_state_at(&signed, secret, issued + STATE_MAX_AGE_MS),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            verify_state_at(&signed, secret, issued + STATE_MAX_AGE_MS + 1),
            None
        );
    }

    #[test]
    fn test_redirect_must_match_frontend_origin() {
        let frontend = "https://app.example.com";
        assert!(is_allowed_redirect("https://app.example.com", frontend));
        assert!(is_allowed_redirect("https://app.example.com/bookings?x=1", frontend));
        assert!(!is_allowed_redirect("https://evil.test", frontend));
        assert!(!is_allowed_redirect("https://app.example.com.evil.test", frontend));
        assert!(!is_allowed_redirect("http://app.example.com", frontend));
        assert!(!is_allowed_redirect("https://app.example.com:8443", frontend));
        assert!(!is_allowed_redirect("javascript:alert(1)", frontend));
        assert!(!is_allowed_redirect("/relative", frontend));
    }
}
