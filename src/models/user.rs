//! User and OAuth credential models for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Calendar used when the user has not picked one.
pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// User profile stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// User ID (also used as document ID)
    pub id: Uuid,
    /// Display name
    pub username: String,
    /// Email address (also the Google account identity)
    pub email: String,
    /// Google calendar that receives confirmed bookings
    #[serde(default)]
    pub calendar_id: Option<String>,
    /// Whether EMAIL notifications should be delivered
    #[serde(default = "default_receive_emails")]
    pub receive_emails: bool,
    /// When the user first signed in
    pub created_at: String,
}

fn default_receive_emails() -> bool {
    true
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.into(),
            calendar_id: None,
            receive_emails: true,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Calendar that events for this user's bookings are written to.
    pub fn calendar_id(&self) -> &str {
        self.calendar_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_CALENDAR_ID)
    }
}

/// User's Google OAuth credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credential {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Absolute expiry of the access token
    pub expiry_date: DateTime<Utc>,
    /// Granted OAuth scopes (space separated)
    #[serde(default)]
    pub scope: Option<String>,
}

/// Token material written by issuance or refresh.
///
/// `refresh_token` and `scope` are optional because Google omits them on
/// most refresh responses.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialUpdate {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expiry_date: DateTime<Utc>,
    pub scope: Option<String>,
}

impl Credential {
    /// Merge an update into the stored credential (or create one).
    ///
    /// A stored refresh token is never replaced by a missing or empty one.
    pub fn apply(existing: Option<Credential>, user_id: Uuid, update: &CredentialUpdate) -> Self {
        let new_refresh = update
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        match existing {
            Some(mut credential) => {
                credential.access_token = update.access_token.clone();
                credential.token_type = update.token_type.clone();
                credential.expiry_date = update.expiry_date;
                if let Some(refresh) = new_refresh {
                    credential.refresh_token = refresh;
                }
                if update.scope.is_some() {
                    credential.scope = update.scope.clone();
                }
                credential
            }
            None => Self {
                user_id,
                access_token: update.access_token.clone(),
                refresh_token: new_refresh.unwrap_or_default(),
                token_type: update.token_type.clone(),
                expiry_date: update.expiry_date,
                scope: update.scope.clone(),
            },
        }
    }

    /// Whether the access token is expired or expires within `margin`.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        now + margin >= self.expiry_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn update(refresh: Option<&str>) -> CredentialUpdate {
        CredentialUpdate {
            access_token: "new_access".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expiry_date: Utc::now() + Duration::hours(1),
            scope: None,
        }
    }

    fn stored() -> Credential {
        Credential {
            user_id: Uuid::new_v4(),
            access_token: "old_access".to_string(),
            refresh_token: "old_refresh".to_string(),
            token_type: "Bearer".to_string(),
            expiry_date: Utc::now() - Duration::minutes(1),
            scope: Some("calendar".to_string()),
        }
    }

    #[test]
    fn test_apply_keeps_refresh_token_when_missing() {
        let existing = stored();
        let merged = Credential::apply(Some(existing.clone()), existing.user_id, &update(None));

        assert_eq!(merged.access_token, "new_access");
        assert_eq!(merged.refresh_token, "old_refresh");
        assert_eq!(merged.scope.as_deref(), Some("calendar"));
    }

    #[test]
    fn test_apply_keeps_refresh_token_when_empty() {
        let existing = stored();
        let merged = Credential::apply(Some(existing.clone()), existing.user_id, &update(Some("")));

        assert_eq!(merged.refresh_token, "old_refresh");
    }

    #[test]
    fn test_apply_replaces_refresh_token_when_supplied() {
        let existing = stored();
        let merged = Credential::apply(
            Some(existing.clone()),
            existing.user_id,
            &update(Some("rotated")),
        );

        assert_eq!(merged.refresh_token, "rotated");
    }

    #[test]
    fn test_needs_refresh() {
        let now = Utc::now();
        let mut credential = stored();

        credential.expiry_date = now - Duration::seconds(1);
        assert!(credential.needs_refresh(now, Duration::zero()));

        credential.expiry_date = now + Duration::hours(1);
        assert!(!credential.needs_refresh(now, Duration::seconds(60)));

        credential.expiry_date = now + Duration::seconds(30);
        assert!(credential.needs_refresh(now, Duration::seconds(60)));
    }

    #[test]
    fn test_calendar_id_fallback() {
        let mut user = User::new("ana", "ana@example.com");
        assert_eq!(user.calendar_id(), "primary");

        user.calendar_id = Some(String::new());
        assert_eq!(user.calendar_id(), "primary");

        user.calendar_id = Some("team@group.calendar.google.com".to_string());
        assert_eq!(user.calendar_id(), "team@group.calendar.google.com");
    }
}
