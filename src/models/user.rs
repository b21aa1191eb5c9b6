//! User profile model for storage and API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::error::AppError;
use crate::models::Credits;

/// Authorization role. Assigned when the profile is created and never
/// writable by clients afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

/// Admin-curated persona image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PersonaImage {
    /// Public download URL
    pub url: String,
    /// Blob store path (needed for deletion)
    pub path: String,
    /// Upload timestamp (RFC3339)
    pub uploaded_at: String,
}

/// User profile stored in Firestore (`users/{uid}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserProfile {
    /// Google account subject (also used as document ID)
    pub uid: String,
    pub email: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub photo_url: Option<String>,

    // ─── Birth Details ───────────────────────────────────────────
    #[serde(default)]
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub date_of_birth: Option<NaiveDate>,
    /// "HH:mm", 24-hour
    #[serde(default)]
    pub time_of_birth: Option<String>,
    #[serde(default)]
    pub place_of_birth: Option<String>,

    #[serde(default)]
    pub persona: Option<PersonaImage>,

    #[serde(default)]
    pub role: UserRole,

    /// Missing in storage means zero balances.
    #[serde(default)]
    pub credits: Credits,

    // ─── Timestamps (RFC3339) ────────────────────────────────────
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub last_login_at: Option<String>,
    #[serde(default)]
    pub agreed_to_terms_at: Option<String>,
    #[serde(default)]
    pub agreed_to_privacy_at: Option<String>,
}

impl UserProfile {
    /// Build the profile created on first sign-in.
    ///
    /// The role is always [`UserRole::User`]; admins are promoted out of band.
    pub fn new_for_signup(uid: &str, email: &str, display_name: Option<&str>, now: &str) -> Self {
        Self {
            uid: uid.to_string(),
            email: email.to_string(),
            name: default_display_name(display_name, email),
            photo_url: None,
            date_of_birth: None,
            time_of_birth: None,
            place_of_birth: None,
            persona: None,
            role: UserRole::User,
            credits: Credits::default(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            last_login_at: Some(now.to_string()),
            agreed_to_terms_at: None,
            agreed_to_privacy_at: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Whether all three birth details have been filled in.
    pub fn has_birth_details(&self) -> bool {
        self.date_of_birth.is_some()
            && self.time_of_birth.is_some()
            && self.place_of_birth.is_some()
    }

    /// Apply a validated client update.
    pub fn apply_update(&mut self, update: &ProfileUpdate, now: &str) {
        if let Some(name) = &update.name {
            self.name = name.trim().to_string();
        }
        if let Some(date) = update.date_of_birth {
            self.date_of_birth = Some(date);
        }
        if let Some(time) = &update.time_of_birth {
            self.time_of_birth = Some(time.clone());
        }
        if let Some(place) = &update.place_of_birth {
            self.place_of_birth = Some(place.trim().to_string());
        }
        self.updated_at = now.to_string();
    }
}

/// Display name fallback: the Google name, else the email local part, else "User".
fn default_display_name(display_name: Option<&str>, email: &str) -> String {
    if let Some(name) = display_name.map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    email
        .split('@')
        .next()
        .filter(|local| !local.is_empty())
        .unwrap_or("User")
        .to_string()
}

/// Client-initiated profile update. Has no `role` field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(custom(function = "validate_time_of_birth"))]
    pub time_of_birth: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Place of birth must be 1-100 characters"))]
    pub place_of_birth: Option<String>,
}

/// Fields a client may never write, whatever the value.
const PROTECTED_FIELDS: &[&str] = &["role", "credits", "uid", "created_at"];

impl ProfileUpdate {
    /// Parse and validate a raw JSON update payload.
    ///
    /// Payloads touching a protected field (most importantly `role`) are
    /// rejected as a security violation before anything else is checked.
    pub fn from_json(payload: serde_json::Value) -> Result<Self, AppError> {
        let object = payload
            .as_object()
            .ok_or_else(|| AppError::BadRequest("Update must be a JSON object".to_string()))?;

        if let Some(field) = PROTECTED_FIELDS.iter().find(|f| object.contains_key(**f)) {
            return Err(AppError::SecurityViolation(format!(
                "Cannot update {field} field"
            )));
        }

        let update: ProfileUpdate = serde_json::from_value(payload)
            .map_err(|e| AppError::BadRequest(format!("Invalid profile update: {e}")))?;

        update
            .validate()
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        if let Some(date) = update.date_of_birth {
            if date > chrono::Utc::now().date_naive() {
                return Err(AppError::BadRequest(
                    "Date of birth cannot be in the future".to_string(),
                ));
            }
        }

        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        self == &ProfileUpdate::default()
    }
}

fn validate_time_of_birth(value: &str) -> Result<(), validator::ValidationError> {
    if is_valid_time_of_day(value) {
        Ok(())
    } else {
        let mut err = validator::ValidationError::new("time_of_birth");
        err.message = Some("Time must be in HH:mm format (24-hour)".into());
        Err(err)
    }
}

/// Checks `HH:mm` with `00 <= HH <= 23` and `00 <= mm <= 59`.
pub fn is_valid_time_of_day(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    let two_digits = |s: &str| s.len() == 2 && s.bytes().all(|b| b.is_ascii_digit());
    if !two_digits(hours) || !two_digits(minutes) {
        return false;
    }
    match (hours.parse::<u8>(), minutes.parse::<u8>()) {
        (Ok(h), Ok(m)) => h <= 23 && m <= 59,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_value(UserRole::Admin).unwrap(), json!("admin"));
        let role: UserRole = serde_json::from_value(json!("user")).unwrap();
        assert_eq!(role, UserRole::User);
    }

    #[test]
    fn missing_credits_and_role_default() {
        let profile: UserProfile = serde_json::from_value(json!({
            "uid": "u1",
            "email": "a@example.com",
            "name": "A",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(profile.credits, Credits::default());
        assert_eq!(profile.role, UserRole::User);
        assert!(!profile.has_birth_details());
    }

    #[test]
    fn signup_name_fallbacks() {
        let now = "2026-01-01T00:00:00Z";
        let p = UserProfile::new_for_signup("u", "jane@example.com", Some("Jane D"), now);
        assert_eq!(p.name, "Jane D");
        let p = UserProfile::new_for_signup("u", "jane@example.com", Some("  "), now);
        assert_eq!(p.name, "jane");
        let p = UserProfile::new_for_signup("u", "", None, now);
        assert_eq!(p.name, "User");
        assert_eq!(p.role, UserRole::User);
    }

    #[test]
    fn update_with_role_is_security_violation() {
        let err = ProfileUpdate::from_json(json!({"name": "X", "role": "admin"})).unwrap_err();
        assert!(matches!(err, AppError::SecurityViolation(_)));

        let err = ProfileUpdate::from_json(json!({"credits": {"chat": 99}})).unwrap_err();
        assert!(matches!(err, AppError::SecurityViolation(_)));
    }

    #[test]
    fn update_validation() {
        let ok = ProfileUpdate::from_json(json!({
            "date_of_birth": "1990-05-17",
            "time_of_birth": "23:59",
            "place_of_birth": "Pune, India"
        }))
        .unwrap();
        assert_eq!(ok.time_of_birth.as_deref(), Some("23:59"));

        for bad in [
            json!({"time_of_birth": "24:00"}),
            json!({"time_of_birth": "7:30"}),
            json!({"place_of_birth": ""}),
            json!({"place_of_birth": "x".repeat(101)}),
            json!({"unknown": 1}),
            json!(["not", "an", "object"]),
        ] {
            assert!(
                matches!(ProfileUpdate::from_json(bad.clone()), Err(AppError::BadRequest(_))),
                "expected rejection for {bad}"
            );
        }
    }

    #[test]
    fn time_of_day_parsing() {
        assert!(is_valid_time_of_day("00:00"));
        assert!(is_valid_time_of_day("19:05"));
        assert!(!is_valid_time_of_day("19:60"));
        assert!(!is_valid_time_of_day("1905"));
        assert!(!is_valid_time_of_day("+1:05"));
    }

    #[test]
    fn apply_update_trims_and_stamps() {
        let mut p = UserProfile::new_for_signup("u", "a@b.c", None, "2026-01-01T00:00:00Z");
        let update = ProfileUpdate {
            place_of_birth: Some("  Mumbai ".to_string()),
            ..Default::default()
        };
        p.apply_update(&update, "2026-02-01T00:00:00Z");
        assert_eq!(p.place_of_birth.as_deref(), Some("Mumbai"));
        assert_eq!(p.updated_at, "2026-02-01T00:00:00Z");
        assert_eq!(p.created_at, "2026-01-01T00:00:00Z");
    }
}
