//! Database layer (document store for user profiles and credits).

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreDb;
pub use memory::MemoryStore;

use async_trait::async_trait;
use ::firestore::{path, paths};

use crate::error::AppError;
use crate::models::{Credits, PersonaImage, ProfileUpdate, UserProfile};

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
}

/// Profile persistence as seen by the rest of the application.
///
/// Backends implement the primitive document operations; the update helpers
/// are shared. Helpers write only the fields they change, so a concurrent
/// credit purchase is never overwritten, and none of them can change `role`
/// or `credits`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Get a user profile by uid.
    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError>;

    /// Create a profile if none exists. Returns `false` if one already did.
    async fn create_user(&self, profile: &UserProfile) -> Result<bool, AppError>;

    /// Write the named top-level `fields` of `profile` onto the stored
    /// document, leaving every other field as stored. Returns the document
    /// after the write; `NotFound` if it does not exist.
    async fn patch_user(
        &self,
        profile: &UserProfile,
        fields: Vec<String>,
    ) -> Result<UserProfile, AppError>;

    /// Credit balances for a user. Errors with `NotFound` for unknown users.
    async fn get_credits(&self, uid: &str) -> Result<Credits, AppError> {
        self.get_user(uid)
            .await?
            .map(|user| user.credits)
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))
    }

    /// Apply a client profile update.
    async fn update_profile(
        &self,
        uid: &str,
        update: &ProfileUpdate,
        now: &str,
    ) -> Result<UserProfile, AppError> {
        let mut profile = self
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;
        profile.apply_update(update, now);

        let mut fields = paths!(UserProfile::{updated_at});
        if update.name.is_some() {
            fields.push(path!(UserProfile::name));
        }
        if update.date_of_birth.is_some() {
            fields.push(path!(UserProfile::date_of_birth));
        }
        if update.time_of_birth.is_some() {
            fields.push(path!(UserProfile::time_of_birth));
        }
        if update.place_of_birth.is_some() {
            fields.push(path!(UserProfile::place_of_birth));
        }

        self.patch_user(&profile, fields).await
    }

    /// Set or clear the persona image reference.
    async fn set_persona(
        &self,
        uid: &str,
        persona: Option<PersonaImage>,
        now: &str,
    ) -> Result<UserProfile, AppError> {
        let mut profile = self
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;
        profile.persona = persona;
        profile.updated_at = now.to_string();
        self.patch_user(&profile, paths!(UserProfile::{persona, updated_at}))
            .await
    }

    /// Stamp `last_login_at` (and optionally terms/privacy acceptance).
    async fn record_login(
        &self,
        uid: &str,
        now: &str,
        accepted_terms: bool,
    ) -> Result<UserProfile, AppError> {
        let mut profile = self
            .get_user(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;
        profile.last_login_at = Some(now.to_string());

        let mut fields = paths!(UserProfile::{last_login_at});
        if accepted_terms {
            profile
                .agreed_to_terms_at
                .get_or_insert_with(|| now.to_string());
            profile
                .agreed_to_privacy_at
                .get_or_insert_with(|| now.to_string());
            fields.extend(paths!(UserProfile::{agreed_to_terms_at, agreed_to_privacy_at}));
        }

        self.patch_user(&profile, fields).await
    }
}
