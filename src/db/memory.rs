//! Process-local profile store for offline development and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::ProfileStore;
use crate::error::AppError;
use crate::models::{Credits, UserProfile};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile as-is, role included. Seeding only.
    pub async fn seed(&self, profile: UserProfile) {
        self.users
            .write()
            .await
            .insert(profile.uid.clone(), profile);
    }

    /// Overwrite a user's balances (what the purchase backend does).
    pub async fn set_credits(&self, uid: &str, credits: Credits) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(uid)
            .ok_or_else(|| AppError::NotFound(format!("User {uid} not found")))?;
        user.credits = credits;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        Ok(self.users.read().await.get(uid).cloned())
    }

    async fn create_user(&self, profile: &UserProfile) -> Result<bool, AppError> {
        let mut users = self.users.write().await;
        if users.contains_key(&profile.uid) {
            return Ok(false);
        }
        users.insert(profile.uid.clone(), profile.clone());
        Ok(true)
    }

    /// Field patch applied under one write lock, like a Firestore update
    /// with a field mask.
    async fn patch_user(
        &self,
        profile: &UserProfile,
        fields: Vec<String>,
    ) -> Result<UserProfile, AppError> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&profile.uid)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", profile.uid)))?;

        let source = serde_json::to_value(profile).map_err(|e| AppError::Internal(e.into()))?;
        let mut target = serde_json::to_value(&*stored).map_err(|e| AppError::Internal(e.into()))?;
        for field in &fields {
            target[field.as_str()] = source[field.as_str()].clone();
        }
        *stored = serde_json::from_value(target).map_err(|e| AppError::Internal(e.into()))?;

        Ok(stored.clone())
    }
}
