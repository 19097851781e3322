//! Read-only view of the marketplace's user profiles, used to title previews.
//! Profiles are owned and written by the surrounding marketplace.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait ProfileDirectory: std::fmt::Debug + Send + Sync {
    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryProfileDirectory {
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
}

impl InMemoryProfileDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: UserProfile) {
        self.profiles.write().await.insert(profile.user_id, profile);
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryProfileDirectory {
    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.read().await.get(&user_id).cloned())
    }
}

/// Reads `marketchat.user_profiles`, a projection kept in sync by the marketplace.
#[derive(Debug, Clone)]
pub struct PgProfileDirectory {
    pool: PgPool,
}

impl PgProfileDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileDirectory for PgProfileDirectory {
    async fn profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let profile = sqlx::query_as::<_, UserProfile>(
            "SELECT user_id, display_name, avatar_url
             FROM marketchat.user_profiles
             WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }
}
