use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use shared::models::ConversationKind;
use uuid::Uuid;

use crate::store::{ConversationRecord, ProfileDirectory, StoreError};

/// How a conversation is labelled for one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewIdentity {
    pub title: String,
    pub thumbnail: Option<String>,
}

#[async_trait]
pub trait PreviewResolver: std::fmt::Debug + Send + Sync {
    async fn resolve(
        &self,
        viewer: Uuid,
        conversation: &ConversationRecord,
    ) -> Result<PreviewIdentity, StoreError>;
}

/// Titles a direct conversation after the counterparty's profile.
#[derive(Debug, Clone)]
pub struct DirectPreviewResolver {
    profiles: Arc<dyn ProfileDirectory>,
}

impl DirectPreviewResolver {
    pub fn new(profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl PreviewResolver for DirectPreviewResolver {
    async fn resolve(
        &self,
        viewer: Uuid,
        conversation: &ConversationRecord,
    ) -> Result<PreviewIdentity, StoreError> {
        let Some(counterparty) = conversation.other_members(viewer).next() else {
            return Ok(fallback_identity());
        };

        Ok(match self.profiles.profile(counterparty).await? {
            Some(profile) => PreviewIdentity {
                title: profile.display_name,
                thumbnail: profile.avatar_url,
            },
            None => PreviewIdentity {
                title: placeholder_title(counterparty),
                thumbnail: None,
            },
        })
    }
}

/// Resolvers keyed by conversation kind.
#[derive(Debug, Clone, Default)]
pub struct PreviewResolvers {
    resolvers: HashMap<ConversationKind, Arc<dyn PreviewResolver>>,
}

impl PreviewResolvers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: direct conversations titled from `profiles`.
    pub fn with_profiles(profiles: Arc<dyn ProfileDirectory>) -> Self {
        Self::new().register(
            ConversationKind::Direct,
            Arc::new(DirectPreviewResolver::new(profiles)),
        )
    }

    #[must_use]
    pub fn register(mut self, kind: ConversationKind, resolver: Arc<dyn PreviewResolver>) -> Self {
        self.resolvers.insert(kind, resolver);
        self
    }

    /// Kinds without a resolver get a generic title.
    ///
    /// # Errors
    /// Propagates profile lookup failures.
    pub async fn resolve(
        &self,
        viewer: Uuid,
        conversation: &ConversationRecord,
    ) -> Result<PreviewIdentity, StoreError> {
        match self.resolvers.get(&conversation.kind) {
            Some(resolver) => resolver.resolve(viewer, conversation).await,
            None => Ok(fallback_identity()),
        }
    }
}

fn fallback_identity() -> PreviewIdentity {
    PreviewIdentity {
        title: "Conversation".to_string(),
        thumbnail: None,
    }
}

fn placeholder_title(user_id: Uuid) -> String {
    let simple = user_id.simple().to_string();
    format!("User {}", &simple[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryProfileDirectory, UserProfile};
    use chrono::Utc;

    fn direct(a: Uuid, b: Uuid) -> ConversationRecord {
        let now = Utc::now();
        ConversationRecord {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            members: vec![a, b],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn direct_title_comes_from_counterparty_profile() {
        let profiles = Arc::new(InMemoryProfileDirectory::new());
        let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
        profiles
            .upsert(UserProfile {
                user_id: seller,
                display_name: "Harbor Antiques".into(),
                avatar_url: Some("https://cdn.example/harbor.png".into()),
            })
            .await;

        let resolvers = PreviewResolvers::with_profiles(profiles);
        let identity = resolvers.resolve(buyer, &direct(buyer, seller)).await.unwrap();

        assert_eq!(identity.title, "Harbor Antiques");
        assert_eq!(
            identity.thumbnail.as_deref(),
            Some("https://cdn.example/harbor.png")
        );
    }

    #[tokio::test]
    async fn missing_profile_falls_back_to_short_id() {
        let resolvers = PreviewResolvers::with_profiles(Arc::new(InMemoryProfileDirectory::new()));
        let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());

        let identity = resolvers.resolve(seller, &direct(buyer, seller)).await.unwrap();
        assert!(identity.title.starts_with("User "));
        assert_eq!(identity.title.len(), "User ".len() + 8);
        assert!(identity.thumbnail.is_none());
    }

    #[tokio::test]
    async fn unregistered_kind_gets_generic_title() {
        let resolvers = PreviewResolvers::new();
        let identity = resolvers
            .resolve(Uuid::new_v4(), &direct(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(identity.title, "Conversation");
    }
}
