//! Persistence interfaces used by the pull engine.
//!
//! The engine never owns entity storage. It reads and writes through
//! [`EntityStore`] and records source-to-entity links through [`LinkStore`].
//! Both are supplied by the caller per profile.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use idsync_connector::ids::ResourceId;
use idsync_connector::operation::AttributeSet;

use crate::entity::{EntityKey, EntityType, InternalEntity, MembershipPatch};
use crate::matching::CorrelationMatchType;

/// Errors raised by persistence collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entity does not exist.
    #[error("Entity not found: {0}")]
    NotFound(EntityKey),

    /// The write violates a constraint (uniqueness, schema).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The backend is unavailable or failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Attribute lookup issued by a correlation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeQuery {
    pub entity_type: EntityType,
    pub attribute: String,
    pub value: String,
    pub match_type: CorrelationMatchType,
    pub case_sensitive: bool,
}

impl AttributeQuery {
    /// Whether a stored attribute value satisfies this query.
    ///
    /// Stores without native query support can filter with this.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let fold =
            !self.case_sensitive || self.match_type == CorrelationMatchType::CaseInsensitive;
        let (candidate, value) = if fold {
            (candidate.to_lowercase(), self.value.to_lowercase())
        } else {
            (candidate.to_string(), self.value.clone())
        };

        match self.match_type {
            CorrelationMatchType::Exact | CorrelationMatchType::CaseInsensitive => {
                candidate == value
            }
            CorrelationMatchType::Prefix => candidate.starts_with(&value),
            CorrelationMatchType::Suffix => candidate.ends_with(&value),
            CorrelationMatchType::Contains => candidate.contains(&value),
        }
    }

    /// Whether any text value of the entity's attribute satisfies this query.
    #[must_use]
    pub fn matches_entity(&self, entity: &InternalEntity) -> bool {
        entity.entity_type == self.entity_type
            && entity
                .attributes
                .get(&self.attribute)
                .map(|v| v.to_text_values().iter().any(|c| self.matches(c)))
                .unwrap_or(false)
    }
}

/// Internal entity storage.
///
/// Writes apply target state: repeating a call with the same arguments
/// leaves storage unchanged.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find(&self, key: EntityKey) -> StoreResult<Option<InternalEntity>>;

    async fn search(&self, query: &AttributeQuery) -> StoreResult<Vec<InternalEntity>>;

    async fn create(
        &self,
        entity_type: &EntityType,
        attributes: &AttributeSet,
    ) -> StoreResult<InternalEntity>;

    /// Overwrite the given attributes, leaving others untouched.
    async fn update(&self, key: EntityKey, attributes: &AttributeSet)
        -> StoreResult<InternalEntity>;

    async fn delete(&self, key: EntityKey) -> StoreResult<()>;

    /// Keys of the entities currently holding a membership edge to `container`.
    async fn members_of(&self, container: EntityKey) -> StoreResult<Vec<EntityKey>>;

    /// Add and remove membership edges on a member entity.
    async fn update_memberships(
        &self,
        member: EntityKey,
        patch: &MembershipPatch,
    ) -> StoreResult<InternalEntity>;
}

/// A recorded correspondence between a source object and an internal entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLink {
    pub resource: ResourceId,
    pub object_class: String,
    pub uid: String,
    pub entity_key: EntityKey,
    pub linked_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl ExternalLink {
    pub fn new(
        resource: ResourceId,
        object_class: impl Into<String>,
        uid: impl Into<String>,
        entity_key: EntityKey,
    ) -> Self {
        let now = Utc::now();
        Self {
            resource,
            object_class: object_class.into(),
            uid: uid.into(),
            entity_key,
            linked_at: now,
            last_synced_at: now,
        }
    }
}

/// Storage of source-to-entity links.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Find the link of a source object. UIDs are unique within an object
    /// class only.
    async fn find_link(
        &self,
        resource: ResourceId,
        object_class: &str,
        uid: &str,
    ) -> StoreResult<Option<ExternalLink>>;

    /// Insert or refresh a link. Refreshing keeps the original `linked_at`.
    async fn link(&self, link: ExternalLink) -> StoreResult<()>;

    /// Remove a link, returning whether one existed.
    async fn unlink(&self, resource: ResourceId, object_class: &str, uid: &str)
        -> StoreResult<bool>;
}
