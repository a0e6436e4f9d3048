//! Internal entity model as seen by the pull engine.
//!
//! Entities are owned by the persistence layer; the engine only holds clones
//! for the duration of one delta.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use idsync_connector::operation::AttributeSet;

/// Internal key of a user, group or other entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(Uuid);

impl EntityKey {
    /// Create a new random key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityKey {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Kind of internal entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person or service identity.
    User,
    /// A container of users.
    Group,
    /// Any other provisioned object type (devices, printers, ...).
    Other(String),
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::User => "user",
            EntityType::Group => "group",
            EntityType::Other(name) => name,
        }
    }

    /// Whether entities of this type hold members.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, EntityType::Group)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "user" => EntityType::User,
            "group" => EntityType::Group,
            other => EntityType::Other(other.to_string()),
        })
    }
}

/// An internal identity, group or other entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalEntity {
    pub key: EntityKey,
    pub entity_type: EntityType,
    pub attributes: AttributeSet,
    /// Keys of the groups this entity is a member of. Membership edges are
    /// owned by the member side.
    #[serde(default)]
    pub memberships: BTreeSet<EntityKey>,
}

impl InternalEntity {
    /// Create an entity with a fresh key and no memberships.
    #[must_use]
    pub fn new(entity_type: EntityType, attributes: AttributeSet) -> Self {
        Self {
            key: EntityKey::new(),
            entity_type,
            attributes,
            memberships: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_membership(mut self, group: EntityKey) -> Self {
        self.memberships.insert(group);
        self
    }

    #[must_use]
    pub fn is_member_of(&self, group: EntityKey) -> bool {
        self.memberships.contains(&group)
    }
}

/// The attribute values the generic mutation step will write.
///
/// Built from the inbound mapping; hooks may adjust it before it is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub attributes: AttributeSet,
}

impl ChangeRequest {
    #[must_use]
    pub fn new(attributes: AttributeSet) -> Self {
        Self { attributes }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Membership edges to add to and remove from one member entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPatch {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub add: BTreeSet<EntityKey>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub remove: BTreeSet<EntityKey>,
}

impl MembershipPatch {
    #[must_use]
    pub fn adding(group: EntityKey) -> Self {
        Self {
            add: BTreeSet::from([group]),
            remove: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn removing(group: EntityKey) -> Self {
        Self {
            add: BTreeSet::new(),
            remove: BTreeSet::from([group]),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply to a membership set, producing the target state.
    pub fn apply_to(&self, memberships: &mut BTreeSet<EntityKey>) {
        for group in &self.remove {
            memberships.remove(group);
        }
        memberships.extend(self.add.iter().copied());
    }
}
