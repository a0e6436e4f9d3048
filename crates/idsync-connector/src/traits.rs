//! Connector traits
//!
//! Capability-based trait definitions for connectors feeding the inbound
//! pull pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorResult;
use crate::operation::{ExternalRecord, Uid};
use crate::types::{ConnectorType, DeltaHint};

/// Base trait for all connectors.
pub trait Connector: Send + Sync {
    /// Get the type of this connector.
    fn connector_type(&self) -> ConnectorType;

    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Look up a configuration property of this connector instance
    /// (e.g. `groupMemberAttribute` on an LDAP connector).
    fn configuration_property(&self, _name: &str) -> Option<String> {
        None
    }
}

/// One change reported by a source during synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    /// The object as currently known by the source. For absent deltas only the
    /// UID and object class are meaningful.
    pub record: ExternalRecord,
    /// Whether the object still exists in the source.
    pub hint: DeltaHint,
}

impl SyncDelta {
    /// A created or updated object.
    pub fn present(record: ExternalRecord) -> Self {
        Self {
            record,
            hint: DeltaHint::Present,
        }
    }

    /// A deleted object.
    pub fn absent(uid: Uid, object_class: impl Into<String>) -> Self {
        Self {
            record: ExternalRecord::new(uid, object_class, Default::default()),
            hint: DeltaHint::Absent,
        }
    }
}

/// Result of fetching one batch of deltas.
#[derive(Debug, Clone, Default)]
pub struct DeltaBatch {
    /// The deltas detected.
    pub deltas: Vec<SyncDelta>,
    /// The token to pass on the next fetch. None keeps the current token.
    pub new_token: Option<String>,
    /// Whether there are more deltas to fetch.
    pub has_more: bool,
}

impl DeltaBatch {
    /// Create a batch with no deltas.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a final batch with the given deltas.
    #[must_use]
    pub fn with_deltas(deltas: Vec<SyncDelta>) -> Self {
        Self {
            deltas,
            new_token: None,
            has_more: false,
        }
    }

    /// Set the new sync token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.new_token = Some(token.into());
        self
    }

    /// Indicate that there are more deltas to fetch.
    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}

/// Capability for streaming deltas out of an external system.
///
/// Batches may be finite (full pull) or keep arriving for as long as the
/// caller keeps fetching (live sync). Deltas carry no causal ordering: a
/// group may arrive before or after its members.
#[async_trait]
pub trait DeltaSource: Connector {
    /// Fetch the next batch of deltas for an object class.
    ///
    /// # Arguments
    /// * `object_class` - The type of objects to read (e.g., "user", "group")
    /// * `token` - The token returned by the previous batch, None on first fetch
    /// * `batch_size` - Maximum number of deltas to return
    async fn fetch_deltas(
        &self,
        object_class: &str,
        token: Option<&str>,
        batch_size: usize,
    ) -> ConnectorResult<DeltaBatch>;
}
