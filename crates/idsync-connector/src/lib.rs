//! # Connector Abstractions for Inbound Sync
//!
//! Types shared between connectors and the inbound pull engine.
//!
//! A connector reads identities and groups out of an external system
//! (LDAP/Active Directory, an HR database, a REST directory) and hands them
//! over as a stream of [`SyncDelta`](traits::SyncDelta)s. Each delta wraps an
//! [`ExternalRecord`](operation::ExternalRecord) carrying a stable
//! [`Uid`](operation::Uid) and the attributes read from the source.
//!
//! ## Crate Organization
//!
//! - [`ids`] - Type-safe identifiers (`ResourceId`)
//! - [`types`] - Enums (`ConnectorType`, `DeltaHint`)
//! - [`error`] - Error types with transient/permanent classification
//! - [`operation`] - `Uid`, `AttributeSet`, `AttributeValue`, `ExternalRecord`
//! - [`traits`] - `Connector` and `DeltaSource` capability traits

pub mod error;
pub mod ids;
pub mod operation;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
///
/// ```
/// use idsync_connector::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::ids::ResourceId;
    pub use crate::operation::{
        AttributeSet, AttributeValue, ExternalRecord, Uid, NAME_ATTRIBUTE, UID_ATTRIBUTE,
    };
    pub use crate::traits::{Connector, DeltaBatch, DeltaSource, SyncDelta};
    pub use crate::types::{ConnectorType, DeltaHint};
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
