//! Inbound mapping of external attributes onto internal attributes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use idsync_connector::operation::{AttributeSet, AttributeValue, ExternalRecord};
use idsync_connector::operation::{NAME_ATTRIBUTE, UID_ATTRIBUTE};

use crate::entity::ChangeRequest;
use crate::error::{PullError, PullResult};

/// An attribute mapping rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    pub id: Uuid,
    /// External attribute name. `__UID__` and `__NAME__` map the record's
    /// identifiers.
    pub external_attribute: String,
    pub internal_attribute: String,
    /// Value used when the external attribute is missing.
    #[serde(default)]
    pub default_value: Option<AttributeValue>,
    #[serde(default)]
    pub required: bool,
}

impl AttributeMapping {
    /// Create a mapping without default or requirement.
    pub fn inbound(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_attribute: external.into(),
            internal_attribute: internal.into(),
            default_value: None,
            required: false,
        }
    }

    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<AttributeValue>) -> Self {
        self.default_value = Some(default.into());
        self
    }
}

/// Result of mapping one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingResult {
    /// Successfully mapped attributes, keyed by internal name.
    pub attributes: AttributeSet,
    /// Required external attributes that were missing.
    pub unmapped: Vec<String>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

impl MappingResult {
    /// Check if mapping was successful (no unmapped required attributes).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.unmapped.is_empty()
    }

    /// Turn the result into the change request for the mutation step.
    pub fn into_request(self, uid: &str) -> PullResult<ChangeRequest> {
        if !self.is_success() {
            return Err(PullError::mutation(
                uid,
                format!("Missing required attributes: {}", self.unmapped.join(", ")),
            ));
        }
        Ok(ChangeRequest::new(self.attributes))
    }
}

/// Inbound mapper for one provision.
#[derive(Debug, Clone, Default)]
pub struct InboundMapper {
    /// Mappings by external attribute name.
    mappings: HashMap<String, AttributeMapping>,
}

impl InboundMapper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from a list of mappings. A later mapping of the same external
    /// attribute replaces an earlier one.
    #[must_use]
    pub fn from_mappings(mappings: Vec<AttributeMapping>) -> Self {
        let mut mapper = Self::new();
        for mapping in mappings {
            mapper.add_mapping(mapping);
        }
        mapper
    }

    pub fn add_mapping(&mut self, mapping: AttributeMapping) {
        self.mappings
            .insert(mapping.external_attribute.to_lowercase(), mapping);
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: AttributeMapping) -> Self {
        self.add_mapping(mapping);
        self
    }

    /// Whether an external attribute is mapped (case-insensitive).
    #[must_use]
    pub fn maps_external(&self, external: &str) -> bool {
        self.mappings.contains_key(&external.to_lowercase())
    }

    /// Map a record's attributes to internal attributes.
    pub fn map(&self, record: &ExternalRecord) -> MappingResult {
        let mut result = MappingResult::default();

        for mapping in self.mappings.values() {
            match Self::external_value(record, &mapping.external_attribute) {
                Some(value) => result
                    .attributes
                    .set(mapping.internal_attribute.clone(), value),
                None => {
                    if let Some(ref default) = mapping.default_value {
                        result
                            .attributes
                            .set(mapping.internal_attribute.clone(), default.clone());
                    } else if mapping.required {
                        result.unmapped.push(mapping.external_attribute.clone());
                    }
                }
            }
        }

        for name in record.attributes().names() {
            if !self.maps_external(name) {
                result
                    .warnings
                    .push(format!("Unmapped external attribute: {name}"));
            }
        }
        if !result.warnings.is_empty() {
            debug!(
                uid = %record.uid(),
                unmapped = result.warnings.len(),
                "External attributes without inbound mapping"
            );
        }

        result
    }

    fn external_value(record: &ExternalRecord, attribute: &str) -> Option<AttributeValue> {
        match attribute {
            UID_ATTRIBUTE => Some(AttributeValue::from(record.uid().value())),
            NAME_ATTRIBUTE => record.name().map(AttributeValue::from),
            other => record
                .attributes()
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(other))
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_null()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
