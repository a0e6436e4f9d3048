//! Matching of external records against internal entities.
//!
//! A recorded link wins outright. Without one, correlation rules are
//! evaluated against entity attribute storage and the candidates are merged
//! by entity key.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use idsync_connector::ids::ResourceId;
use idsync_connector::operation::{AttributeSet, ExternalRecord, Uid};

use crate::entity::{EntityKey, EntityType, InternalEntity};
use crate::error::PullResult;
use crate::store::{AttributeQuery, EntityStore, LinkStore};

/// How strongly an internal entity corresponds to an external record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Found through an exact correlation rule.
    Exact,
    /// Found through a recorded link.
    Linked,
    /// Found through a fuzzy correlation rule.
    Any,
}

impl MatchKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Linked => "linked",
            MatchKind::Any => "any",
        }
    }

    /// Precedence rank, lower is stronger.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            MatchKind::Exact => 0,
            MatchKind::Linked => 1,
            MatchKind::Any => 2,
        }
    }

    #[must_use]
    pub fn outranks(&self, other: MatchKind) -> bool {
        self.rank() < other.rank()
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Match type for correlation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMatchType {
    /// Exact match required.
    #[default]
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Contains match.
    Contains,
    /// Case-insensitive exact match.
    CaseInsensitive,
}

impl CorrelationMatchType {
    /// The match kind produced by rules of this type.
    #[must_use]
    pub fn match_kind(&self) -> MatchKind {
        match self {
            CorrelationMatchType::Exact => MatchKind::Exact,
            _ => MatchKind::Any,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Correlation rule for finding an existing internal entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRule {
    /// Priority of this rule (lower = higher priority).
    #[serde(default)]
    pub priority: i32,

    /// Attribute read from the external record. Accepts `__UID__`/`__NAME__`.
    pub external_attribute: String,

    /// Attribute searched in internal storage.
    pub internal_attribute: String,

    #[serde(default)]
    pub match_type: CorrelationMatchType,

    #[serde(default = "default_true")]
    pub case_sensitive: bool,
}

impl CorrelationRule {
    /// An exact, case-sensitive rule.
    pub fn exact(external: impl Into<String>, internal: impl Into<String>) -> Self {
        Self {
            priority: 0,
            external_attribute: external.into(),
            internal_attribute: internal.into(),
            match_type: CorrelationMatchType::Exact,
            case_sensitive: true,
        }
    }

    #[must_use]
    pub fn with_match_type(mut self, match_type: CorrelationMatchType) -> Self {
        self.match_type = match_type;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

/// One candidate entity with the strength of its match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMatch {
    pub kind: MatchKind,
    pub entity: InternalEntity,
}

impl PullMatch {
    #[must_use]
    pub fn new(kind: MatchKind, entity: InternalEntity) -> Self {
        Self { kind, entity }
    }

    #[must_use]
    pub fn key(&self) -> EntityKey {
        self.entity.key
    }
}

/// Candidates for one external record, strongest first.
///
/// Never mixes `Any` candidates with `Exact`/`Linked` ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    matches: Vec<PullMatch>,
}

impl MatchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from raw candidates, enforcing the Any-suppression rule.
    #[must_use]
    pub fn from_candidates(mut matches: Vec<PullMatch>) -> Self {
        if matches.iter().any(|m| m.kind != MatchKind::Any) {
            matches.retain(|m| m.kind != MatchKind::Any);
        }
        matches.sort_by_key(|m| m.kind.rank());
        Self { matches }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PullMatch> {
        self.matches.iter()
    }

    /// The candidates sharing the strongest kind.
    #[must_use]
    pub fn best(&self) -> &[PullMatch] {
        let Some(first) = self.matches.first() else {
            return &[];
        };
        let end = self
            .matches
            .iter()
            .position(|m| m.kind != first.kind)
            .unwrap_or(self.matches.len());
        &self.matches[..end]
    }

    /// The single strongest candidate, or None when empty or tied.
    #[must_use]
    pub fn unique(&self) -> Option<&PullMatch> {
        match self.best() {
            [only] => Some(only),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<PullMatch> {
        self.matches
    }
}

/// Finds internal entities for external records.
pub struct InboundMatcher {
    entities: Arc<dyn EntityStore>,
    links: Arc<dyn LinkStore>,
    rules: HashMap<EntityType, Vec<CorrelationRule>>,
}

impl InboundMatcher {
    pub fn new(entities: Arc<dyn EntityStore>, links: Arc<dyn LinkStore>) -> Self {
        Self {
            entities,
            links,
            rules: HashMap::new(),
        }
    }

    /// Set the correlation rules for an entity type, ordered by priority.
    #[must_use]
    pub fn with_rules(mut self, entity_type: EntityType, mut rules: Vec<CorrelationRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        self.rules.insert(entity_type, rules);
        self
    }

    #[must_use]
    pub fn rules_for(&self, entity_type: &EntityType) -> &[CorrelationRule] {
        self.rules.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find the internal entities an external record corresponds to.
    ///
    /// Returns an empty result when nothing correlates. Read-only.
    #[instrument(
        skip(self, entity_type, record),
        fields(uid = %record.uid(), entity_type = %entity_type)
    )]
    pub async fn match_record(
        &self,
        entity_type: &EntityType,
        record: &ExternalRecord,
        resource: ResourceId,
    ) -> PullResult<MatchResult> {
        if let Some(linked) = self.linked_entity(entity_type, record, resource).await? {
            debug!(key = %linked.key, "Matched through recorded link");
            return Ok(MatchResult::from_candidates(vec![PullMatch::new(
                MatchKind::Linked,
                linked,
            )]));
        }

        let mut candidates: BTreeMap<EntityKey, PullMatch> = BTreeMap::new();
        for rule in self.rules_for(entity_type) {
            let kind = rule.match_type.match_kind();
            for value in record.values_of(&rule.external_attribute) {
                if value.trim().is_empty() {
                    continue;
                }
                let query = AttributeQuery {
                    entity_type: entity_type.clone(),
                    attribute: rule.internal_attribute.clone(),
                    value,
                    match_type: rule.match_type,
                    case_sensitive: rule.case_sensitive,
                };
                for entity in self.entities.search(&query).await? {
                    candidates
                        .entry(entity.key)
                        .and_modify(|existing| {
                            if kind.outranks(existing.kind) {
                                existing.kind = kind;
                            }
                        })
                        .or_insert_with(|| PullMatch::new(kind, entity));
                }
            }
        }

        let result = MatchResult::from_candidates(candidates.into_values().collect());
        debug!(candidates = result.len(), "Correlation finished");
        Ok(result)
    }

    /// Match a reference value such as a member DN, treating it as both the
    /// UID and the name of an object of `object_class`.
    pub async fn match_reference(
        &self,
        entity_type: &EntityType,
        object_class: &str,
        reference: &str,
        resource: ResourceId,
    ) -> PullResult<MatchResult> {
        let record =
            ExternalRecord::new(Uid::from_value(reference), object_class, AttributeSet::new())
                .with_name(reference);
        self.match_record(entity_type, &record, resource).await
    }

    async fn linked_entity(
        &self,
        entity_type: &EntityType,
        record: &ExternalRecord,
        resource: ResourceId,
    ) -> PullResult<Option<InternalEntity>> {
        let Some(link) = self
            .links
            .find_link(resource, record.object_class(), record.uid().value())
            .await?
        else {
            return Ok(None);
        };

        match self.entities.find(link.entity_key).await? {
            Some(entity) if &entity.entity_type == entity_type => Ok(Some(entity)),
            Some(entity) => {
                warn!(
                    key = %entity.key,
                    linked_type = %entity.entity_type,
                    "Link points to an entity of another type, ignoring"
                );
                Ok(None)
            }
            None => {
                warn!(key = %link.entity_key, "Dangling link, falling back to correlation");
                Ok(None)
            }
        }
    }
}
