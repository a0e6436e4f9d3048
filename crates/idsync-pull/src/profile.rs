//! Pull profile: everything one run needs to know about a resource.

use std::collections::HashSet;
use std::sync::Arc;

use idsync_connector::ids::ResourceId;
use idsync_connector::traits::DeltaSource;

use crate::config::PullConfig;
use crate::entity::EntityType;
use crate::error::{PullError, PullResult};
use crate::hooks::PullHook;
use crate::mapping::InboundMapper;
use crate::matching::{CorrelationRule, InboundMatcher};
use crate::store::{EntityStore, LinkStore};

/// How one source object class provisions one internal entity type.
#[derive(Debug, Clone)]
pub struct Provision {
    pub object_class: String,
    pub entity_type: EntityType,
    pub mapper: InboundMapper,
    pub correlation_rules: Vec<CorrelationRule>,
}

impl Provision {
    pub fn new(object_class: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            object_class: object_class.into(),
            entity_type,
            mapper: InboundMapper::new(),
            correlation_rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_mapper(mut self, mapper: InboundMapper) -> Self {
        self.mapper = mapper;
        self
    }

    #[must_use]
    pub fn with_correlation_rule(mut self, rule: CorrelationRule) -> Self {
        self.correlation_rules.push(rule);
        self
    }
}

/// Resource binding, provisions, hooks and collaborators for a pull.
pub struct PullProfile {
    resource: ResourceId,
    connector: Arc<dyn DeltaSource>,
    provisions: Vec<Provision>,
    hooks: Vec<Arc<dyn PullHook>>,
    config: PullConfig,
    entities: Arc<dyn EntityStore>,
    links: Arc<dyn LinkStore>,
    matcher: InboundMatcher,
}

impl PullProfile {
    /// Create a builder.
    #[must_use]
    pub fn builder(
        resource: ResourceId,
        connector: Arc<dyn DeltaSource>,
        entities: Arc<dyn EntityStore>,
        links: Arc<dyn LinkStore>,
    ) -> PullProfileBuilder {
        PullProfileBuilder::new(resource, connector, entities, links)
    }

    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    #[must_use]
    pub fn connector(&self) -> &dyn DeltaSource {
        self.connector.as_ref()
    }

    /// Provisions in pull order.
    #[must_use]
    pub fn provisions(&self) -> &[Provision] {
        &self.provisions
    }

    #[must_use]
    pub fn provision_for(&self, entity_type: &EntityType) -> Option<&Provision> {
        self.provisions.iter().find(|p| &p.entity_type == entity_type)
    }

    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn PullHook>] {
        &self.hooks
    }

    #[must_use]
    pub fn config(&self) -> &PullConfig {
        &self.config
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    #[must_use]
    pub fn entities(&self) -> &dyn EntityStore {
        self.entities.as_ref()
    }

    #[must_use]
    pub fn links(&self) -> &dyn LinkStore {
        self.links.as_ref()
    }

    #[must_use]
    pub fn matcher(&self) -> &InboundMatcher {
        &self.matcher
    }
}

/// Builder for [`PullProfile`].
pub struct PullProfileBuilder {
    resource: ResourceId,
    connector: Arc<dyn DeltaSource>,
    entities: Arc<dyn EntityStore>,
    links: Arc<dyn LinkStore>,
    provisions: Vec<Provision>,
    hooks: Vec<Arc<dyn PullHook>>,
    config: PullConfig,
}

impl PullProfileBuilder {
    #[must_use]
    pub fn new(
        resource: ResourceId,
        connector: Arc<dyn DeltaSource>,
        entities: Arc<dyn EntityStore>,
        links: Arc<dyn LinkStore>,
    ) -> Self {
        Self {
            resource,
            connector,
            entities,
            links,
            provisions: Vec::new(),
            hooks: Vec::new(),
            config: PullConfig::default(),
        }
    }

    /// Add a provision. Provisions are pulled in the order they are added.
    #[must_use]
    pub fn provision(mut self, provision: Provision) -> Self {
        self.provisions.push(provision);
        self
    }

    /// Append a hook.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn PullHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    #[must_use]
    pub fn config(mut self, config: PullConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build the profile.
    pub fn build(self) -> PullResult<PullProfile> {
        self.config.validate()?;

        if self.provisions.is_empty() {
            return Err(PullError::configuration("At least one provision is required"));
        }
        let mut seen = HashSet::new();
        for provision in &self.provisions {
            if !seen.insert(provision.entity_type.clone()) {
                return Err(PullError::configuration(format!(
                    "Duplicate provision for entity type '{}'",
                    provision.entity_type
                )));
            }
            if provision.object_class.trim().is_empty() {
                return Err(PullError::configuration(format!(
                    "Provision for '{}' has an empty object class",
                    provision.entity_type
                )));
            }
        }

        let matcher = self.provisions.iter().fold(
            InboundMatcher::new(self.entities.clone(), self.links.clone()),
            |matcher, provision| {
                matcher.with_rules(
                    provision.entity_type.clone(),
                    provision.correlation_rules.clone(),
                )
            },
        );

        Ok(PullProfile {
            resource: self.resource,
            connector: self.connector,
            provisions: self.provisions,
            hooks: self.hooks,
            config: self.config,
            entities: self.entities,
            links: self.links,
            matcher,
        })
    }
}
