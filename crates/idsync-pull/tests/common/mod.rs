//! Common test utilities for idsync-pull integration tests.
//!
//! In-memory entity and link stores plus a scripted delta source. Every test
//! builds its own [`Harness`] so runs never share state.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};

use idsync_connector::error::{ConnectorError, ConnectorResult};
use idsync_connector::ids::ResourceId;
use idsync_connector::operation::{AttributeSet, ExternalRecord, Uid};
use idsync_connector::traits::{Connector, DeltaBatch, DeltaSource, SyncDelta};
use idsync_connector::types::ConnectorType;
use idsync_pull::entity::{EntityKey, EntityType, InternalEntity, MembershipPatch};
use idsync_pull::mapping::{AttributeMapping, InboundMapper};
use idsync_pull::matching::CorrelationRule;
use idsync_pull::profile::{Provision, PullProfile, PullProfileBuilder};
use idsync_pull::store::{
    AttributeQuery, EntityStore, ExternalLink, LinkStore, StoreError, StoreResult,
};

pub const USER_CLASS: &str = "inetOrgPerson";
pub const GROUP_CLASS: &str = "groupOfUniqueNames";

static INIT: Once = Once::new();

/// Install a test subscriber when `RUST_LOG` is set.
pub fn init_tracing() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

// =============================================================================
// In-memory entity store
// =============================================================================

#[derive(Default)]
pub struct InMemoryEntityStore {
    entities: Mutex<BTreeMap<EntityKey, InternalEntity>>,
    patches: Mutex<Vec<(EntityKey, MembershipPatch)>>,
    rejected_members: Mutex<HashSet<EntityKey>>,
    fail_creates: AtomicBool,
    ignore_deletes: AtomicBool,
    pub create_count: AtomicUsize,
    pub update_count: AtomicUsize,
    pub delete_count: AtomicUsize,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entities(&self) -> std::sync::MutexGuard<'_, BTreeMap<EntityKey, InternalEntity>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an entity directly, bypassing counters.
    pub fn insert(&self, entity: InternalEntity) -> EntityKey {
        let key = entity.key;
        self.entities().insert(key, entity);
        key
    }

    pub fn get(&self, key: EntityKey) -> Option<InternalEntity> {
        self.entities().get(&key).cloned()
    }

    pub fn all_of(&self, entity_type: &EntityType) -> Vec<InternalEntity> {
        self.entities()
            .values()
            .filter(|e| &e.entity_type == entity_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities().len()
    }

    /// Membership patches applied so far, in order.
    pub fn patches(&self) -> Vec<(EntityKey, MembershipPatch)> {
        self.patches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn writes(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
            + self.update_count.load(Ordering::SeqCst)
            + self.delete_count.load(Ordering::SeqCst)
            + self.patches().len()
    }

    /// Reject membership writes on the given member.
    pub fn reject_memberships_of(&self, member: EntityKey) {
        self.rejected_members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(member);
    }

    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    /// Accept deletes without removing anything.
    pub fn ignore_deletes(&self) {
        self.ignore_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn find(&self, key: EntityKey) -> StoreResult<Option<InternalEntity>> {
        Ok(self.get(key))
    }

    async fn search(&self, query: &AttributeQuery) -> StoreResult<Vec<InternalEntity>> {
        Ok(self
            .entities()
            .values()
            .filter(|e| query.matches_entity(e))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        entity_type: &EntityType,
        attributes: &AttributeSet,
    ) -> StoreResult<InternalEntity> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::ConstraintViolation(
                "duplicate email".to_string(),
            ));
        }
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let entity = InternalEntity::new(entity_type.clone(), attributes.clone());
        self.entities().insert(entity.key, entity.clone());
        Ok(entity)
    }

    async fn update(
        &self,
        key: EntityKey,
        attributes: &AttributeSet,
    ) -> StoreResult<InternalEntity> {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        let mut entities = self.entities();
        let entity = entities.get_mut(&key).ok_or(StoreError::NotFound(key))?;
        entity.attributes.merge(attributes);
        Ok(entity.clone())
    }

    async fn delete(&self, key: EntityKey) -> StoreResult<()> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        if self.ignore_deletes.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.entities()
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::NotFound(key))
    }

    async fn members_of(&self, container: EntityKey) -> StoreResult<Vec<EntityKey>> {
        Ok(self
            .entities()
            .values()
            .filter(|e| e.is_member_of(container))
            .map(|e| e.key)
            .collect())
    }

    async fn update_memberships(
        &self,
        member: EntityKey,
        patch: &MembershipPatch,
    ) -> StoreResult<InternalEntity> {
        if self
            .rejected_members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&member)
        {
            return Err(StoreError::Backend(format!("member {member} is read-only")));
        }
        let updated = {
            let mut entities = self.entities();
            let entity = entities
                .get_mut(&member)
                .ok_or(StoreError::NotFound(member))?;
            patch.apply_to(&mut entity.memberships);
            entity.clone()
        };
        self.patches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((member, patch.clone()));
        Ok(updated)
    }
}

// =============================================================================
// In-memory link store
// =============================================================================

#[derive(Default)]
pub struct InMemoryLinkStore {
    links: Mutex<HashMap<(ResourceId, String, String), ExternalLink>>,
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        resource: ResourceId,
        object_class: &str,
        uid: &str,
    ) -> Option<ExternalLink> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(resource, object_class.to_string(), uid.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.links.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl LinkStore for InMemoryLinkStore {
    async fn find_link(
        &self,
        resource: ResourceId,
        object_class: &str,
        uid: &str,
    ) -> StoreResult<Option<ExternalLink>> {
        Ok(self.get(resource, object_class, uid))
    }

    async fn link(&self, mut link: ExternalLink) -> StoreResult<()> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (link.resource, link.object_class.clone(), link.uid.clone());
        if let Some(existing) = links.get(&key) {
            link.linked_at = existing.linked_at;
        }
        links.insert(key, link);
        Ok(())
    }

    async fn unlink(
        &self,
        resource: ResourceId,
        object_class: &str,
        uid: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(resource, object_class.to_string(), uid.to_string()))
            .is_some())
    }
}

// =============================================================================
// Scripted delta source
// =============================================================================

/// Serves scripted deltas per object class, paged by `batch_size`. The token
/// is the offset of the next delta.
#[derive(Default)]
pub struct ScriptedSource {
    deltas: Mutex<HashMap<String, Vec<SyncDelta>>>,
    failing: Mutex<HashSet<String>>,
    properties: HashMap<String, String>,
    pub fetch_count: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    pub fn push(&self, delta: SyncDelta) {
        self.deltas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(delta.record.object_class().to_string())
            .or_default()
            .push(delta);
    }

    /// Fail every fetch of the object class with a connection error.
    pub fn fail_class(&self, object_class: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object_class.to_string());
    }

    /// Tokens passed to `fetch_deltas`, in call order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connector for ScriptedSource {
    fn connector_type(&self) -> ConnectorType {
        ConnectorType::Ldap
    }

    fn display_name(&self) -> &str {
        "scripted"
    }

    fn configuration_property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }
}

#[async_trait]
impl DeltaSource for ScriptedSource {
    async fn fetch_deltas(
        &self,
        object_class: &str,
        token: Option<&str>,
        batch_size: usize,
    ) -> ConnectorResult<DeltaBatch> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token.map(str::to_string));

        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(object_class)
        {
            return Err(ConnectorError::connection_failed("directory unreachable"));
        }

        let deltas = self.deltas.lock().unwrap_or_else(PoisonError::into_inner);
        let all = deltas.get(object_class).map(Vec::as_slice).unwrap_or(&[]);
        let offset = token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let start = offset.min(all.len());
        let end = (start + batch_size).min(all.len());

        let mut batch =
            DeltaBatch::with_deltas(all[start..end].to_vec()).with_token(end.to_string());
        if end < all.len() {
            batch = batch.with_more();
        }
        Ok(batch)
    }
}

// =============================================================================
// Records and profiles
// =============================================================================

pub fn user_dn(name: &str) -> String {
    format!("uid={name},ou=people,dc=example,dc=com")
}

pub fn group_dn(name: &str) -> String {
    format!("cn={name},ou=groups,dc=example,dc=com")
}

pub fn user_record(name: &str) -> ExternalRecord {
    let dn = user_dn(name);
    ExternalRecord::new(
        Uid::from_value(dn.clone()),
        USER_CLASS,
        AttributeSet::new()
            .with("mail", format!("{name}@example.com"))
            .with("cn", name),
    )
    .with_name(dn)
}

pub fn group_record(name: &str, members: &[&str]) -> ExternalRecord {
    group_record_with(name, "uniquemember", members)
}

pub fn group_record_with(name: &str, attribute: &str, members: &[&str]) -> ExternalRecord {
    let dn = group_dn(name);
    let members: Vec<String> = members.iter().map(|m| user_dn(m)).collect();
    ExternalRecord::new(
        Uid::from_value(dn.clone()),
        GROUP_CLASS,
        AttributeSet::new().with("cn", name).with(attribute, members),
    )
    .with_name(dn)
}

pub fn user_provision() -> Provision {
    Provision::new(USER_CLASS, EntityType::User)
        .with_mapper(
            InboundMapper::new()
                .with_mapping(AttributeMapping::inbound("mail", "email").with_required(true))
                .with_mapping(AttributeMapping::inbound("cn", "name")),
        )
        .with_correlation_rule(CorrelationRule::exact("mail", "email"))
}

pub fn group_provision() -> Provision {
    group_provision_with("uniquemember")
}

pub fn group_provision_with(member_attribute: &str) -> Provision {
    Provision::new(GROUP_CLASS, EntityType::Group)
        .with_mapper(
            InboundMapper::new()
                .with_mapping(AttributeMapping::inbound("cn", "name"))
                .with_mapping(AttributeMapping::inbound(member_attribute, "members")),
        )
        .with_correlation_rule(CorrelationRule::exact("cn", "name"))
}

/// Stores and source for one test, bound to a fresh resource.
pub struct Harness {
    pub resource: ResourceId,
    pub entities: Arc<InMemoryEntityStore>,
    pub links: Arc<InMemoryLinkStore>,
    pub source: Arc<ScriptedSource>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(ScriptedSource::new())
    }

    pub fn with_source(source: ScriptedSource) -> Self {
        init_tracing();
        Self {
            resource: ResourceId::new(),
            entities: Arc::new(InMemoryEntityStore::new()),
            links: Arc::new(InMemoryLinkStore::new()),
            source: Arc::new(source),
        }
    }

    /// Builder with no provisions or hooks.
    pub fn builder(&self) -> PullProfileBuilder {
        PullProfile::builder(
            self.resource,
            self.source.clone(),
            self.entities.clone(),
            self.links.clone(),
        )
    }

    /// Builder provisioning users then groups.
    pub fn directory_builder(&self) -> PullProfileBuilder {
        self.builder()
            .provision(user_provision())
            .provision(group_provision())
    }

    /// Store a user and link it to its DN, as a previous run would have.
    pub async fn seed_user(&self, name: &str) -> EntityKey {
        let entity = InternalEntity::new(
            EntityType::User,
            AttributeSet::new()
                .with("email", format!("{name}@example.com"))
                .with("name", name),
        );
        let key = self.entities.insert(entity);
        self.links
            .link(ExternalLink::new(self.resource, USER_CLASS, user_dn(name), key))
            .await
            .unwrap();
        key
    }

    /// Store a group linked to its DN with the given members.
    pub async fn seed_group(&self, name: &str, members: &[EntityKey]) -> EntityKey {
        let group = InternalEntity::new(EntityType::Group, AttributeSet::new().with("name", name));
        let key = self.entities.insert(group);
        for member in members {
            let mut entity = self.entities.get(*member).unwrap();
            entity.memberships.insert(key);
            self.entities.insert(entity);
        }
        self.links
            .link(ExternalLink::new(self.resource, GROUP_CLASS, group_dn(name), key))
            .await
            .unwrap();
        key
    }

    /// The recorded link of a user's DN on this harness' resource.
    pub fn user_link(&self, name: &str) -> Option<ExternalLink> {
        self.links.get(self.resource, USER_CLASS, &user_dn(name))
    }

    /// Group keys the user currently belongs to.
    pub fn memberships_of(&self, member: EntityKey) -> Vec<EntityKey> {
        self.entities
            .get(member)
            .map(|e| e.memberships.into_iter().collect())
            .unwrap_or_default()
    }
}
