//! Pull run configuration.

use serde::{Deserialize, Serialize};

use crate::delta::Operation;
use crate::error::{PullError, PullResult};

/// What to do with a present record that matched no internal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchingRule {
    /// Create a new internal entity.
    #[default]
    Provision,
    /// Leave the record alone.
    Ignore,
}

impl UnmatchingRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchingRule::Provision => "provision",
            UnmatchingRule::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for UnmatchingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UnmatchingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "provision" => Ok(UnmatchingRule::Provision),
            "ignore" => Ok(UnmatchingRule::Ignore),
            _ => Err(format!("Unknown unmatching rule: {s}")),
        }
    }
}

/// What to do with a present record that matched an internal entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingRule {
    /// Overwrite mapped attributes from the source.
    #[default]
    Update,
    /// Leave the entity alone.
    Ignore,
}

impl MatchingRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingRule::Update => "update",
            MatchingRule::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for MatchingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MatchingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "update" => Ok(MatchingRule::Update),
            "ignore" => Ok(MatchingRule::Ignore),
            _ => Err(format!("Unknown matching rule: {s}")),
        }
    }
}

/// What to do with an internal entity whose source record disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionRule {
    /// Delete the internal entity.
    #[default]
    Delete,
    /// Drop the link but keep the entity.
    Unlink,
    /// Leave both alone.
    Ignore,
}

impl DeletionRule {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionRule::Delete => "delete",
            DeletionRule::Unlink => "unlink",
            DeletionRule::Ignore => "ignore",
        }
    }
}

impl std::fmt::Display for DeletionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeletionRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delete" => Ok(DeletionRule::Delete),
            "unlink" => Ok(DeletionRule::Unlink),
            "ignore" => Ok(DeletionRule::Ignore),
            _ => Err(format!("Unknown deletion rule: {s}")),
        }
    }
}

/// Action the pipeline takes for a classified delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Run the mutation for the classified operation.
    Apply,
    /// Remove the link only.
    Unlink,
    /// Report IGNORED without touching anything.
    Ignore,
}

/// Per-run rules deciding what happens to each classified operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PullPolicy {
    pub unmatching_rule: UnmatchingRule,
    pub matching_rule: MatchingRule,
    pub deletion_rule: DeletionRule,
}

impl PullPolicy {
    /// Resolve the action for an operation.
    #[must_use]
    pub fn action_for(&self, operation: Operation) -> PolicyAction {
        match operation {
            Operation::Create => match self.unmatching_rule {
                UnmatchingRule::Provision => PolicyAction::Apply,
                UnmatchingRule::Ignore => PolicyAction::Ignore,
            },
            Operation::Update => match self.matching_rule {
                MatchingRule::Update => PolicyAction::Apply,
                MatchingRule::Ignore => PolicyAction::Ignore,
            },
            Operation::Delete => match self.deletion_rule {
                DeletionRule::Delete => PolicyAction::Apply,
                DeletionRule::Unlink => PolicyAction::Unlink,
                DeletionRule::Ignore => PolicyAction::Ignore,
            },
            Operation::Unlink => PolicyAction::Unlink,
            Operation::None => PolicyAction::Ignore,
        }
    }
}

/// Configuration for one pull run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Maximum number of deltas processed concurrently.
    pub concurrency: usize,
    /// Number of deltas requested per connector fetch.
    pub batch_size: usize,
    /// Classify and run hooks without writing anything.
    pub dry_run: bool,
    pub policy: PullPolicy,
}

impl PullConfig {
    pub const MAX_CONCURRENCY: usize = 64;
    pub const MAX_BATCH_SIZE: usize = 10_000;

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: PullPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check if this configuration is valid.
    pub fn validate(&self) -> PullResult<()> {
        if self.concurrency < 1 || self.concurrency > Self::MAX_CONCURRENCY {
            return Err(PullError::configuration(format!(
                "Concurrency must be between 1 and {}",
                Self::MAX_CONCURRENCY
            )));
        }
        if self.batch_size < 1 || self.batch_size > Self::MAX_BATCH_SIZE {
            return Err(PullError::configuration(format!(
                "Batch size must be between 1 and {}",
                Self::MAX_BATCH_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 100,
            dry_run: false,
            policy: PullPolicy::default(),
        }
    }
}
