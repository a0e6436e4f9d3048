//! Connector type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Type of external identity source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    /// LDAP/Active Directory connector
    Ldap,
    /// Database connector
    Database,
    /// REST API connector (HR systems, SaaS directories)
    Rest,
}

impl ConnectorType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Ldap => "ldap",
            ConnectorType::Database => "database",
            ConnectorType::Rest => "rest",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = ParseConnectorTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ldap" => Ok(ConnectorType::Ldap),
            "database" => Ok(ConnectorType::Database),
            "rest" => Ok(ConnectorType::Rest),
            _ => Err(ParseConnectorTypeError(s.to_string())),
        }
    }
}

/// Error parsing connector type from string.
#[derive(Debug, Clone)]
pub struct ParseConnectorTypeError(String);

impl fmt::Display for ParseConnectorTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid connector type '{}', expected one of: ldap, database, rest",
            self.0
        )
    }
}

impl std::error::Error for ParseConnectorTypeError {}

/// Whether the source still holds the object a delta refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaHint {
    /// The object exists in the source (created or updated).
    Present,
    /// The object was removed from the source.
    Absent,
}

impl DeltaHint {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaHint::Present => "present",
            DeltaHint::Absent => "absent",
        }
    }
}

impl fmt::Display for DeltaHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
