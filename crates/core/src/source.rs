use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::PolicyDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind { User, Role, Group }

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Role, EntityKind::Group];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::User => "user",
            EntityKind::Role => "role",
            EntityKind::Group => "group",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlinePolicy {
    pub name: String,
    pub document: PolicyDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyManager { Customer, Aws }

#[derive(Debug, Clone, PartialEq)]
pub struct KmsKey {
    pub key_id: String,
    pub key_manager: KeyManager,
    pub policy: PolicyDocument,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{kind} '{name}' not found")]
    UnknownEntity { kind: EntityKind, name: String },
    #[error("managed policy '{0}' not found")]
    UnknownPolicy(String),
    #[error("key policy for '{key_id}' is not valid JSON")]
    MalformedKeyPolicy {
        key_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read access to the IAM and KMS data an audit needs. Implementations may be
/// backed by a live API client or by an exported snapshot.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<String>, SourceError>;
    /// ARNs of the managed policies attached to the entity.
    async fn managed_policies(&self, kind: EntityKind, name: &str) -> Result<Vec<String>, SourceError>;
    async fn inline_policies(&self, kind: EntityKind, name: &str) -> Result<Vec<InlinePolicy>, SourceError>;
    /// Groups never carry a boundary, so implementations return `None` for them.
    async fn permissions_boundary(&self, kind: EntityKind, name: &str) -> Result<Option<String>, SourceError>;
    /// Default version of a managed policy.
    async fn managed_policy_document(&self, arn: &str) -> Result<PolicyDocument, SourceError>;
    async fn group_memberships(&self, user: &str) -> Result<Vec<String>, SourceError>;
    async fn kms_keys(&self) -> Result<Vec<KmsKey>, SourceError>;
}
