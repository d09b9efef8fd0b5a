use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::Path;

use posture_core::{EntityKind, InlinePolicy, KeyManager, KmsKey, PolicyDocument, PolicySource, SourceError};

pub mod audit;

pub use audit::{
    audit_kms_keys, entities_with_policy, find_entities_with_access, find_privileged_entities, EntityAccess, KeyAudit,
    PolicyFinding, PolicyKind, PrivilegedEntity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedDocument {
    pub name: String,
    pub document: Json,
}

/// A user, role or group as exported from IAM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamEntity {
    pub name: String,
    #[serde(default)]
    pub attached_policies: Vec<String>,
    #[serde(default)]
    pub inline_policies: Vec<NamedDocument>,
    #[serde(default)]
    pub permissions_boundary: Option<String>,
    /// Group memberships; only meaningful for users.
    #[serde(default)]
    pub groups: Vec<String>,
}

fn customer_managed() -> KeyManager { KeyManager::Customer }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsKeyRecord {
    pub key_id: String,
    #[serde(default = "customer_managed")]
    pub key_manager: KeyManager,
    /// Either the policy object or the JSON string `GetKeyPolicy` returns.
    pub policy: Json,
}

impl KmsKeyRecord {
    pub fn to_key(&self) -> Result<KmsKey, SourceError> {
        let policy = match &self.policy {
            Json::String(s) => PolicyDocument::from_json_str(s)
                .map_err(|source| SourceError::MalformedKeyPolicy { key_id: self.key_id.clone(), source })?,
            other => PolicyDocument::from_value(other),
        };
        Ok(KmsKey { key_id: self.key_id.clone(), key_manager: self.key_manager, policy })
    }
}

/// Exported IAM/KMS inventory of one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub users: Vec<IamEntity>,
    #[serde(default)]
    pub roles: Vec<IamEntity>,
    #[serde(default)]
    pub groups: Vec<IamEntity>,
    /// Default policy version documents keyed by ARN.
    #[serde(default)]
    pub managed_policies: BTreeMap<String, Json>,
    #[serde(default)]
    pub kms_keys: Vec<KmsKeyRecord>,
}

impl Snapshot {
    /// YAML or JSON.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes).context("decode snapshot")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("read snapshot {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("parse snapshot {}", path.display()))
    }

    fn entities(&self, kind: EntityKind) -> &[IamEntity] {
        match kind {
            EntityKind::User => &self.users,
            EntityKind::Role => &self.roles,
            EntityKind::Group => &self.groups,
        }
    }

    pub fn entity(&self, kind: EntityKind, name: &str) -> Result<&IamEntity, SourceError> {
        self.entities(kind)
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| SourceError::UnknownEntity { kind, name: name.to_string() })
    }
}

#[async_trait]
impl PolicySource for Snapshot {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<String>, SourceError> {
        Ok(self.entities(kind).iter().map(|e| e.name.clone()).collect())
    }

    async fn managed_policies(&self, kind: EntityKind, name: &str) -> Result<Vec<String>, SourceError> {
        Ok(self.entity(kind, name)?.attached_policies.clone())
    }

    async fn inline_policies(&self, kind: EntityKind, name: &str) -> Result<Vec<InlinePolicy>, SourceError> {
        Ok(self
            .entity(kind, name)?
            .inline_policies
            .iter()
            .map(|p| InlinePolicy { name: p.name.clone(), document: PolicyDocument::from_value(&p.document) })
            .collect())
    }

    async fn permissions_boundary(&self, kind: EntityKind, name: &str) -> Result<Option<String>, SourceError> {
        let entity = self.entity(kind, name)?;
        Ok(match kind {
            EntityKind::Group => None,
            _ => entity.permissions_boundary.clone(),
        })
    }

    async fn managed_policy_document(&self, arn: &str) -> Result<PolicyDocument, SourceError> {
        self.managed_policies
            .get(arn)
            .map(PolicyDocument::from_value)
            .ok_or_else(|| SourceError::UnknownPolicy(arn.to_string()))
    }

    async fn group_memberships(&self, user: &str) -> Result<Vec<String>, SourceError> {
        Ok(self.entity(EntityKind::User, user)?.groups.clone())
    }

    /// Keys whose policy cannot be decoded are logged and left out.
    async fn kms_keys(&self) -> Result<Vec<KmsKey>, SourceError> {
        Ok(self
            .kms_keys
            .iter()
            .filter_map(|record| match record.to_key() {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(key_id = %record.key_id, error = %e, "skipping key with unreadable policy");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
account: "111122223333"
users:
  - name: alice
    attached_policies: ["arn:aws:iam::aws:policy/AdministratorAccess"]
    groups: [ops]
groups:
  - name: ops
    permissions_boundary: "arn:aws:iam::111122223333:policy/ignored"
managed_policies:
  "arn:aws:iam::aws:policy/AdministratorAccess":
    Version: "2012-10-17"
    Statement:
      - Effect: Allow
        Action: "*"
        Resource: "*"
kms_keys:
  - key_id: 1234abcd
    policy: '{"Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::111122223333:root"},"Action":"kms:*","Resource":"*"}]}'
  - key_id: aws-owned
    key_manager: AWS
    policy:
      Statement: []
"#;

    #[test]
    fn yaml_snapshot_decodes() {
        let s = Snapshot::from_slice(YAML.as_bytes()).unwrap();
        assert_eq!(s.account.as_deref(), Some("111122223333"));
        assert_eq!(s.users[0].groups, vec!["ops"]);
        let keys: Vec<KmsKey> = s.kms_keys.iter().map(|k| k.to_key().unwrap()).collect();
        assert_eq!(keys[0].key_manager, KeyManager::Customer);
        assert_eq!(keys[0].policy.statements().len(), 1);
        assert_eq!(keys[1].key_manager, KeyManager::Aws);
    }

    #[test]
    fn json_snapshot_decodes() {
        let s = Snapshot::from_slice(br#"{"roles":[{"name":"deployer"}]}"#).unwrap();
        assert_eq!(s.roles.len(), 1);
        assert!(s.users.is_empty());
    }

    #[test]
    fn unknown_entity_is_an_error() {
        let s = Snapshot::default();
        let err = s.entity(EntityKind::Role, "ghost").unwrap_err();
        assert_eq!(err.to_string(), "role 'ghost' not found");
    }

    #[test]
    fn malformed_key_policy_string() {
        let k = KmsKeyRecord { key_id: "k1".into(), key_manager: KeyManager::Customer, policy: Json::String("{oops".into()) };
        assert!(matches!(k.to_key(), Err(SourceError::MalformedKeyPolicy { .. })));
    }
}
