use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

mod source;

pub use source::{EntityKind, InlinePolicy, KeyManager, KmsKey, PolicySource, SourceError};

/// A field that IAM lets be either one value or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Single(T),
    Multiple(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Single(v) => std::slice::from_ref(v),
            OneOrMany::Multiple(v) => v.as_slice(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> { self.as_slice().iter() }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Single(v) => vec![v],
            OneOrMany::Multiple(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect { Allow, Deny }

/// Decodes a field, turning a wrongly-typed value into `None` instead of failing
/// the whole statement.
fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Json::deserialize(de)?;
    Ok(serde_json::from_value(raw).ok())
}

fn statement_list<'de, D>(de: D) -> Result<Option<Vec<Statement>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Json::deserialize(de)?;
    let entries = match raw {
        Json::Array(items) => items,
        obj @ Json::Object(_) => vec![obj],
        other => {
            tracing::debug!(value = %other, "ignoring Statement field that is neither a list nor an object");
            return Ok(None);
        }
    };
    let mut out = Vec::with_capacity(entries.len());
    for (ix, entry) in entries.into_iter().enumerate() {
        if !entry.is_object() {
            tracing::debug!(index = ix, "skipping statement that is not an object");
            continue;
        }
        match serde_json::from_value::<Statement>(entry) {
            Ok(st) => out.push(st),
            Err(e) => tracing::debug!(index = ix, error = %e, "skipping undecodable statement"),
        }
    }
    Ok(Some(out))
}

/// `Principal` is either the bare string `"*"` or a map such as `{"AWS": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    Any(String),
    Specified(BTreeMap<String, OneOrMany<String>>),
}

impl Principal {
    /// The `AWS` principal entries, in document order.
    pub fn aws(&self) -> Vec<&str> {
        match self {
            Principal::Any(s) => vec![s.as_str()],
            Principal::Specified(map) => map
                .get("AWS")
                .map(|v| v.iter().map(String::as_str).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub effect: Option<Effect>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub action: Option<OneOrMany<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Json>,
}

impl Statement {
    pub fn is_allow(&self) -> bool { self.effect == Some(Effect::Allow) }

    /// Actions of an `Allow` statement, or `None` if the statement grants nothing
    /// we can read.
    pub fn allowed_actions(&self) -> Option<&[String]> {
        if !self.is_allow() { return None; }
        self.action.as_ref().map(OneOrMany::as_slice)
    }

    pub fn resources(&self) -> &[String] {
        self.resource.as_ref().map(OneOrMany::as_slice).unwrap_or(&[])
    }
}

/// A permission policy document. `statement` is `None` when the document has no
/// usable `Statement` field at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "statement_list", skip_serializing_if = "Option::is_none")]
    pub statement: Option<Vec<Statement>>,
}

impl PolicyDocument {
    /// Decodes an already-parsed document. Anything that is not a JSON object
    /// becomes an empty document.
    pub fn from_value(value: &Json) -> Self {
        if !value.is_object() {
            tracing::debug!("policy document is not a JSON object");
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Decodes a document held as a JSON string, e.g. a KMS key policy.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let value: Json = serde_json::from_str(s)?;
        Ok(Self::from_value(&value))
    }

    pub fn statements(&self) -> &[Statement] {
        self.statement.as_deref().unwrap_or(&[])
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetError {
    #[error("target service must not be empty")]
    EmptyService,
    #[error("at least one target permission is required")]
    NoPermissions,
}

/// The service and permission names an audit asks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    service: String,
    permissions: Vec<String>,
}

impl Target {
    pub fn new<I, S>(service: impl Into<String>, permissions: I) -> Result<Self, TargetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = service.into();
        if service.is_empty() { return Err(TargetError::EmptyService); }
        let permissions: Vec<String> = permissions.into_iter().map(Into::into).filter(|p| !p.is_empty()).collect();
        if permissions.is_empty() { return Err(TargetError::NoPermissions); }
        Ok(Self { service, permissions })
    }

    /// Builds a target from a comma-joined permission list such as `"CreateGrant,RevokeGrant"`.
    pub fn parse(service: &str, permissions: &str) -> Result<Self, TargetError> {
        Self::new(service.trim(), permissions.split(',').map(str::trim))
    }

    pub fn service(&self) -> &str { &self.service }
    pub fn permissions(&self) -> &[String] { &self.permissions }

    /// The first permission. Wildcard actions are compared against its root verb.
    pub fn primary(&self) -> &str { &self.permissions[0] }

    /// One single-permission target per permission, so each is matched on its own root verb.
    pub fn each_permission(&self) -> Vec<Target> {
        self.permissions
            .iter()
            .map(|p| Target { service: self.service.clone(), permissions: vec![p.clone()] })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.permissions.join(","))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub has_access: bool,
    pub is_service_admin: bool,
    pub is_full_admin: bool,
}

impl ClassificationResult {
    pub const NONE: Self = Self { has_access: false, is_service_admin: false, is_full_admin: false };
    pub const FULL_ADMIN: Self = Self { has_access: true, is_service_admin: false, is_full_admin: true };
    pub const SERVICE_ADMIN: Self = Self { has_access: true, is_service_admin: true, is_full_admin: false };
    pub const SPECIFIC: Self = Self { has_access: true, is_service_admin: false, is_full_admin: false };

    pub fn merge(self, other: Self) -> Self {
        Self {
            has_access: self.has_access || other.has_access,
            is_service_admin: self.is_service_admin || other.is_service_admin,
            is_full_admin: self.is_full_admin || other.is_full_admin,
        }
    }
}
