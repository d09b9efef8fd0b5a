//! Account-wide audits built on a [`PolicySource`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn};

use posture_core::{ClassificationResult, EntityKind, KeyManager, PolicyDocument, PolicySource, SourceError, Target};
use posture_policy::{
    classify, evaluate_statements, has_admin_access, has_session_manager_access, key_administrators, KeyAdminReport,
    StatementMatch,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind { Managed, Inline, PermissionsBoundary }

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyKind::Managed => "Managed Policy",
            PolicyKind::Inline => "Inline Policy",
            PolicyKind::PermissionsBoundary => "Permission Boundary",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyFinding {
    pub kind: PolicyKind,
    /// ARN for managed policies and boundaries, policy name for inline ones.
    pub policy: String,
    pub result: ClassificationResult,
    pub matches: Vec<StatementMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityAccess {
    pub kind: EntityKind,
    pub name: String,
    pub findings: Vec<PolicyFinding>,
}

/// Default-version documents fetched once per audit run.
struct DocumentCache<'a, S: ?Sized> {
    source: &'a S,
    docs: HashMap<String, Option<PolicyDocument>>,
}

impl<'a, S: PolicySource + ?Sized> DocumentCache<'a, S> {
    fn new(source: &'a S) -> Self { Self { source, docs: HashMap::new() } }

    /// `None` when the source does not know the ARN; the audit carries on without it.
    async fn get(&mut self, arn: &str) -> Result<Option<&PolicyDocument>> {
        if !self.docs.contains_key(arn) {
            let doc = match self.source.managed_policy_document(arn).await {
                Ok(doc) => Some(doc),
                Err(SourceError::UnknownPolicy(_)) => {
                    warn!(policy = %arn, "managed policy document unavailable; skipping");
                    None
                }
                Err(e) => return Err(anyhow::Error::new(e).context(format!("fetch managed policy {arn}"))),
            };
            self.docs.insert(arn.to_string(), doc);
        }
        Ok(self.docs.get(arn).and_then(Option::as_ref))
    }
}

/// Matches `document` against each single-permission target and merges the
/// statement matches, dropping duplicates.
fn finding(kind: PolicyKind, policy: &str, document: &PolicyDocument, targets: &[Target]) -> Option<PolicyFinding> {
    let mut matches: Vec<StatementMatch> = Vec::new();
    for target in targets {
        for m in evaluate_statements(document, target) {
            if !matches.contains(&m) {
                matches.push(m);
            }
        }
    }
    matches.sort_by_key(|m| m.statement);
    let result = classify(&matches);
    info!(policy_type = %kind, policy = %policy, has_access = result.has_access, "checked policy");
    result.has_access.then(|| PolicyFinding { kind, policy: policy.to_string(), result, matches })
}

/// Reports, per entity, each managed, inline and boundary policy that grants
/// one of `target`'s permissions. Each permission is matched on its own root
/// verb. Entities without any such policy are left out.
pub async fn find_entities_with_access<S>(
    source: &S,
    kind: EntityKind,
    target: &Target,
    only: Option<&str>,
) -> Result<Vec<EntityAccess>>
where
    S: PolicySource + ?Sized,
{
    let names = match only {
        Some(n) => vec![n.to_string()],
        None => source.list_entities(kind).await.with_context(|| format!("list {kind}s"))?,
    };
    let targets = target.each_permission();
    let mut cache = DocumentCache::new(source);
    let mut out = Vec::new();
    for name in names {
        let mut findings = Vec::new();

        for arn in source.managed_policies(kind, &name).await? {
            if let Some(doc) = cache.get(&arn).await? {
                findings.extend(finding(PolicyKind::Managed, &arn, doc, &targets));
            }
        }
        for inline in source.inline_policies(kind, &name).await? {
            findings.extend(finding(PolicyKind::Inline, &inline.name, &inline.document, &targets));
        }
        if let Some(arn) = source.permissions_boundary(kind, &name).await? {
            if let Some(doc) = cache.get(&arn).await? {
                findings.extend(finding(PolicyKind::PermissionsBoundary, &arn, doc, &targets));
            }
        }

        if !findings.is_empty() {
            out.push(EntityAccess { kind, name, findings });
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrivilegedEntity {
    pub kind: EntityKind,
    pub name: String,
    pub admin: bool,
    pub session_manager: bool,
}

#[derive(Default)]
struct Privilege { admin: bool, session_manager: bool }

impl Privilege {
    fn add(&mut self, doc: &PolicyDocument) {
        self.admin |= has_admin_access(doc);
        self.session_manager |= has_session_manager_access(doc);
    }
}

async fn collect_privilege<S>(source: &S, cache: &mut DocumentCache<'_, S>, kind: EntityKind, name: &str, acc: &mut Privilege) -> Result<()>
where
    S: PolicySource + ?Sized,
{
    for arn in source.managed_policies(kind, name).await? {
        if let Some(doc) = cache.get(&arn).await? {
            acc.add(doc);
        }
    }
    for inline in source.inline_policies(kind, name).await? {
        acc.add(&inline.document);
    }
    Ok(())
}

/// Users and roles holding `*`-on-`*` admin or SSM Session Manager access.
/// Users also inherit whatever their groups grant.
pub async fn find_privileged_entities<S>(source: &S) -> Result<Vec<PrivilegedEntity>>
where
    S: PolicySource + ?Sized,
{
    let mut cache = DocumentCache::new(source);
    let mut out = Vec::new();
    for kind in [EntityKind::User, EntityKind::Role] {
        for name in source.list_entities(kind).await.with_context(|| format!("list {kind}s"))? {
            let mut acc = Privilege::default();
            collect_privilege(source, &mut cache, kind, &name, &mut acc).await?;
            if kind == EntityKind::User {
                for group in source.group_memberships(&name).await? {
                    collect_privilege(source, &mut cache, EntityKind::Group, &group, &mut acc).await?;
                }
            }
            if acc.admin || acc.session_manager {
                out.push(PrivilegedEntity { kind, name, admin: acc.admin, session_manager: acc.session_manager });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyAudit {
    pub key_id: String,
    #[serde(flatten)]
    pub report: KeyAdminReport,
}

/// Key administrators of every customer-managed key.
pub async fn audit_kms_keys<S>(source: &S) -> Result<Vec<KeyAudit>>
where
    S: PolicySource + ?Sized,
{
    let keys = source.kms_keys().await.context("list kms keys")?;
    Ok(keys
        .into_iter()
        .filter(|k| k.key_manager == KeyManager::Customer)
        .map(|k| KeyAudit { report: key_administrators(&k.policy), key_id: k.key_id })
        .collect())
}

/// Users, roles and groups with the managed policy `arn` attached.
pub async fn entities_with_policy<S>(source: &S, arn: &str) -> Result<BTreeMap<EntityKind, Vec<String>>>
where
    S: PolicySource + ?Sized,
{
    let mut out = BTreeMap::new();
    for kind in EntityKind::ALL {
        let mut names = Vec::new();
        for name in source.list_entities(kind).await? {
            if source.managed_policies(kind, &name).await?.iter().any(|a| a == arn) {
                names.push(name);
            }
        }
        out.insert(kind, names);
    }
    Ok(out)
}
