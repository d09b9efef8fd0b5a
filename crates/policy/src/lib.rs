//! Classifies what an IAM permission policy grants for a target service and
//! permission list.

pub mod action;
mod checks;
mod kms;

use posture_core::{ClassificationResult, PolicyDocument, Statement, Target};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::action::{extract_service, is_exact_permission, is_full_admin, is_service_admin, is_wildcard_permission, root_verb};

pub use checks::{has_admin_access, has_session_manager_access};
pub use kms::{key_administrators, KeyAdminReport, MANAGEMENT_ACTIONS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    FullAdmin,
    ServiceAdmin,
    ExactPermission,
    WildcardPermission,
}

impl MatchKind {
    pub fn classification(self) -> ClassificationResult {
        match self {
            MatchKind::FullAdmin => ClassificationResult::FULL_ADMIN,
            MatchKind::ServiceAdmin => ClassificationResult::SERVICE_ADMIN,
            MatchKind::ExactPermission | MatchKind::WildcardPermission => ClassificationResult::SPECIFIC,
        }
    }
}

/// One action of one statement that grants the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementMatch {
    /// Index into `PolicyDocument::statements()`, i.e. after non-object entries were dropped.
    pub statement: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub action: String,
    pub kind: MatchKind,
}

/// Classifies a single action string. `target_root` is the root verb of the
/// target's first permission; it is the only root wildcard actions are compared to.
pub fn classify_action(action: &str, target: &Target, target_root: &str) -> Option<MatchKind> {
    if is_full_admin(action) {
        return Some(MatchKind::FullAdmin);
    }
    let service = target.service();
    if extract_service(action) != Some(service) {
        return None;
    }
    if is_service_admin(action, service) {
        return Some(MatchKind::ServiceAdmin);
    }
    if target.permissions().iter().any(|p| is_exact_permission(action, service, p)) {
        return Some(MatchKind::ExactPermission);
    }
    if is_wildcard_permission(action, service, target_root) {
        return Some(MatchKind::WildcardPermission);
    }
    None
}

fn statement_matches(ix: usize, statement: &Statement, target: &Target, target_root: &str) -> Vec<StatementMatch> {
    let Some(actions) = statement.allowed_actions() else { return Vec::new() };
    actions
        .iter()
        .filter_map(|action| {
            let kind = classify_action(action, target, target_root)?;
            tracing::debug!(statement = ix, action = %action, ?kind, "statement grants target");
            Some(StatementMatch { statement: ix, sid: statement.sid.clone(), action: action.clone(), kind })
        })
        .collect()
}

/// Folds matches into the flags they imply.
pub fn classify(matches: &[StatementMatch]) -> ClassificationResult {
    matches.iter().fold(ClassificationResult::NONE, |acc, m| acc.merge(m.kind.classification()))
}

/// Every (statement, action) pair in `document` that grants `target`, in
/// document order. Deny statements and statements without a readable
/// `Effect`/`Action` are ignored.
pub fn evaluate_statements(document: &PolicyDocument, target: &Target) -> Vec<StatementMatch> {
    let target_root = root_verb(target.primary());
    document
        .statements()
        .iter()
        .enumerate()
        .flat_map(|(ix, statement)| statement_matches(ix, statement, target, &target_root))
        .collect()
}

/// Whether `document` grants full admin, admin over the target service, or one
/// of the target permissions.
pub fn evaluate(document: &PolicyDocument, target: &Target) -> ClassificationResult {
    classify(&evaluate_statements(document, target))
}

/// Classifies a resource policy separately for each `Principal.AWS` entry.
/// Every principal named by any statement gets an entry, even when nothing is granted.
pub fn evaluate_by_principal(document: &PolicyDocument, target: &Target) -> BTreeMap<String, ClassificationResult> {
    let target_root = root_verb(target.primary());
    let mut out: BTreeMap<String, ClassificationResult> = BTreeMap::new();
    for (ix, statement) in document.statements().iter().enumerate() {
        let Some(principal) = &statement.principal else { continue };
        let result = classify(&statement_matches(ix, statement, target, &target_root));
        for arn in principal.aws() {
            let entry = out.entry(arn.to_string()).or_default();
            *entry = entry.merge(result);
        }
    }
    out
}
