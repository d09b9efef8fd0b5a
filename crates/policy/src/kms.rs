use posture_core::PolicyDocument;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Key policy actions that amount to managing a customer master key.
pub const MANAGEMENT_ACTIONS: [&str; 16] = [
    "kms:CancelKeyDeletion",
    "kms:Create*",
    "kms:Delete*",
    "kms:Disable*",
    "kms:Enable*",
    "kms:GenerateDataKey*",
    "kms:ImportKeyMaterial",
    "kms:PutKeyPolicy",
    "kms:ScheduleKeyDeletion",
    "kms:UpdateAlias",
    "kms:UpdateCustomKeyStore",
    "kms:UpdatePrimaryRegion",
    "kms:CreateGrant",
    "kms:RevokeGrant",
    "kms:RetireGrant",
    "*",
];

fn account_root() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^arn:aws:iam::\d+:root").expect("static regex"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KeyAdminReport {
    /// AWS principals with at least one management action, first-seen order.
    pub admins: Vec<String>,
    /// The account root is granted `kms:*`, so any IAM policy in the account
    /// can delegate key management.
    pub full_iam_access: bool,
}

/// Lists who can administer a key, looking at each `Principal.AWS` entry on its own.
pub fn key_administrators(policy: &PolicyDocument) -> KeyAdminReport {
    let management: BTreeSet<&str> = MANAGEMENT_ACTIONS.into_iter().collect();
    let mut report = KeyAdminReport::default();
    for statement in policy.statements() {
        let (Some(actions), Some(principal)) = (statement.allowed_actions(), &statement.principal) else { continue };
        let grants_management = actions.iter().any(|a| management.contains(a.as_str()));
        let grants_kms_star = actions.iter().any(|a| a == "kms:*");
        for arn in principal.aws() {
            if grants_kms_star && account_root().is_match(arn) {
                report.full_iam_access = true;
            }
            if grants_management && !report.admins.iter().any(|a| a == arn) {
                report.admins.push(arn.to_string());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_key_policy() -> PolicyDocument {
        PolicyDocument::from_value(&json!({
            "Version": "2012-10-17",
            "Id": "key-default-1",
            "Statement": [
                { "Sid": "Enable IAM User Permissions", "Effect": "Allow",
                  "Principal": { "AWS": "arn:aws:iam::111122223333:root" }, "Action": "kms:*", "Resource": "*" },
                { "Sid": "Allow access for Key Administrators", "Effect": "Allow",
                  "Principal": { "AWS": ["arn:aws:iam::111122223333:role/KeyAdmin", "arn:aws:iam::111122223333:user/alice"] },
                  "Action": ["kms:Create*", "kms:Describe*", "kms:Enable*", "kms:List*", "kms:Put*"], "Resource": "*" },
                { "Sid": "Allow use of the key", "Effect": "Allow",
                  "Principal": { "AWS": "arn:aws:iam::111122223333:role/App" },
                  "Action": ["kms:Encrypt", "kms:Decrypt", "kms:ReEncrypt*", "kms:DescribeKey"], "Resource": "*" },
                { "Sid": "Allow attachment of persistent resources", "Effect": "Allow",
                  "Principal": { "AWS": "arn:aws:iam::111122223333:role/KeyAdmin" },
                  "Action": ["kms:CreateGrant", "kms:ListGrants", "kms:RevokeGrant"], "Resource": "*" }
            ]
        }))
    }

    #[test]
    fn default_policy_admins() {
        let r = key_administrators(&default_key_policy());
        assert!(r.full_iam_access);
        assert_eq!(r.admins, vec!["arn:aws:iam::111122223333:role/KeyAdmin", "arn:aws:iam::111122223333:user/alice"]);
    }

    #[test]
    fn kms_star_is_not_a_listed_management_action() {
        let p = PolicyDocument::from_value(&json!({ "Statement": [
            { "Effect": "Allow", "Principal": { "AWS": "arn:aws:iam::111122223333:role/Ops" }, "Action": "kms:*", "Resource": "*" }
        ]}));
        assert_eq!(key_administrators(&p), KeyAdminReport::default());
    }

    #[test]
    fn star_action_makes_admin_and_deny_is_ignored() {
        let p = PolicyDocument::from_value(&json!({ "Statement": [
            { "Effect": "Deny", "Principal": { "AWS": "arn:aws:iam::111122223333:role/Evil" }, "Action": "*", "Resource": "*" },
            { "Effect": "Allow", "Principal": { "AWS": "arn:aws:iam::444455556666:role/Break" }, "Action": ["*"], "Resource": "*" }
        ]}));
        let r = key_administrators(&p);
        assert_eq!(r.admins, vec!["arn:aws:iam::444455556666:role/Break"]);
        assert!(!r.full_iam_access);
    }
}
