//! Helpers over IAM action strings of the form `service:Verb`, `*:*` or `*`.

use regex::Regex;
use std::sync::OnceLock;

fn leading_word() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z][a-z]+").expect("static regex"))
}

/// Service prefix of an action: everything before the first `:`.
pub fn extract_service(action: &str) -> Option<&str> {
    action.split_once(':').map(|(service, _)| service)
}

/// The leading capitalized word of an action's verb once wildcards are removed,
/// e.g. `Create` for `kms:Create*` and for `CreateGrant`. Falls back to the
/// whole stripped verb when it does not start with such a word.
pub fn root_verb(action: &str) -> String {
    let verb = action.split_once(':').map_or(action, |(_, verb)| verb);
    let stripped: String = verb.chars().filter(|&c| c != '*').collect();
    match leading_word().find(&stripped) {
        Some(m) => m.as_str().to_string(),
        None => stripped,
    }
}

pub fn is_full_admin(action: &str) -> bool {
    matches!(action, "*" | "*:*")
}

pub fn is_service_admin(action: &str, service: &str) -> bool {
    action.split_once(':') == Some((service, "*"))
}

pub fn is_exact_permission(action: &str, service: &str, permission: &str) -> bool {
    action.split_once(':') == Some((service, permission))
}

/// A wildcarded action in `service` whose root verb equals `target_root`.
pub fn is_wildcard_permission(action: &str, service: &str, target_root: &str) -> bool {
    action.contains('*') && extract_service(action) == Some(service) && root_verb(action) == target_root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_prefix() {
        assert_eq!(extract_service("kms:CreateGrant"), Some("kms"));
        assert_eq!(extract_service("*:*"), Some("*"));
        assert_eq!(extract_service("*"), None);
        assert_eq!(extract_service("CreateGrant"), None);
    }

    #[test]
    fn root_verbs() {
        assert_eq!(root_verb("kms:Create*"), "Create");
        assert_eq!(root_verb("CreateGrant"), "Create");
        assert_eq!(root_verb("kms:GenerateDataKey*"), "Generate");
        assert_eq!(root_verb("s3:*Object"), "Object");
        assert_eq!(root_verb("s3:Get*"), "Get");
        // no leading Capitalized word: the stripped verb is kept whole
        assert_eq!(root_verb("ssm:SSMStart"), "SSMStart");
        assert_eq!(root_verb("kms:*"), "");
        assert_eq!(root_verb("ec2:describe*"), "describe");
    }

    #[test]
    fn admin_shapes() {
        assert!(is_full_admin("*"));
        assert!(is_full_admin("*:*"));
        assert!(!is_full_admin("kms:*"));
        assert!(is_service_admin("kms:*", "kms"));
        assert!(!is_service_admin("kms:*", "s3"));
        assert!(!is_service_admin("kms:Create*", "kms"));
    }

    #[test]
    fn permission_matching() {
        assert!(is_exact_permission("kms:CreateGrant", "kms", "CreateGrant"));
        assert!(!is_exact_permission("kms:CreateGrant", "kms", "Create"));
        assert!(is_wildcard_permission("kms:Create*", "kms", "Create"));
        assert!(!is_wildcard_permission("kms:CreateGrant", "kms", "Create"));
        assert!(!is_wildcard_permission("kms:Delete*", "kms", "Create"));
        assert!(!is_wildcard_permission("s3:Create*", "kms", "Create"));
    }
}
