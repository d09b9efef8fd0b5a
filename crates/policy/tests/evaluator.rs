use posture_core::{ClassificationResult, PolicyDocument, Target};
use posture_policy::{evaluate, evaluate_statements, has_admin_access, MatchKind};
use serde_json::json;

fn power_user() -> PolicyDocument {
    PolicyDocument::from_value(&json!({
        "Version": "2012-10-17",
        "Statement": [
            { "Effect": "Allow", "NotAction": ["iam:*", "organizations:*", "account:*"], "Resource": "*" },
            { "Effect": "Allow",
              "Action": ["iam:CreateServiceLinkedRole", "iam:DeleteServiceLinkedRole", "iam:ListRoles", "organizations:DescribeOrganization"],
              "Resource": "*" }
        ]
    }))
}

fn read_only_s3() -> PolicyDocument {
    PolicyDocument::from_value(&json!({
        "Version": "2012-10-17",
        "Statement": [{ "Effect": "Allow", "Action": ["s3:Get*", "s3:List*", "s3-object-lambda:Get*"], "Resource": "*" }]
    }))
}

#[test]
fn not_action_statements_are_not_modelled() {
    let t = Target::parse("s3", "PutObject").unwrap();
    assert_eq!(evaluate(&power_user(), &t), ClassificationResult::NONE);
}

#[test]
fn power_user_named_iam_actions() {
    let t = Target::parse("iam", "ListRoles").unwrap();
    let r = evaluate(&power_user(), &t);
    assert!(r.has_access);
    assert!(!r.is_service_admin);
    assert!(!has_admin_access(&power_user()));
}

#[test]
fn read_only_wildcards_match_by_verb() {
    let doc = read_only_s3();
    assert!(evaluate(&doc, &Target::parse("s3", "GetObject").unwrap()).has_access);
    assert!(evaluate(&doc, &Target::parse("s3", "ListBucket").unwrap()).has_access);
    assert!(!evaluate(&doc, &Target::parse("s3", "PutObject").unwrap()).has_access);
    // the hyphenated service is a different prefix
    let m = evaluate_statements(&doc, &Target::parse("s3-object-lambda", "GetObject").unwrap());
    assert_eq!(m.len(), 1);
    assert_eq!(m[0].action, "s3-object-lambda:Get*");
    assert_eq!(m[0].kind, MatchKind::WildcardPermission);
}

#[test]
fn admin_policy_is_full_admin_and_strict_admin() {
    let doc = PolicyDocument::from_value(&json!({
        "Version": "2012-10-17",
        "Statement": [{ "Effect": "Allow", "Action": "*", "Resource": "*" }]
    }));
    let r = evaluate(&doc, &Target::parse("secretsmanager", "PutSecretValue").unwrap());
    assert_eq!(r, ClassificationResult::FULL_ADMIN);
    assert!(has_admin_access(&doc));
}

#[test]
fn results_respect_flag_invariants() {
    let docs = [power_user(), read_only_s3(), PolicyDocument::from_value(&json!({ "Statement": [
        { "Effect": "Allow", "Action": ["kms:*", "*:*"] }
    ]}))];
    for d in &docs {
        for (s, p) in [("kms", "Decrypt"), ("s3", "GetObject"), ("iam", "ListRoles")] {
            let r = evaluate(d, &Target::parse(s, p).unwrap());
            if r.is_full_admin || r.is_service_admin {
                assert!(r.has_access);
            }
        }
    }
}
