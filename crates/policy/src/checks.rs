use posture_core::PolicyDocument;

const SESSION_MANAGER_ACTIONS: [&str; 3] = ["ssm:StartSession", "ssm:*", "*"];

/// Narrow admin check: an Allow statement granting `*` on resource `*`.
pub fn has_admin_access(document: &PolicyDocument) -> bool {
    document.statements().iter().any(|st| {
        st.allowed_actions().is_some_and(|actions| actions.iter().any(|a| a == "*"))
            && st.resources().iter().any(|r| r == "*")
    })
}

/// Whether the document lets a principal open SSM Session Manager sessions.
pub fn has_session_manager_access(document: &PolicyDocument) -> bool {
    document.statements().iter().any(|st| {
        st.allowed_actions()
            .is_some_and(|actions| actions.iter().any(|a| SESSION_MANAGER_ACTIONS.contains(&a.as_str())))
            && st.resources().iter().any(|r| r == "*" || r.starts_with("arn:aws:ssm:"))
    })
}
