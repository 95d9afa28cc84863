//! Account class check applied at login and bootstrap.

use std::fmt;
use std::sync::Arc;

use crate::credentials::Profile;

type Predicate = dyn Fn(&Profile) -> bool + Send + Sync;

/// Decides whether a profile may hold a session.
#[derive(Clone)]
pub struct AccountPolicy {
    predicate: Arc<Predicate>,
    description: String,
}

impl AccountPolicy {
    /// Every account is permitted.
    pub fn allow_all() -> Self {
        Self {
            predicate: Arc::new(|_| true),
            description: "allow all".to_string(),
        }
    }

    /// Reject profiles whose role matches one of `roles` (case-insensitive).
    /// Profiles without a role are permitted.
    pub fn deny_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let denied: Vec<String> = roles
            .into_iter()
            .map(|r| r.into().trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        if denied.is_empty() {
            return Self::allow_all();
        }
        let description = format!("deny roles [{}]", denied.join(", "));
        Self {
            predicate: Arc::new(move |profile: &Profile| {
                profile
                    .role
                    .as_deref()
                    .map_or(true, |role| !denied.contains(&role.to_ascii_lowercase()))
            }),
            description,
        }
    }

    /// Custom predicate.
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&Profile) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: "custom".to_string(),
        }
    }

    /// Returns `true` if `profile` may hold a session.
    pub fn permits(&self, profile: &Profile) -> bool {
        (self.predicate)(profile)
    }
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl fmt::Debug for AccountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountPolicy")
            .field("rule", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_roles_is_case_insensitive() {
        let policy = AccountPolicy::deny_roles(["Guest", " "]);
        assert!(!policy.permits(&Profile::new("1").with_role("guest")));
        assert!(policy.permits(&Profile::new("2").with_role("admin")));
        assert!(policy.permits(&Profile::new("3")));
    }

    #[test]
    fn test_empty_deny_list_allows_everyone() {
        let policy = AccountPolicy::deny_roles(Vec::<String>::new());
        assert!(policy.permits(&Profile::new("1").with_role("anything")));
        assert_eq!(format!("{policy:?}"), r#"AccountPolicy { rule: "allow all" }"#);
    }

    #[test]
    fn test_custom_predicate() {
        let policy = AccountPolicy::from_fn(|p| p.email.is_some());
        assert!(!policy.permits(&Profile::new("1")));
    }
}
