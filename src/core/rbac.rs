//! Role-based access control resolution.
//!
//! Permissions reach a user through four paths: directly, through roles,
//! through group membership, and through roles attached to those groups.
//! Resolution flattens all four into one deduplicated set of
//! `resource:permission` scope tokens.

use std::collections::BTreeSet;

use crate::model::{Client, User};

/// Scopes that name a token-shape request rather than a resource. They are
/// never subject to permission filtering.
const NON_RESOURCE_SCOPES: &[&str] = &["openid", "offline_access"];

#[must_use]
pub fn is_non_resource_scope(token: &str) -> bool {
    NON_RESOURCE_SCOPES.contains(&token)
}

/// Flatten a user's direct, role, group, and group-role permissions into a
/// deduplicated, ordered set of scope tokens.
#[must_use]
pub fn effective_permissions(user: &User) -> BTreeSet<String> {
    let mut set = BTreeSet::new();

    for permission in &user.permissions {
        set.insert(permission.scope_token());
    }
    for role in &user.roles {
        for permission in &role.permissions {
            set.insert(permission.scope_token());
        }
    }
    for group in &user.groups {
        for permission in &group.permissions {
            set.insert(permission.scope_token());
        }
        for role in &group.roles {
            for permission in &role.permissions {
                set.insert(permission.scope_token());
            }
        }
    }

    set
}

/// The scope tokens a client itself may hold.
#[must_use]
pub fn client_permissions(client: &Client) -> BTreeSet<String> {
    client
        .permissions
        .iter()
        .map(crate::model::Permission::scope_token)
        .collect()
}

/// Whether the user's effective permissions cover one scope token.
#[must_use]
pub fn user_has_scope(user: &User, token: &str) -> bool {
    is_non_resource_scope(token) || effective_permissions(user).contains(token)
}

/// Whether a set of held scope tokens covers any of the scopes a resource
/// accepts. This is the single authorization predicate for verified tokens.
#[must_use]
pub fn holds_any_scope(held: &[String], allowed: &[&str]) -> bool {
    held.iter().any(|token| allowed.contains(&token.as_str()))
}

/// Narrow a requested scope string to the tokens the user actually holds.
///
/// Non-resource scopes (`openid`, `offline_access`) pass through untouched.
/// Order of the surviving tokens follows the request; duplicates collapse.
#[must_use]
pub fn filter_scope_for_user(requested: &str, user: &User) -> String {
    let held = effective_permissions(user);
    let mut seen = BTreeSet::new();
    let mut kept = Vec::new();

    for token in requested.split_whitespace() {
        if !seen.insert(token) {
            continue;
        }
        if is_non_resource_scope(token) || held.contains(token) {
            kept.push(token);
        }
    }

    kept.join(" ")
}

/// Narrow a requested scope string to the tokens the client holds.
///
/// Used by the client-credentials grant, where there is no user. An empty
/// request means "everything the client has".
#[must_use]
pub fn filter_scope_for_client(requested: &str, client: &Client) -> String {
    let held = client_permissions(client);
    if requested.trim().is_empty() {
        return held.into_iter().collect::<Vec<_>>().join(" ");
    }

    let mut seen = BTreeSet::new();
    let mut kept = Vec::new();
    for token in requested.split_whitespace() {
        if seen.insert(token) && held.contains(token) {
            kept.push(token);
        }
    }
    kept.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcrLevel, Group, Permission, Role};
    use uuid::Uuid;

    fn permission(resource: &str, permission: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            permission: permission.to_string(),
        }
    }

    fn user_with(
        direct: Vec<Permission>,
        roles: Vec<Role>,
        groups: Vec<Group>,
    ) -> User {
        User {
            id: Uuid::new_v4(),
            subject: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.test".to_string(),
            password_hash: String::new(),
            otp_secret: None,
            roles,
            groups,
            permissions: direct,
        }
    }

    #[test]
    fn resolution_flattens_all_four_paths() {
        let user = user_with(
            vec![permission("api", "read")],
            vec![Role {
                id: Uuid::new_v4(),
                name: "editor".to_string(),
                permissions: vec![permission("api", "write")],
            }],
            vec![Group {
                id: Uuid::new_v4(),
                name: "staff".to_string(),
                roles: vec![Role {
                    id: Uuid::new_v4(),
                    name: "auditor".to_string(),
                    permissions: vec![permission("audit", "read")],
                }],
                permissions: vec![permission("files", "read")],
            }],
        );

        let resolved = effective_permissions(&user);
        let expected: BTreeSet<String> = ["api:read", "api:write", "audit:read", "files:read"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(resolved, expected);
    }

    #[test]
    fn duplicate_grants_collapse_regardless_of_path() {
        // Same permission reaches the user via role, group, and directly.
        let read = permission("api", "read");
        let user = user_with(
            vec![read.clone()],
            vec![Role {
                id: Uuid::new_v4(),
                name: "reader".to_string(),
                permissions: vec![read.clone()],
            }],
            vec![Group {
                id: Uuid::new_v4(),
                name: "staff".to_string(),
                roles: vec![],
                permissions: vec![read],
            }],
        );

        let resolved = effective_permissions(&user);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains("api:read"));
    }

    #[test]
    fn filter_keeps_non_resource_scopes_and_held_tokens() {
        let user = user_with(vec![permission("api", "read")], vec![], vec![]);

        let filtered = filter_scope_for_user("openid api:read api:write offline_access", &user);
        assert_eq!(filtered, "openid api:read offline_access");
    }

    #[test]
    fn filter_preserves_request_order_and_drops_duplicates() {
        let user = user_with(
            vec![permission("b", "x"), permission("a", "y")],
            vec![],
            vec![],
        );

        let filtered = filter_scope_for_user("b:x a:y b:x", &user);
        assert_eq!(filtered, "b:x a:y");
    }

    #[test]
    fn any_overlapping_scope_grants_access() {
        let held = vec!["api:read".to_string(), "jobs:run".to_string()];
        assert!(holds_any_scope(&held, &["api:read", "api:admin"]));
        assert!(!holds_any_scope(&held, &["api:admin"]));
        assert!(!holds_any_scope(&[], &["api:read"]));
    }

    #[test]
    fn client_filter_defaults_to_everything_held() {
        let client = Client {
            id: Uuid::new_v4(),
            client_identifier: "batch".to_string(),
            client_secret: Some("s".to_string()),
            is_public: false,
            redirect_uris: vec![],
            permissions: vec![permission("jobs", "run"), permission("api", "read")],
            allow_offline_access: false,
            required_acr_level: AcrLevel::Level1,
        };

        assert_eq!(filter_scope_for_client("", &client), "api:read jobs:run");
        assert_eq!(filter_scope_for_client("jobs:run admin:all", &client), "jobs:run");
        assert_eq!(filter_scope_for_client("admin:all", &client), "");
    }
}
