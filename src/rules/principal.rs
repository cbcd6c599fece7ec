use std::collections::HashSet;

use uuid::Uuid;

use super::roles;

/// The acting identity being authorized, with its global grants
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub roles: HashSet<String>,
    pub permissions: HashSet<String>,
    anonymous: bool,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            username: String::new(),
            is_active: true,
            is_superuser: false,
            roles: HashSet::new(),
            permissions: HashSet::new(),
            anonymous: false,
        }
    }

    /// Unauthenticated caller. Carries the nil id and no grants.
    pub fn anonymous() -> Self {
        Self {
            username: "anonymous".to_string(),
            anonymous: true,
            ..Self::new(Uuid::nil())
        }
    }

    pub fn with_name(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_permissions(mut self, perms: impl IntoIterator<Item = String>) -> Self {
        self.permissions = perms.into_iter().collect();
        self
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_super_admin(&self) -> bool {
        self.is_superuser || self.has_role(roles::SUPER_ADMIN)
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.anonymous == other.anonymous
    }
}

impl Eq for Principal {}
