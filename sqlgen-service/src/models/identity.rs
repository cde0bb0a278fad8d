//! Requester identity resolved once per request.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Privilege tier, 0 (system) to 5 (administrator).
///
/// Every capability check is a threshold on this ordinal. A new role only
/// needs a level in the `roles` table; no code names individual roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RoleLevel(u8);

impl RoleLevel {
    pub const SYSTEM: Self = Self(0);
    /// Baseline staff; also the level of any identity the store could not vouch for.
    pub const EMPLOYEE: Self = Self(1);
    pub const SUPERVISOR: Self = Self(2);
    pub const MANAGER: Self = Self(3);
    pub const HR: Self = Self(4);
    pub const ADMIN: Self = Self(5);

    /// Clamp a stored ordinal into the 0..=5 range.
    pub fn new(level: i32) -> Self {
        Self(level.clamp(0, Self::ADMIN.0 as i32) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn scope(self) -> AccessScope {
        match self.0 {
            5 => AccessScope::Organization,
            4 => AccessScope::Department,
            3 => AccessScope::Team,
            _ => AccessScope::Own,
        }
    }

    /// Group memberships implied by the level, cumulative from the bottom tier.
    pub fn groups(self) -> Vec<&'static str> {
        let mut groups = vec!["default", "employee"];
        let tiers = [
            (Self::EMPLOYEE, "staff"),
            (Self::SUPERVISOR, "supervisor"),
            (Self::MANAGER, "manager"),
            (Self::HR, "hr"),
            (Self::ADMIN, "admin"),
        ];
        groups.extend(
            tiers
                .iter()
                .filter(|(tier, _)| self >= *tier)
                .map(|(_, name)| *name),
        );
        groups
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How far a requester can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    Own,
    Team,
    Department,
    Organization,
}

/// Who is asking: a concrete principal key, or a reserved system marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PrincipalId {
    User(String),
    System(String),
}

impl PrincipalId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User(id) | Self::System(id) => id,
        }
    }
}

/// Resolved requester. Built by the identity resolver and never mutated.
///
/// Enforcement reads only the first-class fields; `extensions` carries display
/// attributes that have not earned a field of their own.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: PrincipalId,
    pub display_name: String,
    pub role_name: String,
    pub role_level: RoleLevel,
    pub department_id: Option<String>,
    pub department_name: Option<String>,
    pub manager_id: Option<String>,
    pub direct_report_ids: BTreeSet<String>,
    pub department_member_ids: BTreeSet<String>,
    pub is_manager: bool,
    pub is_privileged: bool,
    pub groups: BTreeSet<String>,
    pub extensions: BTreeMap<String, String>,
}

impl Identity {
    /// Identity for sentinel or malformed requester ids. Sees nothing of its own.
    pub fn system(raw_id: &str) -> Self {
        let id = if raw_id.is_empty() { "system" } else { raw_id };
        Self {
            id: PrincipalId::System(id.to_string()),
            display_name: id.to_string(),
            role_name: "system".to_string(),
            role_level: RoleLevel::SYSTEM,
            department_id: None,
            department_name: None,
            manager_id: None,
            direct_report_ids: BTreeSet::new(),
            department_member_ids: BTreeSet::new(),
            is_manager: false,
            is_privileged: false,
            groups: ["system", "default"].iter().map(|g| g.to_string()).collect(),
            extensions: BTreeMap::new(),
        }
    }

    /// Minimal identity for a well-formed id the store could not resolve.
    pub fn baseline(user_id: &str) -> Self {
        let level = RoleLevel::EMPLOYEE;
        Self {
            id: PrincipalId::User(user_id.to_string()),
            display_name: user_id.to_string(),
            role_name: "employee".to_string(),
            role_level: level,
            department_id: None,
            department_name: None,
            manager_id: None,
            direct_report_ids: BTreeSet::new(),
            department_member_ids: BTreeSet::new(),
            is_manager: false,
            is_privileged: false,
            groups: level.groups().into_iter().map(String::from).collect(),
            extensions: BTreeMap::new(),
        }
    }

    /// The principal key usable in SQL filters, if there is one.
    pub fn concrete_id(&self) -> Option<&str> {
        match &self.id {
            PrincipalId::User(id) => Some(id),
            PrincipalId::System(_) => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self.id, PrincipalId::System(_))
    }

    pub fn scope(&self) -> AccessScope {
        self.role_level.scope()
    }

    pub fn with_extension(mut self, key: &str, value: impl Into<String>) -> Self {
        self.extensions.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_level_is_clamped() {
        assert_eq!(RoleLevel::new(-3), RoleLevel::SYSTEM);
        assert_eq!(RoleLevel::new(9), RoleLevel::ADMIN);
        assert_eq!(RoleLevel::new(3).value(), 3);
    }

    #[test]
    fn test_scope_by_level() {
        assert_eq!(RoleLevel::EMPLOYEE.scope(), AccessScope::Own);
        assert_eq!(RoleLevel::SUPERVISOR.scope(), AccessScope::Own);
        assert_eq!(RoleLevel::MANAGER.scope(), AccessScope::Team);
        assert_eq!(RoleLevel::HR.scope(), AccessScope::Department);
        assert_eq!(RoleLevel::ADMIN.scope(), AccessScope::Organization);
    }

    #[test]
    fn test_groups_are_cumulative() {
        let groups = RoleLevel::MANAGER.groups();
        assert!(groups.contains(&"staff"));
        assert!(groups.contains(&"supervisor"));
        assert!(groups.contains(&"manager"));
        assert!(!groups.contains(&"hr"));
    }

    #[test]
    fn test_system_identity() {
        let identity = Identity::system("");
        assert!(identity.is_system());
        assert_eq!(identity.concrete_id(), None);
        assert_eq!(identity.role_level, RoleLevel::SYSTEM);
        assert!(identity.groups.contains("system"));
        assert!(identity.groups.contains("default"));
        assert_eq!(identity.id.as_str(), "system");
    }

    #[test]
    fn test_baseline_identity_has_concrete_id() {
        let identity = Identity::baseline("abc-123");
        assert_eq!(identity.concrete_id(), Some("abc-123"));
        assert_eq!(identity.role_level, RoleLevel::EMPLOYEE);
    }
}
