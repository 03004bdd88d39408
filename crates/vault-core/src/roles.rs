//! Role → permission matrix
//!
//! Every role lists its permissions explicitly. There is no hierarchy: an
//! `admin` holds `file:upload` because the table says so, not because it
//! outranks `editor`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account role. Unknown role strings in the store resolve to `Viewer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    #[default]
    Viewer,
}

/// Named permissions checked by the access gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "file:view")]
    FileView,
    #[serde(rename = "file:upload")]
    FileUpload,
    #[serde(rename = "file:download")]
    FileDownload,
    #[serde(rename = "file:delete")]
    FileDelete,
    #[serde(rename = "file:trash")]
    FileTrash,
    #[serde(rename = "file:restore")]
    FileRestore,
    #[serde(rename = "file:dedupe")]
    DuplicatesView,
    #[serde(rename = "trash:purge")]
    TrashPurge,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "system:settings")]
    SystemSettings,
}

const ADMIN: &[Permission] = &[
    Permission::FileView,
    Permission::FileUpload,
    Permission::FileDownload,
    Permission::FileDelete,
    Permission::FileTrash,
    Permission::FileRestore,
    Permission::DuplicatesView,
    Permission::TrashPurge,
    Permission::UserManage,
    Permission::SystemSettings,
];

const EDITOR: &[Permission] = &[
    Permission::FileView,
    Permission::FileUpload,
    Permission::FileDownload,
    Permission::FileDelete,
    Permission::FileTrash,
    Permission::FileRestore,
    Permission::DuplicatesView,
];

const VIEWER: &[Permission] = &[Permission::FileView, Permission::FileDownload];

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Editor, Role::Viewer];

    /// The complete permission set of this role.
    pub fn permissions(self) -> &'static [Permission] {
        match self {
            Role::Admin => ADMIN,
            Role::Editor => EDITOR,
            Role::Viewer => VIEWER,
        }
    }

    pub fn has(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }

    pub fn has_any(self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has(*p))
    }

    /// An empty requirement list is vacuously satisfied.
    pub fn has_all(self, permissions: &[Permission]) -> bool {
        permissions.iter().all(|p| self.has(*p))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_default())
    }
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::FileView => "file:view",
            Permission::FileUpload => "file:upload",
            Permission::FileDownload => "file:download",
            Permission::FileDelete => "file:delete",
            Permission::FileTrash => "file:trash",
            Permission::FileRestore => "file:restore",
            Permission::DuplicatesView => "file:dedupe",
            Permission::TrashPurge => "trash:purge",
            Permission::UserManage => "user:manage",
            Permission::SystemSettings => "system:settings",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_is_read_only() {
        assert!(Role::Viewer.has(Permission::FileDownload));
        assert!(!Role::Viewer.has(Permission::FileUpload));
        assert!(!Role::Viewer.has(Permission::FileDelete));
    }

    #[test]
    fn viewer_holds_no_admin_only_permission() {
        let admin_only: Vec<Permission> = Role::Admin
            .permissions()
            .iter()
            .copied()
            .filter(|p| !Role::Editor.has(*p))
            .collect();
        assert!(!admin_only.is_empty());
        for p in admin_only {
            assert!(!Role::Viewer.has(p), "viewer must not hold {p}");
        }
    }

    #[test]
    fn any_and_all() {
        let perms = [Permission::FileView, Permission::SystemSettings];
        assert!(Role::Viewer.has_any(&perms));
        assert!(!Role::Viewer.has_all(&perms));
        assert!(Role::Admin.has_all(&perms));
        assert!(Role::Viewer.has_all(&[]));
        assert!(!Role::Viewer.has_any(&[]));
    }

    #[test]
    fn role_string_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn unknown_stored_role_is_viewer() {
        let role: Role = serde_json::from_str("\"superuser\"").unwrap();
        assert_eq!(role, Role::Viewer);
        let role: Role = serde_json::from_str("\"editor\"").unwrap();
        assert_eq!(role, Role::Editor);
    }

    #[test]
    fn permission_serde_names() {
        let json = serde_json::to_string(&Permission::SystemSettings).unwrap();
        assert_eq!(json, "\"system:settings\"");
        assert_eq!(Permission::SystemSettings.to_string(), "system:settings");
    }
}
