use serde::Serialize;
use thiserror::Error;

use crate::roles::{Permission, Role};

pub type VaultResult<T> = Result<T, VaultError>;

/// Which side of the disk/metadata pair was missing. Kept for logs; callers
/// see a uniform "not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    Metadata,
    Disk,
    User,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("insufficient permissions: role '{role}' lacks {}", fmt_perms(.required))]
    AuthorizationDenied {
        required: Vec<Permission>,
        role: Role,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound(NotFoundKind),

    #[error("storage capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("storage backend error: {0}")]
    StorageBackend(String),
}

fn fmt_perms(perms: &[Permission]) -> String {
    perms
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::StorageBackend(format!("I/O: {e}"))
    }
}

impl From<anyhow::Error> for VaultError {
    fn from(e: anyhow::Error) -> Self {
        VaultError::StorageBackend(format!("{e:#}"))
    }
}

/// Structured error body for programmatic callers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<Permission>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl VaultError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::AuthenticationRequired => "authentication_required",
            VaultError::AuthorizationDenied { .. } => "authorization_denied",
            VaultError::Validation(_) => "validation_error",
            VaultError::NotFound(_) => "not_found",
            VaultError::CapacityExceeded(_) => "capacity_exceeded",
            VaultError::Integrity(_) => "integrity_error",
            VaultError::StorageBackend(_) => "storage_backend_error",
        }
    }

    /// Suggested next step for an interactive user
    pub fn action(&self) -> &'static str {
        match self {
            VaultError::AuthenticationRequired => "Log out and log back in to unlock encryption.",
            VaultError::AuthorizationDenied { .. } => "Ask an administrator for access.",
            VaultError::Validation(_) => "Check the file type and request, then try again.",
            VaultError::NotFound(_) => "Refresh the file list; the file may have been removed.",
            VaultError::CapacityExceeded(_) => "Free up space by emptying the trash or deleting files.",
            VaultError::Integrity(_) => "The stored file is damaged. Restore it from a backup.",
            VaultError::StorageBackend(_) => "Check that the storage drive is connected, then retry.",
        }
    }

    /// Short message safe to show to an end user (no internal detail)
    pub fn user_message(&self) -> String {
        match self {
            VaultError::AuthenticationRequired => "Your session cannot decrypt files.".into(),
            VaultError::AuthorizationDenied { .. } => "You do not have permission to do that.".into(),
            VaultError::Validation(msg) => msg.clone(),
            VaultError::NotFound(_) => "File not found.".into(),
            VaultError::CapacityExceeded(reason) => format!("Upload blocked: {reason}"),
            VaultError::Integrity(_) => "The file failed its integrity check.".into(),
            VaultError::StorageBackend(_) => "Storage is temporarily unavailable.".into(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let (required, role) = match self {
            VaultError::AuthorizationDenied { required, role } => {
                (Some(required.clone()), Some(*role))
            }
            _ => (None, None),
        };
        ErrorResponse {
            error: self.user_message(),
            code: self.code(),
            action: self.action(),
            required,
            role,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }
}
