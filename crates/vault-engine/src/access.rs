//! Access control gate.
//!
//! Every check resolves the caller's role from the store at call time, so a
//! role change takes effect on the next request. Store failures deny.

use tracing::{debug, warn};
use vault_core::{
    NotFoundKind, Permission, ResourceType, Role, UserId, VaultError, VaultResult,
};

use crate::session::Session;
use crate::store::SharedStore;

/// Proof that a check passed, carrying the role it was decided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authorized {
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Clone)]
pub struct AccessGate {
    store: SharedStore,
}

#[derive(Clone, Copy)]
enum Mode {
    Any,
    All,
}

impl AccessGate {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Caller must hold `permission`.
    pub async fn require(
        &self,
        session: Option<&Session>,
        permission: Permission,
    ) -> VaultResult<Authorized> {
        self.check(session, &[permission], Mode::All).await
    }

    /// Caller must hold at least one of `permissions`.
    pub async fn require_any(
        &self,
        session: Option<&Session>,
        permissions: &[Permission],
    ) -> VaultResult<Authorized> {
        self.check(session, permissions, Mode::Any).await
    }

    /// Caller must hold every one of `permissions`.
    pub async fn require_all(
        &self,
        session: Option<&Session>,
        permissions: &[Permission],
    ) -> VaultResult<Authorized> {
        self.check(session, permissions, Mode::All).await
    }

    async fn check(
        &self,
        session: Option<&Session>,
        permissions: &[Permission],
        mode: Mode,
    ) -> VaultResult<Authorized> {
        let session = session.ok_or(VaultError::AuthenticationRequired)?;
        let role = self.resolve_role(session.user_id()).await?;

        let granted = match mode {
            Mode::Any => role.has_any(permissions),
            Mode::All => role.has_all(permissions),
        };
        if !granted {
            debug!(
                user_id = session.user_id(),
                role = %role,
                required = ?permissions,
                "permission denied"
            );
            return Err(VaultError::AuthorizationDenied {
                required: permissions.to_vec(),
                role,
            });
        }

        Ok(Authorized {
            user_id: session.user_id(),
            role,
        })
    }

    /// Current role of `user_id`. Unknown users count as unauthenticated.
    pub async fn resolve_role(&self, user_id: UserId) -> VaultResult<Role> {
        let lookup = self.store.lock().await.user(user_id);
        match lookup {
            Ok(Some(user)) => Ok(user.role),
            Ok(None) => {
                warn!(user_id, "session refers to a user that no longer exists");
                Err(VaultError::AuthenticationRequired)
            }
            Err(e) => {
                warn!(user_id, "role lookup failed, denying: {e:#}");
                Err(VaultError::StorageBackend("permission check failed".into()))
            }
        }
    }

    /// Whether the caller owns the given resource.
    ///
    /// Only `file` resources are persisted; `folder` and `comment` ids never
    /// resolve and report not found.
    pub async fn is_owner(
        &self,
        session: Option<&Session>,
        resource_type: &str,
        resource_id: Option<u64>,
    ) -> VaultResult<bool> {
        let session = session.ok_or(VaultError::AuthenticationRequired)?;
        let kind: ResourceType = resource_type.parse()?;
        let id = resource_id
            .ok_or_else(|| VaultError::Validation("resource id required".into()))?;

        let owner = match kind {
            ResourceType::File => {
                let row = self.store.lock().await.file(id);
                match row {
                    Ok(row) => row.map(|f| f.user_id),
                    Err(e) => {
                        warn!(file_id = id, "ownership lookup failed: {e:#}");
                        return Err(VaultError::StorageBackend("ownership check failed".into()));
                    }
                }
            }
            ResourceType::Folder | ResourceType::Comment => None,
        };

        match owner {
            Some(owner) => Ok(owner == session.user_id()),
            None => Err(VaultError::NotFound(NotFoundKind::Metadata)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSecret;
    use vault_crypto::KdfParams;
    use crate::store::{shared, JsonStore, MetadataStore};
    use vault_core::{FileRecord, UserRecord};

    fn user(id: UserId, role: Role) -> UserRecord {
        UserRecord {
            id,
            username: format!("user{id}"),
            password_credential: "x".into(),
            encryption_salt: "y".into(),
            role,
            created_at: 0,
            kdf: None,
        }
    }

    fn session(id: UserId) -> Session {
        let secret = SessionSecret::new("pw".into(), [0u8; 16], KdfParams::default());
        Session::new(id, format!("user{id}"), secret)
    }

    fn gate_with_users(dir: &std::path::Path) -> AccessGate {
        let mut store = JsonStore::open(&dir.join("vault.json")).unwrap();
        store.insert_user(user(1, Role::Admin)).unwrap();
        store.insert_user(user(2, Role::Editor)).unwrap();
        store.insert_user(user(3, Role::Viewer)).unwrap();
        store
            .insert_file(FileRecord {
                id: 10,
                user_id: 2,
                filename: "a.txt".into(),
                filepath: "a.enc".into(),
                size: 1,
                mimetype: "text/plain".into(),
                uploaded_at: 0,
                iv: None,
                auth_tag: None,
                encrypted: false,
                trashed_at: None,
                file_hash: None,
                chunk_size: None,
            })
            .unwrap();
        AccessGate::new(shared(store))
    }

    #[tokio::test]
    async fn unauthenticated_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        let err = gate.require(None, Permission::FileView).await.unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationRequired));
    }

    #[tokio::test]
    async fn viewer_denied_admin_permission() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        let err = gate
            .require(Some(&session(3)), Permission::SystemSettings)
            .await
            .unwrap_err();
        match err {
            VaultError::AuthorizationDenied { required, role } => {
                assert_eq!(required, vec![Permission::SystemSettings]);
                assert_eq!(role, Role::Viewer);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn any_and_all_compose() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        let editor = session(2);
        let perms = [Permission::FileUpload, Permission::SystemSettings];

        let ok = gate.require_any(Some(&editor), &perms).await.unwrap();
        assert_eq!(ok.role, Role::Editor);
        assert!(gate.require_all(Some(&editor), &perms).await.is_err());
        assert!(gate.require_all(Some(&session(1)), &perms).await.is_ok());
    }

    #[tokio::test]
    async fn deleted_user_counts_as_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        let err = gate
            .require(Some(&session(99)), Permission::FileView)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::AuthenticationRequired));
    }

    #[tokio::test]
    async fn ownership_true_for_owner_false_for_others() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        assert!(gate.is_owner(Some(&session(2)), "file", Some(10)).await.unwrap());
        assert!(!gate.is_owner(Some(&session(3)), "file", Some(10)).await.unwrap());
    }

    #[tokio::test]
    async fn ownership_input_validation() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_users(dir.path());
        let s = session(2);

        let err = gate.is_owner(Some(&s), "photo", Some(10)).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        let err = gate.is_owner(Some(&s), "file", None).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        let err = gate.is_owner(Some(&s), "file", Some(404)).await.unwrap_err();
        assert!(err.is_not_found());
        let err = gate.is_owner(Some(&s), "folder", Some(1)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
