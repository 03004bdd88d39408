//! User accounts: creation, login, role changes.
//!
//! The first account ever created becomes `admin` and marks setup complete;
//! after that only holders of `user:manage` can add users or change roles.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use vault_core::types::now_secs;
use vault_core::{NotFoundKind, Permission, Role, UserId, UserRecord, VaultError, VaultResult};
use vault_crypto::{generate_salt, hash_password, verify_password, KdfParams, SALT_SIZE};

use crate::access::AccessGate;
use crate::error::from_crypto;
use crate::keying::{self, blocking, owned_secret};
use crate::session::{Session, SessionSecret};
use crate::store::SharedStore;

/// `system_config` key set once the first admin exists
pub const SETUP_COMPLETED_KEY: &str = "setup_completed";

const MIN_PASSWORD_LEN: usize = 8;
const MAX_USERNAME_LEN: usize = 64;

pub struct Accounts {
    store: SharedStore,
    gate: AccessGate,
    kdf: KdfParams,
}

impl Accounts {
    pub fn new(store: SharedStore, kdf: KdfParams) -> Self {
        let gate = AccessGate::new(store.clone());
        Self { store, gate, kdf }
    }

    pub async fn setup_completed(&self) -> VaultResult<bool> {
        let entry = self.store.lock().await.config_value(SETUP_COMPLETED_KEY)?;
        Ok(entry.is_some_and(|e| e.value == "true"))
    }

    /// Create an account.
    ///
    /// With no existing users `actor` is ignored and the account is `admin`.
    /// Otherwise `actor` must hold `user:manage` and `role` defaults to `viewer`.
    pub async fn create_user(
        &self,
        actor: Option<&Session>,
        username: &str,
        password: &SecretString,
        role: Option<Role>,
    ) -> VaultResult<UserRecord> {
        validate_username(username)?;
        validate_password(password)?;

        let bootstrap = self.store.lock().await.users()?.is_empty();
        if !bootstrap {
            self.gate.require(actor, Permission::UserManage).await?;
        }

        let credential = {
            let password = owned_secret(password);
            let kdf = self.kdf.clone();
            blocking("password hashing", move || hash_password(&password, &kdf))
                .await?
                .map_err(from_crypto)?
        };
        let salt = generate_salt();

        let mut store = self.store.lock().await;
        if store.user_by_name(username)?.is_some() {
            return Err(VaultError::Validation(format!(
                "username '{username}' is already taken"
            )));
        }
        // Re-check under the lock: another bootstrap may have won the race.
        let role = if store.users()?.is_empty() {
            Role::Admin
        } else if bootstrap {
            return Err(VaultError::Validation("setup already completed".into()));
        } else {
            role.unwrap_or_default()
        };

        let user = UserRecord {
            id: store.allocate_user_id()?,
            username: username.to_string(),
            password_credential: credential,
            encryption_salt: STANDARD.encode(salt),
            role,
            created_at: now_secs(),
            kdf: Some(keying::settings_from_params(&self.kdf)),
        };
        store.insert_user(user.clone())?;
        if role == Role::Admin && bootstrap {
            store.set_config_value(SETUP_COMPLETED_KEY, "true")?;
        }
        drop(store);

        info!(user_id = user.id, username, role = %role, "user created");
        Ok(user)
    }

    /// Verify credentials and open an unlocked session.
    ///
    /// Unknown user and wrong password fail identically.
    pub async fn login(&self, username: &str, password: &SecretString) -> VaultResult<Session> {
        let user = self.store.lock().await.user_by_name(username)?;
        let Some(user) = user else {
            warn!(username, "login for unknown user");
            return Err(VaultError::AuthenticationRequired);
        };
        let verified = {
            let password = owned_secret(password);
            let credential = user.password_credential.clone();
            blocking("password check", move || verify_password(&password, &credential)).await?
        };
        if !verified {
            warn!(user_id = user.id, "login with wrong password");
            return Err(VaultError::AuthenticationRequired);
        }

        let salt = decode_salt(&user.encryption_salt)?;
        let kdf = match &user.kdf {
            Some(stored) => keying::params_from_settings(stored),
            None => self.kdf.clone(),
        };
        info!(user_id = user.id, "login");
        Ok(Session::new(
            user.id,
            user.username,
            SessionSecret::new(owned_secret(password), salt, kdf),
        ))
    }

    pub async fn set_role(
        &self,
        actor: Option<&Session>,
        user_id: UserId,
        role: Role,
    ) -> VaultResult<()> {
        let auth = self.gate.require(actor, Permission::UserManage).await?;
        let updated = self.store.lock().await.set_user_role(user_id, role)?;
        if !updated {
            return Err(VaultError::NotFound(NotFoundKind::User));
        }
        info!(user_id, by = auth.user_id, role = %role, "role changed");
        Ok(())
    }

    pub async fn list_users(&self, actor: Option<&Session>) -> VaultResult<Vec<UserRecord>> {
        self.gate.require(actor, Permission::UserManage).await?;
        Ok(self.store.lock().await.users()?)
    }
}

/// Decode a stored base64 salt.
pub fn decode_salt(encoded: &str) -> VaultResult<[u8; SALT_SIZE]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::StorageBackend(format!("stored salt is not base64: {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        VaultError::StorageBackend(format!(
            "stored salt has {} bytes, expected {SALT_SIZE}",
            v.len()
        ))
    })
}

fn validate_username(username: &str) -> VaultResult<()> {
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(VaultError::Validation(format!(
            "username must be 1-{MAX_USERNAME_LEN} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(VaultError::Validation(
            "username may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &SecretString) -> VaultResult<()> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(VaultError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
