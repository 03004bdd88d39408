//! Authenticated session state.
//!
//! The plaintext password and the user's salt are only ever held here, in
//! memory, and are wiped when the session (or its secret) is dropped.

use secrecy::SecretString;
use vault_core::UserId;
use vault_crypto::{KdfParams, SALT_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Material needed to derive file keys for one user.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret {
    #[zeroize(skip)]
    password: SecretString,
    salt: [u8; SALT_SIZE],
    #[zeroize(skip)]
    kdf: KdfParams,
}

impl SessionSecret {
    /// `kdf` must be the parameters stored with the user, not the current config.
    pub fn new(password: SecretString, salt: [u8; SALT_SIZE], kdf: KdfParams) -> Self {
        Self { password, salt, kdf }
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }
}

impl std::fmt::Debug for SessionSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionSecret([REDACTED])")
    }
}

#[derive(Debug)]
pub struct Session {
    user_id: UserId,
    username: String,
    secret: Option<SessionSecret>,
}

impl Session {
    /// A fully unlocked session, as produced by login.
    pub fn new(user_id: UserId, username: impl Into<String>, secret: SessionSecret) -> Self {
        Self {
            user_id,
            username: username.into(),
            secret: Some(secret),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> Option<&SessionSecret> {
        self.secret.as_ref()
    }

    /// Drop the secret material; the session keeps its identity.
    pub fn lock(&mut self) {
        self.secret = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_discards_secret() {
        let secret = SessionSecret::new("pw".into(), [1u8; SALT_SIZE], KdfParams::default());
        let mut s = Session::new(1, "alice", secret);
        assert!(s.secret().is_some());
        s.lock();
        assert!(s.secret().is_none());
        assert_eq!(s.user_id(), 1);
    }

    #[test]
    fn debug_never_prints_secret() {
        let secret = SessionSecret::new("hunter2".into(), [7u8; SALT_SIZE], KdfParams::default());
        let s = Session::new(1, "alice", secret);
        let out = format!("{s:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("REDACTED"));
    }
}
