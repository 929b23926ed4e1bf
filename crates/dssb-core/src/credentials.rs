//! Login credential lookup

use crate::types::ServerKey;
use dashmap::DashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Username/password pair for a game server
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Read side of the credential store
pub trait CredentialLookup: Send + Sync {
    /// Server-specific credentials
    fn credentials(&self, key: &ServerKey) -> Option<Credentials>;

    /// Credentials used for servers without their own
    fn default_credentials(&self) -> Option<Credentials>;

    fn credentials_with_fallback(&self, key: &ServerKey) -> Option<Credentials> {
        self.credentials(key).or_else(|| self.default_credentials())
    }

    fn has_credentials(&self, key: &ServerKey) -> bool {
        self.credentials(key).is_some()
    }
}

/// In-process credential table
#[derive(Default)]
pub struct MemoryCredentials {
    servers: DashMap<ServerKey, Credentials>,
    default: RwLock<Option<Credentials>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, key: ServerKey, credentials: Credentials) {
        self.servers.insert(key, credentials);
    }

    pub fn delete(&self, key: &ServerKey) -> bool {
        self.servers.remove(key).is_some()
    }

    pub fn set_default(&self, credentials: Option<Credentials>) {
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }
}

impl CredentialLookup for MemoryCredentials {
    fn credentials(&self, key: &ServerKey) -> Option<Credentials> {
        self.servers.get(key).map(|c| c.clone())
    }

    fn default_credentials(&self) -> Option<Credentials> {
        self.default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_to_default() {
        let creds = MemoryCredentials::new();
        let known = ServerKey::new("10.0.0.1", 4000);
        let unknown = ServerKey::new("10.0.0.2", 4000);

        assert!(creds.credentials_with_fallback(&unknown).is_none());

        creds.set_default(Some(Credentials::new("guest", "guest")));
        creds.store(known.clone(), Credentials::new("alice", "hunter2"));

        assert_eq!(creds.credentials_with_fallback(&known).unwrap().username, "alice");
        assert_eq!(creds.credentials_with_fallback(&unknown).unwrap().username, "guest");
        assert!(creds.has_credentials(&known));
        assert!(!creds.has_credentials(&unknown));

        assert!(creds.delete(&known));
        assert_eq!(creds.credentials_with_fallback(&known).unwrap().username, "guest");
    }

    #[test]
    fn test_default_survives_poisoned_lock() {
        let creds = std::sync::Arc::new(MemoryCredentials::new());
        creds.set_default(Some(Credentials::new("old", "old")));

        let poisoner = creds.clone();
        let panicked = std::thread::spawn(move || {
            let _guard = poisoner.default.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(panicked.is_err());
        assert!(creds.default.is_poisoned());

        creds.set_default(Some(Credentials::new("new", "new")));
        assert_eq!(creds.default_credentials().unwrap().username, "new");

        creds.set_default(None);
        assert!(creds.default_credentials().is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let printed = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(!printed.contains("hunter2"));
    }
}
