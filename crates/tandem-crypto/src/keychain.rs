use std::collections::HashMap;

use parking_lot::Mutex;

use crate::CryptoError;

/// Secret key storage, independent of the backend.
///
/// Only private halves live here. Public prekey records go through
/// [`crate::KeyStore`] so they can be listed and removed per contact.
pub trait Keychain: Send + Sync {
    /// Store a key under a vault/key pair.
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError>;

    /// Retrieve a key from a vault/key pair.
    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Delete a key from a vault/key pair.
    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError>;

    /// Check if a key exists.
    fn key_exists(&self, vault: &str, key: &str) -> Result<bool, CryptoError> {
        Ok(self.load_key(vault, key)?.is_some())
    }
}

/// Vault for the X25519 private halves of prekeys issued to contacts.
pub const VAULT_PREKEYS: &str = "prekeys";

/// Vault for the X25519 private halves of our signed prekeys.
pub const VAULT_SIGNED_PREKEYS: &str = "signed_prekeys";

/// Key name of an issued prekey's private half.
pub fn prekey_key_name(key_id: u32) -> String {
    format!("prekey_{key_id}")
}

/// Key name of a signed prekey's private half.
pub fn signed_prekey_key_name(key_id: u32) -> String {
    format!("signed_prekey_{key_id}")
}

/// In-memory keychain.
///
/// Data is lost on process exit; production builds plug in an OS keychain
/// or an encrypted vault behind the same trait.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Keychain for MemoryKeychain {
    fn store_key(&self, vault: &str, key: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.entries
            .lock()
            .insert((vault.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    fn load_key(&self, vault: &str, key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .entries
            .lock()
            .get(&(vault.to_string(), key.to_string()))
            .cloned())
    }

    fn delete_key(&self, vault: &str, key: &str) -> Result<(), CryptoError> {
        self.entries
            .lock()
            .remove(&(vault.to_string(), key.to_string()));
        Ok(())
    }
}
