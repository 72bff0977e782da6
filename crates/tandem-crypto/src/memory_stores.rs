//! In-memory implementation of [`KeyStore`].
//!
//! Suitable for tests and for running before a persistent backend is wired
//! in. **WARNING**: data is lost on process exit.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::pairing::PairingAuthorisation;
use crate::prekeys::{ContactPreKey, ContactSignedPreKey};
use crate::store::KeyStore;
use crate::CryptoError;

#[derive(Default)]
struct State {
    /// identity -> `key_id` -> prekey
    prekeys: HashMap<String, BTreeMap<u32, ContactPreKey>>,
    /// identity -> `key_id` -> signed prekey
    signed_prekeys: HashMap<String, BTreeMap<u32, ContactSignedPreKey>>,
    /// Last prekey id handed out (0 = none yet).
    max_prekey_id: u32,
    active_signed_prekey_id: Option<u32>,
    /// (primary, secondary) -> authorisation
    authorisations: HashMap<(String, String), PairingAuthorisation>,
}

impl State {
    /// Lowest primary wins, so reads do not depend on hash order.
    fn grant_for_secondary(&self, secondary: &str) -> Option<&PairingAuthorisation> {
        self.authorisations
            .values()
            .filter(|a| a.secondary_device_pub_key == secondary && a.is_granted())
            .min_by(|a, b| a.primary_device_pub_key.cmp(&b.primary_device_pub_key))
    }

    fn secondaries_of(&self, primary: &str) -> Vec<String> {
        let mut devices: Vec<String> = self
            .authorisations
            .values()
            .filter(|a| a.primary_device_pub_key == primary && a.is_granted())
            .map(|a| a.secondary_device_pub_key.clone())
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }
}

/// [`KeyStore`] backed by process memory.
#[derive(Default)]
pub struct MemoryKeyStore {
    state: Mutex<State>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn create_or_update_contact_prekey(
        &self,
        prekey: ContactPreKey,
    ) -> Result<(), CryptoError> {
        self.state
            .lock()
            .prekeys
            .entry(prekey.identity_key_string.clone())
            .or_default()
            .insert(prekey.key_id, prekey);
        Ok(())
    }

    async fn get_contact_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<Option<ContactPreKey>, CryptoError> {
        Ok(self
            .state
            .lock()
            .prekeys
            .get(identity_key)
            .and_then(|keys| keys.values().next_back().cloned()))
    }

    async fn remove_contact_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<(), CryptoError> {
        self.state.lock().prekeys.remove(identity_key);
        Ok(())
    }

    async fn remove_all_contact_prekeys(&self) -> Result<(), CryptoError> {
        self.state.lock().prekeys.clear();
        Ok(())
    }

    async fn get_all_contact_prekeys(&self) -> Result<Vec<ContactPreKey>, CryptoError> {
        let mut all: Vec<ContactPreKey> = self
            .state
            .lock()
            .prekeys
            .values()
            .flat_map(|keys| keys.values().cloned())
            .collect();
        all.sort_by_key(|k| k.key_id);
        Ok(all)
    }

    async fn allocate_prekey_id(&self) -> Result<u32, CryptoError> {
        let mut state = self.state.lock();
        let next = state
            .max_prekey_id
            .checked_add(1)
            .ok_or_else(|| CryptoError::StorageError("prekey id space exhausted".into()))?;
        state.max_prekey_id = next;
        Ok(next)
    }

    async fn create_or_update_contact_signed_prekey(
        &self,
        signed_prekey: ContactSignedPreKey,
    ) -> Result<(), CryptoError> {
        self.state
            .lock()
            .signed_prekeys
            .entry(signed_prekey.identity_key_string.clone())
            .or_default()
            .insert(signed_prekey.key_id, signed_prekey);
        Ok(())
    }

    async fn get_contact_signed_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<Option<ContactSignedPreKey>, CryptoError> {
        Ok(self
            .state
            .lock()
            .signed_prekeys
            .get(identity_key)
            .and_then(|keys| {
                keys.values()
                    .max_by_key(|k| (k.created_at, k.key_id))
                    .cloned()
            }))
    }

    async fn get_contact_signed_prekey(
        &self,
        identity_key: &str,
        key_id: u32,
    ) -> Result<Option<ContactSignedPreKey>, CryptoError> {
        Ok(self
            .state
            .lock()
            .signed_prekeys
            .get(identity_key)
            .and_then(|keys| keys.get(&key_id).cloned()))
    }

    async fn remove_contact_signed_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<(), CryptoError> {
        self.state.lock().signed_prekeys.remove(identity_key);
        Ok(())
    }

    async fn remove_all_contact_signed_prekeys_except(
        &self,
        keep_identity_key: &str,
    ) -> Result<(), CryptoError> {
        self.state
            .lock()
            .signed_prekeys
            .retain(|identity, _| identity == keep_identity_key);
        Ok(())
    }

    async fn active_signed_prekey_id(&self) -> Result<Option<u32>, CryptoError> {
        Ok(self.state.lock().active_signed_prekey_id)
    }

    async fn set_active_signed_prekey_id(&self, key_id: u32) -> Result<(), CryptoError> {
        self.state.lock().active_signed_prekey_id = Some(key_id);
        Ok(())
    }

    async fn create_or_update_pairing_authorisation(
        &self,
        authorisation: PairingAuthorisation,
    ) -> Result<(), CryptoError> {
        let key = (
            authorisation.primary_device_pub_key.clone(),
            authorisation.secondary_device_pub_key.clone(),
        );
        self.state.lock().authorisations.insert(key, authorisation);
        Ok(())
    }

    async fn remove_pairing_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<(), CryptoError> {
        self.state
            .lock()
            .authorisations
            .retain(|(_, s), _| s != secondary);
        Ok(())
    }

    async fn get_pairing_authorisation(
        &self,
        primary: &str,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError> {
        Ok(self
            .state
            .lock()
            .authorisations
            .get(&(primary.to_string(), secondary.to_string()))
            .cloned())
    }

    async fn get_grant_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError> {
        Ok(self.state.lock().grant_for_secondary(secondary).cloned())
    }

    async fn get_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError> {
        let state = self.state.lock();
        if let Some(grant) = state.grant_for_secondary(secondary) {
            return Ok(Some(grant.clone()));
        }
        Ok(state
            .authorisations
            .values()
            .filter(|a| a.secondary_device_pub_key == secondary)
            .min_by(|a, b| a.primary_device_pub_key.cmp(&b.primary_device_pub_key))
            .cloned())
    }

    async fn get_grant_authorisations_for_primary(
        &self,
        primary: &str,
    ) -> Result<Vec<PairingAuthorisation>, CryptoError> {
        Ok(self
            .state
            .lock()
            .authorisations
            .values()
            .filter(|a| a.primary_device_pub_key == primary && a.is_granted())
            .cloned()
            .collect())
    }

    async fn get_secondary_devices_for(&self, primary: &str) -> Result<Vec<String>, CryptoError> {
        Ok(self.state.lock().secondaries_of(primary))
    }

    async fn get_primary_device_for(
        &self,
        secondary: &str,
    ) -> Result<Option<String>, CryptoError> {
        Ok(self
            .state
            .lock()
            .grant_for_secondary(secondary)
            .map(|a| a.primary_device_pub_key.clone()))
    }

    async fn get_paired_devices_for(&self, pub_key: &str) -> Result<Vec<String>, CryptoError> {
        let state = self.state.lock();
        let primary = state
            .grant_for_secondary(pub_key)
            .map_or_else(|| pub_key.to_string(), |a| a.primary_device_pub_key.clone());

        let mut devices = state.secondaries_of(&primary);
        devices.push(primary);
        devices.retain(|d| d != pub_key);
        Ok(devices)
    }
}
