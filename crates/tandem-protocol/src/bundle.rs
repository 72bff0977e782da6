//! Prekey bundle issuance and handshake-accept verification.

use std::sync::Arc;

use tandem_crypto::keychain::{
    prekey_key_name, signed_prekey_key_name, VAULT_PREKEYS, VAULT_SIGNED_PREKEYS,
};
use tandem_crypto::prekeys::{generate_prekey, generate_signed_prekey, BUNDLE_DEVICE_ID};
use tandem_crypto::{
    ContactPreKey, ContactSignedPreKey, IdentityProvider, KeyStore, Keychain, PreKeyBundle,
};

use crate::error::ProtocolError;
use crate::messaging::HandshakeAccept;

/// Issues one prekey per contact and checks that handshakes consume it.
pub struct BundleExchange {
    store: Arc<dyn KeyStore>,
    keychain: Arc<dyn Keychain>,
    identity: Arc<dyn IdentityProvider>,
}

impl BundleExchange {
    pub fn new(
        store: Arc<dyn KeyStore>,
        keychain: Arc<dyn Keychain>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            keychain,
            identity,
        }
    }

    /// Bundle to offer `pub_key`.
    ///
    /// The first call for a contact issues a fresh prekey; later calls return
    /// the same one until it is removed.
    pub async fn build_bundle_for_contact(&self, pub_key: &str) -> Result<PreKeyBundle, ProtocolError> {
        let pre_key = match self.store.get_contact_prekey_by_identity_key(pub_key).await? {
            Some(existing) => existing,
            None => self.issue_prekey(pub_key).await?,
        };
        let signed = self.active_signed_prekey().await?;

        Ok(PreKeyBundle {
            identity_key: self.identity.public_key_bytes().to_vec(),
            device_id: BUNDLE_DEVICE_ID,
            pre_key_id: pre_key.key_id,
            pre_key: pre_key.public_key,
            signed_key_id: signed.key_id,
            signed_key: signed.public_key,
            signature: signed.signature,
        })
    }

    /// Check that `pub_key`'s handshake-accept consumed the prekey we issued it.
    pub async fn verify_handshake_accept(&self, pub_key: &str, raw: &[u8]) -> Result<(), ProtocolError> {
        let Some(issued) = self.store.get_contact_prekey_by_identity_key(pub_key).await? else {
            tracing::warn!(pub_key, "handshake accept from contact with no issued prekey");
            return Err(ProtocolError::NotFound(format!("no prekey issued to {pub_key}")));
        };

        let accept = HandshakeAccept::decode(raw).inspect_err(|e| {
            tracing::warn!(pub_key, error = %e, "undecodable handshake accept");
        })?;

        match accept.body.pre_key_id {
            Some(id) if id == issued.key_id => {
                tracing::debug!(pub_key, pre_key_id = id, "handshake accept verified");
                Ok(())
            }
            other => {
                tracing::warn!(
                    pub_key,
                    expected = issued.key_id,
                    received = ?other,
                    "handshake accept names a different prekey"
                );
                Err(ProtocolError::Mismatch(format!(
                    "expected prekey {} from {pub_key}, got {other:?}",
                    issued.key_id
                )))
            }
        }
    }

    /// Replace the active signed prekey with a freshly generated one.
    pub async fn rotate_signed_prekey(&self) -> Result<ContactSignedPreKey, ProtocolError> {
        let key_id = match self.store.active_signed_prekey_id().await? {
            Some(current) => current.checked_add(1).ok_or_else(|| {
                ProtocolError::InvalidState("signed prekey ids exhausted".into())
            })?,
            None => 1,
        };

        let (record, key) = generate_signed_prekey(self.identity.as_ref(), key_id);
        self.keychain
            .store_key(VAULT_SIGNED_PREKEYS, &signed_prekey_key_name(key_id), key.secret.as_slice())?;
        self.store
            .create_or_update_contact_signed_prekey(record.clone())
            .await?;
        self.store.set_active_signed_prekey_id(key_id).await?;

        tracing::info!(key_id, "signed prekey rotated");
        Ok(record)
    }

    /// Forget everything issued to or received from `pub_key`.
    ///
    /// Our own signed prekeys are kept when `pub_key` is our identity.
    pub async fn remove_contact_bundle(&self, pub_key: &str) -> Result<(), ProtocolError> {
        if let Some(issued) = self.store.get_contact_prekey_by_identity_key(pub_key).await? {
            self.keychain
                .delete_key(VAULT_PREKEYS, &prekey_key_name(issued.key_id))?;
        }
        self.store.remove_contact_prekey_by_identity_key(pub_key).await?;
        if pub_key != self.identity.public_key_hex() {
            self.store
                .remove_contact_signed_prekey_by_identity_key(pub_key)
                .await?;
        }
        tracing::debug!(pub_key, "contact bundle removed");
        Ok(())
    }

    /// Drop every issued prekey (record and secret) and every contact's
    /// signed prekey. Our active signed prekey survives, so bundles can still
    /// be built afterwards.
    pub async fn clear_all(&self) -> Result<(), ProtocolError> {
        let issued = self.store.get_all_contact_prekeys().await?;
        for prekey in &issued {
            self.keychain
                .delete_key(VAULT_PREKEYS, &prekey_key_name(prekey.key_id))?;
        }
        self.store.remove_all_contact_prekeys().await?;
        self.store
            .remove_all_contact_signed_prekeys_except(&self.identity.public_key_hex())
            .await?;
        tracing::info!(prekeys = issued.len(), "contact prekeys cleared");
        Ok(())
    }

    async fn issue_prekey(&self, pub_key: &str) -> Result<ContactPreKey, ProtocolError> {
        let key_id = self.store.allocate_prekey_id().await?;
        let (record, key) = generate_prekey(pub_key, key_id);

        // Record first: a secret must never exist without a record naming it.
        self.store.create_or_update_contact_prekey(record.clone()).await?;
        let stored =
            self.keychain
                .store_key(VAULT_PREKEYS, &prekey_key_name(key_id), key.secret.as_slice());
        if let Err(e) = stored {
            tracing::warn!(pub_key, key_id, error = %e, "prekey secret not stored, record dropped");
            self.store.remove_contact_prekey_by_identity_key(pub_key).await?;
            return Err(e.into());
        }

        tracing::debug!(pub_key, key_id, "issued prekey");
        Ok(record)
    }

    async fn active_signed_prekey(&self) -> Result<ContactSignedPreKey, ProtocolError> {
        let key_id = self
            .store
            .active_signed_prekey_id()
            .await?
            .ok_or_else(|| ProtocolError::NotFound("no active signed prekey".into()))?;
        self.store
            .get_contact_signed_prekey(&self.identity.public_key_hex(), key_id)
            .await?
            .ok_or_else(|| ProtocolError::NotFound(format!("signed prekey {key_id} missing")))
    }
}

#[cfg(test)]
mod tests {
    use tandem_crypto::{CryptoError, Identity, MemoryKeyStore, MemoryKeychain};

    use super::*;
    use crate::messaging::PreKeyMessage;

    struct Fixture {
        store: Arc<MemoryKeyStore>,
        keychain: Arc<MemoryKeychain>,
        identity: Arc<Identity>,
        exchange: BundleExchange,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryKeyStore::new());
        let keychain = Arc::new(MemoryKeychain::new());
        let identity = Arc::new(Identity::generate());
        let exchange = BundleExchange::new(store.clone(), keychain.clone(), identity.clone());
        Fixture {
            store,
            keychain,
            identity,
            exchange,
        }
    }

    async fn ready() -> Fixture {
        let f = fixture();
        f.exchange.rotate_signed_prekey().await.unwrap();
        f
    }

    fn accept(pre_key_id: Option<u32>) -> Vec<u8> {
        HandshakeAccept::encode(&PreKeyMessage {
            registration_id: 1,
            pre_key_id,
            signed_pre_key_id: 1,
            base_key: vec![9; 32],
            identity_key: vec![8; 32],
            message: Vec::new(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn bundle_is_stable_per_contact() {
        let f = ready().await;

        let first = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        let again = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        let other = f.exchange.build_bundle_for_contact("bob").await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first.pre_key_id, other.pre_key_id);
        assert_eq!(first.device_id, 1);
        assert_eq!(first.identity_key, f.identity.public_key_bytes().to_vec());
        first.verify_signed_key().unwrap();

        assert!(f
            .keychain
            .key_exists(VAULT_PREKEYS, &prekey_key_name(first.pre_key_id))
            .unwrap());
    }

    #[tokio::test]
    async fn no_signed_prekey_is_not_found() {
        let f = fixture();
        let err = f.exchange.build_bundle_for_contact("alice").await.unwrap_err();
        assert!(matches!(err, ProtocolError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotation_moves_the_bundle_to_the_new_key() {
        let f = ready().await;
        let rotated = f.exchange.rotate_signed_prekey().await.unwrap();
        assert_eq!(rotated.key_id, 2);
        assert!(f
            .keychain
            .key_exists(VAULT_SIGNED_PREKEYS, &signed_prekey_key_name(2))
            .unwrap());

        let bundle = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        assert_eq!(bundle.signed_key_id, 2);
        assert_eq!(bundle.signed_key, rotated.public_key);
        bundle.verify_signed_key().unwrap();
    }

    #[tokio::test]
    async fn handshake_must_name_the_issued_prekey() {
        let f = ready().await;
        f.store
            .create_or_update_contact_prekey(ContactPreKey {
                identity_key_string: "alice".into(),
                key_id: 42,
                public_key: vec![1; 32],
            })
            .await
            .unwrap();

        f.exchange
            .verify_handshake_accept("alice", &accept(Some(42)))
            .await
            .unwrap();

        let err = f
            .exchange
            .verify_handshake_accept("alice", &accept(Some(7)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch(_)));

        let err = f
            .exchange
            .verify_handshake_accept("alice", &accept(None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch(_)));
    }

    #[tokio::test]
    async fn handshake_failures_are_classified() {
        let f = ready().await;
        let err = f
            .exchange
            .verify_handshake_accept("stranger", &accept(Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NotFound(_)));

        f.exchange.build_bundle_for_contact("alice").await.unwrap();
        let err = f
            .exchange
            .verify_handshake_accept("alice", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[tokio::test]
    async fn removing_a_contact_issues_a_new_prekey_next_time() {
        let f = ready().await;
        let before = f.exchange.build_bundle_for_contact("alice").await.unwrap();

        f.exchange.remove_contact_bundle("alice").await.unwrap();
        assert!(!f
            .keychain
            .key_exists(VAULT_PREKEYS, &prekey_key_name(before.pre_key_id))
            .unwrap());

        let after = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        assert!(after.pre_key_id > before.pre_key_id);
    }

    #[tokio::test]
    async fn clear_all_drops_prekeys_but_keeps_our_signed_key() {
        let f = ready().await;
        let before = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        f.store
            .create_or_update_contact_signed_prekey(ContactSignedPreKey::new(
                "bob",
                5,
                vec![5; 32],
                vec![5; 64],
            ))
            .await
            .unwrap();

        f.exchange.clear_all().await.unwrap();

        assert!(f
            .store
            .get_contact_prekey_by_identity_key("alice")
            .await
            .unwrap()
            .is_none());
        assert!(!f
            .keychain
            .key_exists(VAULT_PREKEYS, &prekey_key_name(before.pre_key_id))
            .unwrap());
        assert!(f
            .store
            .get_contact_signed_prekey_by_identity_key("bob")
            .await
            .unwrap()
            .is_none());

        let after = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        assert!(after.pre_key_id > before.pre_key_id);
        assert_eq!(after.signed_key_id, before.signed_key_id);
        after.verify_signed_key().unwrap();
    }

    #[tokio::test]
    async fn removing_our_own_bundle_keeps_the_signed_key() {
        let f = ready().await;
        f.exchange
            .remove_contact_bundle(&f.identity.public_key_hex())
            .await
            .unwrap();

        let bundle = f.exchange.build_bundle_for_contact("alice").await.unwrap();
        assert_eq!(bundle.signed_key_id, 1);
    }

    struct RejectingKeychain;

    impl Keychain for RejectingKeychain {
        fn store_key(&self, _vault: &str, _key: &str, _data: &[u8]) -> Result<(), CryptoError> {
            Err(CryptoError::StorageError("vault locked".into()))
        }

        fn load_key(&self, _vault: &str, _key: &str) -> Result<Option<Vec<u8>>, CryptoError> {
            Ok(None)
        }

        fn delete_key(&self, _vault: &str, _key: &str) -> Result<(), CryptoError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_secret_write_leaves_no_prekey_record() {
        let f = ready().await;
        let exchange = BundleExchange::new(f.store.clone(), Arc::new(RejectingKeychain), f.identity.clone());

        let err = exchange.build_bundle_for_contact("alice").await.unwrap_err();
        assert!(matches!(err, ProtocolError::Storage(_)));
        assert!(f
            .store
            .get_contact_prekey_by_identity_key("alice")
            .await
            .unwrap()
            .is_none());
        assert!(f.store.get_all_contact_prekeys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn handshake_without_its_version_byte_is_rejected() {
        let f = ready().await;
        f.store
            .create_or_update_contact_prekey(ContactPreKey {
                identity_key_string: "alice".into(),
                key_id: 42,
                public_key: vec![1; 32],
            })
            .await
            .unwrap();

        // The shifted body either fails to parse or names the wrong prekey.
        let raw = accept(Some(42));
        let err = f
            .exchange
            .verify_handshake_accept("alice", &raw[1..])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));

        let raw = accept(None);
        let err = f
            .exchange
            .verify_handshake_accept("alice", &raw[1..])
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch(_)));
    }
}
