//! Keeps local pairing state in step with the directory's device mappings.
//!
//! Resolution is a fixed two-step composition, never a recursive call:
//!
//! 1. fetch the mapping for the pubkey itself;
//! 2. if that mapping says the pubkey is a secondary device, fetch its
//!    primary's mapping once and use that instead.
//!
//! Two devices that both claim to be the other's secondary therefore cost
//! exactly [`MAX_MAPPING_FETCHES`] directory round-trips.

use std::sync::Arc;

use futures::future::try_join_all;
use tandem_crypto::{KeyStore, PairingAuthorisation};

use crate::conversation::ConversationRegistry;
use crate::directory::{DeviceMapping, DirectoryClient};
use crate::error::ProtocolError;
use crate::pairing::cache::DeviceMappingCache;
use crate::pairing::ledger::AuthorisationLedger;

/// Upper bound on directory fetches performed by one resolve.
pub const MAX_MAPPING_FETCHES: usize = 2;

pub struct PairingResolver {
    ledger: Arc<AuthorisationLedger>,
    store: Arc<dyn KeyStore>,
    /// `None` while no directory is reachable, e.g. during initial pairing.
    directory: Option<Arc<dyn DirectoryClient>>,
    conversations: Arc<dyn ConversationRegistry>,
    cache: DeviceMappingCache,
}

impl PairingResolver {
    pub fn new(
        ledger: Arc<AuthorisationLedger>,
        store: Arc<dyn KeyStore>,
        directory: Option<Arc<dyn DirectoryClient>>,
        conversations: Arc<dyn ConversationRegistry>,
        cache: DeviceMappingCache,
    ) -> Self {
        Self {
            ledger,
            store,
            directory,
            conversations,
            cache,
        }
    }

    /// Refresh local authorisations for `pub_key` unless that happened within
    /// the cache TTL.
    ///
    /// Directory failures degrade to "no authorisations". Concurrent calls for
    /// the same pubkey may each fetch; the upserts are idempotent.
    pub async fn resolve(&self, pub_key: &str) -> Result<(), ProtocolError> {
        if self.cache.is_fresh(pub_key) {
            tracing::trace!(pub_key, "device mapping cache hit");
            return Ok(());
        }

        let authorisations = self.fetch_authorisations(pub_key).await;
        try_join_all(authorisations.into_iter().map(|a| self.save_authorisation(a))).await?;

        self.cache.refresh(pub_key);
        Ok(())
    }

    /// Drop the cache entry so the next query refetches.
    pub fn invalidate(&self, pub_key: &str) {
        self.cache.invalidate(pub_key);
    }

    /// Finalized authorisation naming `secondary`. Never resolved for
    /// unknown or broadcast conversations.
    pub async fn get_grant_authorisation_for(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, ProtocolError> {
        match self.conversations.kind_of(secondary).await {
            Some(kind) if !kind.is_broadcast() => {}
            _ => return Ok(None),
        }
        self.resolve(secondary).await?;
        self.ledger.get_finalized(secondary).await
    }

    /// Finalized or pending authorisation naming `secondary`.
    pub async fn get_authorisation_for(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, ProtocolError> {
        if self.is_broadcast(secondary).await {
            return Ok(None);
        }
        self.resolve(secondary).await?;
        Ok(self.store.get_authorisation_for_secondary(secondary).await?)
    }

    pub async fn get_secondary_devices_for(
        &self,
        primary: &str,
    ) -> Result<Vec<String>, ProtocolError> {
        if self.is_broadcast(primary).await {
            return Ok(Vec::new());
        }
        self.resolve(primary).await?;
        Ok(self.store.get_secondary_devices_for(primary).await?)
    }

    /// Every device of `primary`'s identity, the primary itself last.
    pub async fn get_all_device_pub_keys_for(
        &self,
        primary: &str,
    ) -> Result<Vec<String>, ProtocolError> {
        let mut devices = self.get_secondary_devices_for(primary).await?;
        devices.push(primary.to_string());
        Ok(devices)
    }

    /// Devices paired with `pub_key`, excluding it, whichever role it has.
    pub async fn get_paired_devices_for(&self, pub_key: &str) -> Result<Vec<String>, ProtocolError> {
        if self.is_broadcast(pub_key).await {
            return Ok(Vec::new());
        }
        self.resolve(pub_key).await?;
        Ok(self.store.get_paired_devices_for(pub_key).await?)
    }

    pub async fn get_primary_device_for(
        &self,
        secondary: &str,
    ) -> Result<Option<String>, ProtocolError> {
        if self.is_broadcast(secondary).await {
            return Ok(None);
        }
        self.resolve(secondary).await?;
        Ok(self.store.get_primary_device_for(secondary).await?)
    }

    async fn is_broadcast(&self, pub_key: &str) -> bool {
        self.conversations
            .kind_of(pub_key)
            .await
            .is_some_and(|kind| kind.is_broadcast())
    }

    async fn fetch_authorisations(&self, pub_key: &str) -> Vec<PairingAuthorisation> {
        let Some(directory) = self.directory.as_deref() else {
            return Vec::new();
        };
        let Some(mapping) = fetch_mapping(directory, pub_key).await else {
            return Vec::new();
        };
        if mapping.is_primary {
            return mapping.authorisations;
        }

        let primary = mapping
            .authorisations
            .iter()
            .find(|a| a.secondary_device_pub_key == pub_key && !a.primary_device_pub_key.is_empty())
            .map(|a| a.primary_device_pub_key.clone());

        match primary {
            Some(primary) => fetch_primary_mapping(directory, pub_key, &primary).await,
            None => mapping.authorisations,
        }
    }

    async fn save_authorisation(&self, authorisation: PairingAuthorisation) -> Result<(), ProtocolError> {
        let primary = authorisation.primary_device_pub_key.clone();
        let secondary = authorisation.secondary_device_pub_key.clone();

        match self.ledger.upsert(authorisation).await {
            Ok(()) => {}
            Err(ProtocolError::InvalidSignature(reason)) => {
                tracing::warn!(%primary, %secondary, %reason, "skipping directory authorisation");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.conversations
            .set_secondary_status(&secondary, &primary)
            .await
    }
}

/// First step. Errors degrade to `None`.
async fn fetch_mapping(directory: &dyn DirectoryClient, pub_key: &str) -> Option<DeviceMapping> {
    match directory.get_user_device_mapping(pub_key).await {
        Ok(mapping) => {
            tracing::debug!(pub_key, found = mapping.is_some(), "device mapping fetched");
            mapping
        }
        Err(e) => {
            tracing::warn!(pub_key, error = %e, "device mapping fetch failed");
            None
        }
    }
}

/// Second and final step: the primary's list replaces the secondary's. The
/// primary's own `is_primary` flag is not consulted, so this never hops again.
async fn fetch_primary_mapping(
    directory: &dyn DirectoryClient,
    secondary: &str,
    primary: &str,
) -> Vec<PairingAuthorisation> {
    tracing::debug!(secondary, primary, "following secondary to its primary");
    fetch_mapping(directory, primary)
        .await
        .map(|mapping| mapping.authorisations)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tandem_crypto::pairing::{create_request, sign_grant};
    use tandem_crypto::{Ed25519Verifier, Identity, IdentityProvider, MemoryKeyStore};

    use super::*;
    use crate::conversation::ConversationKind;
    use crate::pairing::cache::ManualClock;

    #[derive(Default)]
    struct FakeDirectory {
        mappings: Mutex<HashMap<String, DeviceMapping>>,
        failing: Mutex<Vec<String>>,
        fetches: AtomicUsize,
    }

    impl FakeDirectory {
        fn insert(&self, pub_key: &str, is_primary: bool, authorisations: Vec<PairingAuthorisation>) {
            self.mappings.lock().insert(
                pub_key.to_string(),
                DeviceMapping {
                    authorisations,
                    is_primary,
                },
            );
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DirectoryClient for FakeDirectory {
        async fn get_user_device_mapping(
            &self,
            pub_key: &str,
        ) -> Result<Option<DeviceMapping>, ProtocolError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().iter().any(|k| k == pub_key) {
                return Err(ProtocolError::Directory("connection reset".into()));
            }
            Ok(self.mappings.lock().get(pub_key).cloned())
        }
    }

    #[derive(Default)]
    struct FakeRegistry {
        kinds: Mutex<HashMap<String, ConversationKind>>,
        secondary_of: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl ConversationRegistry for FakeRegistry {
        async fn kind_of(&self, id: &str) -> Option<ConversationKind> {
            self.kinds.lock().get(id).copied()
        }

        async fn set_secondary_status(
            &self,
            pub_key: &str,
            primary: &str,
        ) -> Result<(), ProtocolError> {
            self.kinds
                .lock()
                .entry(pub_key.to_string())
                .or_insert(ConversationKind::Private);
            self.secondary_of
                .lock()
                .insert(pub_key.to_string(), primary.to_string());
            Ok(())
        }
    }

    struct Fixture {
        directory: Arc<FakeDirectory>,
        registry: Arc<FakeRegistry>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryKeyStore>,
        resolver: PairingResolver,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(FakeDirectory::default());
        let registry = Arc::new(FakeRegistry::default());
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryKeyStore::new());
        let ledger = Arc::new(AuthorisationLedger::new(
            store.clone(),
            Arc::new(Ed25519Verifier),
            Arc::new(Identity::generate()),
        ));
        let resolver = PairingResolver::new(
            ledger,
            store.clone(),
            Some(directory.clone()),
            registry.clone(),
            DeviceMappingCache::new(Duration::from_secs(60), clock.clone()),
        );
        Fixture {
            directory,
            registry,
            clock,
            store,
            resolver,
        }
    }

    fn granted(primary: &Identity, secondary: &Identity) -> PairingAuthorisation {
        let mut auth = create_request(secondary, &primary.public_key_hex()).unwrap();
        auth.grant_signature = Some(sign_grant(primary, &auth).unwrap());
        auth
    }

    #[tokio::test]
    async fn fetches_at_most_once_per_ttl_window() {
        let f = fixture();
        f.directory.insert("a", true, Vec::new());

        f.resolver.resolve("a").await.unwrap();
        assert_eq!(f.directory.fetches(), 1);

        f.clock.advance(Duration::from_secs(30));
        f.resolver.resolve("a").await.unwrap();
        assert_eq!(f.directory.fetches(), 1);

        f.clock.advance(Duration::from_secs(31));
        f.resolver.resolve("a").await.unwrap();
        assert_eq!(f.directory.fetches(), 2);
    }

    #[tokio::test]
    async fn unknown_pubkey_is_cached_as_negative() {
        let f = fixture();
        f.resolver.resolve("nobody").await.unwrap();
        f.resolver.resolve("nobody").await.unwrap();
        assert_eq!(f.directory.fetches(), 1);
    }

    #[tokio::test]
    async fn directory_failure_degrades_to_empty() {
        let f = fixture();
        f.directory.failing.lock().push("flaky".into());

        f.resolver.resolve("flaky").await.unwrap();
        assert!(f.resolver.get_secondary_devices_for("flaky").await.unwrap().is_empty());
        assert_eq!(f.directory.fetches(), 1);
    }

    #[tokio::test]
    async fn mutual_secondary_claims_stop_after_two_fetches() {
        let f = fixture();
        let a = Identity::generate();
        let b = Identity::generate();
        let (a_hex, b_hex) = (a.public_key_hex(), b.public_key_hex());

        // A says it is B's secondary, B says it is A's secondary.
        f.directory.insert(&a_hex, false, vec![create_request(&a, &b_hex).unwrap()]);
        f.directory.insert(&b_hex, false, vec![create_request(&b, &a_hex).unwrap()]);

        f.resolver.resolve(&a_hex).await.unwrap();
        assert_eq!(f.directory.fetches(), MAX_MAPPING_FETCHES);

        // B's list replaced A's.
        let stored = f.store.get_authorisation_for_secondary(&b_hex).await.unwrap();
        assert_eq!(stored.map(|s| s.primary_device_pub_key), Some(a_hex));
    }

    #[tokio::test]
    async fn secondary_resolves_through_its_primary() {
        let f = fixture();
        let primary = Identity::generate();
        let s1 = Identity::generate();
        let s2 = Identity::generate();
        let (p_hex, s1_hex, s2_hex) = (
            primary.public_key_hex(),
            s1.public_key_hex(),
            s2.public_key_hex(),
        );

        f.directory.insert(&s1_hex, false, vec![granted(&primary, &s1)]);
        f.directory.insert(
            &p_hex,
            true,
            vec![granted(&primary, &s1), granted(&primary, &s2)],
        );
        f.registry.kinds.lock().insert(s1_hex.clone(), ConversationKind::Private);

        let grant = f.resolver.get_grant_authorisation_for(&s1_hex).await.unwrap();
        assert_eq!(grant.map(|g| g.primary_device_pub_key), Some(p_hex.clone()));
        assert_eq!(f.directory.fetches(), 2);

        // s2 was learned from the primary's mapping.
        assert_eq!(
            f.registry.secondary_of.lock().get(&s2_hex),
            Some(&p_hex)
        );

        let mut expected = vec![s1_hex.clone(), s2_hex.clone()];
        expected.sort();
        expected.push(p_hex.clone());
        assert_eq!(f.resolver.get_all_device_pub_keys_for(&p_hex).await.unwrap(), expected);

        let paired = f.resolver.get_paired_devices_for(&s1_hex).await.unwrap();
        assert_eq!(paired, vec![s2_hex, p_hex.clone()]);
        assert_eq!(
            f.resolver.get_primary_device_for(&s1_hex).await.unwrap(),
            Some(p_hex)
        );
    }

    #[tokio::test]
    async fn forged_directory_entries_are_skipped() {
        let f = fixture();
        let primary = Identity::generate();
        let honest = Identity::generate();
        let victim = Identity::generate();

        let mut forged = granted(&primary, &victim);
        forged.request_signature = vec![0; 64];
        f.directory.insert(
            &primary.public_key_hex(),
            true,
            vec![forged, granted(&primary, &honest)],
        );

        let devices = f
            .resolver
            .get_secondary_devices_for(&primary.public_key_hex())
            .await
            .unwrap();
        assert_eq!(devices, vec![honest.public_key_hex()]);
        assert!(!f
            .registry
            .secondary_of
            .lock()
            .contains_key(&victim.public_key_hex()));
    }

    #[tokio::test]
    async fn resolving_twice_after_expiry_is_idempotent() {
        let f = fixture();
        let primary = Identity::generate();
        let secondary = Identity::generate();
        let p_hex = primary.public_key_hex();
        f.directory.insert(&p_hex, true, vec![granted(&primary, &secondary)]);

        f.resolver.resolve(&p_hex).await.unwrap();
        let first = f.store.get_grant_authorisations_for_primary(&p_hex).await.unwrap();
        f.clock.advance(Duration::from_secs(61));
        f.resolver.resolve(&p_hex).await.unwrap();
        let second = f.store.get_grant_authorisations_for_primary(&p_hex).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.directory.fetches(), 2);
    }

    #[tokio::test]
    async fn broadcast_conversations_are_never_resolved() {
        let f = fixture();
        f.registry
            .kinds
            .lock()
            .insert("channel".into(), ConversationKind::Public);

        assert!(f.resolver.get_grant_authorisation_for("channel").await.unwrap().is_none());
        assert!(f.resolver.get_secondary_devices_for("channel").await.unwrap().is_empty());
        assert!(f.resolver.get_grant_authorisation_for("unknown").await.unwrap().is_none());
        assert_eq!(f.directory.fetches(), 0);
    }

    #[tokio::test]
    async fn without_directory_nothing_is_known() {
        let store = Arc::new(MemoryKeyStore::new());
        let ledger = Arc::new(AuthorisationLedger::new(
            store.clone(),
            Arc::new(Ed25519Verifier),
            Arc::new(Identity::generate()),
        ));
        let resolver = PairingResolver::new(
            ledger,
            store,
            None,
            Arc::new(FakeRegistry::default()),
            DeviceMappingCache::new(Duration::from_secs(60), Arc::new(ManualClock::new())),
        );
        assert!(resolver.get_secondary_devices_for("p").await.unwrap().is_empty());
    }
}
