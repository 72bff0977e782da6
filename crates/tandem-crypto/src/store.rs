use async_trait::async_trait;

use crate::pairing::PairingAuthorisation;
use crate::prekeys::{ContactPreKey, ContactSignedPreKey};
use crate::CryptoError;

/// Persistence contract for prekeys, signed prekeys, and pairing
/// authorisations.
///
/// Every mutation is a create-or-update or a delete keyed by a stable
/// identifier, so implementations only need per-record atomicity.
#[async_trait]
pub trait KeyStore: Send + Sync {
    // ── Contact prekeys ────────────────────────────────────────────────

    /// Insert or replace the prekey for `(identity_key_string, key_id)`.
    async fn create_or_update_contact_prekey(&self, prekey: ContactPreKey)
        -> Result<(), CryptoError>;

    /// The prekey issued to `identity_key`, if any.
    async fn get_contact_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<Option<ContactPreKey>, CryptoError>;

    async fn remove_contact_prekey_by_identity_key(&self, identity_key: &str)
        -> Result<(), CryptoError>;

    async fn remove_all_contact_prekeys(&self) -> Result<(), CryptoError>;

    /// Every issued prekey, ordered by key id.
    async fn get_all_contact_prekeys(&self) -> Result<Vec<ContactPreKey>, CryptoError>;

    /// Allocate the next prekey id. Ids start at 1 and are never handed out twice.
    async fn allocate_prekey_id(&self) -> Result<u32, CryptoError>;

    // ── Signed prekeys ─────────────────────────────────────────────────

    async fn create_or_update_contact_signed_prekey(
        &self,
        signed_prekey: ContactSignedPreKey,
    ) -> Result<(), CryptoError>;

    /// The most recently created signed prekey for `identity_key`.
    async fn get_contact_signed_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<Option<ContactSignedPreKey>, CryptoError>;

    /// A specific signed prekey.
    async fn get_contact_signed_prekey(
        &self,
        identity_key: &str,
        key_id: u32,
    ) -> Result<Option<ContactSignedPreKey>, CryptoError>;

    async fn remove_contact_signed_prekey_by_identity_key(
        &self,
        identity_key: &str,
    ) -> Result<(), CryptoError>;

    /// Remove the signed prekeys of every identity except `keep_identity_key`.
    async fn remove_all_contact_signed_prekeys_except(
        &self,
        keep_identity_key: &str,
    ) -> Result<(), CryptoError>;

    /// Id of the signed prekey currently offered in bundles.
    async fn active_signed_prekey_id(&self) -> Result<Option<u32>, CryptoError>;

    async fn set_active_signed_prekey_id(&self, key_id: u32) -> Result<(), CryptoError>;

    // ── Pairing authorisations ─────────────────────────────────────────

    /// Insert or replace the record for its `(primary, secondary)` pair.
    async fn create_or_update_pairing_authorisation(
        &self,
        authorisation: PairingAuthorisation,
    ) -> Result<(), CryptoError>;

    /// Remove every record naming `secondary` as the secondary device.
    async fn remove_pairing_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<(), CryptoError>;

    /// The finalized record for `secondary`, if any. If several exist the one
    /// with the lowest primary pubkey wins.
    async fn get_grant_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError>;

    /// The record for exactly this `(primary, secondary)` pair.
    async fn get_pairing_authorisation(
        &self,
        primary: &str,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError>;

    /// The record for `secondary`, preferring a finalized one over a pending
    /// one. Ties go to the lowest primary pubkey.
    async fn get_authorisation_for_secondary(
        &self,
        secondary: &str,
    ) -> Result<Option<PairingAuthorisation>, CryptoError>;

    /// Finalized records naming `primary`.
    async fn get_grant_authorisations_for_primary(
        &self,
        primary: &str,
    ) -> Result<Vec<PairingAuthorisation>, CryptoError>;

    /// Secondary devices with a finalized pairing to `primary`.
    async fn get_secondary_devices_for(&self, primary: &str) -> Result<Vec<String>, CryptoError>;

    /// Primary device of `secondary`, from its finalized record.
    async fn get_primary_device_for(&self, secondary: &str)
        -> Result<Option<String>, CryptoError>;

    /// Every device paired with `pub_key` (excluding it), whether it is the
    /// primary or one of the secondaries.
    async fn get_paired_devices_for(&self, pub_key: &str) -> Result<Vec<String>, CryptoError>;
}
