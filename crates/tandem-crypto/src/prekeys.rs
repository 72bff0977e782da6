//! `PreKey` records, bundle assembly types, and key generation.
//!
//! One-time prekeys are issued per contact: the first handshake initiation
//! with a contact creates one, and later bundles for the same contact reuse
//! it. Signed prekeys are medium-term keys signed by the identity key.

use ed25519_dalek::Signature;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::identity::{Identity, IdentityProvider};

/// Device id carried in every bundle. Each device has its own identity key,
/// so the Signal-style device id is always 1.
pub const BUNDLE_DEVICE_ID: u32 = 1;

/// A one-time prekey issued for a specific contact identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPreKey {
    /// Hex-encoded contact identity key.
    pub identity_key_string: String,
    pub key_id: u32,
    /// X25519 public key.
    pub public_key: Vec<u8>,
}

/// A signed prekey record.
///
/// The store keeps every record it is given; which one is active is tracked
/// by the signed prekey id counter on the [`crate::KeyStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSignedPreKey {
    pub identity_key_string: String,
    pub key_id: u32,
    pub public_key: Vec<u8>,
    /// Ed25519 signature over `public_key` by the identity key.
    pub signature: Vec<u8>,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
    pub confirmed: bool,
}

impl ContactSignedPreKey {
    /// A new, unconfirmed record stamped with the current time.
    pub fn new(
        identity_key_string: impl Into<String>,
        key_id: u32,
        public_key: Vec<u8>,
        signature: Vec<u8>,
    ) -> Self {
        Self {
            identity_key_string: identity_key_string.into(),
            key_id,
            public_key,
            signature,
            created_at: timestamp_now_millis(),
            confirmed: false,
        }
    }
}

/// The public key material offered to a contact to start a session.
///
/// Built on demand from store contents and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Ed25519 identity public key.
    pub identity_key: Vec<u8>,
    pub device_id: u32,
    pub pre_key_id: u32,
    /// X25519 one-time prekey (public).
    pub pre_key: Vec<u8>,
    pub signed_key_id: u32,
    /// X25519 signed prekey (public).
    pub signed_key: Vec<u8>,
    /// Signature over the signed prekey by the identity key.
    pub signature: Vec<u8>,
}

impl PreKeyBundle {
    /// Check that `signed_key` was signed by `identity_key`.
    pub fn verify_signed_key(&self) -> Result<(), CryptoError> {
        let identity_key = <[u8; 32]>::try_from(self.identity_key.as_slice())
            .map_err(|_| CryptoError::InvalidKey("identity key wrong length".into()))?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&identity_key)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid identity key: {e}")))?;
        let signature = Signature::from_slice(&self.signature)
            .map_err(|e| CryptoError::VerificationError(format!("malformed signature: {e}")))?;
        Identity::verify(&verifying_key, &self.signed_key, &signature)
    }
}

/// Freshly generated X25519 key material. The secret is wiped on drop.
pub struct GeneratedKey {
    pub public_key: [u8; 32],
    pub secret: Zeroizing<[u8; 32]>,
}

impl GeneratedKey {
    fn random() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public_key = X25519Public::from(&secret).to_bytes();
        Self {
            public_key,
            secret: Zeroizing::new(secret.to_bytes()),
        }
    }
}

/// Generate a one-time prekey to issue to `contact_pub_key`.
pub fn generate_prekey(contact_pub_key: &str, key_id: u32) -> (ContactPreKey, GeneratedKey) {
    let key = GeneratedKey::random();
    let record = ContactPreKey {
        identity_key_string: contact_pub_key.to_string(),
        key_id,
        public_key: key.public_key.to_vec(),
    };
    (record, key)
}

/// Generate a signed prekey and sign its public half with `identity`.
pub fn generate_signed_prekey(
    identity: &dyn IdentityProvider,
    key_id: u32,
) -> (ContactSignedPreKey, GeneratedKey) {
    let key = GeneratedKey::random();
    let signature = identity.sign(&key.public_key);
    let record = ContactSignedPreKey::new(
        identity.public_key_hex(),
        key_id,
        key.public_key.to_vec(),
        signature.to_bytes().to_vec(),
    );
    (record, key)
}

/// Current UNIX timestamp in milliseconds.
pub fn timestamp_now_millis() -> u64 {
    u64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis(),
    )
    .unwrap_or(u64::MAX)
}
