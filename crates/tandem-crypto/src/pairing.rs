//! Pairing authorisations and the byte layout their signatures cover.
//!
//! A secondary device asks to be linked by signing a *request*; the primary
//! approves by signing a *grant*. Both signatures cover the same canonical
//! message so a signature made for one role or one key pair can never be
//! replayed for another:
//!
//! ```text
//! "tandem/pairing/v1" || role(1) || primary_pk(32) || secondary_pk(32) [|| request_signature(64)]
//! ```
//!
//! The request signature is appended only for grants, which ties a grant to
//! the exact request it approves.

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::identity::{decode_public_key, Identity, IdentityProvider};

/// Domain separator prefixed to every pairing signature message.
pub const PAIRING_DOMAIN: &[u8] = b"tandem/pairing/v1";

/// Which side of the pairing produced a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingRole {
    /// Signed by the secondary device.
    Request = 0x01,
    /// Signed by the primary device.
    Grant = 0x02,
}

/// Lifecycle state of a stored authorisation. Revoked records are deleted,
/// so there is no variant for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Requested,
    Finalized,
}

/// A claim that `secondary_device_pub_key` is a linked device of
/// `primary_device_pub_key`.
///
/// Uniquely identified by the `(primary, secondary)` pair. Serialized as the
/// directory's JSON shape, with signatures hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingAuthorisation {
    pub primary_device_pub_key: String,
    pub secondary_device_pub_key: String,
    #[serde(with = "hex_bytes")]
    pub request_signature: Vec<u8>,
    #[serde(default, with = "hex_bytes_opt")]
    pub grant_signature: Option<Vec<u8>>,
}

impl PairingAuthorisation {
    /// A pending (requested) authorisation.
    pub fn requested(
        primary_device_pub_key: impl Into<String>,
        secondary_device_pub_key: impl Into<String>,
        request_signature: Vec<u8>,
    ) -> Self {
        Self {
            primary_device_pub_key: primary_device_pub_key.into(),
            secondary_device_pub_key: secondary_device_pub_key.into(),
            request_signature,
            grant_signature: None,
        }
    }

    pub fn is_granted(&self) -> bool {
        self.grant_signature.is_some()
    }

    pub fn state(&self) -> PairingState {
        if self.is_granted() {
            PairingState::Finalized
        } else {
            PairingState::Requested
        }
    }

    /// The bytes the secondary device signs.
    pub fn request_message(&self) -> Result<Vec<u8>, CryptoError> {
        pairing_message(
            PairingRole::Request,
            &self.primary_device_pub_key,
            &self.secondary_device_pub_key,
            None,
        )
    }

    /// The bytes the primary device signs.
    pub fn grant_message(&self) -> Result<Vec<u8>, CryptoError> {
        pairing_message(
            PairingRole::Grant,
            &self.primary_device_pub_key,
            &self.secondary_device_pub_key,
            Some(&self.request_signature),
        )
    }
}

/// Build the canonical message for a pairing signature.
pub fn pairing_message(
    role: PairingRole,
    primary_hex: &str,
    secondary_hex: &str,
    request_signature: Option<&[u8]>,
) -> Result<Vec<u8>, CryptoError> {
    let primary = decode_public_key(primary_hex)?;
    let secondary = decode_public_key(secondary_hex)?;

    let mut message = Vec::with_capacity(PAIRING_DOMAIN.len() + 1 + 64 + 64);
    message.extend_from_slice(PAIRING_DOMAIN);
    message.push(role as u8);
    message.extend_from_slice(&primary);
    message.extend_from_slice(&secondary);
    match (role, request_signature) {
        (PairingRole::Grant, Some(sig)) => message.extend_from_slice(sig),
        (PairingRole::Grant, None) => {
            return Err(CryptoError::SigningError(
                "grant message requires the request signature".into(),
            ))
        }
        (PairingRole::Request, _) => {}
    }
    Ok(message)
}

/// Verifies signatures produced by another device's identity key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(
        &self,
        public_key_hex: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError>;
}

/// [`SignatureVerifier`] for Ed25519 device identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        public_key_hex: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let key = Identity::verifying_key_from_hex(public_key_hex)?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| CryptoError::VerificationError(format!("malformed signature: {e}")))?;
        Identity::verify(&key, message, &signature)
    }
}

/// Check the request signature against the secondary device's key.
pub fn verify_request(
    verifier: &dyn SignatureVerifier,
    authorisation: &PairingAuthorisation,
) -> Result<(), CryptoError> {
    let message = authorisation.request_message()?;
    verifier.verify(
        &authorisation.secondary_device_pub_key,
        &message,
        &authorisation.request_signature,
    )
}

/// Check the grant signature against the primary device's key.
pub fn verify_grant(
    verifier: &dyn SignatureVerifier,
    authorisation: &PairingAuthorisation,
) -> Result<(), CryptoError> {
    let grant = authorisation
        .grant_signature
        .as_deref()
        .ok_or_else(|| CryptoError::VerificationError("authorisation has no grant".into()))?;
    let message = authorisation.grant_message()?;
    verifier.verify(&authorisation.primary_device_pub_key, &message, grant)
}

/// Create a pending authorisation asking `primary_hex` to link this device.
pub fn create_request(
    identity: &dyn IdentityProvider,
    primary_hex: &str,
) -> Result<PairingAuthorisation, CryptoError> {
    let secondary_hex = identity.public_key_hex();
    if secondary_hex == primary_hex {
        return Err(CryptoError::SigningError(
            "a device cannot pair with itself".into(),
        ));
    }
    let message = pairing_message(PairingRole::Request, primary_hex, &secondary_hex, None)?;
    let signature = identity.sign(&message);
    tracing::debug!(primary = primary_hex, secondary = %secondary_hex, "pairing request signed");
    Ok(PairingAuthorisation::requested(
        primary_hex,
        secondary_hex,
        signature.to_bytes().to_vec(),
    ))
}

/// Produce the grant signature for `authorisation`. Only its primary may sign.
pub fn sign_grant(
    identity: &dyn IdentityProvider,
    authorisation: &PairingAuthorisation,
) -> Result<Vec<u8>, CryptoError> {
    if identity.public_key_hex() != authorisation.primary_device_pub_key {
        return Err(CryptoError::SigningError(
            "only the primary device can grant a pairing".into(),
        ));
    }
    let message = authorisation.grant_message()?;
    tracing::debug!(
        secondary = %authorisation.secondary_device_pub_key,
        "pairing grant signed"
    );
    Ok(identity.sign(&message).to_bytes().to_vec())
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // serde `with` passes `&Option<T>`
    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .filter(|s| !s.is_empty())
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
