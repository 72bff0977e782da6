use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// The local device's signing identity, as seen by the pairing and bundle code.
///
/// Components receive this as a collaborator instead of reaching for a global
/// key pair, so tests can hand in a freshly generated [`Identity`].
pub trait IdentityProvider: Send + Sync {
    /// Ed25519 public key bytes of this device.
    fn public_key_bytes(&self) -> [u8; 32];

    /// Sign `message` with this device's private key.
    fn sign(&self, message: &[u8]) -> Signature;

    /// Lowercase hex of the public key; this is the device's pubkey identifier.
    fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

/// A device's cryptographic identity.
///
/// The Ed25519 public key is the device address: primary and secondary
/// devices are told apart only by the pairing authorisations that bind them.
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore an identity from a 32-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    /// Get the public verifying key.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the secret key bytes (for storage in a [`crate::Keychain`]).
    ///
    /// # Security
    /// Handle with care: this is the private key material.
    pub fn secret_key_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Verify a signature against a public key.
    pub fn verify(
        public_key: &VerifyingKey,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), CryptoError> {
        public_key
            .verify(message, signature)
            .map_err(|e| CryptoError::VerificationError(e.to_string()))
    }

    /// Parse a hex pubkey identifier into a verifying key.
    pub fn verifying_key_from_hex(public_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
        let bytes = decode_public_key(public_key_hex)?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))
    }
}

impl IdentityProvider for Identity {
    fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Decode a hex pubkey identifier into its 32 raw bytes.
pub fn decode_public_key(public_key_hex: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = hex::decode(public_key_hex)
        .map_err(|e| CryptoError::InvalidKey(format!("pubkey is not hex: {e}")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| CryptoError::InvalidKey(format!("pubkey must be 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_sign() {
        let identity = Identity::generate();
        let message = b"hello tandem";

        let signature = identity.sign(message);
        assert!(Identity::verify(&identity.public_key(), message, &signature).is_ok());
    }

    #[test]
    fn roundtrip_secret_bytes() {
        let identity = Identity::generate();
        let bytes = *identity.secret_key_bytes();
        let restored = Identity::from_secret_bytes(&bytes);
        assert_eq!(identity.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn hex_identifier_parses_back_to_same_key() {
        let identity = Identity::generate();
        let parsed = Identity::verifying_key_from_hex(&identity.public_key_hex()).unwrap();
        assert_eq!(parsed, identity.public_key());
    }

    #[test]
    fn short_pubkey_is_rejected() {
        let err = decode_public_key("abcd").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey(_)));
    }
}
