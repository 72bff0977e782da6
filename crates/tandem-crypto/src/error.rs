use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// A pairing message could not be signed (wrong role, self-pairing).
    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("verification failed: {0}")]
    VerificationError(String),

    /// Malformed pubkey identifier or key bytes.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Raised by [`crate::KeyStore`] and [`crate::Keychain`] backends.
    #[error("key storage error: {0}")]
    StorageError(String),
}
