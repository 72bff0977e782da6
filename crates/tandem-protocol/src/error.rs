use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Expected local state is missing (e.g. no prekey was issued to a contact).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// A peer referenced key material other than what we issued.
    #[error("mismatch: {0}")]
    Mismatch(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("directory error: {0}")]
    Directory(String),

    #[error("message send failed: {0}")]
    SendFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    CryptoError(String),
}

impl From<tandem_crypto::CryptoError> for ProtocolError {
    fn from(e: tandem_crypto::CryptoError) -> Self {
        use tandem_crypto::CryptoError;
        match e {
            CryptoError::VerificationError(msg) => Self::InvalidSignature(msg),
            CryptoError::StorageError(msg) => Self::Storage(msg),
            other => Self::CryptoError(other.to_string()),
        }
    }
}

impl From<postcard::Error> for ProtocolError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(format!("postcard: {e}"))
    }
}
