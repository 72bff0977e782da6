//! Handshake-accept payload: `[version(1)] [postcard PreKeyMessage]`.
//!
//! A contact accepts the bundle we offered by replying with a prekey message
//! that names the one-time prekey it consumed.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Version byte written in front of every handshake body: current version in
/// the high nibble, minimum supported in the low nibble.
pub const HANDSHAKE_VERSION: u8 = 0x33;

/// Body of a handshake-accept message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    pub registration_id: u32,
    /// Id of the one-time prekey the sender consumed. Absent when the sender
    /// built its session without one.
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    /// Sender's ephemeral X25519 key.
    pub base_key: Vec<u8>,
    /// Sender's identity key.
    pub identity_key: Vec<u8>,
    /// First ratchet message, opaque here.
    pub message: Vec<u8>,
}

/// A decoded handshake-accept message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAccept {
    pub version: u8,
    pub body: PreKeyMessage,
}

impl HandshakeAccept {
    /// Split off the version byte and decode the body.
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let (&version, body) = raw
            .split_first()
            .ok_or_else(|| ProtocolError::Decode("empty handshake-accept payload".into()))?;
        let body = postcard::from_bytes(body).map_err(|e| {
            ProtocolError::Decode(format!("could not decode prekey message: {e}"))
        })?;
        Ok(Self { version, body })
    }

    pub fn encode(body: &PreKeyMessage) -> Result<Vec<u8>, ProtocolError> {
        let encoded = postcard::to_allocvec(body)?;
        let mut out = Vec::with_capacity(1 + encoded.len());
        out.push(HANDSHAKE_VERSION);
        out.extend_from_slice(&encoded);
        Ok(out)
    }
}
