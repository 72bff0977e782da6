use serde::{Deserialize, Serialize};
use tandem_crypto::PairingAuthorisation;

use crate::error::ProtocolError;

/// Top-level payload handed to the outbound transport.
///
/// Mirrors a protobuf `Content`: every part is optional and a message usually
/// sets exactly one of them (a pairing grant also carries a profile in
/// `data_message`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub data_message: Option<DataMessage>,
    pub sync_message: Option<SyncMessage>,
    pub pairing_authorisation: Option<PairingAuthorisationMessage>,
    pub address_message: Option<AddressMessage>,
}

impl Content {
    /// Postcard-encode for the transport.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        postcard::from_bytes(data)
            .map_err(|e| ProtocolError::Decode(format!("content parse failed: {e}")))
    }
}

/// A data message. Control signals are expressed through `flags` with no body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub flags: u32,
    pub profile: Option<Profile>,
    pub profile_key: Option<Vec<u8>>,
}

impl DataMessage {
    /// Asks a secondary device to drop its pairing with us.
    pub const FLAG_UNPAIRING_REQUEST: u32 = 128;

    pub fn unpairing_request() -> Self {
        Self {
            flags: Self::FLAG_UNPAIRING_REQUEST,
            ..Self::default()
        }
    }

    pub fn is_unpairing_request(&self) -> bool {
        self.flags & Self::FLAG_UNPAIRING_REQUEST != 0
    }
}

/// Display profile shared with our own secondary devices on grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    /// Remote avatar pointer (URL), never a local path.
    pub avatar: Option<String>,
}

/// Wire form of a [`PairingAuthorisation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingAuthorisationMessage {
    pub primary_device_pub_key: String,
    pub secondary_device_pub_key: String,
    pub request_signature: Vec<u8>,
    pub grant_signature: Option<Vec<u8>>,
}

impl From<&PairingAuthorisation> for PairingAuthorisationMessage {
    fn from(auth: &PairingAuthorisation) -> Self {
        Self {
            primary_device_pub_key: auth.primary_device_pub_key.clone(),
            secondary_device_pub_key: auth.secondary_device_pub_key.clone(),
            request_signature: auth.request_signature.clone(),
            grant_signature: auth.grant_signature.clone(),
        }
    }
}

impl From<PairingAuthorisationMessage> for PairingAuthorisation {
    fn from(msg: PairingAuthorisationMessage) -> Self {
        Self {
            primary_device_pub_key: msg.primary_device_pub_key,
            secondary_device_pub_key: msg.secondary_device_pub_key,
            request_signature: msg.request_signature,
            grant_signature: msg.grant_signature,
        }
    }
}

/// Multi-device sync payload. `data` is a length-prefixed frame sequence
/// (see [`crate::sync::frames`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    Contacts { data: Vec<u8> },
    Groups { data: Vec<u8> },
}

impl SyncMessage {
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Contacts { data } | Self::Groups { data } => data,
        }
    }
}

/// How a peer can be reached directly. An online broadcast carries
/// `HostUnreachable` so the recipient falls back to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressMessage {
    HostReachable { port: u16 },
    HostUnreachable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpairing_request_has_only_the_flag() {
        let msg = DataMessage::unpairing_request();
        assert!(msg.is_unpairing_request());
        assert!(msg.profile.is_none());
        assert!(msg.profile_key.is_none());
        assert!(!DataMessage::default().is_unpairing_request());
    }

    #[test]
    fn content_survives_the_wire() {
        let content = Content {
            pairing_authorisation: Some(PairingAuthorisationMessage {
                primary_device_pub_key: "aa".into(),
                secondary_device_pub_key: "bb".into(),
                request_signature: vec![1, 2, 3],
                grant_signature: None,
            }),
            ..Content::default()
        };
        let decoded = Content::decode(&content.encode().unwrap()).unwrap();
        assert_eq!(decoded, content);
    }

    #[test]
    fn garbage_content_is_a_decode_error() {
        let err = Content::decode(&[0xFF; 3]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
