//! Contact and group sync payloads sent to our own other devices.

pub mod frames;

use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationKind, ConversationSnapshot, VerifiedState};
use crate::error::ProtocolError;
use crate::messaging::SyncMessage;

pub use frames::{decode_frames, encode_frames};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verified {
    pub state: VerifiedState,
    pub destination: String,
    /// The contact's identity key; empty if its pubkey is not valid hex.
    pub identity_key: Vec<u8>,
}

/// One framed record of a contacts sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub number: String,
    pub name: Option<String>,
    pub verified: Verified,
    pub nickname: Option<String>,
    pub blocked: bool,
    pub expire_timer: Option<u32>,
}

/// One framed record of a groups sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDetails {
    pub id: String,
    pub name: Option<String>,
    pub members: Vec<String>,
    pub blocked: bool,
    pub expire_timer: Option<u32>,
    pub admins: Vec<String>,
}

impl ContactDetails {
    fn from_snapshot(conversation: &ConversationSnapshot) -> Self {
        Self {
            number: conversation.id.clone(),
            name: conversation.display_name().map(str::to_string),
            verified: Verified {
                state: conversation.verified,
                destination: conversation.id.clone(),
                identity_key: hex::decode(&conversation.id).unwrap_or_default(),
            },
            nickname: conversation.nickname.clone(),
            blocked: conversation.is_blocked,
            expire_timer: conversation.expire_timer,
        }
    }
}

impl GroupDetails {
    fn from_snapshot(conversation: &ConversationSnapshot) -> Self {
        Self {
            id: conversation.id.clone(),
            name: conversation.name.clone(),
            members: conversation.members.clone(),
            blocked: conversation.is_blocked,
            expire_timer: conversation.expire_timer,
            admins: conversation.admins.clone(),
        }
    }
}

/// Contacts to mirror onto our other devices, or `None` if there are none.
///
/// Only private conversations with primary devices count, and our own
/// pubkey is never included.
pub fn create_contact_sync_message(
    conversations: &[ConversationSnapshot],
    our_pub_key: &str,
) -> Result<Option<SyncMessage>, ProtocolError> {
    let records = conversations
        .iter()
        .filter(|c| c.kind == ConversationKind::Private && !c.is_secondary_device)
        .filter(|c| c.id != our_pub_key)
        .map(|c| postcard::to_allocvec(&ContactDetails::from_snapshot(c)))
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Ok(None);
    }
    tracing::debug!(contacts = records.len(), "built contact sync");
    Ok(Some(SyncMessage::Contacts {
        data: encode_frames(&records)?,
    }))
}

/// Closed groups we are still an accepted member of, or `None`.
pub fn create_group_sync_message(
    conversations: &[ConversationSnapshot],
) -> Result<Option<SyncMessage>, ProtocolError> {
    let records = conversations
        .iter()
        .filter(|c| c.kind == ConversationKind::ClosedGroup && !c.has_left && c.is_friend)
        .map(|c| postcard::to_allocvec(&GroupDetails::from_snapshot(c)))
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Ok(None);
    }
    tracing::debug!(groups = records.len(), "built group sync");
    Ok(Some(SyncMessage::Groups {
        data: encode_frames(&records)?,
    }))
}

/// Decode the records of a contacts sync.
pub fn decode_contact_details(data: &[u8]) -> Result<Vec<ContactDetails>, ProtocolError> {
    decode_frames(data)?
        .iter()
        .map(|frame| {
            postcard::from_bytes(frame)
                .map_err(|e| ProtocolError::Decode(format!("contact details: {e}")))
        })
        .collect()
}

/// Decode the records of a groups sync.
pub fn decode_group_details(data: &[u8]) -> Result<Vec<GroupDetails>, ProtocolError> {
    decode_frames(data)?
        .iter()
        .map(|frame| {
            postcard::from_bytes(frame)
                .map_err(|e| ProtocolError::Decode(format!("group details: {e}")))
        })
        .collect()
}
