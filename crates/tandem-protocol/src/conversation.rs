//! The slice of the conversation model this crate depends on.

use async_trait::async_trait;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    /// One-to-one conversation with a device pubkey.
    Private,
    ClosedGroup,
    /// Public/broadcast channel. Never has pairing authorisations.
    Public,
    /// Feed-style broadcast source. Treated like `Public`.
    Rss,
}

impl ConversationKind {
    pub fn is_broadcast(self) -> bool {
        matches!(self, Self::Public | Self::Rss)
    }
}

/// Conversation lookups and the one mutation pairing resolution performs.
#[async_trait]
pub trait ConversationRegistry: Send + Sync {
    /// Kind of the conversation with `id`, or `None` if there is none.
    async fn kind_of(&self, id: &str) -> Option<ConversationKind>;

    /// Mark `pub_key`'s private conversation (creating it if missing) as a
    /// secondary device of `primary`.
    async fn set_secondary_status(&self, pub_key: &str, primary: &str)
        -> Result<(), ProtocolError>;
}

/// Verification state of a contact's identity key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VerifiedState {
    #[default]
    Default,
    Verified,
    Unverified,
}

/// Read-only view of one conversation, as fed to the sync builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    /// Contact pubkey (hex) for private conversations, group id otherwise.
    pub id: String,
    pub kind: ConversationKind,
    pub is_secondary_device: bool,
    pub is_blocked: bool,
    /// Friend request accepted (for groups: we are a confirmed member).
    pub is_friend: bool,
    /// We left this group.
    pub has_left: bool,
    /// Display name from the contact's shared profile.
    pub profile_display_name: Option<String>,
    /// Locally known profile name, used when no profile was shared.
    pub profile_name: Option<String>,
    pub nickname: Option<String>,
    pub verified: VerifiedState,
    /// Disappearing-message timer in seconds.
    pub expire_timer: Option<u32>,
    /// Group name.
    pub name: Option<String>,
    pub members: Vec<String>,
    pub admins: Vec<String>,
}

impl ConversationSnapshot {
    /// A private conversation with default flags.
    pub fn private(id: impl Into<String>) -> Self {
        Self::with_kind(id, ConversationKind::Private)
    }

    pub fn with_kind(id: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            is_secondary_device: false,
            is_blocked: false,
            is_friend: false,
            has_left: false,
            profile_display_name: None,
            profile_name: None,
            nickname: None,
            verified: VerifiedState::Default,
            expire_timer: None,
            name: None,
            members: Vec::new(),
            admins: Vec::new(),
        }
    }

    /// Name to advertise: shared profile name first, then local profile name.
    pub fn display_name(&self) -> Option<&str> {
        self.profile_display_name
            .as_deref()
            .or(self.profile_name.as_deref())
    }
}
