pub mod content;
pub mod handshake;
pub mod sender;

pub use content::{AddressMessage, Content, DataMessage, PairingAuthorisationMessage, Profile, SyncMessage};
pub use handshake::{HandshakeAccept, PreKeyMessage};
pub use sender::{SendReport, Transport};
