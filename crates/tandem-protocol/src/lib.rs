pub mod bundle;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod messaging;
pub mod pairing;
pub mod sync;

pub use bundle::BundleExchange;
pub use config::PairingConfig;
pub use conversation::{ConversationKind, ConversationRegistry, ConversationSnapshot};
pub use directory::{DeviceMapping, DirectoryClient, HttpDirectoryClient};
pub use error::ProtocolError;
pub use pairing::cache::{Clock, DeviceMappingCache, ManualClock, SystemClock};
pub use pairing::ledger::AuthorisationLedger;
pub use pairing::resolver::PairingResolver;
