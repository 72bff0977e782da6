pub mod error;
pub mod identity;
pub mod keychain;
pub mod memory_stores;
pub mod pairing;
pub mod prekeys;
pub mod store;

pub use error::CryptoError;
pub use identity::{Identity, IdentityProvider};
pub use keychain::{Keychain, MemoryKeychain};
pub use memory_stores::MemoryKeyStore;
pub use pairing::{Ed25519Verifier, PairingAuthorisation, PairingRole, PairingState, SignatureVerifier};
pub use prekeys::{ContactPreKey, ContactSignedPreKey, PreKeyBundle};
pub use store::KeyStore;
