//! Multi-device pairing: authorisation lifecycle and directory resolution.

pub mod cache;
pub mod ledger;
pub mod resolver;
