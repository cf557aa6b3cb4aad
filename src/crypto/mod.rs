//! Crypto Module - Ed25519 Identität
//!
//! - Schlüsselpaar beim ersten Start erzeugen und im Datenverzeichnis ablegen
//! - Signaling-Nachrichten signieren

mod keypair;

pub use keypair::{KeyPair, KeyPairError};
