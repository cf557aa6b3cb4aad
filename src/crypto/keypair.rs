//! Ed25519 Identität für das Signaling
//!
//! Jede Installation hat ein eigenes Schlüsselpaar. Der Relay kann damit
//! prüfen, dass Offer/Answer/Candidates wirklich vom selben Client stammen.
//!
//! ## Verwendung
//! ```rust,ignore
//! let keypair = KeyPair::load_or_create(&config.identity_key_path())?;
//! let envelope = keypair.seal(&payload, Utc::now().timestamp_millis())?;
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Failed to read or write key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode private key: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Invalid private key length: expected 32, got {0}")]
    InvalidKeyLength(usize),

    #[error("Failed to serialize signed payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// KEYPAIR STRUCT
// ============================================================================

#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Lädt das Schlüsselpaar von `path` oder erzeugt und speichert ein neues
    pub fn load_or_create(path: &Path) -> Result<Self, KeyPairError> {
        if path.exists() {
            tracing::info!("Loading identity key from {:?}", path);
            Self::load_from_file(path)
        } else {
            tracing::info!("Creating new identity key at {:?}", path);
            let keypair = Self::generate();
            keypair.save_to_file(path)?;
            Ok(keypair)
        }
    }

    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut csprng),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, KeyPairError> {
        let encoded = fs::read_to_string(path)?;
        let bytes = BASE64.decode(encoded.trim())?;

        let key_bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyPairError::InvalidKeyLength(bytes.len()))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    fn save_to_file(&self, path: &Path) -> Result<(), KeyPairError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, BASE64.encode(self.signing_key.to_bytes()))?;

        // Nur der Besitzer darf den Key lesen
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signiert ein JSON-Objekt
    ///
    /// Die Signatur läuft über den kompakten JSON-String aller Felder außer
    /// `signature`, mit alphabetisch sortierten Keys (rekursiv).
    pub fn sign_message(&self, payload: &Value) -> Result<String, KeyPairError> {
        let canonical = serde_json::to_string(&canonicalize(payload))?;
        Ok(BASE64.encode(self.sign(canonical.as_bytes()).to_bytes()))
    }

    /// Baut die fertige Nachricht: Payload + `timestamp` + `signature`
    pub fn seal<T: Serialize>(&self, payload: &T, timestamp: i64) -> Result<Value, KeyPairError> {
        let mut message = serde_json::to_value(payload)?;
        if let Some(obj) = message.as_object_mut() {
            obj.insert("timestamp".to_string(), Value::from(timestamp));
        }

        let signature = self.sign_message(&message)?;
        if let Some(obj) = message.as_object_mut() {
            obj.insert("signature".to_string(), Value::String(signature));
        }
        Ok(message)
    }

    /// Prüft eine mit `seal` erzeugte Nachricht gegen einen Public Key
    pub fn verify_sealed(public_key: &VerifyingKey, message: &Value) -> bool {
        let Some(signature) = message.get("signature").and_then(Value::as_str) else {
            return false;
        };
        let Ok(bytes) = BASE64.decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        let Ok(canonical) = serde_json::to_string(&canonicalize(message)) else {
            return false;
        };
        public_key.verify(canonical.as_bytes(), &signature).is_ok()
    }
}

/// Sortiert Objekt-Keys und entfernt `signature`
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().filter(|k| *k != "signature").collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_public_key_is_base64_of_32_bytes() {
        let keypair = KeyPair::generate();
        // 32 bytes = 44 Zeichen Base64
        assert_eq!(keypair.public_key_base64().len(), 44);
    }

    #[test]
    fn test_seal_and_verify() {
        let keypair = KeyPair::generate();
        let payload = json!({
            "type": "offer",
            "roomId": "room-1",
            "fromPeerId": "peer-a",
            "sdp": "v=0"
        });

        let sealed = keypair.seal(&payload, 1_750_000_000_000).unwrap();
        assert_eq!(sealed["timestamp"], 1_750_000_000_000i64);
        assert!(KeyPair::verify_sealed(&keypair.verifying_key(), &sealed));
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keypair = KeyPair::generate();
        let mut sealed = keypair
            .seal(&json!({"type": "hangup", "roomId": "room-1"}), 1)
            .unwrap();
        sealed["roomId"] = json!("room-2");

        assert!(!KeyPair::verify_sealed(&keypair.verifying_key(), &sealed));
    }

    #[test]
    fn test_signature_ignores_key_order() {
        let keypair = KeyPair::generate();
        let a = keypair.sign_message(&json!({"a": 1, "b": {"y": 2, "x": 1}})).unwrap();
        let b = keypair.sign_message(&json!({"b": {"x": 1, "y": 2}, "a": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_or_create_reuses_saved_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.key");

        let first = KeyPair::load_or_create(&path).unwrap();
        let second = KeyPair::load_or_create(&path).unwrap();
        assert_eq!(first.public_key_base64(), second.public_key_base64());
    }

    #[test]
    fn test_load_rejects_short_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.key");
        std::fs::write(&path, BASE64.encode([7u8; 16])).unwrap();

        assert!(matches!(
            KeyPair::load_or_create(&path),
            Err(KeyPairError::InvalidKeyLength(16))
        ));
    }
}
