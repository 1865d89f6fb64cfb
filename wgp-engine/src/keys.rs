//! Key custody collaborator.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::debug;

use crate::EngineError;

/// Signs and verifies 32-byte message hashes. Signatures and public keys are
/// hex strings.
#[async_trait]
pub trait KeyCustody: Send + Sync {
    async fn sign(&self, key_ref: &str, message_hash: &[u8; 32]) -> Result<String, EngineError>;

    async fn verify(
        &self,
        public_key: &str,
        message_hash: &[u8; 32],
        signature: &str,
    ) -> Result<bool, EngineError>;

    async fn public_key(&self, key_ref: &str) -> Result<String, EngineError>;
}

/// In-process ed25519 keys.
#[derive(Default)]
pub struct LocalKeyCustody {
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl LocalKeyCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(key_ref: &str, seed: [u8; 32]) -> Self {
        let custody = Self::new();
        custody.insert_seed(key_ref, seed);
        custody
    }

    pub fn insert_seed(&self, key_ref: &str, seed: [u8; 32]) {
        self.insert(key_ref, SigningKey::from_bytes(&seed));
    }

    /// Create a fresh random key under `key_ref` and return its public key.
    pub fn generate(&self, key_ref: &str) -> String {
        let key = SigningKey::generate(&mut OsRng);
        let public = hex::encode(key.verifying_key().to_bytes());
        self.insert(key_ref, key);
        public
    }

    fn insert(&self, key_ref: &str, key: SigningKey) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key_ref.to_string(), key);
        }
    }

    fn key(&self, key_ref: &str) -> Result<SigningKey, EngineError> {
        self.keys
            .read()
            .map_err(|_| EngineError::ProtocolViolation("key store poisoned".into()))?
            .get(key_ref)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("signing key {}", key_ref)))
    }
}

/// Hex-encoded ed25519 public key for a raw seed.
pub fn public_key_for_seed(seed: &[u8; 32]) -> String {
    hex::encode(SigningKey::from_bytes(seed).verifying_key().to_bytes())
}

#[async_trait]
impl KeyCustody for LocalKeyCustody {
    async fn sign(&self, key_ref: &str, message_hash: &[u8; 32]) -> Result<String, EngineError> {
        let key = self.key(key_ref)?;
        Ok(hex::encode(key.sign(message_hash).to_bytes()))
    }

    async fn verify(
        &self,
        public_key: &str,
        message_hash: &[u8; 32],
        signature: &str,
    ) -> Result<bool, EngineError> {
        let Some(public) = decode_fixed::<32>(public_key) else {
            debug!("public key is not 32 hex-encoded bytes");
            return Ok(false);
        };
        let Some(signature) = decode_fixed::<64>(signature) else {
            debug!("signature is not 64 hex-encoded bytes");
            return Ok(false);
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public) else {
            return Ok(false);
        };
        Ok(verifying_key
            .verify(message_hash, &Signature::from_bytes(&signature))
            .is_ok())
    }

    async fn public_key(&self, key_ref: &str) -> Result<String, EngineError> {
        Ok(hex::encode(self.key(key_ref)?.verifying_key().to_bytes()))
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    hex::decode(wgp_common::strip_hex_prefix(s))
        .ok()?
        .try_into()
        .ok()
}
