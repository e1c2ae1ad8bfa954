//! Config Guard
//!
//! A runtime-mutable, encrypted, audited key-value store layered over the
//! static environment configuration (spec §4.9). Generalizes the
//! teacher's `AgencyVault` (`orchestrator/vault.rs`) single-purpose
//! encrypted key storage into a general protected-key store, keeping its
//! AES-256-GCM-with-prepended-nonce file format and SHA-256 key
//! derivation, and adding the chain-logged change discipline and the
//! "frozen view" invariant: the effective in-memory view is an
//! `Arc<HashMap<...>>` swapped wholesale on each committed mutation,
//! never mutated in place.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chain::ChainStore;
use crate::error::{AgencyError, AgencyResult};

const PROTECTED_KEYS: &[&str] = &["gatewayToken", "apiKey", "secretKey", "credentials", "privateKey"];

fn derive_key(passphrase: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(passphrase);
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).expect("encryption under a fixed-size key cannot fail");
    let mut out = nonce_bytes.to_vec();
    out.extend(ciphertext);
    out
}

fn decrypt(key: &[u8; 32], blob: &[u8]) -> AgencyResult<Vec<u8>> {
    if blob.len() < 12 {
        return Err(AgencyError::integrity_failed("ciphertext shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AgencyError::integrity_failed("decryption failed"))
}

struct Entry {
    ciphertext: Vec<u8>,
}

pub struct ConfigGuard {
    key: [u8; 32],
    chain: Arc<ChainStore>,
    /// The frozen effective view: swapped wholesale on each committed
    /// mutation, never mutated in place.
    view: RwLock<Arc<HashMap<String, Entry>>>,
}

impl ConfigGuard {
    pub fn new(passphrase: &[u8], chain: Arc<ChainStore>) -> Self {
        Self {
            key: derive_key(passphrase),
            chain,
            view: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    fn protected_set() -> HashSet<&'static str> {
        PROTECTED_KEYS.iter().copied().collect()
    }

    pub async fn get(&self, key: &str) -> AgencyResult<Option<String>> {
        let view = self.view.read().await.clone();
        let Some(entry) = view.get(key) else {
            return Ok(None);
        };
        let plaintext = decrypt(&self.key, &entry.ciphertext)?;
        Ok(Some(String::from_utf8_lossy(&plaintext).to_string()))
    }

    /// Set `key` to `value`. Protected keys require a non-empty `reason`.
    /// The chain entry must commit before the in-memory view flips; if
    /// the chain write fails, the write rolls back (never applied).
    pub async fn set(&self, key: &str, value: &str, reason: Option<&str>, actor: &str) -> AgencyResult<()> {
        if Self::protected_set().contains(key) && reason.map(str::trim).unwrap_or("").is_empty() {
            return Err(AgencyError::config_refused(format!(
                "key '{key}' is protected and requires a non-empty reason"
            )));
        }

        let old_hash = match self.get(key).await? {
            Some(old) => hex::encode(Sha256::digest(old.as_bytes())),
            None => "absent".to_string(),
        };
        let new_hash = hex::encode(Sha256::digest(value.as_bytes()));

        // Pre-execution log must commit before the value flips.
        self.chain
            .append(serde_json::json!({
                "kind": "config_change",
                "key": key,
                "old_hash": old_hash,
                "new_hash": new_hash,
                "reason": reason,
                "actor": actor,
            }))
            .await
            .map_err(|e| AgencyError::config_refused(format!("pre-execution log failed, write rolled back: {e}")))?;

        let ciphertext = encrypt(&self.key, value.as_bytes());

        let mut guard = self.view.write().await;
        let mut next: HashMap<String, Entry> = (**guard).iter().map(|(k, v)| (k.clone(), Entry { ciphertext: v.ciphertext.clone() })).collect();
        next.insert(key.to_string(), Entry { ciphertext });
        *guard = Arc::new(next);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn guard() -> ConfigGuard {
        let dir = tempdir().unwrap();
        let chain = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
        ConfigGuard::new(b"test-passphrase", chain)
    }

    #[tokio::test]
    async fn protected_key_requires_reason() {
        let guard = guard().await;
        let err = guard.set("apiKey", "secret-value", None, "u1").await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ConfigRefused);
    }

    #[tokio::test]
    async fn roundtrips_encrypted_value() {
        let guard = guard().await;
        guard.set("apiKey", "secret-value", Some("rotating key"), "u1").await.unwrap();
        assert_eq!(guard.get("apiKey").await.unwrap().as_deref(), Some("secret-value"));
    }

    #[tokio::test]
    async fn unprotected_key_needs_no_reason() {
        let guard = guard().await;
        guard.set("displayName", "Nexus", None, "u1").await.unwrap();
        assert_eq!(guard.get("displayName").await.unwrap().as_deref(), Some("Nexus"));
    }
}
