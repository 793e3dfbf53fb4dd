//! Component E — Secret Partitioning. Deterministic tree walk that splits
//! sensitive leaves out of an argument tree, plus authenticated encryption
//! of the split-out secrets for side storage.
//!
//! Grounded on the original source's `utils/secrets.py`
//! (`redact_sensitive_fields`/`has_sensitive_fields`/
//! `extract_sensitive_fields`/`SecureSecretStore._merge_secrets`): same
//! sensitive-field-name set, same recursion into maps and into maps nested
//! in arrays, same redact/extract/merge trio.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const REDACTED_SENTINEL: &str = "[REDACTED]";

/// The authoritative sensitive-field boundary (spec.md §4.E): case-
/// insensitive substring match against lower-cased keys. Carried verbatim
/// from the original source's `SENSITIVE_FIELD_NAMES`.
const SENSITIVE_FIELD_NAMES: &[&str] = &[
    "password",
    "new_password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "private_key",
    "credentials",
    "auth",
    "authorization",
    "_temp_password",
];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_FIELD_NAMES
        .iter()
        .any(|f| lower == *f || lower.contains(f))
}

/// Walks a nested tree of maps/arrays; every leaf whose key matches the
/// sensitive set is replaced with the `[REDACTED]` sentinel. Arrays of
/// sensitive scalars are out of scope (spec.md §9): there is no field name
/// to match against a bare array element.
pub fn redact(tree: &Value) -> Value {
    match tree {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED_SENTINEL.to_string()));
                } else {
                    out.insert(k.clone(), redact(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(redact).collect()),
        other => other.clone(),
    }
}

pub fn has_sensitive_fields(tree: &Value) -> bool {
    match tree {
        Value::Object(map) => map.iter().any(|(k, v)| is_sensitive_key(k) || has_sensitive_fields(v)),
        Value::Array(arr) => arr.iter().any(has_sensitive_fields),
        _ => false,
    }
}

/// Splits `tree` into `(redacted_tree, secrets_tree)`. `secrets_tree`
/// preserves the original path hierarchy but contains only sensitive
/// leaves, so `merge(redacted, secrets)` reconstructs the original.
pub fn extract(tree: &Value) -> (Value, Value) {
    match tree {
        Value::Object(map) => {
            let mut cleaned = Map::new();
            let mut secrets = Map::new();
            for (k, v) in map {
                if is_sensitive_key(k) {
                    cleaned.insert(k.clone(), Value::String(REDACTED_SENTINEL.to_string()));
                    secrets.insert(k.clone(), v.clone());
                } else {
                    let (nested_clean, nested_secrets) = extract(v);
                    cleaned.insert(k.clone(), nested_clean);
                    if !is_empty_tree(&nested_secrets) {
                        secrets.insert(k.clone(), nested_secrets);
                    }
                }
            }
            (Value::Object(cleaned), Value::Object(secrets))
        }
        Value::Array(arr) => {
            let mut cleaned = Vec::with_capacity(arr.len());
            let mut any_secrets = false;
            let mut secrets = Vec::with_capacity(arr.len());
            for item in arr {
                let (c, s) = extract(item);
                any_secrets |= !is_empty_tree(&s);
                cleaned.push(c);
                secrets.push(s);
            }
            if any_secrets {
                (Value::Array(cleaned), Value::Array(secrets))
            } else {
                (Value::Array(cleaned), Value::Object(Map::new()))
            }
        }
        other => (other.clone(), Value::Object(Map::new())),
    }
}

fn is_empty_tree(v: &Value) -> bool {
    match v {
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty() || a.iter().all(is_empty_tree),
        Value::Null => true,
        _ => false,
    }
}

/// Deep-merges `secrets_tree` into `redacted_tree` in place, replacing
/// `[REDACTED]` sentinels (and any nested maps) with the original values.
pub fn merge(redacted_tree: &mut Value, secrets_tree: &Value) {
    match (redacted_tree, secrets_tree) {
        (Value::Object(target), Value::Object(secrets)) => {
            for (key, value) in secrets {
                match target.get_mut(key) {
                    Some(existing) if value.is_object() && existing.is_object() => {
                        merge(existing, value);
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(secrets)) => {
            for (t, s) in target.iter_mut().zip(secrets.iter()) {
                merge(t, s);
            }
        }
        _ => {}
    }
}

/// AES-256-GCM encryption of a secrets tree with a key derived via SHA-256
/// from operator-supplied material (spec.md §4.E). A missing key degrades
/// to an ephemeral per-process key with a startup warning (handled by the
/// caller in `config`).
pub struct EncryptionKey {
    key_bytes: [u8; 32],
}

impl EncryptionKey {
    pub fn derive(material: &str) -> Self {
        let digest = Sha256::digest(material.as_bytes());
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&digest);
        Self { key_bytes }
    }

    pub fn ephemeral() -> Self {
        let mut key_bytes = [0u8; 32];
        let generated = Aes256Gcm::generate_key(OsRng);
        key_bytes.copy_from_slice(generated.as_slice());
        Self { key_bytes }
    }

    /// Encrypts `value` (serialized to JSON) and returns `nonce || ciphertext`.
    pub fn encrypt(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key_bytes));
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let plaintext = serde_json::to_vec(value)?;
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;
        let mut out = Vec::with_capacity(12 + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, envelope: &[u8]) -> anyhow::Result<Value> {
        if envelope.len() < 12 {
            anyhow::bail!("envelope too short to contain a nonce");
        }
        let (nonce_bytes, ciphertext) = envelope.split_at(12);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key_bytes));
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
