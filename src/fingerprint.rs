//! Stable identifiers derived from plugin settings.
//!
//! A [`Fingerprint`] keys both the work and cache directories of a source.
//! It is the SHA-256 of the canonical `key:value,key:value` form of the
//! settings (keys sorted by code point), truncated to 128 bits.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::settings::PluginSettings;

/// Setting injected into a periodic source's settings before hashing.
pub const PERIOD_KEY: &str = "period";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex, 32 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Settings minus the excluded keys.
pub fn hashable_settings(settings: &PluginSettings, excluded: &[String]) -> BTreeMap<String, Value> {
    settings
        .iter()
        .filter(|(k, _)| !excluded.iter().any(|e| e == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Canonical string form hashed by [`fingerprint`].
///
/// `BTreeMap<String, _>` iterates in byte order, which for UTF-8 keys is
/// code point order.
pub fn canonical_string(settings: &BTreeMap<String, Value>) -> String {
    settings
        .iter()
        .map(|(k, v)| format!("{}:{}", k, render_value(v)))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn fingerprint(settings: &BTreeMap<String, Value>) -> Fingerprint {
    let digest = Sha256::digest(canonical_string(settings).as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Fingerprint(bytes)
}

/// Fingerprint of a source's settings, honouring its `no-hash-settings`.
pub fn settings_fingerprint(settings: &PluginSettings, excluded: &[String]) -> Fingerprint {
    fingerprint(&hashable_settings(settings, excluded))
}

/// Fingerprint of one period of a periodic source.
pub fn period_fingerprint(
    settings: &PluginSettings,
    excluded: &[String],
    period_key: &str,
) -> Fingerprint {
    let mut hashable = hashable_settings(settings, excluded);
    hashable.insert(PERIOD_KEY.to_string(), Value::from(period_key));
    fingerprint(&hashable)
}
