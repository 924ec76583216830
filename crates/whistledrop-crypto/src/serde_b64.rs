//! Serde adapter for byte fields carried as base64 text.
//!
//! Use with `#[serde(with = "whistledrop_crypto::serde_b64")]`. Standard
//! alphabet with padding, the encoding JSON transports conventionally use.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serializer, de::Error};

/// Serialize bytes as a base64 string.
pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
}

/// Deserialize bytes from a base64 string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    STANDARD.decode(text.as_bytes()).map_err(D::Error::custom)
}
