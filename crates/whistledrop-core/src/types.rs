//! Identifiers and wire types.
//!
//! JSON field names are camelCase; byte fields are base64.

use std::{fmt, num::ParseIntError, str::FromStr};

use serde::{Deserialize, Serialize};
use whistledrop_crypto::Envelope;

/// Identifier of a recipient key record.
///
/// Assigned sequentially from 1 by storage and never reused while the record
/// exists. Rendered as a plain decimal, which is also the keystore map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(u64);

impl KeyId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for KeyId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Identifier of a stored submission. Sequential from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(u64);

impl SubmissionId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for SubmissionId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// A stored submission, as handed to the recipient.
///
/// Immutable once persisted. `key_id` names the single key record whose
/// public half wrapped `wrapped_key`; no other submission references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Submission identifier
    pub id: SubmissionId,
    /// Original filename (final path component only)
    pub filename: String,
    /// Encrypted file contents
    pub envelope: Envelope,
    /// Symmetric key wrapped under the recipient's public key
    #[serde(with = "whistledrop_crypto::serde_b64")]
    pub wrapped_key: Vec<u8>,
    /// Key record used for wrapping
    pub key_id: KeyId,
    /// Creation time, Unix seconds
    pub created_at: u64,
}

impl Submission {
    /// Listing view without ciphertext.
    pub fn metadata(&self) -> SubmissionMetadata {
        SubmissionMetadata {
            id: self.id,
            filename: self.filename.clone(),
            key_id: self.key_id,
            created_at: self.created_at,
        }
    }
}

/// Submission listing entry. Carries no ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMetadata {
    /// Submission identifier
    pub id: SubmissionId,
    /// Original filename
    pub filename: String,
    /// Key record used for wrapping
    pub key_id: KeyId,
    /// Creation time, Unix seconds
    pub created_at: u64,
}

/// Key pool counters for operators.
///
/// `total_keys == available_keys + used_keys` for any snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    /// All key records
    pub total_keys: u64,
    /// Keys that can still be allocated
    pub available_keys: u64,
    /// Keys in the Allocated state
    pub used_keys: u64,
}

impl PoolStatus {
    /// True when no key can be allocated; uploads will be rejected.
    pub fn is_exhausted(&self) -> bool {
        self.available_keys == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Submission {
        Submission {
            id: SubmissionId::new(3),
            filename: "memo.pdf".to_string(),
            envelope: Envelope { iv: vec![1; 16], ciphertext: vec![2; 48] },
            wrapped_key: vec![3; 128],
            key_id: KeyId::new(7),
            created_at: 1_700_000_123,
        }
    }

    #[test]
    fn submission_json_uses_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["id"], 3);
        assert_eq!(json["keyId"], 7);
        assert_eq!(json["createdAt"], 1_700_000_123u64);
        assert!(json["wrappedKey"].is_string());
        assert!(json["envelope"]["iv"].is_string());
        assert!(json["envelope"]["ciphertext"].is_string());
    }

    #[test]
    fn submission_json_roundtrip() {
        let submission = sample();
        let text = serde_json::to_string(&submission).unwrap();
        let back: Submission = serde_json::from_str(&text).unwrap();
        assert_eq!(back, submission);
    }

    #[test]
    fn metadata_drops_ciphertext() {
        let json = serde_json::to_value(sample().metadata()).unwrap();
        let object = json.as_object().unwrap();

        let mut fields: Vec<_> = object.keys().map(String::as_str).collect();
        fields.sort_unstable();
        assert_eq!(fields, ["createdAt", "filename", "id", "keyId"]);
    }

    #[test]
    fn pool_status_shape() {
        let status = PoolStatus { total_keys: 10, available_keys: 0, used_keys: 10 };
        let json = serde_json::to_value(status).unwrap();

        assert_eq!(json["totalKeys"], 10);
        assert_eq!(json["availableKeys"], 0);
        assert_eq!(json["usedKeys"], 10);
        assert!(status.is_exhausted());
    }

    #[test]
    fn ids_parse_from_decimal() {
        assert_eq!("42".parse::<KeyId>().unwrap(), KeyId::new(42));
        assert_eq!(" 9 ".parse::<SubmissionId>().unwrap(), SubmissionId::new(9));
        assert!("k1".parse::<KeyId>().is_err());
        assert_eq!(KeyId::new(5).to_string(), "5");
    }
}
