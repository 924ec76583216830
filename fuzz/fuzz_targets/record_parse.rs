//! Fuzz target for untrusted text parsed by the recipient tooling
//!
//! Exported submission records, keystore files and PEM public keys all come
//! from outside the process.
//!
//! # Invariants
//!
//! - Parsing NEVER panics
//! - A record that parses re-serializes to a record that parses identically

#![no_main]

use libfuzzer_sys::fuzz_target;
use whistledrop_core::{Keystore, Submission};
use whistledrop_crypto::RecipientPublicKey;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(record) = serde_json::from_str::<Submission>(text) {
        let json = serde_json::to_string(&record).expect("record serializes");
        let reparsed: Submission = serde_json::from_str(&json).expect("record reparses");
        assert_eq!(reparsed, record);
    }

    let _ = Keystore::from_json(text);
    let _ = RecipientPublicKey::from_pem(text);
    let _ = RecipientPublicKey::from_der(data);
});
