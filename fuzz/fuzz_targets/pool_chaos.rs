//! Fuzz target for storage operations under injected faults
//!
//! Runs an operation sequence through `ChaoticStorage` over the in-memory
//! backend, mirroring every call that got past fault injection into the
//! reference model.
//!
//! # Invariants
//!
//! - Storage NEVER panics on injected faults
//! - An injected fault has no effect on the inner store
//! - Every operation that reaches the inner store agrees with the model
//! - The standard storage invariants hold after every step

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use whistledrop_harness::{ModelStorage, Operation, check_invariants};
use whistledrop_server::{ChaoticStorage, MemoryStorage, StorageError};

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    operations: Vec<Operation>,
}

fuzz_target!(|scenario: Scenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let inner = MemoryStorage::new();
    let storage = ChaoticStorage::with_seed(inner.clone(), failure_rate, scenario.chaos_seed);
    let mut model = ModelStorage::new();

    for op in scenario.operations {
        let failures_before = storage.failure_count();
        let mut shadow = model.clone();
        let expected = shadow.apply(op);
        let actual = op.apply(&storage, shadow.now());

        if storage.failure_count() > failures_before {
            assert!(matches!(actual, Err(StorageError::Io(_))));
        } else {
            assert_eq!(actual, expected, "{op:?}");
            model = shadow;
        }

        if let Err(violations) = check_invariants(&inner) {
            panic!("{violations:?}");
        }
    }
});
