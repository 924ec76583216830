//! Model-based property tests.
//!
//! Random operation sequences run against [`ModelStorage`] and a real
//! backend. Every step must produce the same result, and the observable
//! state must match after the run.

use proptest::prelude::*;
use whistledrop_harness::{ModelStorage, Operation, check_invariants};
use whistledrop_server::{MemoryStorage, RedbStorage, Storage};

fn operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => any::<u8>().prop_map(|material| Operation::InsertKey { material }),
        4 => Just(Operation::Allocate),
        2 => any::<u8>().prop_map(|key| Operation::Release { key }),
        3 => any::<u8>().prop_map(|key| Operation::Persist { key }),
        2 => any::<u8>().prop_map(|submission| Operation::Purge { submission }),
        1 => any::<u8>().prop_map(|key| Operation::Delete { key }),
        1 => any::<u8>().prop_map(|secs| Operation::AdvanceTime { secs }),
    ]
}

fn run_against<S: Storage>(storage: &S, ops: &[Operation]) -> Result<(), TestCaseError> {
    let mut model = ModelStorage::new();

    for (step, &op) in ops.iter().enumerate() {
        let expected = model.apply(op);
        let actual = op.apply(storage, model.now());
        prop_assert_eq!(&actual, &expected, "step {}: {:?}", step, op);

        if let Err(violations) = check_invariants(storage) {
            return Err(TestCaseError::fail(format!("step {step}: {violations:?}")));
        }
    }

    prop_assert_eq!(storage.pool_status().unwrap(), model.status());

    let states: Vec<_> =
        storage.list_keys().unwrap().into_iter().map(|record| (record.id, record.state)).collect();
    prop_assert_eq!(states, model.key_states());

    let references: Vec<_> =
        storage.list_submissions().unwrap().into_iter().map(|meta| (meta.id, meta.key_id)).collect();
    prop_assert_eq!(references, model.references());

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn memory_storage_matches_model(ops in prop::collection::vec(operation(), 1..60)) {
        run_against(&MemoryStorage::new(), &ops)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn redb_storage_matches_model(ops in prop::collection::vec(operation(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("model.redb")).unwrap();
        run_against(&storage, &ops)?;
    }
}

#[test]
fn arbitrary_operations_decode_from_raw_bytes() {
    use arbitrary::{Arbitrary, Unstructured};

    let raw = [7u8; 64];
    let mut input = Unstructured::new(&raw);
    let mut model = ModelStorage::new();
    let storage = MemoryStorage::new();

    while let Ok(op) = Operation::arbitrary(&mut input) {
        let expected = model.apply(op);
        assert_eq!(op.apply(&storage, model.now()), expected);
        if input.is_empty() {
            break;
        }
    }

    assert!(check_invariants(&storage).is_ok());
}
