//! Deterministic test support for WhistleDrop.
//!
//! - [`SimEnv`]: seeded RNG and a virtual clock, so key generation,
//!   envelopes and timestamps replay exactly from a seed
//! - [`invariants`]: checks over a [`StorageSnapshot`] that must hold after
//!   every storage operation, whatever faults were injected
//! - [`model`]: a reference implementation of the storage contract for
//!   model-based tests against the real backends

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod model;
pub mod sim_env;

pub use invariants::{
    AllocatedAfterImport, Invariant, InvariantRegistry, InvariantResult, ReferencedKeysAllocated,
    StatusConsistency, StorageSnapshot, UniqueKeyReferences, UniquePublicKeys, Violation,
    check_invariants,
};
pub use model::{ModelStorage, Operation, Outcome};
pub use sim_env::SimEnv;
