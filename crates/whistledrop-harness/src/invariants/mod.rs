//! Invariant checking for storage backends.
//!
//! Invariants are properties that must hold after every storage operation,
//! including operations that failed under fault injection. Checks run
//! against a [`StorageSnapshot`] captured from a quiescent backend.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = StorageSnapshot::capture(&storage)?;
//! registry.assert_all(&snapshot, "after chaos run");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    AllocatedAfterImport, ReferencedKeysAllocated, StatusConsistency, UniqueKeyReferences,
    UniquePublicKeys,
};
pub use snapshot::StorageSnapshot;
use whistledrop_server::Storage;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against storage state.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &StorageSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every standard storage invariant.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(UniqueKeyReferences);
        registry.add(ReferencedKeysAllocated);
        registry.add(StatusConsistency);
        registry.add(UniquePublicKeys);
        registry.add(AllocatedAfterImport);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &StorageSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &StorageSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

/// Capture `storage` and run the standard invariants.
///
/// A failed capture is reported as a violation of `snapshot`. Pass the
/// inner backend when checking a `ChaoticStorage`.
pub fn check_invariants<S: Storage>(storage: &S) -> Result<(), Vec<Violation>> {
    let snapshot = StorageSnapshot::capture(storage).map_err(|err| {
        vec![Violation { invariant: "snapshot", message: format!("capture failed: {err}") }]
    })?;

    let result = InvariantRegistry::standard().check_all(&snapshot);
    if let Err(violations) = &result {
        for violation in violations {
            tracing::error!(invariant = violation.invariant, "{}", violation.message);
        }
    }
    result
}
