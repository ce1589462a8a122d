/// The contract's protocol phases
pub(crate) mod phase;
pub use phase::ContractPhase;

/// Wire and artifact datatypes shared by the ledger, the engine and the coordinators
pub(crate) mod types;
pub use types::*;

mod errors;
pub use errors::{
    ArtifactError, CoordinatorError, CoordinatorResult, EngineError, LedgerError, LedgerResult,
};

/// The smallest threshold the engine accepts for `n` members
pub fn minimum_threshold(n: usize) -> usize {
    (n + 2) / 2
}

/// Valid thresholds are `>= minimum_threshold(n)` and `<= n`
pub fn is_valid_threshold(threshold: usize, n: usize) -> bool {
    n > 0 && threshold >= minimum_threshold(n) && threshold <= n
}
