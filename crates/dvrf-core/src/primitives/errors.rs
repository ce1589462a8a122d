use std::path::PathBuf;
use thiserror::Error;

use super::types::{Address, TxKind, Word};

/// Result type alias which returns `LedgerError`
pub type LedgerResult<A> = Result<A, LedgerError>;

/// Result type alias which returns `CoordinatorError`
pub type CoordinatorResult<A> = Result<A, CoordinatorError>;

#[derive(Debug, Error)]
/// Errors raised while reading from or writing to the contract
pub enum LedgerError {
    /// The RPC endpoint could not be reached or returned an error
    #[error("rpc error: {0}")]
    Rpc(String),

    /// A value returned by the contract could not be interpreted
    #[error("could not decode contract data: {0}")]
    Decode(String),

    /// The transaction was mined but reverted
    #[error("{kind} transaction {hash} reverted")]
    Reverted { kind: TxKind, hash: Word },

    /// The transaction left the mempool without a receipt
    #[error("{kind} transaction {hash} was dropped")]
    Dropped { kind: TxKind, hash: Word },

    /// The receipt did not arrive within the configured wait
    #[error("timed out waiting for {kind} transaction {hash}")]
    Timeout { kind: TxKind, hash: Word },
}

#[derive(Debug, Error)]
/// Errors raised by the external cryptographic engine
pub enum EngineError {
    /// The engine binary could not be started
    #[error("could not spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but did not exit successfully
    #[error("`{command}` failed with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
/// Errors raised by the artifact store
pub enum ArtifactError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("de(serialization) failed for {path}: {source}")]
    Bincode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    /// An expected output was never written
    #[error("artifact {0} is missing")]
    Missing(PathBuf),

    /// An output kept changing or stayed empty after the engine exited
    #[error("artifact {0} did not settle")]
    Unsettled(PathBuf),

    #[error("malformed artifact {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Error)]
/// Errors which may occur while coordinating the protocol
pub enum CoordinatorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The local configuration disagrees with the contract
    #[error("configured {what} is {local} but the contract reports {ledger}")]
    ConfigMismatch {
        what: &'static str,
        local: String,
        ledger: String,
    },

    /// The administrator wallet does not own the contract
    #[error("wallet {actual} is not the contract owner {expected}")]
    NotOwner { expected: Address, actual: Address },

    /// The round already carries its final randomness
    #[error("round {0} is already finalized")]
    RoundFinalized(u64),

    /// Combination was requested with too few evaluations on chain
    #[error("round {round} has {have} evaluations, {need} required")]
    InsufficientEvaluations { round: u64, have: usize, need: usize },

    /// The contract has not assigned this node an index
    #[error("node {0} has no index assigned")]
    UnassignedIndex(Address),

    /// Locally derived parameters disagree with the contract (strict mode)
    #[error("consistency alarm: {0}")]
    ConsistencyAlarm(String),
}

impl CoordinatorError {
    /// Fatal errors stop the polling loop, everything else is retried on the
    /// next iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ConfigMismatch { .. }
                | CoordinatorError::NotOwner { .. }
                | CoordinatorError::ConsistencyAlarm(_)
        )
    }
}
