//! # dvrf-core
//!
//! Coordination engine for a zkdvrf committee. An on-chain contract records
//! the protocol phase and the round state, an external engine does all of the
//! cryptography, and the coordinators in this crate decide from the observed
//! contract state which single action to take next.
//!
//! The protocol runs a non-interactive DKG (members register, submit their
//! public parameters with a SNARK proof, the administrator derives the global
//! parameters), then repeats threshold randomness rounds: the administrator
//! opens a round, members submit partial evaluations, and once the threshold
//! is reached the administrator combines them into the round's pseudorandom
//! value.

/// Low level primitives and datatypes
pub mod primitives;

/// File handoff area shared with the external engine
mod artifacts;
pub use artifacts::{Artifact, ArtifactStore, SettlePolicy};

/// Client for the external cryptographic engine
mod engine;
pub use engine::{invoke, CryptoEngine, EngineCommand, ProcessEngine};

/// Access to the contract
mod ledger;
pub use ledger::{Ledger, LedgerEvent};

/// Persisted per-actor progress markers
pub mod progress;

/// Combination of a round's partial evaluations
mod round;
pub use round::combine;

mod admin;
pub use admin::{Admin, AdminAction, AdminConfig, AdminSnapshot};

mod node;
pub use node::{Node, NodeAction, NodeConfig, NodeSnapshot};

/// The polling loop
mod scheduler;
pub use scheduler::{Actor, Scheduler};

#[cfg(test)]
mod test_helpers;
