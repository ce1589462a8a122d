//! # Ledger
//!
//! The contract is the only source of truth shared by the administrator and
//! the members. Coordinators only talk to it through the [`Ledger`] trait.
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

use crate::primitives::{
    Address, ContractPhase, LedgerResult, NodeRecord, PartialEval, Point, Point2, PseudoRandom,
    TxReceipt, Word,
};

/// Contract events. They only ever wake the polling loop up early, decisions
/// are always taken from a fresh read of the contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    RegistrationCompleted { count: u64 },
    NidkgCompleted { count: u64 },
    GlobalPublicParamsCreated,
    RandomThresholdReached { round: u64, input: Vec<u8> },
    RandomReady { round: u64, input: Vec<u8> },
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerEvent::RegistrationCompleted { count } => {
                write!(f, "RegistrationCompleted({})", count)
            }
            LedgerEvent::NidkgCompleted { count } => write!(f, "NidkgCompleted({})", count),
            LedgerEvent::GlobalPublicParamsCreated => f.write_str("GlobalPublicParamsCreated"),
            LedgerEvent::RandomThresholdReached { round, .. } => {
                write!(f, "RandomThresholdReached({})", round)
            }
            LedgerEvent::RandomReady { round, .. } => write!(f, "RandomReady({})", round),
        }
    }
}

/// Typed access to the zkdvrf contract. Every write resolves only once the
/// transaction reached finality; a revert, a drop or a timeout is returned as
/// a [`LedgerError`](crate::primitives::LedgerError).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// The address transactions are sent from
    fn address(&self) -> Address;

    async fn phase(&self) -> LedgerResult<ContractPhase>;

    async fn owner(&self) -> LedgerResult<Address>;

    async fn member_count(&self) -> LedgerResult<u64>;

    async fn threshold(&self) -> LedgerResult<u64>;

    /// Number of indices handed out so far
    async fn current_index(&self) -> LedgerResult<u64>;

    /// The registry entry for `address`, zeroed if it was never permissioned
    async fn node(&self, address: Address) -> LedgerResult<NodeRecord>;

    /// index+1 of `address`, 0 when unassigned
    async fn index_plus(&self, address: Address) -> LedgerResult<u64>;

    async fn last_submitted_round(&self, address: Address) -> LedgerResult<u64>;

    async fn public_keys(&self) -> LedgerResult<Vec<Point>>;

    /// The circuit instances submitted by every member
    async fn public_params(&self) -> LedgerResult<Vec<Vec<Word>>>;

    async fn global_public_key(&self) -> LedgerResult<Point2>;

    async fn verification_keys(&self) -> LedgerResult<Vec<Point>>;

    /// 0 until the first round is initiated
    async fn current_round(&self) -> LedgerResult<u64>;

    async fn round_input(&self, round: u64) -> LedgerResult<Vec<u8>>;

    async fn submission_count(&self, round: u64) -> LedgerResult<u64>;

    /// The evaluation in slot `slot` of `round`, an empty slot has index 0
    async fn round_eval(&self, round: u64, slot: u64) -> LedgerResult<PartialEval>;

    async fn round_random(&self, round: u64) -> LedgerResult<PseudoRandom>;

    async fn latest_random(&self) -> LedgerResult<PseudoRandom>;

    async fn add_permissioned_node(&self, node: Address) -> LedgerResult<TxReceipt>;

    async fn register_node(&self, public_key: Point) -> LedgerResult<TxReceipt>;

    async fn start_nidkg(&self) -> LedgerResult<TxReceipt>;

    async fn submit_public_params(&self, instance: Vec<Word>, proof: Vec<u8>) -> LedgerResult<TxReceipt>;

    async fn compute_vk(&self, global_public_key: Point2) -> LedgerResult<TxReceipt>;

    async fn initiate_random(&self) -> LedgerResult<TxReceipt>;

    async fn submit_partial_eval(&self, eval: PartialEval) -> LedgerResult<TxReceipt>;

    async fn submit_random(&self, random: PseudoRandom) -> LedgerResult<TxReceipt>;

    /// Forwards contract events into `sink` until the subscription ends or the
    /// receiving side is dropped
    async fn watch_events(&self, sink: mpsc::Sender<LedgerEvent>) -> LedgerResult<()>;
}
