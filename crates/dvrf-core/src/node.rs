//! # Member node
//!
//! Registers the member's key, submits its DKG public parameters with their
//! proof, derives its secret share and then contributes one partial
//! evaluation per round.
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    admin::check_parameters,
    artifacts::{Artifact, ArtifactStore},
    engine::{invoke, CryptoEngine, EngineCommand},
    ledger::Ledger,
    primitives::{
        input_to_hex, Address, ArtifactError, ContractPhase, CoordinatorError, CoordinatorResult,
        MemberKeyFile, NodeRecord, PartialEval, Point, Word,
    },
    progress::{self, NodeProgress},
    scheduler::Actor,
};

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Name of the member key file below `members/`
    pub key_file: String,
    pub threshold: u64,
    pub members: u64,
}

/// What the node knows about the contract at the start of a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub phase: ContractPhase,
    pub address: Address,
    pub record: NodeRecord,
    /// index+1 as reported by `getIndexPlus`
    pub index: u64,
    pub last_submitted_round: u64,
    pub current_round: u64,
    /// Submissions to `current_round` so far
    pub submissions: u64,
    /// Whether this member's secret share was derived already
    pub share_present: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeAction {
    Register,
    SubmitPublicParams,
    DeriveShare,
    SubmitPartialEval(u64),
    Wait(&'static str),
}

/// Picks the node's next action. `progress` is expected to be reconciled with
/// the snapshot already.
pub fn decide(config: &NodeConfig, snapshot: &NodeSnapshot, progress: &NodeProgress) -> NodeAction {
    match snapshot.phase {
        ContractPhase::Unregistered => {
            if !snapshot.record.is_permissioned_for(snapshot.address) {
                NodeAction::Wait("not permissioned yet")
            } else if snapshot.record.registered || progress.registered {
                NodeAction::Wait("waiting for the other members to register")
            } else {
                NodeAction::Register
            }
        }
        ContractPhase::Registered => NodeAction::Wait("waiting for the NIDKG to start"),
        ContractPhase::Nidkg => {
            if snapshot.record.pp_submitted || progress.pp_submitted {
                NodeAction::Wait("waiting for the other members' public parameters")
            } else {
                NodeAction::SubmitPublicParams
            }
        }
        ContractPhase::NidkgComplete => NodeAction::Wait("waiting for the verification keys"),
        ContractPhase::Ready => {
            if !snapshot.share_present {
                return NodeAction::DeriveShare;
            }
            let last = snapshot.last_submitted_round.max(progress.last_submitted_round);
            if snapshot.current_round > last && snapshot.submissions < config.threshold {
                NodeAction::SubmitPartialEval(snapshot.current_round)
            } else {
                NodeAction::Wait("no round to contribute to")
            }
        }
    }
}

pub struct Node<L: ?Sized, E> {
    ledger: Arc<L>,
    engine: E,
    store: ArtifactStore,
    config: NodeConfig,
    progress: NodeProgress,
}

impl<L, E> Node<L, E>
where
    L: Ledger + ?Sized,
    E: CryptoEngine,
{
    pub fn new(ledger: Arc<L>, engine: E, store: ArtifactStore, config: NodeConfig) -> Self {
        let progress = progress::load(&store);
        Self {
            ledger,
            engine,
            store,
            config,
            progress,
        }
    }

    pub fn progress(&self) -> &NodeProgress {
        &self.progress
    }

    pub async fn check_startup(&self) -> CoordinatorResult<()> {
        check_parameters(&*self.ledger, self.config.threshold, self.config.members).await
    }

    pub async fn snapshot(&self) -> CoordinatorResult<NodeSnapshot> {
        let address = self.ledger.address();
        let phase = self.ledger.phase().await?;
        let record = self.ledger.node(address).await?;
        let index = self.ledger.index_plus(address).await?;
        let last_submitted_round = self.ledger.last_submitted_round(address).await?;

        let (mut current_round, mut submissions) = (0, 0);
        if phase == ContractPhase::Ready {
            current_round = self.ledger.current_round().await?;
            if current_round > 0 {
                submissions = self.ledger.submission_count(current_round).await?;
            }
        }

        Ok(NodeSnapshot {
            phase,
            address,
            record,
            index,
            last_submitted_round,
            current_round,
            submissions,
            share_present: index > 0 && self.store.exists(&Artifact::Share(index)),
        })
    }

    pub async fn execute(&mut self, snapshot: &NodeSnapshot, action: NodeAction) -> CoordinatorResult<()> {
        match action {
            NodeAction::Register => self.register().await,
            NodeAction::SubmitPublicParams => {
                let index = assigned(snapshot)?;
                self.submit_public_params(index).await
            }
            NodeAction::DeriveShare => {
                let index = assigned(snapshot)?;
                self.derive_share(index).await
            }
            NodeAction::SubmitPartialEval(round) => {
                let index = assigned(snapshot)?;
                self.submit_partial_eval(index, round).await
            }
            NodeAction::Wait(reason) => {
                debug!(reason, "nothing to do");
                Ok(())
            }
        }
    }

    async fn register(&mut self) -> CoordinatorResult<()> {
        let key = Artifact::MemberKey(self.config.key_file.clone());
        if self.store.exists(&key) {
            info!(file = %self.config.key_file, "reusing existing member key");
        } else {
            invoke(
                &self.engine,
                &self.store,
                EngineCommand::Keygen {
                    file: self.config.key_file.clone(),
                },
            )
            .await?;
        }
        let member: MemberKeyFile = self.store.read_json(&key)?;

        let receipt = self.ledger.register_node(member.pk).await?;
        self.progress.registered = true;
        progress::save(&self.store, &self.progress)?;
        info!(tx = %receipt.hash, "registered member key");
        Ok(())
    }

    async fn submit_public_params(&mut self, index: u64) -> CoordinatorResult<()> {
        let public_keys: Vec<Point> = self.ledger.public_keys().await?;
        self.store.publish_json(&Artifact::MemberPublicKeys, &public_keys)?;

        invoke(&self.engine, &self.store, EngineCommand::DkgProve { index }).await?;
        invoke(&self.engine, &self.store, EngineCommand::DkgVerify { index }).await?;

        let proof = self.store.read_bytes(&Artifact::Proof(index))?;
        let instance: Vec<[u8; 32]> = self.store.read_json(&Artifact::Instance(index))?;
        let instance: Vec<Word> = instance.into_iter().map(Word::from_le_bytes).collect();

        let receipt = self.ledger.submit_public_params(instance, proof).await?;
        self.progress.pp_submitted = true;
        progress::save(&self.store, &self.progress)?;
        info!(index, tx = %receipt.hash, "submitted public parameters");
        Ok(())
    }

    async fn derive_share(&mut self, index: u64) -> CoordinatorResult<()> {
        let instances = self.ledger.public_params().await?;
        self.store.publish_json(&Artifact::AllInstances, &instances)?;
        invoke(
            &self.engine,
            &self.store,
            EngineCommand::DkgDerive {
                member: Some((index, self.config.key_file.clone())),
            },
        )
        .await?;
        info!(index, "derived secret share");
        Ok(())
    }

    async fn submit_partial_eval(&mut self, index: u64, round: u64) -> CoordinatorResult<()> {
        let input = input_to_hex(&self.ledger.round_input(round).await?);
        invoke(
            &self.engine,
            &self.store,
            EngineCommand::RandEval {
                index,
                input: input.clone(),
            },
        )
        .await?;
        invoke(&self.engine, &self.store, EngineCommand::RandVerify { index, input }).await?;

        let eval: PartialEval = self.store.read_json(&Artifact::Eval(index))?;
        if eval.index != index {
            return Err(ArtifactError::Malformed {
                path: self.store.path(&Artifact::Eval(index)),
                reason: format!("evaluation carries index {}, expected {}", eval.index, index),
            }
            .into());
        }

        let receipt = self.ledger.submit_partial_eval(eval).await?;
        self.progress.record_submission(round);
        progress::save(&self.store, &self.progress)?;
        info!(index, round, tx = %receipt.hash, "submitted partial evaluation");
        Ok(())
    }
}

fn assigned(snapshot: &NodeSnapshot) -> CoordinatorResult<u64> {
    if snapshot.index == 0 {
        return Err(CoordinatorError::UnassignedIndex(snapshot.address));
    }
    Ok(snapshot.index)
}

#[async_trait]
impl<L, E> Actor for Node<L, E>
where
    L: Ledger + ?Sized,
    E: CryptoEngine,
{
    fn name(&self) -> &'static str {
        "node"
    }

    async fn step(&mut self) -> CoordinatorResult<()> {
        let snapshot = self.snapshot().await?;
        self.progress
            .reconcile(&snapshot.record, snapshot.last_submitted_round);
        let action = decide(&self.config, &snapshot, &self.progress);
        debug!(phase = %snapshot.phase, ?action, "node decision");
        self.execute(&snapshot, action).await
    }
}
