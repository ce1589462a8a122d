//! # Administrator
//!
//! Permissions the members, opens the DKG, derives the global parameters once
//! every member submitted its public parameters, then opens and finalizes
//! randomness rounds forever.
//!
//! Each step reads an [`AdminSnapshot`] of the contract, hands it together with
//! the persisted [`AdminProgress`] to the pure [`decide`] function and runs the
//! single [`AdminAction`] it returns.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use crate::{
    artifacts::{Artifact, ArtifactStore},
    engine::{invoke, CryptoEngine, EngineCommand},
    ledger::Ledger,
    primitives::{
        Address, ArtifactError, ContractPhase, CoordinatorError, CoordinatorResult, GlobalPublicParams,
        RoundStatus,
    },
    progress::{self, AdminProgress},
    round,
    scheduler::Actor,
};

#[derive(Clone, Debug)]
pub struct AdminConfig {
    /// The member addresses to permission
    pub nodes: Vec<Address>,
    pub threshold: u64,
    pub members: u64,
    /// Minimum time between two round initiations
    pub round_interval: Duration,
    /// The first round is not initiated before this instant
    pub round_start: Option<DateTime<Utc>>,
    /// Stop instead of only logging when the derived parameters disagree
    /// with the contract
    pub strict_consistency: bool,
}

/// What the administrator knows about the contract at the start of a step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminSnapshot {
    pub phase: ContractPhase,
    pub now: DateTime<Utc>,
    /// Configured members without a registry entry, only read while unregistered
    pub unpermissioned: Vec<Address>,
    /// The latest round, `None` before the first initiation or outside `Ready`
    pub round: Option<RoundStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminAction {
    PermissionNodes(Vec<Address>),
    StartNidkg,
    DeriveGlobalParams,
    /// Compares the derived keys with the contract's after an interrupted derivation
    CheckConsistency,
    /// Opens the given round, the one after the latest observed
    InitiateRound(u64),
    CombineRound(u64),
    Wait(&'static str),
}

/// Picks the administrator's next action
pub fn decide(config: &AdminConfig, snapshot: &AdminSnapshot, progress: &AdminProgress) -> AdminAction {
    match snapshot.phase {
        ContractPhase::Unregistered if !snapshot.unpermissioned.is_empty() => {
            AdminAction::PermissionNodes(snapshot.unpermissioned.clone())
        }
        ContractPhase::Unregistered => AdminAction::Wait("waiting for members to register"),
        ContractPhase::Registered => AdminAction::StartNidkg,
        ContractPhase::Nidkg => AdminAction::Wait("waiting for members' public parameters"),
        ContractPhase::NidkgComplete => AdminAction::DeriveGlobalParams,
        ContractPhase::Ready => decide_round(config, snapshot, progress),
    }
}

fn decide_round(config: &AdminConfig, snapshot: &AdminSnapshot, progress: &AdminProgress) -> AdminAction {
    if progress.consistency_pending {
        return AdminAction::CheckConsistency;
    }

    let current = snapshot.round.map(|r| r.number).unwrap_or(0);
    if progress.last_initiated_round > current {
        return AdminAction::Wait("contract has not caught up with the last initiation");
    }

    let round = match snapshot.round {
        Some(round) if round.number > 0 => round,
        _ => {
            return match config.round_start {
                Some(start) if snapshot.now < start => AdminAction::Wait("first round not due yet"),
                _ => AdminAction::InitiateRound(current + 1),
            }
        }
    };

    if !round.finalized {
        return if round.submissions >= config.threshold {
            AdminAction::CombineRound(round.number)
        } else {
            AdminAction::Wait("collecting partial evaluations")
        };
    }

    let since_last = progress
        .last_initiated_at
        .map(|at| snapshot.now.signed_duration_since(at).to_std().unwrap_or_default());
    match since_last {
        Some(elapsed) if elapsed < config.round_interval => {
            AdminAction::Wait("round interval not elapsed")
        }
        _ => AdminAction::InitiateRound(round.number + 1),
    }
}

pub struct Admin<L: ?Sized, E> {
    ledger: Arc<L>,
    engine: E,
    store: ArtifactStore,
    config: AdminConfig,
    progress: AdminProgress,
}

impl<L, E> Admin<L, E>
where
    L: Ledger + ?Sized,
    E: CryptoEngine,
{
    pub fn new(ledger: Arc<L>, engine: E, store: ArtifactStore, config: AdminConfig) -> Self {
        let progress = progress::load(&store);
        Self {
            ledger,
            engine,
            store,
            config,
            progress,
        }
    }

    pub fn progress(&self) -> &AdminProgress {
        &self.progress
    }

    /// Refuses to start unless this wallet owns the contract and the local
    /// protocol parameters match the contract's
    pub async fn check_startup(&self) -> CoordinatorResult<()> {
        let owner = self.ledger.owner().await?;
        let me = self.ledger.address();
        if owner != me {
            return Err(CoordinatorError::NotOwner {
                expected: owner,
                actual: me,
            });
        }

        check_parameters(&*self.ledger, self.config.threshold, self.config.members).await?;

        if self.config.nodes.len() as u64 != self.config.members {
            return Err(CoordinatorError::ConfigMismatch {
                what: "node list length",
                local: self.config.nodes.len().to_string(),
                ledger: self.config.members.to_string(),
            });
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> CoordinatorResult<AdminSnapshot> {
        let phase = self.ledger.phase().await?;

        let mut unpermissioned = Vec::new();
        if phase == ContractPhase::Unregistered {
            for node in &self.config.nodes {
                if !self.ledger.node(*node).await?.is_permissioned_for(*node) {
                    unpermissioned.push(*node);
                }
            }
        }

        let mut round = None;
        if phase == ContractPhase::Ready {
            let number = self.ledger.current_round().await?;
            if number > 0 {
                round = Some(RoundStatus {
                    number,
                    submissions: self.ledger.submission_count(number).await?,
                    finalized: self.ledger.round_random(number).await?.is_set(),
                });
            }
        }

        Ok(AdminSnapshot {
            phase,
            now: Utc::now(),
            unpermissioned,
            round,
        })
    }

    pub async fn execute(&mut self, action: AdminAction) -> CoordinatorResult<()> {
        match action {
            AdminAction::PermissionNodes(nodes) => {
                for node in nodes {
                    let receipt = self.ledger.add_permissioned_node(node).await?;
                    info!(%node, tx = %receipt.hash, "permissioned node");
                }
            }
            AdminAction::StartNidkg => {
                let receipt = self.ledger.start_nidkg().await?;
                info!(tx = %receipt.hash, "started NIDKG");
            }
            AdminAction::DeriveGlobalParams => self.derive_global_params().await?,
            AdminAction::CheckConsistency => self.check_pending_consistency().await?,
            AdminAction::InitiateRound(round) => {
                let receipt = self.ledger.initiate_random().await?;
                self.progress.record_initiation(round, Utc::now());
                progress::save(&self.store, &self.progress)?;
                info!(round, tx = %receipt.hash, "initiated round");
            }
            AdminAction::CombineRound(number) => {
                match round::combine(
                    &*self.ledger,
                    &self.engine,
                    &self.store,
                    number,
                    self.config.threshold,
                )
                .await
                {
                    Ok(_) => {
                        if let Err(e) = self.store.archive_round(number) {
                            warn!(round = number, "could not archive round: {}", e);
                        }
                    }
                    Err(CoordinatorError::RoundFinalized(r)) => {
                        info!(round = r, "round was finalized meanwhile");
                    }
                    Err(e) => return Err(e),
                }
            }
            AdminAction::Wait(reason) => debug!(reason, "nothing to do"),
        }
        Ok(())
    }

    async fn derive_global_params(&mut self) -> CoordinatorResult<()> {
        let instances = self.ledger.public_params().await?;
        self.store.publish_json(&Artifact::AllInstances, &instances)?;
        invoke(&self.engine, &self.store, EngineCommand::DkgDerive { member: None }).await?;
        let gpp: GlobalPublicParams = self.store.read_json(&Artifact::GlobalParams)?;

        let receipt = self.ledger.compute_vk(gpp.g2a).await?;
        info!(tx = %receipt.hash, "submitted global public key");
        self.progress.consistency_pending = true;
        progress::save(&self.store, &self.progress)?;

        self.check_consistency(&gpp).await
    }

    async fn check_pending_consistency(&mut self) -> CoordinatorResult<()> {
        let gpp: GlobalPublicParams = match self.store.read_json(&Artifact::GlobalParams) {
            Ok(gpp) => gpp,
            Err(ArtifactError::Missing(path)) => {
                error!(
                    alarm = true,
                    path = %path.display(),
                    "derived global parameters are gone, cannot compare them with the contract"
                );
                self.progress.consistency_pending = false;
                progress::save(&self.store, &self.progress)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        self.check_consistency(&gpp).await
    }

    /// Raises the alarms for `gpp` and clears the pending marker, unless a
    /// strict administrator has to stop on them
    async fn check_consistency(&mut self, gpp: &GlobalPublicParams) -> CoordinatorResult<()> {
        let alarms = self.consistency_alarms(gpp).await?;
        if alarms.is_empty() {
            info!("derived global parameters match the contract");
        } else {
            for alarm in &alarms {
                error!(alarm = true, "{}", alarm);
            }
            if self.config.strict_consistency {
                return Err(CoordinatorError::ConsistencyAlarm(alarms.join("; ")));
            }
        }

        self.progress.consistency_pending = false;
        progress::save(&self.store, &self.progress)?;
        Ok(())
    }

    /// Compares the locally derived parameters with the ones the contract
    /// recorded. Both the key and the verification keys are always checked.
    pub async fn consistency_alarms(&self, gpp: &GlobalPublicParams) -> CoordinatorResult<Vec<String>> {
        let mut alarms = Vec::new();

        let gpk = self.ledger.global_public_key().await?;
        if gpk != gpp.g2a {
            alarms.push("global public key does not match".to_string());
        }

        let vks = self.ledger.verification_keys().await?;
        if vks.len() != gpp.verify_keys.len() {
            alarms.push(format!(
                "verification key list length {} does not match {}",
                vks.len(),
                gpp.verify_keys.len()
            ));
        }
        for (i, (onchain, local)) in vks.iter().zip(&gpp.verify_keys).enumerate() {
            if onchain != local {
                alarms.push(format!("verification key {} does not match", i));
            }
        }

        Ok(alarms)
    }
}

/// Checks the configured threshold and member count against the contract
pub(crate) async fn check_parameters<L: Ledger + ?Sized>(
    ledger: &L,
    threshold: u64,
    members: u64,
) -> CoordinatorResult<()> {
    let onchain = ledger.threshold().await?;
    if onchain != threshold {
        return Err(CoordinatorError::ConfigMismatch {
            what: "threshold",
            local: threshold.to_string(),
            ledger: onchain.to_string(),
        });
    }
    let onchain = ledger.member_count().await?;
    if onchain != members {
        return Err(CoordinatorError::ConfigMismatch {
            what: "member count",
            local: members.to_string(),
            ledger: onchain.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl<L, E> Actor for Admin<L, E>
where
    L: Ledger + ?Sized,
    E: CryptoEngine,
{
    fn name(&self) -> &'static str {
        "admin"
    }

    async fn step(&mut self) -> CoordinatorResult<()> {
        let snapshot = self.snapshot().await?;
        let action = decide(&self.config, &snapshot, &self.progress);
        debug!(phase = %snapshot.phase, ?action, "admin decision");
        self.execute(action).await
    }
}
