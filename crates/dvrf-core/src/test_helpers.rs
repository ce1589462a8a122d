use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    artifacts::{Artifact, ArtifactStore, SettlePolicy},
    engine::{CryptoEngine, EngineCommand},
    ledger::{Ledger, LedgerEvent},
    primitives::{
        Address, ContractPhase, EngineError, GlobalPublicParams, LedgerError, LedgerResult,
        NodeRecord, PartialEval, Point, Point2, PseudoRandom, TxKind, TxReceipt, Word,
    },
};

pub fn address(byte: u8) -> Address {
    Address([byte; 20])
}

pub fn temp_store() -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(
        dir.path(),
        SettlePolicy {
            attempts: 2,
            interval: Duration::from_millis(1),
        },
    );
    (dir, store)
}

fn point(a: u64, b: u64) -> Point {
    Point {
        x: Word::from_u64(a),
        y: Word::from_u64(b),
    }
}

/// The global parameters `ScriptedEngine` derives for `members` members
pub fn scripted_gpp(members: u64) -> GlobalPublicParams {
    GlobalPublicParams {
        ga: point(1, 2),
        g2a: Point2 {
            x0: Word::from_u64(11),
            x1: Word::from_u64(12),
            y0: Word::from_u64(13),
            y1: Word::from_u64(14),
        },
        verify_keys: (1..=members).map(|i| point(100 + i, 200 + i)).collect(),
    }
}

/// The contract state shared by every handle of an [`InMemoryLedger`]
#[derive(Debug)]
pub struct ContractState {
    pub owner: Address,
    pub phase: ContractPhase,
    pub members: u64,
    pub threshold: u64,
    pub current_index: u64,
    pub nodes: BTreeMap<Address, NodeRecord>,
    pub public_keys: Vec<Point>,
    pub public_params: BTreeMap<u64, Vec<Word>>,
    pub gpk: Point2,
    /// Verification keys the contract computes in `computeVk`
    pub vks: Vec<Point>,
    /// When set, `computeVk` records this key instead of the submitted one
    pub tampered_gpk: Option<Point2>,
    pub current_round: u64,
    pub inputs: BTreeMap<u64, Vec<u8>>,
    pub evals: BTreeMap<(u64, u64), PartialEval>,
    pub submissions: BTreeMap<u64, u64>,
    pub randoms: BTreeMap<u64, PseudoRandom>,
    pub latest: PseudoRandom,
    pub last_submitted: BTreeMap<Address, u64>,
    pub events: Vec<LedgerEvent>,
    /// Every successful transaction, by sender
    pub txs: Vec<(Address, TxKind)>,
    /// Reads fail while set
    pub rpc_down: bool,
    /// The next transaction of that kind reverts
    pub revert_next: Option<TxKind>,
    /// Reads start failing once a transaction of that kind went through
    pub rpc_down_after: Option<TxKind>,
}

/// An in-memory stand-in for the zkdvrf contract
#[derive(Clone, Debug)]
pub struct InMemoryLedger {
    pub state: Arc<Mutex<ContractState>>,
    sender: Address,
}

impl InMemoryLedger {
    pub fn new(owner: Address, members: u64, threshold: u64) -> Self {
        let state = ContractState {
            owner,
            phase: ContractPhase::Unregistered,
            members,
            threshold,
            current_index: 0,
            nodes: BTreeMap::new(),
            public_keys: vec![],
            public_params: BTreeMap::new(),
            gpk: Point2::default(),
            vks: scripted_gpp(members).verify_keys,
            tampered_gpk: None,
            current_round: 0,
            inputs: BTreeMap::new(),
            evals: BTreeMap::new(),
            submissions: BTreeMap::new(),
            randoms: BTreeMap::new(),
            latest: PseudoRandom::default(),
            last_submitted: BTreeMap::new(),
            events: vec![],
            txs: vec![],
            rpc_down: false,
            revert_next: None,
            rpc_down_after: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            sender: owner,
        }
    }

    /// A handle on the same contract sending from `sender`
    pub fn connect(&self, sender: Address) -> Self {
        Self {
            state: self.state.clone(),
            sender,
        }
    }

    pub fn tx_count(&self, kind: TxKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .txs
            .iter()
            .filter(|(_, k)| *k == kind)
            .count()
    }

    /// Drives the contract to `Ready` with `members` registered members whose
    /// addresses are `address(1)..=address(members)`
    pub fn ready(owner: Address, members: u64, threshold: u64) -> Self {
        let ledger = Self::new(owner, members, threshold);
        {
            let mut state = ledger.state.lock().unwrap();
            for i in 1..=members {
                let addr = address(i as u8);
                state.nodes.insert(
                    addr,
                    NodeRecord {
                        index: i,
                        address: addr,
                        registered: true,
                        pp_submitted: true,
                    },
                );
                state.public_keys.push(point(i, i));
                state.public_params.insert(i, vec![Word::from_u64(i)]);
            }
            state.current_index = members;
            state.gpk = scripted_gpp(members).g2a;
            state.phase = ContractPhase::Ready;
        }
        ledger
    }

    /// Opens the next round as the owner would
    pub fn open_round(&self, input: &[u8]) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.current_round += 1;
        let round = state.current_round;
        state.inputs.insert(round, input.to_vec());
        round
    }

    fn read(&self) -> LedgerResult<std::sync::MutexGuard<'_, ContractState>> {
        let state = self.state.lock().unwrap();
        if state.rpc_down {
            return Err(LedgerError::Rpc("connection refused".into()));
        }
        Ok(state)
    }

    fn transact<F>(&self, kind: TxKind, apply: F) -> LedgerResult<TxReceipt>
    where
        F: FnOnce(&mut ContractState, Address) -> bool,
    {
        let mut state = self.read()?;
        let hash = Word::from_u64(state.txs.len() as u64 + 1);
        if state.revert_next == Some(kind) {
            state.revert_next = None;
            return Err(LedgerError::Reverted { kind, hash });
        }
        if !apply(&mut *state, self.sender) {
            return Err(LedgerError::Reverted { kind, hash });
        }
        let sender = self.sender;
        state.txs.push((sender, kind));
        if state.rpc_down_after == Some(kind) {
            state.rpc_down_after = None;
            state.rpc_down = true;
        }
        Ok(TxReceipt {
            kind,
            hash,
            block: Some(state.txs.len() as u64),
        })
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn address(&self) -> Address {
        self.sender
    }

    async fn phase(&self) -> LedgerResult<ContractPhase> {
        Ok(self.read()?.phase)
    }

    async fn owner(&self) -> LedgerResult<Address> {
        Ok(self.read()?.owner)
    }

    async fn member_count(&self) -> LedgerResult<u64> {
        Ok(self.read()?.members)
    }

    async fn threshold(&self) -> LedgerResult<u64> {
        Ok(self.read()?.threshold)
    }

    async fn current_index(&self) -> LedgerResult<u64> {
        Ok(self.read()?.current_index)
    }

    async fn node(&self, address: Address) -> LedgerResult<NodeRecord> {
        Ok(self.read()?.nodes.get(&address).copied().unwrap_or_default())
    }

    async fn index_plus(&self, address: Address) -> LedgerResult<u64> {
        Ok(self.node(address).await?.index)
    }

    async fn last_submitted_round(&self, address: Address) -> LedgerResult<u64> {
        Ok(self.read()?.last_submitted.get(&address).copied().unwrap_or(0))
    }

    async fn public_keys(&self) -> LedgerResult<Vec<Point>> {
        Ok(self.read()?.public_keys.clone())
    }

    async fn public_params(&self) -> LedgerResult<Vec<Vec<Word>>> {
        Ok(self.read()?.public_params.values().cloned().collect())
    }

    async fn global_public_key(&self) -> LedgerResult<Point2> {
        Ok(self.read()?.gpk)
    }

    async fn verification_keys(&self) -> LedgerResult<Vec<Point>> {
        let state = self.read()?;
        if state.phase == ContractPhase::Ready {
            Ok(state.vks.clone())
        } else {
            Ok(vec![])
        }
    }

    async fn current_round(&self) -> LedgerResult<u64> {
        Ok(self.read()?.current_round)
    }

    async fn round_input(&self, round: u64) -> LedgerResult<Vec<u8>> {
        Ok(self.read()?.inputs.get(&round).cloned().unwrap_or_default())
    }

    async fn submission_count(&self, round: u64) -> LedgerResult<u64> {
        Ok(self.read()?.submissions.get(&round).copied().unwrap_or(0))
    }

    async fn round_eval(&self, round: u64, slot: u64) -> LedgerResult<PartialEval> {
        Ok(self
            .read()?
            .evals
            .get(&(round, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn round_random(&self, round: u64) -> LedgerResult<PseudoRandom> {
        Ok(self.read()?.randoms.get(&round).cloned().unwrap_or_default())
    }

    async fn latest_random(&self) -> LedgerResult<PseudoRandom> {
        Ok(self.read()?.latest.clone())
    }

    async fn add_permissioned_node(&self, node: Address) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::AddPermissionedNode, |state, sender| {
            if sender != state.owner
                || state.phase != ContractPhase::Unregistered
                || state.nodes.contains_key(&node)
            {
                return false;
            }
            state.nodes.insert(
                node,
                NodeRecord {
                    address: node,
                    ..Default::default()
                },
            );
            true
        })
    }

    async fn register_node(&self, public_key: Point) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::RegisterNode, |state, sender| {
            if state.phase != ContractPhase::Unregistered || state.current_index >= state.members {
                return false;
            }
            let next = state.current_index + 1;
            let record = match state.nodes.get_mut(&sender) {
                Some(record) if !record.registered => record,
                _ => return false,
            };
            record.registered = true;
            record.index = next;
            state.current_index = next;
            state.public_keys.push(public_key);
            if state.current_index == state.members {
                state.phase = ContractPhase::Registered;
                let count = state.current_index;
                state.events.push(LedgerEvent::RegistrationCompleted { count });
            }
            true
        })
    }

    async fn start_nidkg(&self) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::StartNidkg, |state, sender| {
            if sender != state.owner || state.phase != ContractPhase::Registered {
                return false;
            }
            state.phase = ContractPhase::Nidkg;
            true
        })
    }

    async fn submit_public_params(&self, instance: Vec<Word>, proof: Vec<u8>) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::SubmitPublicParams, |state, sender| {
            if state.phase != ContractPhase::Nidkg || proof.is_empty() {
                return false;
            }
            let index = match state.nodes.get_mut(&sender) {
                Some(record) if record.registered && !record.pp_submitted => {
                    record.pp_submitted = true;
                    record.index
                }
                _ => return false,
            };
            state.public_params.insert(index, instance);
            if state.public_params.len() as u64 == state.members {
                state.phase = ContractPhase::NidkgComplete;
                let count = state.members;
                state.events.push(LedgerEvent::NidkgCompleted { count });
            }
            true
        })
    }

    async fn compute_vk(&self, global_public_key: Point2) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::ComputeVk, |state, sender| {
            if sender != state.owner || state.phase != ContractPhase::NidkgComplete {
                return false;
            }
            state.gpk = state.tampered_gpk.unwrap_or(global_public_key);
            state.phase = ContractPhase::Ready;
            state.events.push(LedgerEvent::GlobalPublicParamsCreated);
            true
        })
    }

    async fn initiate_random(&self) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::InitiateRandom, |state, sender| {
            if sender != state.owner || state.phase != ContractPhase::Ready {
                return false;
            }
            let current = state.current_round;
            if current > 0 && !state.randoms.get(&current).map_or(false, |r| r.is_set()) {
                return false;
            }
            let round = current + 1;
            state.current_round = round;
            state.inputs.insert(round, Sha256::digest(round.to_be_bytes()).to_vec());
            true
        })
    }

    async fn submit_partial_eval(&self, eval: PartialEval) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::SubmitPartialEval, |state, sender| {
            let round = state.current_round;
            let index = state.nodes.get(&sender).map(|r| r.index).unwrap_or(0);
            let last = state.last_submitted.get(&sender).copied().unwrap_or(0);
            let count = state.submissions.get(&round).copied().unwrap_or(0);
            if state.phase != ContractPhase::Ready
                || round == 0
                || index == 0
                || eval.index != index
                || last >= round
                || count >= state.threshold
            {
                return false;
            }
            state.evals.insert((round, index - 1), eval);
            state.last_submitted.insert(sender, round);
            state.submissions.insert(round, count + 1);
            if count + 1 == state.threshold {
                let input = state.inputs.get(&round).cloned().unwrap_or_default();
                state
                    .events
                    .push(LedgerEvent::RandomThresholdReached { round, input });
            }
            true
        })
    }

    async fn submit_random(&self, random: PseudoRandom) -> LedgerResult<TxReceipt> {
        self.transact(TxKind::SubmitRandom, |state, sender| {
            let round = state.current_round;
            let count = state.submissions.get(&round).copied().unwrap_or(0);
            let finalized = state.randoms.get(&round).map_or(false, |r| r.is_set());
            if sender != state.owner || round == 0 || finalized || count < state.threshold {
                return false;
            }
            state.randoms.insert(round, random.clone());
            state.latest = random;
            let input = state.inputs.get(&round).cloned().unwrap_or_default();
            state.events.push(LedgerEvent::RandomReady { round, input });
            true
        })
    }

    async fn watch_events(&self, sink: mpsc::Sender<LedgerEvent>) -> LedgerResult<()> {
        let events = self.read()?.events.clone();
        for event in events {
            if sink.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// An engine which writes plausible outputs to the artifact store
#[derive(Debug)]
pub struct ScriptedEngine {
    store: ArtifactStore,
    members: u64,
    failing: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(store: ArtifactStore) -> Self {
        Self::with_members(store, 5)
    }

    pub fn with_members(store: ArtifactStore, members: u64) -> Self {
        Self {
            store,
            members,
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(vec![]),
        }
    }

    /// Every command starting with `prefix` exits with an error
    pub fn fail_on(&self, prefix: &str) {
        self.failing.lock().unwrap().insert(prefix.to_string());
    }

    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn write(&self, command: &EngineCommand) -> Result<(), String> {
        let store = &self.store;
        let res = match command {
            EngineCommand::Keygen { file } => store.publish_json(
                &Artifact::MemberKey(file.clone()),
                &serde_json::json!({
                    "sk": "0x2a",
                    "pk": point(file.len() as u64, 7),
                }),
            ),
            EngineCommand::DkgProve { index } => {
                let mut instance = [0u8; 32];
                instance[0] = *index as u8;
                store
                    .publish_bytes(&Artifact::Proof(*index), &[*index as u8; 16])
                    .and_then(|_| store.publish_json(&Artifact::Instance(*index), &vec![instance]))
            }
            EngineCommand::DkgDerive { member } => {
                let instances: Vec<Vec<Word>> = store
                    .read_json(&Artifact::AllInstances)
                    .map_err(|e| e.to_string())?;
                if instances.is_empty() {
                    return Err("no instances".into());
                }
                let res = store.publish_json(&Artifact::GlobalParams, &scripted_gpp(self.members));
                match member {
                    Some((index, _)) => res.and_then(|_| {
                        store.publish_json(&Artifact::Share(*index), &serde_json::json!({"index": index}))
                    }),
                    None => res,
                }
            }
            EngineCommand::RandEval { index, input } => store.publish_json(
                &Artifact::Eval(*index),
                &PartialEval {
                    index: *index,
                    value: point(*index, input.len() as u64),
                    proof: Default::default(),
                },
            ),
            EngineCommand::RandCombine { input } => {
                let evals: Vec<PartialEval> = store
                    .read_json(&Artifact::RoundEvals)
                    .map_err(|e| e.to_string())?;
                let mut hasher = Sha256::new();
                hasher.update(input.as_bytes());
                for eval in &evals {
                    hasher.update(eval.index.to_be_bytes());
                }
                store.publish_json(
                    &Artifact::PseudoRandom,
                    &PseudoRandom {
                        proof: point(evals.len() as u64, 1),
                        value: hasher.finalize().to_vec(),
                    },
                )
            }
            EngineCommand::Configure { .. }
            | EngineCommand::DkgVerify { .. }
            | EngineCommand::RandVerify { .. }
            | EngineCommand::RandVerifyFinal { .. } => return Ok(()),
        };
        res.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CryptoEngine for ScriptedEngine {
    async fn run(&self, command: &EngineCommand) -> Result<(), EngineError> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());

        let fails = self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|prefix| line.starts_with(prefix.as_str()));
        if fails {
            return Err(EngineError::Failed {
                command: line,
                status: "exit status: 1".into(),
                stderr: "scripted failure".into(),
            });
        }

        self.write(command).map_err(|stderr| EngineError::Failed {
            command: line,
            status: "exit status: 2".into(),
            stderr,
        })
    }
}
