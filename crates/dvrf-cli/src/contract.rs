//! [`Ledger`] implementation backed by the deployed zkdvrf contract
use async_trait::async_trait;
use ethers::{
    abi::Detokenize,
    contract::ContractCall,
    prelude::{Middleware, H160, U256},
};
use futures::StreamExt;
use std::{collections::BTreeMap, convert::TryFrom, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};

use dvrf_core::{
    primitives::{
        Address, ContractPhase, EvalProof, LedgerError, LedgerResult, NodeRecord, PartialEval,
        Point, Point2, PseudoRandom, TxKind, TxReceipt, Word,
    },
    Ledger, LedgerEvent,
};

use crate::zkdvrf_contract::{self as bindings, ZkDvrf, ZkDvrfEvents};

/// Gas limit per transaction kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GasLimits {
    pub default: u64,
    pub overrides: BTreeMap<TxKind, u64>,
}

impl GasLimits {
    pub fn limit(&self, kind: TxKind) -> u64 {
        self.overrides.get(&kind).copied().unwrap_or(self.default)
    }
}

pub struct ContractLedger<M: Middleware + 'static> {
    contract: ZkDvrf<M>,
    address: Address,
    gas: GasLimits,
    confirmations: usize,
    tx_timeout: Duration,
}

impl<M: Middleware + 'static> ContractLedger<M> {
    pub fn new(
        contract_address: H160,
        client: Arc<M>,
        sender: H160,
        gas: GasLimits,
        confirmations: usize,
        tx_timeout: Duration,
    ) -> Self {
        Self {
            contract: ZkDvrf::new(contract_address, client),
            address: Address(sender.0),
            gas,
            confirmations,
            tx_timeout,
        }
    }

    /// Sends `call` and waits for the configured number of confirmations
    async fn send<D: Detokenize>(&self, kind: TxKind, call: ContractCall<M, D>) -> LedgerResult<TxReceipt> {
        let call = call.gas(self.gas.limit(kind));
        let pending = call.send().await.map_err(rpc)?;
        let hash = Word(pending.tx_hash().0);
        debug!(%kind, tx = %hash, "sent transaction");

        let receipt = tokio::time::timeout(self.tx_timeout, pending.confirmations(self.confirmations))
            .await
            .map_err(|_| LedgerError::Timeout { kind, hash })?
            .map_err(rpc)?
            .ok_or(LedgerError::Dropped { kind, hash })?;

        if receipt.status != Some(1u64.into()) {
            return Err(LedgerError::Reverted { kind, hash });
        }
        let block = receipt.block_number.map(|b| b.as_u64());
        info!(%kind, tx = %hash, ?block, "transaction confirmed");
        Ok(TxReceipt { kind, hash, block })
    }
}

fn rpc<E: std::fmt::Display>(err: E) -> LedgerError {
    LedgerError::Rpc(err.to_string())
}

pub(crate) fn to_u64(value: U256) -> LedgerResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::Decode(format!("{} does not fit in 64 bits", value)));
    }
    Ok(value.as_u64())
}

pub(crate) fn word_to_u256(word: &Word) -> U256 {
    U256::from_big_endian(word.as_bytes())
}

pub(crate) fn u256_to_word(value: U256) -> Word {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Word(bytes)
}

impl From<bindings::G1Point> for Point {
    fn from(p: bindings::G1Point) -> Self {
        Point {
            x: u256_to_word(p.x),
            y: u256_to_word(p.y),
        }
    }
}

impl From<Point> for bindings::G1Point {
    fn from(p: Point) -> Self {
        bindings::G1Point {
            x: word_to_u256(&p.x),
            y: word_to_u256(&p.y),
        }
    }
}

impl From<bindings::G2Point> for Point2 {
    fn from(p: bindings::G2Point) -> Self {
        Point2 {
            x0: u256_to_word(p.x[0]),
            x1: u256_to_word(p.x[1]),
            y0: u256_to_word(p.y[0]),
            y1: u256_to_word(p.y[1]),
        }
    }
}

impl From<Point2> for bindings::G2Point {
    fn from(p: Point2) -> Self {
        bindings::G2Point {
            x: [word_to_u256(&p.x0), word_to_u256(&p.x1)],
            y: [word_to_u256(&p.y0), word_to_u256(&p.y1)],
        }
    }
}

impl From<EvalProof> for bindings::PartialEvalProof {
    fn from(p: EvalProof) -> Self {
        bindings::PartialEvalProof {
            z: word_to_u256(&p.z),
            c: word_to_u256(&p.c),
        }
    }
}

fn eval_from_chain(
    (index_plus, value, proof): (U256, bindings::G1Point, bindings::PartialEvalProof),
) -> LedgerResult<PartialEval> {
    Ok(PartialEval {
        index: to_u64(index_plus)?,
        value: value.into(),
        proof: EvalProof {
            z: u256_to_word(proof.z),
            c: u256_to_word(proof.c),
        },
    })
}

fn random_to_chain(random: &PseudoRandom) -> LedgerResult<bindings::PseudoRandom> {
    let value = <[u8; 32]>::try_from(random.value.as_slice()).map_err(|_| {
        LedgerError::Decode(format!(
            "pseudorandom value has {} bytes, the contract stores 32",
            random.value.len()
        ))
    })?;
    Ok(bindings::PseudoRandom {
        proof: random.proof.into(),
        value,
    })
}

fn event_from_chain(event: ZkDvrfEvents) -> LedgerResult<LedgerEvent> {
    Ok(match event {
        ZkDvrfEvents::RegistrationCompletedFilter(e) => LedgerEvent::RegistrationCompleted {
            count: to_u64(e.count)?,
        },
        ZkDvrfEvents::NidkgCompletedFilter(e) => LedgerEvent::NidkgCompleted {
            count: to_u64(e.count)?,
        },
        ZkDvrfEvents::GlobalPublicParamsCreatedFilter(_) => LedgerEvent::GlobalPublicParamsCreated,
        ZkDvrfEvents::RandomThresholdReachedFilter(e) => LedgerEvent::RandomThresholdReached {
            round: to_u64(e.round_num)?,
            input: e.input.to_vec(),
        },
        ZkDvrfEvents::RandomReadyFilter(e) => LedgerEvent::RandomReady {
            round: to_u64(e.round_num)?,
            input: e.input.to_vec(),
        },
    })
}

#[async_trait]
impl<M: Middleware + 'static> Ledger for ContractLedger<M> {
    fn address(&self) -> Address {
        self.address
    }

    async fn phase(&self) -> LedgerResult<ContractPhase> {
        let phase = self.contract.contract_phase().call().await.map_err(rpc)?;
        ContractPhase::try_from(phase)
    }

    async fn owner(&self) -> LedgerResult<Address> {
        let owner = self.contract.owner().call().await.map_err(rpc)?;
        Ok(Address(owner.0))
    }

    async fn member_count(&self) -> LedgerResult<u64> {
        to_u64(self.contract.member_count().call().await.map_err(rpc)?)
    }

    async fn threshold(&self) -> LedgerResult<u64> {
        to_u64(self.contract.threshold().call().await.map_err(rpc)?)
    }

    async fn current_index(&self) -> LedgerResult<u64> {
        to_u64(self.contract.current_index().call().await.map_err(rpc)?)
    }

    async fn node(&self, address: Address) -> LedgerResult<NodeRecord> {
        let (_, node_address, registered, pp_submitted) = self
            .contract
            .addr_to_node(H160(address.0))
            .call()
            .await
            .map_err(rpc)?;
        // the raw `index` field is zero both for index 0 and for "unassigned"
        let index = self.index_plus(address).await?;
        Ok(NodeRecord {
            index,
            address: Address(node_address.0),
            registered,
            pp_submitted,
        })
    }

    async fn index_plus(&self, address: Address) -> LedgerResult<u64> {
        let index = self
            .contract
            .get_index_plus(H160(address.0))
            .call()
            .await
            .map_err(rpc)?;
        to_u64(index)
    }

    async fn last_submitted_round(&self, address: Address) -> LedgerResult<u64> {
        let round = self
            .contract
            .last_submitted_round(H160(address.0))
            .call()
            .await
            .map_err(rpc)?;
        to_u64(round)
    }

    async fn public_keys(&self) -> LedgerResult<Vec<Point>> {
        let keys = self.contract.get_pk_list().call().await.map_err(rpc)?;
        Ok(keys.into_iter().map(Point::from).collect())
    }

    async fn public_params(&self) -> LedgerResult<Vec<Vec<Word>>> {
        let params = self.contract.get_pp_list().call().await.map_err(rpc)?;
        Ok(params
            .into_iter()
            .map(|pp| pp.into_iter().map(u256_to_word).collect())
            .collect())
    }

    async fn global_public_key(&self) -> LedgerResult<Point2> {
        Ok(self.contract.get_gpk().call().await.map_err(rpc)?.into())
    }

    async fn verification_keys(&self) -> LedgerResult<Vec<Point>> {
        let keys = self.contract.get_vk_list().call().await.map_err(rpc)?;
        Ok(keys.into_iter().map(Point::from).collect())
    }

    async fn current_round(&self) -> LedgerResult<u64> {
        to_u64(self.contract.current_round_num().call().await.map_err(rpc)?)
    }

    async fn round_input(&self, round: u64) -> LedgerResult<Vec<u8>> {
        let input = self
            .contract
            .round_input(round.into())
            .call()
            .await
            .map_err(rpc)?;
        Ok(input.to_vec())
    }

    async fn submission_count(&self, round: u64) -> LedgerResult<u64> {
        let count = self
            .contract
            .round_submission_count(round.into())
            .call()
            .await
            .map_err(rpc)?;
        to_u64(count)
    }

    async fn round_eval(&self, round: u64, slot: u64) -> LedgerResult<PartialEval> {
        let eval = self
            .contract
            .round_to_eval(round.into(), slot.into())
            .call()
            .await
            .map_err(rpc)?;
        eval_from_chain(eval)
    }

    async fn round_random(&self, round: u64) -> LedgerResult<PseudoRandom> {
        let (proof, value) = self
            .contract
            .round_to_random(round.into())
            .call()
            .await
            .map_err(rpc)?;
        Ok(PseudoRandom {
            proof: proof.into(),
            value: value.to_vec(),
        })
    }

    async fn latest_random(&self) -> LedgerResult<PseudoRandom> {
        let latest = self.contract.get_latest_random().call().await.map_err(rpc)?;
        Ok(PseudoRandom {
            proof: latest.proof.into(),
            value: latest.value.to_vec(),
        })
    }

    async fn add_permissioned_node(&self, node: Address) -> LedgerResult<TxReceipt> {
        let call = self.contract.add_permissioned_nodes(H160(node.0));
        self.send(TxKind::AddPermissionedNode, call).await
    }

    async fn register_node(&self, public_key: Point) -> LedgerResult<TxReceipt> {
        let call = self.contract.register_node(public_key.into());
        self.send(TxKind::RegisterNode, call).await
    }

    async fn start_nidkg(&self) -> LedgerResult<TxReceipt> {
        let call = self.contract.start_nidkg();
        self.send(TxKind::StartNidkg, call).await
    }

    async fn submit_public_params(&self, instance: Vec<Word>, proof: Vec<u8>) -> LedgerResult<TxReceipt> {
        let instance = instance.iter().map(word_to_u256).collect();
        let call = self.contract.submit_public_params(instance, proof.into());
        self.send(TxKind::SubmitPublicParams, call).await
    }

    async fn compute_vk(&self, global_public_key: Point2) -> LedgerResult<TxReceipt> {
        let call = self.contract.compute_vk(global_public_key.into());
        self.send(TxKind::ComputeVk, call).await
    }

    async fn initiate_random(&self) -> LedgerResult<TxReceipt> {
        let call = self.contract.initiate_random();
        self.send(TxKind::InitiateRandom, call).await
    }

    async fn submit_partial_eval(&self, eval: PartialEval) -> LedgerResult<TxReceipt> {
        let eval = bindings::PartialEval {
            index_plus: eval.index.into(),
            value: eval.value.into(),
            proof: eval.proof.into(),
        };
        let call = self.contract.submit_partial_eval(eval);
        self.send(TxKind::SubmitPartialEval, call).await
    }

    async fn submit_random(&self, random: PseudoRandom) -> LedgerResult<TxReceipt> {
        let call = self.contract.submit_random(random_to_chain(&random)?);
        self.send(TxKind::SubmitRandom, call).await
    }

    async fn watch_events(&self, sink: mpsc::Sender<LedgerEvent>) -> LedgerResult<()> {
        let events = self.contract.events();
        let mut stream = events.stream().await.map_err(rpc)?;
        while let Some(event) = stream.next().await {
            let event = event_from_chain(event.map_err(rpc)?)?;
            debug!(%event, "contract event");
            if sink.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
