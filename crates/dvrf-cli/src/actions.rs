use crate::{config::Config, contract::ContractLedger, opts::*};

use anyhow::{anyhow, Context, Result};
use ethers::prelude::*;
use rand::{CryptoRng, Rng};
use std::{convert::TryFrom, fs::File, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use dvrf_core::{
    invoke, primitives::Address as MemberAddress, Actor, Admin, ArtifactStore, EngineCommand,
    Ledger, Node, ProcessEngine, Scheduler,
};

/// Environment variable consulted when `--private-key` is not given
pub const PRIVATE_KEY_ENV: &str = "ZKDVRF_PRIVATE_KEY";

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(serde::Serialize, Debug)]
struct KeypairJson {
    address: Address,
    #[serde(rename = "privateKey")]
    private_key: String,
}

pub fn keygen<R>(opts: KeygenOpts, rng: &mut R) -> Result<()>
where
    R: Rng + CryptoRng,
{
    let wallet = LocalWallet::new(rng);
    let output = KeypairJson {
        private_key: hex::encode(wallet.signer().to_bytes()),
        address: wallet.address(),
    };

    if let Some(path) = opts.path {
        let f = File::create(path)?;
        serde_json::to_writer(&f, &output)?;
    } else {
        serde_json::to_writer(std::io::stdout(), &output)?;
    }

    Ok(())
}

pub async fn admin(opts: RunOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let (ledger, engine, store) = setup(&config, &opts).await?;

    let mut admin = Admin::new(ledger.clone(), engine, store, config.admin_config());
    admin.check_startup().await?;
    run_actor(&config, ledger, &mut admin).await
}

pub async fn node(opts: RunOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let (ledger, engine, store) = setup(&config, &opts).await?;

    let node_config = config.node_config(ledger.address());
    info!(address = %ledger.address(), key_file = %node_config.key_file, "starting node");
    let mut node = Node::new(ledger.clone(), engine, store, node_config);
    node.check_startup().await?;
    run_actor(&config, ledger, &mut node).await
}

pub async fn status(opts: StatusOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let url = opts.node_url.as_deref().unwrap_or(&config.ledger.rpc_url);
    let provider = Provider::<Http>::try_from(url)?;
    let ledger = ContractLedger::new(
        H160(config.ledger.contract_address.0),
        Arc::new(provider),
        H160::zero(),
        config.gas_limits()?,
        config.ledger.confirmations,
        config.tx_timeout(),
    );

    let phase = ledger.phase().await?;
    println!("contract:   {}", config.ledger.contract_address);
    println!("phase:      {}", phase);
    println!("owner:      {}", ledger.owner().await?);
    println!(
        "members:    {} (threshold {}, {} indices assigned)",
        ledger.member_count().await?,
        ledger.threshold().await?,
        ledger.current_index().await?
    );

    let round = ledger.current_round().await?;
    if round > 0 {
        let random = ledger.round_random(round).await?;
        println!(
            "round:      {} ({} evaluations, {})",
            round,
            ledger.submission_count(round).await?,
            if random.is_set() { "finalized" } else { "open" }
        );
    } else {
        println!("round:      none");
    }

    if let Some(address) = opts.address {
        let address: MemberAddress = address
            .parse()
            .map_err(|e| anyhow!("invalid address {}: {}", address, e))?;
        let record = ledger.node(address).await?;
        println!(
            "node:       {} index+1={} registered={} pp_submitted={} last_round={}",
            address,
            record.index,
            record.registered,
            record.pp_submitted,
            ledger.last_submitted_round(address).await?
        );
    }

    Ok(())
}

/// Connects the wallet, the contract and the engine, and configures the
/// engine when a circuit degree is set
async fn setup(
    config: &Config,
    opts: &RunOpts,
) -> Result<(Arc<ContractLedger<Client>>, ProcessEngine, ArtifactStore)> {
    let private_key = match &opts.private_key {
        Some(key) => key.clone(),
        None => std::env::var(PRIVATE_KEY_ENV)
            .with_context(|| format!("no --private-key given and {} is not set", PRIVATE_KEY_ENV))?,
    };

    let url = opts.node_url.as_deref().unwrap_or(&config.ledger.rpc_url);
    let provider = Provider::<Http>::try_from(url)?;
    let chain_id = match config.ledger.chain_id {
        Some(id) => id,
        None => provider.get_chainid().await?.as_u64(),
    };
    let wallet = private_key.parse::<LocalWallet>()?.with_chain_id(chain_id);
    let sender = wallet.address();
    let client = Arc::new(SignerMiddleware::new(provider, wallet));

    let ledger = Arc::new(ContractLedger::new(
        H160(config.ledger.contract_address.0),
        client,
        sender,
        config.gas_limits()?,
        config.ledger.confirmations,
        config.tx_timeout(),
    ));
    info!(address = %ledger.address(), chain_id, contract = %config.ledger.contract_address, "connected");

    let engine = ProcessEngine::new(
        &config.engine.binary,
        &config.engine.workdir,
        config.engine.log_level.clone(),
    );
    let store = ArtifactStore::new(config.data_root(), config.settle_policy());
    let swept = store.sweep_temporaries()?;
    if swept > 0 {
        warn!(swept, "removed temporaries left by an earlier run");
    }

    if let Some(degree) = config.protocol.degree {
        let configure = EngineCommand::Configure {
            threshold: config.protocol.threshold,
            members: config.protocol.members,
            degree,
        };
        invoke(&engine, &store, configure).await?;
    }

    Ok((ledger, engine, store))
}

/// Forwards contract events to the scheduler and polls until Ctrl-C
async fn run_actor<A: Actor>(
    config: &Config,
    ledger: Arc<ContractLedger<Client>>,
    actor: &mut A,
) -> Result<()> {
    let (events, wake) = mpsc::channel(32);
    let watcher = tokio::spawn(async move {
        if let Err(e) = ledger.watch_events(events).await {
            warn!("event subscription failed: {}", e);
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let result = Scheduler::new(config.poll_interval())
        .run(actor, wake, shutdown)
        .await;
    watcher.abort();
    Ok(result?)
}
