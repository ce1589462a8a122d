use tracing::{info, warn};

use crate::{
    artifacts::{Artifact, ArtifactStore},
    engine::{invoke, CryptoEngine, EngineCommand},
    ledger::Ledger,
    primitives::{input_to_hex, CoordinatorError, CoordinatorResult, PartialEval, PseudoRandom},
};

/// Combines the partial evaluations of `round` into its final randomness and
/// submits it.
///
/// Refuses with [`CoordinatorError::RoundFinalized`] before touching the
/// engine if the round already carries a value, and re-checks right before the
/// submission since the combination takes a while.
pub async fn combine<L, E>(
    ledger: &L,
    engine: &E,
    store: &ArtifactStore,
    round: u64,
    threshold: u64,
) -> CoordinatorResult<PseudoRandom>
where
    L: Ledger + ?Sized,
    E: CryptoEngine + ?Sized,
{
    if ledger.round_random(round).await?.is_set() {
        return Err(CoordinatorError::RoundFinalized(round));
    }

    let input = input_to_hex(&ledger.round_input(round).await?);
    let members = ledger.member_count().await?;

    let mut evals: Vec<PartialEval> = Vec::with_capacity(members as usize);
    for slot in 0..members {
        let eval = ledger.round_eval(round, slot).await?;
        if eval.is_present() {
            evals.push(eval);
        }
    }
    if (evals.len() as u64) < threshold {
        return Err(CoordinatorError::InsufficientEvaluations {
            round,
            have: evals.len(),
            need: threshold as usize,
        });
    }
    info!(round, evaluations = evals.len(), %input, "combining partial evaluations");

    store.publish_json(&Artifact::RoundEvals, &evals)?;
    invoke(engine, store, EngineCommand::RandCombine { input: input.clone() }).await?;
    invoke(engine, store, EngineCommand::RandVerifyFinal { input }).await?;
    let random: PseudoRandom = store.read_json(&Artifact::PseudoRandom)?;

    if ledger.round_random(round).await?.is_set() {
        return Err(CoordinatorError::RoundFinalized(round));
    }
    let receipt = ledger.submit_random(random.clone()).await?;
    info!(
        round,
        tx = %receipt.hash,
        value = %input_to_hex(&random.value),
        "submitted pseudorandom"
    );

    let latest = ledger.latest_random().await?;
    if latest == random {
        info!(round, "pseudorandom recorded on chain");
    } else {
        warn!(
            round,
            latest = %input_to_hex(&latest.value),
            "latest pseudorandom on chain differs from the submitted one"
        );
    }
    Ok(random)
}
