//! # Scheduler
//!
//! Drives an [`Actor`] forever: one step, then a sleep of `poll_interval`,
//! cut short by any contract event. Shutdown is only honoured while sleeping,
//! so a step that started always runs to completion.
use async_trait::async_trait;
use std::{future::Future, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{ledger::LedgerEvent, primitives::CoordinatorResult};

/// A coordinator which can take one decide-and-act step
#[async_trait]
pub trait Actor: Send {
    fn name(&self) -> &'static str;

    async fn step(&mut self) -> CoordinatorResult<()>;
}

#[derive(Clone, Copy, Debug)]
pub struct Scheduler {
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Runs until `shutdown` resolves or a step fails fatally. Recoverable
    /// errors are logged and the step is retried after the usual sleep.
    pub async fn run<A, S>(
        &self,
        actor: &mut A,
        mut wake: mpsc::Receiver<LedgerEvent>,
        shutdown: S,
    ) -> CoordinatorResult<()>
    where
        A: Actor + ?Sized,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut events_open = true;
        let mut iteration: u64 = 0;

        loop {
            iteration += 1;
            match actor.step().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(actor = actor.name(), iteration, "stopping: {}", e);
                    return Err(e);
                }
                Err(e) => warn!(actor = actor.name(), iteration, "step failed: {}", e),
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(actor = actor.name(), "shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
                event = wake.recv(), if events_open => match event {
                    Some(event) => debug!(actor = actor.name(), %event, "woken up by contract event"),
                    None => {
                        warn!(actor = actor.name(), "event subscription closed, polling only");
                        events_open = false;
                    }
                },
            }
        }
    }
}
