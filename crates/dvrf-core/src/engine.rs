//! # Crypto Engine
//!
//! All cryptography is done by an external command line program. It reads its
//! inputs from, and writes its outputs to, the [`ArtifactStore`]. Its process
//! streams only carry diagnostics.
use async_trait::async_trait;
use std::{fmt, path::PathBuf, process::Stdio};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    artifacts::{Artifact, ArtifactStore},
    primitives::{CoordinatorResult, EngineError},
};

/// The engine's fixed command grammar. Member indices are 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineCommand {
    /// `config <threshold> <members> <degree>`, aligns the engine's own
    /// parameters with the contract
    Configure {
        threshold: u64,
        members: u64,
        degree: u32,
    },
    /// `keygen -f <file>`
    Keygen { file: String },
    /// `dkg prove <index>`
    DkgProve { index: u64 },
    /// `dkg verify <index>`
    DkgVerify { index: u64 },
    /// `dkg derive [<index> -f <file>]`, the member share is only derived when
    /// a member is given
    DkgDerive { member: Option<(u64, String)> },
    /// `rand eval <index> <input>`
    RandEval { index: u64, input: String },
    /// `rand verify <index> <input>`
    RandVerify { index: u64, input: String },
    /// `rand combine <input>`
    RandCombine { input: String },
    /// `rand verify-final <input>`
    RandVerifyFinal { input: String },
}

impl EngineCommand {
    pub fn args(&self) -> Vec<String> {
        match self {
            EngineCommand::Configure {
                threshold,
                members,
                degree,
            } => vec![
                "config".into(),
                threshold.to_string(),
                members.to_string(),
                degree.to_string(),
            ],
            EngineCommand::Keygen { file } => vec!["keygen".into(), "-f".into(), file.clone()],
            EngineCommand::DkgProve { index } => {
                vec!["dkg".into(), "prove".into(), index.to_string()]
            }
            EngineCommand::DkgVerify { index } => {
                vec!["dkg".into(), "verify".into(), index.to_string()]
            }
            EngineCommand::DkgDerive { member } => {
                let mut args = vec!["dkg".to_string(), "derive".to_string()];
                if let Some((index, file)) = member {
                    args.push(index.to_string());
                    args.push("-f".into());
                    args.push(file.clone());
                }
                args
            }
            EngineCommand::RandEval { index, input } => {
                vec!["rand".into(), "eval".into(), index.to_string(), input.clone()]
            }
            EngineCommand::RandVerify { index, input } => {
                vec!["rand".into(), "verify".into(), index.to_string(), input.clone()]
            }
            EngineCommand::RandCombine { input } => {
                vec!["rand".into(), "combine".into(), input.clone()]
            }
            EngineCommand::RandVerifyFinal { input } => {
                vec!["rand".into(), "verify-final".into(), input.clone()]
            }
        }
    }

    /// The artifacts a successful run of this command produces
    pub fn outputs(&self) -> Vec<Artifact> {
        match self {
            EngineCommand::Keygen { file } => vec![Artifact::MemberKey(file.clone())],
            EngineCommand::DkgProve { index } => {
                vec![Artifact::Proof(*index), Artifact::Instance(*index)]
            }
            EngineCommand::DkgDerive { member } => {
                let mut outputs = vec![Artifact::GlobalParams];
                if let Some((index, _)) = member {
                    outputs.push(Artifact::Share(*index));
                }
                outputs
            }
            EngineCommand::RandEval { index, .. } => vec![Artifact::Eval(*index)],
            EngineCommand::RandCombine { .. } => vec![Artifact::PseudoRandom],
            EngineCommand::Configure { .. }
            | EngineCommand::DkgVerify { .. }
            | EngineCommand::RandVerify { .. }
            | EngineCommand::RandVerifyFinal { .. } => vec![],
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}

/// Runs engine commands to completion. Implementations must only return `Ok`
/// when the engine reported success.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    async fn run(&self, command: &EngineCommand) -> Result<(), EngineError>;
}

/// Runs `command` and waits until all of its outputs have settled. Outputs
/// from an earlier run are discarded first so they can never be mistaken for
/// fresh ones.
pub async fn invoke<E>(engine: &E, store: &ArtifactStore, command: EngineCommand) -> CoordinatorResult<()>
where
    E: CryptoEngine + ?Sized,
{
    let outputs = command.outputs();
    for output in &outputs {
        store.discard(output)?;
    }

    info!(%command, "running engine");
    engine.run(&command).await?;

    for output in &outputs {
        store.settled(output).await?;
    }
    Ok(())
}

/// Runs the engine binary as a subprocess
#[derive(Clone, Debug)]
pub struct ProcessEngine {
    binary: PathBuf,
    workdir: PathBuf,
    log_level: String,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<PathBuf>, workdir: impl Into<PathBuf>, log_level: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            workdir: workdir.into(),
            log_level: log_level.into(),
        }
    }
}

#[async_trait]
impl CryptoEngine for ProcessEngine {
    async fn run(&self, command: &EngineCommand) -> Result<(), EngineError> {
        let output = Command::new(&self.binary)
            .args(command.args())
            .current_dir(&self.workdir)
            .env("RUST_LOG", &self.log_level)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| EngineError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stdout.lines().chain(stderr.lines()) {
            debug!(target: "engine", "{}", line);
        }

        if !output.status.success() {
            return Err(EngineError::Failed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}
