//! # Artifact Store
//!
//! The file-addressed handoff area shared with the external engine. The engine
//! reads and writes fixed paths below its `data` directory; every path is
//! derived here from an [`Artifact`] key so nothing else hardcodes a location.
//!
//! Files written by the coordinator are published atomically (temp file, fsync,
//! rename). Files written by the engine are only trusted after [`ArtifactStore::settled`]
//! saw the same non-empty content twice in a row.
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

use crate::primitives::ArtifactError;

const TEMP_SUFFIX: &str = "tmp";

/// Every artifact exchanged with the engine or kept by the coordinator
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Artifact {
    /// `members/<file>.json`, a member key pair written by `keygen`
    MemberKey(String),
    /// `mpks.json`, every registered member public key
    MemberPublicKeys,
    /// `dkg/all_instances.json`, the public parameters submitted by all members
    AllInstances,
    /// `dkg/proofs/proof_<i>.dat`
    Proof(u64),
    /// `dkg/proofs/instance_<i>.json`
    Instance(u64),
    /// `dkg/gpp.json`, the derived global public parameters
    GlobalParams,
    /// `dkg/shares/share_<i>.json`, the member's derived secret share
    Share(u64),
    /// `random/eval_<i>.json`, a member's partial evaluation
    Eval(u64),
    /// `random/evals.json`, the evaluations handed to `rand combine`
    RoundEvals,
    /// `random/pseudo.json`, the combined pseudorandom value
    PseudoRandom,
    /// `random/rounds/<r>/evals.json`
    ArchivedEvals(u64),
    /// `random/rounds/<r>/pseudo.json`
    ArchivedRandom(u64),
    /// `state/<actor>.bin`, a coordinator progress record
    Progress(String),
}

impl Artifact {
    /// The artifact's location relative to the store root
    pub fn relative_path(&self) -> PathBuf {
        match self {
            Artifact::MemberKey(file) => PathBuf::from(format!("members/{}.json", file)),
            Artifact::MemberPublicKeys => PathBuf::from("mpks.json"),
            Artifact::AllInstances => PathBuf::from("dkg/all_instances.json"),
            Artifact::Proof(i) => PathBuf::from(format!("dkg/proofs/proof_{}.dat", i)),
            Artifact::Instance(i) => PathBuf::from(format!("dkg/proofs/instance_{}.json", i)),
            Artifact::GlobalParams => PathBuf::from("dkg/gpp.json"),
            Artifact::Share(i) => PathBuf::from(format!("dkg/shares/share_{}.json", i)),
            Artifact::Eval(i) => PathBuf::from(format!("random/eval_{}.json", i)),
            Artifact::RoundEvals => PathBuf::from("random/evals.json"),
            Artifact::PseudoRandom => PathBuf::from("random/pseudo.json"),
            Artifact::ArchivedEvals(r) => PathBuf::from(format!("random/rounds/{}/evals.json", r)),
            Artifact::ArchivedRandom(r) => {
                PathBuf::from(format!("random/rounds/{}/pseudo.json", r))
            }
            Artifact::Progress(actor) => PathBuf::from(format!("state/{}.bin", actor)),
        }
    }
}

/// How long to wait for an engine output to stop changing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlePolicy {
    /// Number of reads before giving up (at least 2 are always made)
    pub attempts: u32,
    /// Pause between two reads
    pub interval: Duration,
}

impl Default for SettlePolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    settle: SettlePolicy,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, settle: SettlePolicy) -> Self {
        Self {
            root: root.into(),
            settle,
        }
    }

    pub fn path(&self, artifact: &Artifact) -> PathBuf {
        self.root.join(artifact.relative_path())
    }

    pub fn exists(&self, artifact: &Artifact) -> bool {
        self.path(artifact).is_file()
    }

    /// Serializes `value` as JSON and publishes it atomically
    pub fn publish_json<T: Serialize + ?Sized>(
        &self,
        artifact: &Artifact,
        value: &T,
    ) -> Result<PathBuf, ArtifactError> {
        let path = self.path(artifact);
        let bytes = serde_json::to_vec(value).map_err(|source| ArtifactError::Json {
            path: path.clone(),
            source,
        })?;
        self.publish_bytes(artifact, &bytes)
    }

    /// Writes `bytes` next to the destination and renames it into place, so a
    /// reader never observes a partially written file.
    pub fn publish_bytes(&self, artifact: &Artifact, bytes: &[u8]) -> Result<PathBuf, ArtifactError> {
        let path = self.path(artifact);
        let tmp = temp_path(&path);
        let io = |source| ArtifactError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        let mut file = File::create(&tmp).map_err(io)?;
        file.write_all(bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        fs::rename(&tmp, &path).map_err(io)?;

        debug!(path = %path.display(), len = bytes.len(), "published artifact");
        Ok(path)
    }

    pub fn read_bytes(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path(artifact);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::Missing(path)),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }

    pub fn read_json<T: DeserializeOwned>(&self, artifact: &Artifact) -> Result<T, ArtifactError> {
        let bytes = self.read_bytes(artifact)?;
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Json {
            path: self.path(artifact),
            source,
        })
    }

    /// Removes the artifact if it exists. Used before an engine invocation so
    /// that a leftover output is never mistaken for a fresh one.
    pub fn discard(&self, artifact: &Artifact) -> Result<(), ArtifactError> {
        let path = self.path(artifact);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Io { path, source }),
        }
    }

    /// Waits until the artifact exists, is non-empty and reads back identical
    /// twice in a row.
    pub async fn settled(&self, artifact: &Artifact) -> Result<PathBuf, ArtifactError> {
        let path = self.path(artifact);
        let attempts = self.settle.attempts.max(2);
        let mut previous: Option<(usize, Vec<u8>)> = None;
        let mut seen = false;

        for attempt in 0..attempts {
            match fs::read(&path) {
                Ok(bytes) if !bytes.is_empty() => {
                    seen = true;
                    let fingerprint = (bytes.len(), Sha256::digest(&bytes).to_vec());
                    if previous.as_ref() == Some(&fingerprint) {
                        return Ok(path);
                    }
                    previous = Some(fingerprint);
                }
                Ok(_) => seen = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(ArtifactError::Io { path, source }),
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.settle.interval).await;
            }
        }

        if seen {
            Err(ArtifactError::Unsettled(path))
        } else {
            Err(ArtifactError::Missing(path))
        }
    }

    /// Persists a coordinator record with bincode
    pub fn save_record<T: Serialize>(&self, artifact: &Artifact, record: &T) -> Result<(), ArtifactError> {
        let bytes = bincode::serialize(record).map_err(|source| ArtifactError::Bincode {
            path: self.path(artifact),
            source,
        })?;
        self.publish_bytes(artifact, &bytes)?;
        Ok(())
    }

    /// Loads a coordinator record, `None` if it was never saved
    pub fn load_record<T: DeserializeOwned>(&self, artifact: &Artifact) -> Result<Option<T>, ArtifactError> {
        let bytes = match self.read_bytes(artifact) {
            Ok(bytes) => bytes,
            Err(ArtifactError::Missing(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|source| ArtifactError::Bincode {
                path: self.path(artifact),
                source,
            })
    }

    /// Copies the inputs and output of a finalized round under `random/rounds/<r>/`
    pub fn archive_round(&self, round: u64) -> Result<(), ArtifactError> {
        let evals = self.read_bytes(&Artifact::RoundEvals)?;
        self.publish_bytes(&Artifact::ArchivedEvals(round), &evals)?;
        let pseudo = self.read_bytes(&Artifact::PseudoRandom)?;
        self.publish_bytes(&Artifact::ArchivedRandom(round), &pseudo)?;
        Ok(())
    }

    /// Removes temp files left behind by an interrupted publication
    pub fn sweep_temporaries(&self) -> Result<usize, ArtifactError> {
        let pattern = format!("{}/**/*.{}", self.root.display(), TEMP_SUFFIX);
        let mut removed = 0;
        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("skipping unreadable path while sweeping: {}", e);
                    continue;
                }
            };
            fs::remove_file(&path).map_err(|source| ArtifactError::Io {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "swept stale temporary artifacts");
        }
        Ok(removed)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    path.with_file_name(name)
}
