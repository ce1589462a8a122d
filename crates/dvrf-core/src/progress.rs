//! Local progress markers. They only save redundant engine runs and duplicate
//! transactions, the contract stays authoritative: markers are reconciled
//! with on-chain values on every iteration and never move backwards.
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::{
    artifacts::{Artifact, ArtifactStore},
    primitives::{ArtifactError, NodeRecord},
};

const RECORD_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    version: u32,
    record: T,
}

/// A record persisted under `state/<ACTOR>.bin`
pub trait ProgressRecord: Serialize + DeserializeOwned + Default {
    const ACTOR: &'static str;

    fn artifact() -> Artifact {
        Artifact::Progress(Self::ACTOR.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProgress {
    /// The highest round this administrator initiated
    pub last_initiated_round: u64,
    pub last_initiated_at: Option<DateTime<Utc>>,
    /// The global public key was submitted but not yet compared with the
    /// contract's derived keys
    pub consistency_pending: bool,
}

impl AdminProgress {
    pub fn record_initiation(&mut self, round: u64, at: DateTime<Utc>) {
        if round >= self.last_initiated_round {
            self.last_initiated_round = round;
            self.last_initiated_at = Some(at);
        }
    }
}

impl ProgressRecord for AdminProgress {
    const ACTOR: &'static str = "admin";
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub registered: bool,
    pub pp_submitted: bool,
    /// The highest round this node submitted a partial evaluation for
    pub last_submitted_round: u64,
}

impl NodeProgress {
    /// Folds the on-chain flags into the markers
    pub fn reconcile(&mut self, record: &NodeRecord, last_submitted_round: u64) {
        self.registered |= record.registered;
        self.pp_submitted |= record.pp_submitted;
        self.last_submitted_round = self.last_submitted_round.max(last_submitted_round);
    }

    pub fn record_submission(&mut self, round: u64) {
        self.last_submitted_round = self.last_submitted_round.max(round);
    }
}

impl ProgressRecord for NodeProgress {
    const ACTOR: &'static str = "node";
}

/// Loads the actor's record. A missing, undecodable or outdated record is
/// replaced by the default one.
pub fn load<T: ProgressRecord>(store: &ArtifactStore) -> T {
    match store.load_record::<Versioned<T>>(&T::artifact()) {
        Ok(Some(versioned)) if versioned.version == RECORD_VERSION => versioned.record,
        Ok(Some(versioned)) => {
            warn!(
                actor = T::ACTOR,
                version = versioned.version,
                "discarding progress record with unknown version"
            );
            T::default()
        }
        Ok(None) => T::default(),
        Err(e) => {
            warn!(actor = T::ACTOR, "discarding unreadable progress record: {}", e);
            T::default()
        }
    }
}

pub fn save<T: ProgressRecord + Clone>(store: &ArtifactStore, record: &T) -> Result<(), ArtifactError> {
    let versioned = Versioned {
        version: RECORD_VERSION,
        record: record.clone(),
    };
    store.save_record(&T::artifact(), &versioned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::SettlePolicy;
    use chrono::TimeZone;

    #[test]
    fn markers_never_regress() {
        let mut progress = NodeProgress {
            registered: true,
            pp_submitted: false,
            last_submitted_round: 4,
        };
        let record = NodeRecord {
            index: 1,
            pp_submitted: true,
            ..Default::default()
        };
        progress.reconcile(&record, 2);
        assert!(progress.registered);
        assert!(progress.pp_submitted);
        assert_eq!(progress.last_submitted_round, 4);

        progress.record_submission(3);
        assert_eq!(progress.last_submitted_round, 4);

        let mut admin = AdminProgress::default();
        let later = Utc.timestamp_opt(2_000, 0).unwrap();
        admin.record_initiation(5, later);
        admin.record_initiation(3, Utc.timestamp_opt(3_000, 0).unwrap());
        assert_eq!(admin.last_initiated_round, 5);
        assert_eq!(admin.last_initiated_at, Some(later));
    }

    #[test]
    fn records_persist_and_bad_ones_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), SettlePolicy::default());

        assert_eq!(load::<AdminProgress>(&store), AdminProgress::default());

        let mut admin = AdminProgress::default();
        admin.record_initiation(2, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        save(&store, &admin).unwrap();
        assert_eq!(load::<AdminProgress>(&store), admin);

        store
            .save_record(
                &NodeProgress::artifact(),
                &Versioned {
                    version: RECORD_VERSION + 1,
                    record: NodeProgress {
                        registered: true,
                        ..Default::default()
                    },
                },
            )
            .unwrap();
        assert_eq!(load::<NodeProgress>(&store), NodeProgress::default());

        store
            .publish_bytes(&NodeProgress::artifact(), &[0xff])
            .unwrap();
        assert_eq!(load::<NodeProgress>(&store), NodeProgress::default());
    }
}
