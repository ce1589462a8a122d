use serde::{Deserialize, Serialize};
use std::{convert::TryFrom, fmt};

use super::errors::LedgerError;

/// The protocol stage recorded by the contract. It gates which actions are
/// valid and only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContractPhase {
    /// Members are being permissioned and are registering their keys
    Unregistered,
    /// Every permissioned member has registered
    Registered,
    /// Members are submitting their DKG public parameters and proofs
    Nidkg,
    /// All public parameters are in, the verification keys are pending
    NidkgComplete,
    /// Global parameters are set and randomness rounds may run
    Ready,
}

impl ContractPhase {
    pub fn as_u8(self) -> u8 {
        match self {
            ContractPhase::Unregistered => 0,
            ContractPhase::Registered => 1,
            ContractPhase::Nidkg => 2,
            ContractPhase::NidkgComplete => 3,
            ContractPhase::Ready => 4,
        }
    }
}

impl TryFrom<u8> for ContractPhase {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ContractPhase::Unregistered,
            1 => ContractPhase::Registered,
            2 => ContractPhase::Nidkg,
            3 => ContractPhase::NidkgComplete,
            4 => ContractPhase::Ready,
            other => {
                return Err(LedgerError::Decode(format!(
                    "unknown contract phase {}",
                    other
                )))
            }
        })
    }
}

impl fmt::Display for ContractPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ContractPhase::Unregistered => "unregistered",
            ContractPhase::Registered => "registered",
            ContractPhase::Nidkg => "nidkg",
            ContractPhase::NidkgComplete => "nidkg-complete",
            ContractPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}
