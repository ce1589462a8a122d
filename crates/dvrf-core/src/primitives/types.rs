use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// A 32-byte big-endian field element or hash. Serialized as `0x`-prefixed hex,
/// shorter hex strings are left-padded with zeros when read.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Word(pub [u8; 32]);

impl Word {
    /// Builds a word from the little-endian layout the engine uses for
    /// circuit instances.
    pub fn from_le_bytes(mut bytes: [u8; 32]) -> Self {
        bytes.reverse();
        Word(bytes)
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Word(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Word {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        // odd-length hex such as "0x1" is padded with a leading nibble
        let padded;
        let digits = if trimmed.len() % 2 == 1 {
            padded = format!("0{}", trimmed);
            padded.as_str()
        } else {
            trimmed
        };

        let decoded = hex::decode(digits)?;
        if decoded.len() > 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }

        let mut bytes = [0u8; 32];
        bytes[32 - decoded.len()..].copy_from_slice(&decoded);
        Ok(Word(bytes))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 20-byte account address
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s.strip_prefix("0x").unwrap_or(s), &mut bytes)?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// An affine point on a G1-type curve
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: Word,
    pub y: Word,
}

/// An affine point on G2, coordinates split in their two field components
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point2 {
    pub x0: Word,
    pub x1: Word,
    pub y0: Word,
    pub y1: Word,
}

/// Proof of correctness attached to a partial evaluation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalProof {
    pub z: Word,
    pub c: Word,
}

/// One member's contribution to a round. `index` is the member's index+1, a
/// zero index marks an empty slot on chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialEval {
    pub index: u64,
    pub value: Point,
    pub proof: EvalProof,
}

impl PartialEval {
    pub fn is_present(&self) -> bool {
        self.index != 0
    }
}

/// The global public parameters derived once the DKG completes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPublicParams {
    pub ga: Point,
    /// The global public key recorded on chain by `computeVk`
    pub g2a: Point2,
    pub verify_keys: Vec<Point>,
}

/// The final output of a round
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudoRandom {
    pub proof: Point,
    pub value: Vec<u8>,
}

impl PseudoRandom {
    /// A round is finalized once its value is non-zero
    pub fn is_set(&self) -> bool {
        self.value.iter().any(|b| *b != 0)
    }
}

/// A member's key file as written by `keygen`. Only the public half is ever
/// read by the coordinator.
#[derive(Clone, Debug, Deserialize)]
pub struct MemberKeyFile {
    pub pk: Point,
}

/// The contract's registry entry for an address
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeRecord {
    /// index+1, zero when unassigned
    pub index: u64,
    /// the address the entry was created for, zero when never permissioned
    pub address: Address,
    pub registered: bool,
    pub pp_submitted: bool,
}

impl NodeRecord {
    /// The administrator created an entry for `address`
    pub fn is_permissioned_for(&self, address: Address) -> bool {
        !self.address.is_zero() && self.address == address
    }
}

/// State-changing contract calls, used to pick gas limits and label errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    AddPermissionedNode,
    RegisterNode,
    StartNidkg,
    SubmitPublicParams,
    ComputeVk,
    InitiateRandom,
    SubmitPartialEval,
    SubmitRandom,
}

impl TxKind {
    pub const ALL: [TxKind; 8] = [
        TxKind::AddPermissionedNode,
        TxKind::RegisterNode,
        TxKind::StartNidkg,
        TxKind::SubmitPublicParams,
        TxKind::ComputeVk,
        TxKind::InitiateRandom,
        TxKind::SubmitPartialEval,
        TxKind::SubmitRandom,
    ];

    /// The snake case name used in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::AddPermissionedNode => "add_permissioned_node",
            TxKind::RegisterNode => "register_node",
            TxKind::StartNidkg => "start_nidkg",
            TxKind::SubmitPublicParams => "submit_public_params",
            TxKind::ComputeVk => "compute_vk",
            TxKind::InitiateRandom => "initiate_random",
            TxKind::SubmitPartialEval => "submit_partial_eval",
            TxKind::SubmitRandom => "submit_random",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TxKind::AddPermissionedNode => "addPermissionedNodes",
            TxKind::RegisterNode => "registerNode",
            TxKind::StartNidkg => "startNidkg",
            TxKind::SubmitPublicParams => "submitPublicParams",
            TxKind::ComputeVk => "computeVk",
            TxKind::InitiateRandom => "initiateRandom",
            TxKind::SubmitPartialEval => "submitPartialEval",
            TxKind::SubmitRandom => "submitRandom",
        };
        f.write_str(name)
    }
}

/// A transaction that reached finality successfully
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub kind: TxKind,
    pub hash: Word,
    pub block: Option<u64>,
}

/// Round counters as seen on chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundStatus {
    pub number: u64,
    pub submissions: u64,
    pub finalized: bool,
}

/// Renders round input bytes the way they are handed to the engine
pub fn input_to_hex(input: &[u8]) -> String {
    format!("0x{}", hex::encode(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hex_is_left_padded() {
        let w: Word = "0x1".parse().unwrap();
        assert_eq!(w, Word::from_u64(1));
        let w: Word = "abcd".parse().unwrap();
        assert_eq!(&w.0[30..], &[0xab, 0xcd]);
        assert!(w.0[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_hex_is_rejected() {
        let long = format!("0x{}", "11".repeat(33));
        assert!(long.parse::<Word>().is_err());
    }

    #[test]
    fn little_endian_instances_are_reversed() {
        let mut le = [0u8; 32];
        le[0] = 7;
        assert_eq!(Word::from_le_bytes(le), Word::from_u64(7));
    }

    #[test]
    fn engine_json_shapes_decode() {
        let json = r#"{
            "index": 2,
            "value": {"x": "0x01", "y": "0x02"},
            "proof": {"z": "0x03", "c": "0x04"}
        }"#;
        let eval: PartialEval = serde_json::from_str(json).unwrap();
        assert_eq!(eval.index, 2);
        assert_eq!(eval.proof.c, Word::from_u64(4));

        let key: MemberKeyFile =
            serde_json::from_str(r#"{"sk": "0x99", "pk": {"x": "0x0a", "y": "0x0b"}}"#).unwrap();
        assert_eq!(key.pk.x, Word::from_u64(10));

        let pseudo: PseudoRandom =
            serde_json::from_str(r#"{"proof": {"x": "0x1", "y": "0x2"}, "value": [0, 9]}"#)
                .unwrap();
        assert!(pseudo.is_set());
        assert!(!PseudoRandom::default().is_set());
    }

    #[test]
    fn addresses_round_trip_through_text() {
        let text = "0x00000000000000000000000000000000000000aa";
        let addr: Address = text.parse().unwrap();
        assert_eq!(addr.to_string(), text);
        assert!(!addr.is_zero());
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn permissioning_requires_matching_address() {
        let me: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        let other: Address = "0x00000000000000000000000000000000000000bb".parse().unwrap();
        let record = NodeRecord {
            index: 1,
            address: me,
            registered: false,
            pp_submitted: false,
        };
        assert!(record.is_permissioned_for(me));
        assert!(!record.is_permissioned_for(other));
        assert!(!NodeRecord::default().is_permissioned_for(Address::default()));
    }

    #[test]
    fn tx_kind_names_match_serde() {
        for kind in TxKind::ALL.iter() {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn inputs_render_as_hex() {
        assert_eq!(input_to_hex(&[0xab, 0xcd]), "0xabcd");
    }
}
