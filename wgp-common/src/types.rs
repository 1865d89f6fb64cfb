//! Workflow data carried by protocol messages and commitments.

use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{job_id_value, join_digest_halves, serde_biguint, EncodingError};

/// Workflow phase code committed alongside the state.
///
/// - `0` genesis
/// - `1`, `2`, `5` supplier-identified phases
/// - `3`, `4` contract-identified phases
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateCode(pub u64);

impl StateCode {
    pub const GENESIS: StateCode = StateCode(0);

    pub fn is_genesis(self) -> bool {
        self.0 == 0
    }

    pub fn is_supplier_phase(self) -> bool {
        matches!(self.0, 1 | 2 | 5)
    }

    pub fn is_contract_phase(self) -> bool {
        matches!(self.0, 3 | 4)
    }

    pub fn as_biguint(self) -> BigUint {
        BigUint::from(self.0)
    }
}

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for StateCode {
    fn from(value: u64) -> Self {
        StateCode(value)
    }
}

/// Inclusive time window, in seconds since the unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: u64,
    pub end: u64,
}

impl TimeWindow {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Overlap of two windows, if any.
    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(TimeWindow { start, end })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupplierType(pub String);

impl SupplierType {
    pub const TECHNICIAN: &'static str = "TECHNICIAN";

    pub fn technician() -> Self {
        SupplierType(Self::TECHNICIAN.to_string())
    }
}

impl Default for SupplierType {
    fn default() -> Self {
        Self::technician()
    }
}

impl fmt::Display for SupplierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequirements {
    /// Required continuous working time, in seconds.
    #[serde(default)]
    pub task_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier_type: Option<SupplierType>,
}

/// The job being matched and committed.
///
/// Only `id`, `tw` and `reqs` are interpreted; every other field is carried
/// through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub tw: TimeWindow,
    #[serde(default)]
    pub reqs: JobRequirements,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn new(id: impl Into<String>, tw: TimeWindow, task_length: u64) -> Self {
        Self {
            id: id.into(),
            tw,
            reqs: JobRequirements {
                task_length,
                supplier_type: None,
            },
            extra: Map::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentMetaData {
    pub state: StateCode,
    #[serde(rename = "shieldAddr")]
    pub shield_addr: String,
}

impl CommitmentMetaData {
    pub fn new(state: impl Into<StateCode>, shield_addr: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            shield_addr: shield_addr.into(),
        }
    }
}

/// Supplier and contract identifiers folded into a commitment.
///
/// All fields are zero until the workflow phase requires them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierContainer {
    #[serde(default)]
    pub id: u64,
    #[serde(rename = "supplierID", with = "serde_biguint", default)]
    pub supplier_id: BigUint,
    #[serde(rename = "docHash1", with = "serde_biguint", default)]
    pub doc_hash1: BigUint,
    #[serde(rename = "docHash2", with = "serde_biguint", default)]
    pub doc_hash2: BigUint,
    #[serde(rename = "contractH1", with = "serde_biguint", default)]
    pub contract_h1: BigUint,
    #[serde(rename = "contractH2", with = "serde_biguint", default)]
    pub contract_h2: BigUint,
}

/// Commitment output: the value pushed to the commitment log and the public
/// input vector of the state proof.
///
/// `lc1`/`lc2` are the halves of the previous leaf hash, `nc1`/`nc2` the
/// halves of the new commitment hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierInput {
    #[serde(rename = "mjID")]
    pub mj_id: String,
    pub state: StateCode,
    #[serde(rename = "supplierID", with = "serde_biguint")]
    pub supplier_id: BigUint,
    #[serde(rename = "docHash1", with = "serde_biguint")]
    pub doc_hash1: BigUint,
    #[serde(rename = "docHash2", with = "serde_biguint")]
    pub doc_hash2: BigUint,
    #[serde(rename = "contractH1", with = "serde_biguint")]
    pub contract_h1: BigUint,
    #[serde(rename = "contractH2", with = "serde_biguint")]
    pub contract_h2: BigUint,
    #[serde(with = "serde_biguint")]
    pub lc1: BigUint,
    #[serde(with = "serde_biguint")]
    pub lc2: BigUint,
    #[serde(with = "serde_biguint")]
    pub nc1: BigUint,
    #[serde(with = "serde_biguint")]
    pub nc2: BigUint,
}

impl VerifierInput {
    /// `0x`-prefixed hash of the new commitment, as stored in the log.
    pub fn commitment_hash(&self) -> Result<String, EncodingError> {
        join_digest_halves(&self.nc1, &self.nc2)
    }

    /// `0x`-prefixed hash of the leaf this commitment chains from.
    pub fn previous_hash(&self) -> Result<String, EncodingError> {
        join_digest_halves(&self.lc1, &self.lc2)
    }

    /// Public inputs in circuit order, as decimal strings.
    pub fn public_inputs(&self) -> Vec<String> {
        [
            &job_id_value(&self.mj_id),
            &self.state.as_biguint(),
            &self.supplier_id,
            &self.doc_hash1,
            &self.doc_hash2,
            &self.contract_h1,
            &self.contract_h2,
            &self.lc1,
            &self.lc2,
            &self.nc1,
            &self.nc2,
        ]
        .iter()
        .map(|v| v.to_str_radix(10))
        .collect()
    }
}

/// One entry of the append-only commitment log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    #[serde(default, alias = "leafIndex")]
    pub index: u64,
    pub hash: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Num(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_code_phases() {
        assert!(StateCode(0).is_genesis());
        for s in [1, 2, 5] {
            assert!(StateCode(s).is_supplier_phase());
            assert!(!StateCode(s).is_contract_phase());
        }
        for s in [3, 4] {
            assert!(StateCode(s).is_contract_phase());
        }
        assert!(!StateCode(6).is_supplier_phase() && !StateCode(6).is_contract_phase());
    }

    #[test]
    fn job_keeps_unknown_fields_and_numeric_ids() {
        let job: Job = serde_json::from_str(
            r#"{"id":7,"tw":{"start":10,"end":20},"reqs":{"taskLength":5},"site":"north"}"#,
        )
        .unwrap();
        assert_eq!(job.id, "7");
        assert_eq!(job.reqs.task_length, 5);
        assert_eq!(job.extra["site"], "north");
        let back = serde_json::to_value(&job).unwrap();
        assert_eq!(back["site"], "north");
    }

    #[test]
    fn supplier_container_accepts_strings_and_numbers() {
        let supplier: SupplierContainer = serde_json::from_str(
            r#"{"id":1,"supplierID":"340282366920938463463374607431768211457","docHash1":3}"#,
        )
        .unwrap();
        assert_eq!(supplier.doc_hash1, BigUint::from(3u8));
        assert_eq!(supplier.supplier_id, (BigUint::from(1u8) << 128) + 1u8);
        assert_eq!(supplier.contract_h2, BigUint::default());
    }

    #[test]
    fn meta_uses_wire_field_names() {
        let meta: CommitmentMetaData =
            serde_json::from_str(r#"{"state":3,"shieldAddr":"0xshield"}"#).unwrap();
        assert_eq!(meta, CommitmentMetaData::new(3, "0xshield"));
    }

    #[test]
    fn window_intersection() {
        let a = TimeWindow::new(0, 100);
        assert_eq!(a.intersect(&TimeWindow::new(50, 150)), Some(TimeWindow::new(50, 100)));
        assert_eq!(a.intersect(&TimeWindow::new(100, 150)), None);
    }
}
