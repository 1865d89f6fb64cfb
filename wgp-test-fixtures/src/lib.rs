//! Shared fixtures for workgroup protocol tests.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde_json::json;
use wgp_common::{
    write_manifest, ArtifactFile, ArtifactManifest, CommitmentMetaData, Job, SupplierContainer,
    TimeWindow, MANIFEST_FILE, MANIFEST_VERSION,
};

pub const SHIELD_ADDRESS: &str = "0x5a1e1d0000000000000000000000000000000001";
pub const WORKFLOW_ID: &str = "wf-0001";
pub const NAMESPACE: &str = "baseline";

pub const OPERATOR_ADDRESS: &str = "0x0f0000000000000000000000000000000000000a";
pub const OPERATOR_ENDPOINT: &str = "http://operator.local:4222";
pub const SUPPLIER_ADDRESS: &str = "0xabc";
pub const SUPPLIER_ENDPOINT: &str = "http://supplier.local:4222";

/// Deterministic ed25519 seeds. Values are arbitrary but fixed so signatures
/// are reproducible across runs.
pub const OPERATOR_SEED: [u8; 32] = [7u8; 32];
pub const SUPPLIER_SEED: [u8; 32] = [9u8; 32];

pub const JOB_START: u64 = 1_700_000_000;
pub const JOB_END: u64 = JOB_START + 86_400;
pub const JOB_TASK_LENGTH: u64 = 3_600;
const CREATED_AT_UNIX: u64 = 1_700_000_000;

/// Commitment hashes computed independently with minimal big-endian integer
/// encoding and SHA-256.
pub mod golden {
    /// `state = 0`, `id = "job-1"`, zero supplier.
    pub const GENESIS_JOB_1: &str =
        "0x453ca174ad473bb5cc331a186018a593e7047feae04279701b623d6708087c60";
    pub const GENESIS_JOB_1_NC1: &str = "92031544232711346867158568608483288467";
    pub const GENESIS_JOB_1_NC2: &str = "307075030688564402829721222602163780704";

    /// `state = 0`, `id = "42"`.
    pub const GENESIS_JOB_42: &str =
        "0x96662b149ec80797a768d594f0c1b9ff30ef8a543bf5cd3c89eaa59f8c4a9802";

    /// `state = 1` chained to [`GENESIS_JOB_1`] with the sample supplier.
    pub const STATE_1_CHAINED: &str =
        "0x2e8a14044c3da063b8f946531ebba6373981865138da3ed870f0db8a83c2739d";

    /// `state = 3` chained to [`GENESIS_JOB_1`] with the sample supplier.
    pub const STATE_3_CHAINED: &str =
        "0x3e5e2ac541b5fbbcbc897274b4f97276eab83ddbc0596b89956769a112d1c008";

    /// As [`STATE_3_CHAINED`] with `contractH1 = 999`.
    pub const STATE_3_CONTRACT_H1_999: &str =
        "0x8b1daf4fddea1227608d267bd80af71bcc44982ef6499fdb59748b2a69f7c617";
}

pub fn sample_job(id: &str) -> Job {
    Job::new(id, TimeWindow::new(JOB_START, JOB_END), JOB_TASK_LENGTH)
}

pub fn sample_meta(state: u64) -> CommitmentMetaData {
    CommitmentMetaData::new(state, SHIELD_ADDRESS)
}

/// `{supplierID: 77, docHash1: 11, docHash2: 12, contractH1: 901, contractH2: 902}`.
pub fn sample_supplier() -> SupplierContainer {
    SupplierContainer {
        id: 1,
        supplier_id: BigUint::from(77u32),
        doc_hash1: BigUint::from(11u32),
        doc_hash2: BigUint::from(12u32),
        contract_h1: BigUint::from(901u32),
        contract_h2: BigUint::from(902u32),
    }
}

/// Availability calendar with a technician free for two task lengths at the
/// start of the sample job window and an electrician free for all of it.
pub fn sample_calendar_json() -> serde_json::Value {
    json!([
        {
            "supplierId": "tech-1",
            "supplierType": "TECHNICIAN",
            "date": JOB_START,
            "slots": [{ "start": JOB_START, "end": JOB_START + 2 * JOB_TASK_LENGTH }]
        },
        {
            "supplierId": "elec-1",
            "supplierType": "ELECTRICIAN",
            "date": JOB_START,
            "slots": [{ "start": JOB_START, "end": JOB_END }]
        }
    ])
}

/// Header bytes preceding the program body in a compiled circuit file.
pub const PROGRAM_HEADER: [u8; 12] = *b"WGPCIRCUIT01";

pub static SAMPLE_PROGRAM_BODY: Lazy<Vec<u8>> =
    Lazy::new(|| (0..4096u32).map(|i| (i * 31 % 251) as u8).collect());

pub const SAMPLE_PROVING_KEY: &[u8] = b"shared-proving-key-from-setup";

/// Contents written by [`write_circuit_dir`].
pub struct CircuitFiles {
    pub program_body: Vec<u8>,
    pub abi: serde_json::Value,
    pub proving_key: Vec<u8>,
}

/// Lay out a compiled circuit under `dir`: `out`, `abi.json`,
/// `keys/proving.key` and, with `with_manifest`, an integrity manifest.
pub fn write_circuit_dir(dir: &Path, with_manifest: bool) -> Result<CircuitFiles> {
    let body = SAMPLE_PROGRAM_BODY.clone();
    let mut program = PROGRAM_HEADER.to_vec();
    program.extend_from_slice(&body);
    fs::write(dir.join("out"), &program).context("write program")?;

    let abi = json!({
        "name": "baseline_state",
        "inputs": ["mjID", "state", "supplierID", "docHash1", "docHash2",
                   "contractH1", "contractH2", "lc1", "lc2", "nc1", "nc2"]
    });
    fs::write(dir.join("abi.json"), serde_json::to_vec_pretty(&abi)?).context("write abi")?;

    fs::create_dir_all(dir.join("keys")).context("create keys dir")?;
    fs::write(dir.join("keys/proving.key"), SAMPLE_PROVING_KEY).context("write proving key")?;

    if with_manifest {
        let manifest = ArtifactManifest {
            manifest_version: MANIFEST_VERSION,
            circuit_name: "baseline_state".into(),
            created_at_unix: CREATED_AT_UNIX,
            program: ArtifactFile::from_bytes("out", &program),
            pk: ArtifactFile::from_bytes("keys/proving.key", SAMPLE_PROVING_KEY),
        };
        write_manifest(dir.join(MANIFEST_FILE), &manifest)?;
    }

    Ok(CircuitFiles {
        program_body: body,
        abi,
        proving_key: SAMPLE_PROVING_KEY.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_halves_match_hash() {
        let nc1 = BigUint::parse_bytes(golden::GENESIS_JOB_1_NC1.as_bytes(), 10).unwrap();
        let nc2 = BigUint::parse_bytes(golden::GENESIS_JOB_1_NC2.as_bytes(), 10).unwrap();
        assert_eq!(
            wgp_common::join_digest_halves(&nc1, &nc2).unwrap(),
            golden::GENESIS_JOB_1
        );
    }

    #[test]
    fn manifest_hashes_written_program() {
        let dir = std::env::temp_dir().join(format!("wgp-fixture-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_circuit_dir(&dir, true).unwrap();
        let manifest = wgp_common::read_manifest(dir.join(MANIFEST_FILE)).unwrap();
        let program = fs::read(dir.join("out")).unwrap();
        assert_eq!(manifest.program.blake3, blake3::hash(&program).to_hex().to_string());
        assert_eq!(manifest.program.size, program.len() as u64);
        fs::remove_dir_all(&dir).unwrap();
    }
}
