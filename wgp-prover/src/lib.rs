//! Proof pipeline for workflow state transitions.
//!
//! Compiled circuit artifacts are loaded once and cached. Witness computation
//! and proof generation are delegated to a [`CircuitBackend`] and run on the
//! blocking thread pool.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

mod artifacts;
mod command;
#[cfg(any(test, feature = "mock"))]
mod mock;

pub use artifacts::{
    load_circuit_artifacts, CircuitArtifacts, CircuitConfig, ProvingKey, DEFAULT_CHUNK_SIZE,
    PROGRAM_HEADER_LEN,
};
pub use command::CommandBackend;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockCircuitBackend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("circuit artifacts unavailable: {0}")]
    Artifacts(String),

    #[error("proving key unavailable: {0}")]
    ProvingKey(String),

    #[error("proof generation failed: {0}")]
    ProofGenerationFailed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofType {
    Genesis,
    Transition,
}

impl ProofType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProofType::Genesis => "genesis",
            ProofType::Transition => "transition",
        }
    }

    /// Proof type for a commitment at `state`.
    pub fn for_state(state: u64) -> Self {
        if state == 0 {
            ProofType::Genesis
        } else {
            ProofType::Transition
        }
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofType {
    type Err = ProofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "genesis" => Ok(ProofType::Genesis),
            "transition" => Ok(ProofType::Transition),
            other => Err(ProofError::InvalidArgument(format!(
                "unknown proof type {:?}",
                other
            ))),
        }
    }
}

/// Values satisfying the circuit constraints for one set of arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Witness(pub Vec<u8>);

/// Serialized zk-SNARK proof as produced by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof(#[serde(with = "hex_bytes")] pub Vec<u8>);

/// External zk-SNARK toolchain.
pub trait CircuitBackend: Send + Sync {
    fn compute_witness(
        &self,
        artifacts: &CircuitArtifacts,
        args: &[String],
    ) -> anyhow::Result<Witness>;

    fn generate_proof(
        &self,
        program: &[u8],
        witness: &Witness,
        proving_key: &ProvingKey,
    ) -> anyhow::Result<Proof>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOutput {
    pub proof_type: ProofType,
    pub proof: Proof,
    /// Arguments the proof was generated for, in circuit order.
    pub public_inputs: Vec<String>,
}

/// Lazily initialised proving pipeline bound to one circuit directory.
pub struct ProofPipeline {
    config: CircuitConfig,
    backend: Arc<dyn CircuitBackend>,
    artifacts: OnceCell<Arc<CircuitArtifacts>>,
    proving_key: OnceCell<Arc<ProvingKey>>,
}

impl ProofPipeline {
    pub fn new(config: CircuitConfig, backend: Arc<dyn CircuitBackend>) -> Self {
        Self {
            config,
            backend,
            artifacts: OnceCell::new(),
            proving_key: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Compiled artifacts, read from disk on first use only.
    pub async fn artifacts(&self) -> Result<Arc<CircuitArtifacts>, ProofError> {
        self.artifacts
            .get_or_try_init(|| async {
                load_circuit_artifacts(&self.config).await.map(Arc::new)
            })
            .await
            .cloned()
    }

    async fn proving_key(&self) -> Result<Arc<ProvingKey>, ProofError> {
        self.proving_key
            .get_or_try_init(|| async {
                ProvingKey::load(&self.config.proving_key_path())
                    .await
                    .map(Arc::new)
            })
            .await
            .cloned()
    }

    pub async fn generate_proof(
        &self,
        proof_type: &str,
        args: Vec<String>,
    ) -> Result<ProofOutput, ProofError> {
        let proof_type: ProofType = proof_type.parse()?;
        let artifacts = self.artifacts().await?;
        let proving_key = self.proving_key().await?;
        let backend = Arc::clone(&self.backend);
        let inputs = args.clone();

        let proof = tokio::task::spawn_blocking(move || -> anyhow::Result<Proof> {
            let witness = backend.compute_witness(&artifacts, &inputs)?;
            backend.generate_proof(&artifacts.program, &witness, &proving_key)
        })
        .await
        .map_err(|err| ProofError::ProofGenerationFailed(format!("prover task: {}", err)))?
        .map_err(|err| {
            warn!(%proof_type, error = %format!("{:#}", err), "circuit backend failed");
            ProofError::ProofGenerationFailed(format!("{:#}", err))
        })?;

        info!(%proof_type, proof_len = proof.0.len(), "generated proof");
        Ok(ProofOutput {
            proof_type,
            proof,
            public_inputs: args,
        })
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(wgp_common::strip_hex_prefix(&s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use wgp_test_fixtures::{write_circuit_dir, SAMPLE_PROGRAM_BODY};

    use super::*;

    struct FailingBackend;

    impl CircuitBackend for FailingBackend {
        fn compute_witness(&self, _: &CircuitArtifacts, _: &[String]) -> anyhow::Result<Witness> {
            Ok(Witness(vec![1]))
        }

        fn generate_proof(&self, _: &[u8], _: &Witness, _: &ProvingKey) -> anyhow::Result<Proof> {
            bail!("constraint system unsatisfied")
        }
    }

    struct CountingBackend {
        witnesses: AtomicUsize,
    }

    impl CircuitBackend for CountingBackend {
        fn compute_witness(&self, artifacts: &CircuitArtifacts, _: &[String]) -> anyhow::Result<Witness> {
            self.witnesses.fetch_add(1, Ordering::SeqCst);
            Ok(Witness(artifacts.program[..4].to_vec()))
        }

        fn generate_proof(&self, program: &[u8], witness: &Witness, pk: &ProvingKey) -> anyhow::Result<Proof> {
            assert_eq!(program, SAMPLE_PROGRAM_BODY.as_slice());
            let mut proof = witness.0.clone();
            proof.extend_from_slice(pk.as_bytes());
            Ok(Proof(proof))
        }
    }

    fn pipeline_in(dir: &std::path::Path, backend: Arc<dyn CircuitBackend>) -> ProofPipeline {
        write_circuit_dir(dir, false).unwrap();
        ProofPipeline::new(CircuitConfig::with_dir(dir), backend)
    }

    #[test]
    fn proof_type_parsing() {
        assert_eq!("genesis".parse::<ProofType>().unwrap(), ProofType::Genesis);
        assert_eq!(ProofType::for_state(3), ProofType::Transition);
        assert!(matches!(
            "recursive".parse::<ProofType>(),
            Err(ProofError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_proof_type_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = ProofPipeline::new(
            CircuitConfig::with_dir(dir.path().join("missing")),
            Arc::new(FailingBackend),
        );
        let err = pipeline.generate_proof("bogus", vec![]).await.unwrap_err();
        assert!(matches!(err, ProofError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn backend_failure_is_proof_generation_failed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path(), Arc::new(FailingBackend));
        let err = pipeline
            .generate_proof("genesis", vec!["1".into()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProofError::ProofGenerationFailed("constraint system unsatisfied".into())
        );
    }

    #[tokio::test]
    async fn artifacts_are_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(CountingBackend {
            witnesses: AtomicUsize::new(0),
        });
        let pipeline = pipeline_in(dir.path(), backend.clone());

        let first = pipeline
            .generate_proof("genesis", vec!["7".into()])
            .await
            .unwrap();
        // Removing the program must not matter once it is cached.
        std::fs::remove_file(dir.path().join("out")).unwrap();
        let second = pipeline
            .generate_proof("transition", vec!["8".into()])
            .await
            .unwrap();

        assert_eq!(first.proof, second.proof);
        assert_eq!(second.proof_type, ProofType::Transition);
        assert_eq!(second.public_inputs, vec!["8".to_string()]);
        assert_eq!(backend.witnesses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn proof_serializes_as_hex() {
        let json = serde_json::to_string(&Proof(vec![0xde, 0xad])).unwrap();
        assert_eq!(json, "\"0xdead\"");
        let back: Proof = serde_json::from_str(&json).unwrap();
        assert_eq!(back.0, vec![0xde, 0xad]);
    }
}
