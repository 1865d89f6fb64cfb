//! Deterministic stand-in for a real zk-SNARK toolchain.

use anyhow::ensure;

use crate::{CircuitArtifacts, CircuitBackend, Proof, ProvingKey, Witness};

/// Produces blake3 digests in place of witnesses and proofs. Identical inputs
/// always give identical proofs.
#[derive(Clone, Debug, Default)]
pub struct MockCircuitBackend {
    fail_with: Option<String>,
}

impl MockCircuitBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose proof generation always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_with: Some(reason.into()),
        }
    }
}

impl CircuitBackend for MockCircuitBackend {
    fn compute_witness(
        &self,
        artifacts: &CircuitArtifacts,
        args: &[String],
    ) -> anyhow::Result<Witness> {
        ensure!(!args.is_empty(), "no circuit arguments");
        let mut hasher = blake3::Hasher::new();
        hasher.update(&artifacts.program);
        for arg in args {
            hasher.update(arg.as_bytes());
            hasher.update(&[0]);
        }
        Ok(Witness(hasher.finalize().as_bytes().to_vec()))
    }

    fn generate_proof(
        &self,
        program: &[u8],
        witness: &Witness,
        proving_key: &ProvingKey,
    ) -> anyhow::Result<Proof> {
        if let Some(reason) = &self.fail_with {
            anyhow::bail!("{}", reason);
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(proving_key.as_bytes());
        hasher.update(program);
        hasher.update(&witness.0);
        Ok(Proof(hasher.finalize().as_bytes().to_vec()))
    }
}
