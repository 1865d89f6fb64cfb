//! Compiled circuit artifacts and the shared proving key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncReadExt};
use tracing::{debug, info};
use wgp_common::{read_manifest, ArtifactFile, MANIFEST_FILE};

use crate::ProofError;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000_000;
pub const PROGRAM_HEADER_LEN: usize = 12;

/// Where the compiled circuit lives and how to read it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub circuit_dir: PathBuf,
    /// Compiled program, relative to `circuit_dir`.
    pub program_file: String,
    pub abi_file: String,
    /// Proving key produced by the trusted setup, relative to `circuit_dir`.
    pub proving_key_path: String,
    pub chunk_size: usize,
    pub header_len: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            circuit_dir: PathBuf::from("circuits/baseline"),
            program_file: "out".into(),
            abi_file: "abi.json".into(),
            proving_key_path: "keys/proving.key".into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            header_len: PROGRAM_HEADER_LEN,
        }
    }
}

impl CircuitConfig {
    pub fn with_dir(circuit_dir: impl Into<PathBuf>) -> Self {
        Self {
            circuit_dir: circuit_dir.into(),
            ..Self::default()
        }
    }

    pub fn program_path(&self) -> PathBuf {
        self.circuit_dir.join(&self.program_file)
    }

    pub fn abi_path(&self) -> PathBuf {
        self.circuit_dir.join(&self.abi_file)
    }

    pub fn proving_key_path(&self) -> PathBuf {
        self.circuit_dir.join(&self.proving_key_path)
    }
}

/// Program body (header removed) and ABI of the state circuit.
#[derive(Clone, Debug)]
pub struct CircuitArtifacts {
    pub program: Vec<u8>,
    pub abi: serde_json::Value,
}

/// Opaque proving key bytes shared out of band by every participant.
#[derive(Clone)]
pub struct ProvingKey(Vec<u8>);

impl ProvingKey {
    pub async fn load(path: &Path) -> Result<Self, ProofError> {
        let bytes = fs::read(path).await.map_err(|err| {
            ProofError::ProvingKey(format!("failed to read {}: {}", path.display(), err))
        })?;
        if bytes.is_empty() {
            return Err(ProofError::ProvingKey(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ProvingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvingKey")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Stream the compiled program in `chunk_size` reads and load the ABI.
///
/// If a manifest sits next to the artifacts, the program file is checked
/// against it before the header is dropped.
pub async fn load_circuit_artifacts(config: &CircuitConfig) -> Result<CircuitArtifacts, ProofError> {
    let manifest_path = config.circuit_dir.join(MANIFEST_FILE);
    let manifest = if fs::try_exists(&manifest_path).await.unwrap_or(false) {
        Some(read_manifest(&manifest_path).map_err(|err| ProofError::Artifacts(format!("{:#}", err)))?)
    } else {
        None
    };

    let path = config.program_path();
    let (raw, digest) = read_chunked(&path, config.chunk_size).await?;

    if let Some(manifest) = &manifest {
        check_artifact(&manifest.program, raw.len() as u64, &digest)?;
    }
    if raw.len() < config.header_len {
        return Err(ProofError::Artifacts(format!(
            "{} is shorter than its {}-byte header",
            path.display(),
            config.header_len
        )));
    }
    let program = raw[config.header_len..].to_vec();

    let abi_bytes = fs::read(config.abi_path())
        .await
        .map_err(|err| ProofError::Artifacts(format!("failed to read abi: {}", err)))?;
    let abi = serde_json::from_slice(&abi_bytes)
        .map_err(|err| ProofError::Artifacts(format!("invalid abi json: {}", err)))?;

    if let Some(manifest) = &manifest {
        let pk = fs::read(config.proving_key_path())
            .await
            .map_err(|err| ProofError::ProvingKey(err.to_string()))?;
        check_artifact(&manifest.pk, pk.len() as u64, blake3::hash(&pk).to_hex().as_str())?;
    }

    info!(
        program = %path.display(),
        program_len = program.len(),
        verified = manifest.is_some(),
        "loaded circuit artifacts"
    );
    Ok(CircuitArtifacts { program, abi })
}

async fn read_chunked(path: &Path, chunk_size: usize) -> Result<(Vec<u8>, String), ProofError> {
    let mut file = fs::File::open(path).await.map_err(|err| {
        ProofError::Artifacts(format!("failed to open {}: {}", path.display(), err))
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|err| ProofError::Artifacts(err.to_string()))?
        .len() as usize;

    let mut out = Vec::with_capacity(len);
    let mut chunk = vec![0u8; chunk_size.clamp(1, len.max(1))];
    let mut hasher = blake3::Hasher::new();
    loop {
        let n = file
            .read(&mut chunk)
            .await
            .map_err(|err| ProofError::Artifacts(err.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        out.extend_from_slice(&chunk[..n]);
        debug!(read = out.len(), total = len, "program chunk");
    }
    Ok((out, hasher.finalize().to_hex().to_string()))
}

fn check_artifact(expected: &ArtifactFile, size: u64, digest: &str) -> Result<(), ProofError> {
    if expected.size != size || expected.blake3 != digest {
        return Err(ProofError::Artifacts(format!(
            "{} does not match manifest (size {} vs {}, blake3 {} vs {})",
            expected.path, size, expected.size, digest, expected.blake3
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use wgp_test_fixtures::{write_circuit_dir, PROGRAM_HEADER, SAMPLE_PROVING_KEY};

    use super::*;

    #[tokio::test]
    async fn drops_program_header() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_circuit_dir(dir.path(), false).unwrap();
        let mut config = CircuitConfig::with_dir(dir.path());
        config.chunk_size = 100;

        let artifacts = load_circuit_artifacts(&config).await.unwrap();
        assert_eq!(artifacts.program, files.program_body);
        assert_eq!(artifacts.abi, files.abi);
        assert_ne!(&artifacts.program[..PROGRAM_HEADER.len()], &PROGRAM_HEADER);
    }

    #[tokio::test]
    async fn checks_manifest_when_present() {
        let dir = tempfile::tempdir().unwrap();
        write_circuit_dir(dir.path(), true).unwrap();
        let config = CircuitConfig::with_dir(dir.path());
        assert!(load_circuit_artifacts(&config).await.is_ok());

        std::fs::write(dir.path().join("out"), b"WGPCIRCUIT01tampered").unwrap();
        let err = load_circuit_artifacts(&config).await.unwrap_err();
        assert!(matches!(err, ProofError::Artifacts(_)));
    }

    #[tokio::test]
    async fn short_program_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_circuit_dir(dir.path(), false).unwrap();
        std::fs::write(dir.path().join("out"), b"short").unwrap();
        let err = load_circuit_artifacts(&CircuitConfig::with_dir(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[tokio::test]
    async fn proving_key_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        write_circuit_dir(dir.path(), false).unwrap();
        let config = CircuitConfig::with_dir(dir.path());
        let pk = ProvingKey::load(&config.proving_key_path()).await.unwrap();
        assert_eq!(pk.as_bytes(), SAMPLE_PROVING_KEY);

        let missing = ProvingKey::load(&dir.path().join("nope.key")).await;
        assert!(matches!(missing, Err(ProofError::ProvingKey(_))));
    }
}
