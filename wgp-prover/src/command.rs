use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context};
use tracing::debug;

use crate::{CircuitArtifacts, CircuitBackend, Proof, ProvingKey, Witness};

/// Drives an external prover executable with the usual two-step CLI:
///
/// ```text
/// <bin> compute-witness -i <program> -s <abi.json> -o <witness> -a <args..>
/// <bin> generate-proof  -i <program> -w <witness> -p <proving.key> -j <proof.json>
/// ```
///
/// Every call runs in its own scratch directory.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    executable: PathBuf,
    base_args: Vec<String>,
}

impl CommandBackend {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments placed before the subcommand, e.g. a container invocation.
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn run(&self, workdir: &Path, args: &[&str]) -> anyhow::Result<()> {
        debug!(bin = %self.executable.display(), ?args, "running prover command");
        let output = Command::new(&self.executable)
            .current_dir(workdir)
            .args(&self.base_args)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn {}", self.executable.display()))?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.executable.display(),
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl CircuitBackend for CommandBackend {
    fn compute_witness(
        &self,
        artifacts: &CircuitArtifacts,
        args: &[String],
    ) -> anyhow::Result<Witness> {
        let dir = tempfile::tempdir().context("create prover scratch dir")?;
        fs::write(dir.path().join("out"), &artifacts.program).context("write program")?;
        fs::write(dir.path().join("abi.json"), serde_json::to_vec(&artifacts.abi)?)
            .context("write abi")?;

        let mut argv = vec![
            "compute-witness",
            "-i",
            "out",
            "-s",
            "abi.json",
            "-o",
            "witness",
            "-a",
        ];
        argv.extend(args.iter().map(String::as_str));
        self.run(dir.path(), &argv)?;

        let witness = fs::read(dir.path().join("witness")).context("read witness")?;
        Ok(Witness(witness))
    }

    fn generate_proof(
        &self,
        program: &[u8],
        witness: &Witness,
        proving_key: &ProvingKey,
    ) -> anyhow::Result<Proof> {
        let dir = tempfile::tempdir().context("create prover scratch dir")?;
        fs::write(dir.path().join("out"), program).context("write program")?;
        fs::write(dir.path().join("witness"), &witness.0).context("write witness")?;
        fs::write(dir.path().join("proving.key"), proving_key.as_bytes())
            .context("write proving key")?;

        self.run(
            dir.path(),
            &[
                "generate-proof",
                "-i",
                "out",
                "-w",
                "witness",
                "-p",
                "proving.key",
                "-j",
                "proof.json",
            ],
        )?;

        let proof = fs::read(dir.path().join("proof.json")).context("read proof")?;
        Ok(Proof(proof))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script_backend(dir: &Path, body: &str) -> CommandBackend {
        let path = dir.join("prover.sh");
        fs::write(&path, body).unwrap();
        CommandBackend::new("/bin/sh").with_base_args([path.display().to_string()])
    }

    #[test]
    fn runs_both_steps() {
        let bin_dir = tempfile::tempdir().unwrap();
        let backend = script_backend(
            bin_dir.path(),
            r#"case "$1" in
  compute-witness) shift 8; echo "$@" > witness ;;
  generate-proof) cat witness proving.key > proof.json ;;
esac"#,
        );
        let artifacts = CircuitArtifacts {
            program: b"body".to_vec(),
            abi: serde_json::json!({"name": "baseline_state"}),
        };

        let witness = backend
            .compute_witness(&artifacts, &["1".into(), "2".into()])
            .unwrap();
        assert_eq!(witness.0, b"1 2\n".to_vec());

        let proof = backend
            .generate_proof(b"body", &witness, &ProvingKey::from_bytes(b"pk".to_vec()))
            .unwrap();
        assert_eq!(proof.0, b"1 2\npk".to_vec());
    }

    #[test]
    fn failing_command_reports_stderr() {
        let bin_dir = tempfile::tempdir().unwrap();
        let err = script_backend(bin_dir.path(), "echo 'bad witness' >&2; exit 3")
            .generate_proof(b"", &Witness(vec![]), &ProvingKey::from_bytes(vec![1]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("bad witness"));
    }
}
