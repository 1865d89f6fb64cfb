//! Shared data model and encoding helpers for the workgroup protocol.
//!
//! Every numeric value that ends up inside a commitment is an arbitrary
//! precision non-negative integer (`BigUint`). Integers are fed to SHA-256 as
//! their minimal big-endian byte string, where zero is the single byte `0x00`.
//! Digests are split into two 128-bit halves, which is the representation the
//! on-chain verifier consumes.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{ensure, Context, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

mod types;

pub use types::{
    CommitmentMetaData, Job, JobRequirements, Leaf, StateCode, SupplierContainer, SupplierType,
    TimeWindow, VerifierInput,
};

/// Number of hex digits in a SHA-256 digest / commitment leaf hash.
pub const DIGEST_HEX_LEN: usize = 64;
/// Number of public inputs exposed by [`VerifierInput::public_inputs`].
pub const PUBLIC_INPUT_COUNT: usize = 11;
pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("invalid leaf hash {hash:?}: expected {expected} hex digits, got {actual}")]
    InvalidLeafHash {
        hash: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("invalid integer {0:?}")]
    InvalidInteger(String),

    #[error("value does not fit in {bits} bits: {value}")]
    Overflow { value: String, bits: u64 },
}

/// Minimal big-endian bytes of `value`; zero encodes as `[0x00]`.
pub fn minimal_be_bytes(value: &BigUint) -> Vec<u8> {
    value.to_bytes_be()
}

/// Integer value of a job identifier.
///
/// Decimal identifiers are read as numbers. Any other identifier is read as
/// the big-endian integer of its UTF-8 bytes.
pub fn job_id_value(id: &str) -> BigUint {
    if is_decimal(id) {
        if let Some(value) = BigUint::parse_bytes(id.as_bytes(), 10) {
            return value;
        }
    }
    BigUint::from_bytes_be(id.as_bytes())
}

/// Bytes hashed for a job identifier: the minimal big-endian encoding of
/// [`job_id_value`], so the hashed bytes and the public input always agree.
pub fn job_id_bytes(id: &str) -> Vec<u8> {
    minimal_be_bytes(&job_id_value(id))
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

pub fn parse_decimal(s: &str) -> Result<BigUint, EncodingError> {
    if !is_decimal(s) {
        return Err(EncodingError::InvalidInteger(s.to_string()));
    }
    BigUint::parse_bytes(s.as_bytes(), 10).ok_or_else(|| EncodingError::InvalidInteger(s.to_string()))
}

/// SHA-256 over the concatenation of `parts`.
pub fn sha256_concat<'a, I>(parts: I) -> [u8; 32]
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-256 over the minimal big-endian encodings of `values`, in order.
pub fn sha256_integers(values: &[&BigUint]) -> [u8; 32] {
    let encoded: Vec<Vec<u8>> = values.iter().map(|v| minimal_be_bytes(v)).collect();
    sha256_concat(encoded.iter().map(Vec::as_slice))
}

/// Split a 64-digit hex digest at its midpoint into two 128-bit integers.
pub fn split_digest_hex(hex_digest: &str) -> Result<(BigUint, BigUint), EncodingError> {
    if hex_digest.len() != DIGEST_HEX_LEN {
        return Err(EncodingError::InvalidLeafHash {
            hash: hex_digest.to_string(),
            expected: DIGEST_HEX_LEN,
            actual: hex_digest.len(),
        });
    }
    if !hex_digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(EncodingError::InvalidHex(hex_digest.to_string()));
    }
    let (left, right) = hex_digest.split_at(DIGEST_HEX_LEN / 2);
    let parse = |half: &str| {
        BigUint::parse_bytes(half.as_bytes(), 16)
            .ok_or_else(|| EncodingError::InvalidHex(hex_digest.to_string()))
    };
    Ok((parse(left)?, parse(right)?))
}

pub fn split_digest(digest: &[u8; 32]) -> (BigUint, BigUint) {
    (
        BigUint::from_bytes_be(&digest[..16]),
        BigUint::from_bytes_be(&digest[16..]),
    )
}

/// Split a `0x`-prefixed commitment-log leaf hash into its two halves.
pub fn split_leaf_hash(leaf_hash: &str) -> Result<(BigUint, BigUint), EncodingError> {
    let stripped = strip_hex_prefix(leaf_hash).to_ascii_lowercase();
    split_digest_hex(&stripped)
}

/// Rebuild a `0x`-prefixed leaf hash from two 128-bit halves.
pub fn join_digest_halves(left: &BigUint, right: &BigUint) -> Result<String, EncodingError> {
    for half in [left, right] {
        if half.bits() > 128 {
            return Err(EncodingError::Overflow {
                value: half.to_str_radix(10),
                bits: 128,
            });
        }
    }
    Ok(format!("0x{:032x}{:032x}", left, right))
}

pub fn digest_to_hex(digest: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(digest))
}

pub fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Normalise a leaf or commitment hash for comparison.
pub fn normalize_hash(hash: &str) -> String {
    format!("0x{}", strip_hex_prefix(hash).to_ascii_lowercase())
}

pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub blake3: String,
    pub size: u64,
}

impl ArtifactFile {
    pub fn from_bytes(path: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            blake3: hash_bytes_hex(bytes),
            size: bytes.len() as u64,
        }
    }

    pub fn resolve_path(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.path)
    }
}

/// Integrity manifest shipped beside the circuit artifacts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub manifest_version: u32,
    pub circuit_name: String,
    pub created_at_unix: u64,
    pub program: ArtifactFile,
    pub pk: ArtifactFile,
}

pub fn write_manifest(path: impl AsRef<Path>, manifest: &ArtifactManifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest).context("failed to serialize manifest")?;
    fs::write(path.as_ref(), json).context("failed to write manifest")
}

pub fn read_manifest(path: impl AsRef<Path>) -> Result<ArtifactManifest> {
    let bytes = fs::read(path.as_ref()).context("failed to read manifest file")?;
    let manifest: ArtifactManifest =
        serde_json::from_slice(&bytes).context("failed to parse manifest json")?;
    ensure!(
        manifest.manifest_version == MANIFEST_VERSION,
        "unsupported manifest version {}, expected {}",
        manifest.manifest_version,
        MANIFEST_VERSION
    );
    Ok(manifest)
}

/// Serde helpers for `BigUint` values carried as decimal strings.
///
/// Deserialisation also accepts plain JSON numbers, which is how small state
/// codes and ids show up in hand-written payloads.
pub mod serde_biguint {
    use std::fmt;

    use num_bigint::BigUint;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BigUintVisitor;

        impl de::Visitor<'_> for BigUintVisitor {
            type Value = BigUint;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer or decimal string")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(BigUint::from(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v)
                    .map(BigUint::from)
                    .map_err(|_| E::custom(format!("negative integer {}", v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                super::parse_decimal(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BigUintVisitor)
    }
}
