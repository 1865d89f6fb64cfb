//! Workflow state commitments.
//!
//! A commitment chains the current workflow phase to the previous leaf of the
//! commitment log:
//!
//! ```text
//! hash1 = SHA256(state || mjID || supplierID' || lc1)
//! hash2 = SHA256(docHash1' || docHash2' || contractH1' || lc2)
//! C     = SHA256(hash1[..16] || hash1[16..] || hash2[..16] || hash2[16..])
//! (nc1, nc2) = (C[..16], C[16..])
//! ```
//!
//! where primed values are masked by the phase multipliers and `(lc1, lc2)`
//! are the halves of the previous leaf hash (zero at genesis). Every integer
//! is hashed as its minimal big-endian byte string.

pub mod builder;
pub mod error;
pub mod log;

pub use builder::{build_commitment, masked_body, CommitmentBuilder, MaskedBody, LEAF_WINDOW};
pub use error::{CommitLogError, CommitmentError};
pub use log::{CommitLog, LeafSubmission, MemoryCommitLog};
