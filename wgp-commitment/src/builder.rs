use num_bigint::BigUint;
use tracing::debug;
use wgp_common::{
    job_id_bytes, minimal_be_bytes, split_digest, split_leaf_hash, CommitmentMetaData, Job, Leaf,
    StateCode, SupplierContainer, VerifierInput,
};

use crate::{error::CommitmentError, log::CommitLog};

/// Leaves read when chaining a commitment: indices `[0, LEAF_WINDOW)`.
pub const LEAF_WINDOW: u64 = 10;

/// Values actually fed to the hash for a given phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskedBody {
    /// Supplier multiplier, `0` for supplier-identified phases.
    pub a: BigUint,
    /// Contract multiplier, `1` for contract-identified phases.
    pub g: BigUint,
    /// Container after the phase overwrite; this is what the caller gets back.
    pub container: SupplierContainer,
    pub supplier_id: BigUint,
    pub doc_hash1: BigUint,
    pub doc_hash2: BigUint,
    pub contract_h1: BigUint,
    pub contract_h2: BigUint,
}

/// Apply the phase overwrite and multipliers to a supplier container.
///
/// Supplier-identified phases replace every container field with the state
/// code before masking, so their returned container carries the state code
/// while the hashed body is all zero.
pub fn masked_body(state: StateCode, supplier: &SupplierContainer) -> MaskedBody {
    let mut container = supplier.clone();
    if state.is_supplier_phase() {
        let code = state.as_biguint();
        container.supplier_id = code.clone();
        container.doc_hash1 = code.clone();
        container.doc_hash2 = code.clone();
        container.contract_h1 = code.clone();
        container.contract_h2 = code;
    }

    let a = BigUint::from(u8::from(!state.is_supplier_phase()));
    let g = BigUint::from(u8::from(state.is_contract_phase()));
    let ga = &g * &a;

    MaskedBody {
        supplier_id: &a * &container.supplier_id,
        doc_hash1: &a * &container.doc_hash1,
        doc_hash2: &a * &container.doc_hash2,
        contract_h1: &ga * &container.contract_h1,
        contract_h2: &ga * &container.contract_h2,
        a,
        g,
        container,
    }
}

/// Derive the commitment for `meta.state` chained to `previous`.
///
/// `previous` is the hash of the last leaf in the shield's log. It is ignored
/// at genesis and required for every other state.
pub fn build_commitment(
    job: &Job,
    meta: &CommitmentMetaData,
    supplier: Option<SupplierContainer>,
    previous: Option<&str>,
) -> Result<VerifierInput, CommitmentError> {
    let (lc1, lc2) = if meta.state.is_genesis() {
        (BigUint::default(), BigUint::default())
    } else {
        let hash = previous.ok_or_else(|| CommitmentError::MissingPreviousLeaf {
            shield: meta.shield_addr.clone(),
            state: meta.state.0,
        })?;
        split_leaf_hash(hash)?
    };

    let body = masked_body(meta.state, &supplier.unwrap_or_default());

    let state_bytes = minimal_be_bytes(&meta.state.as_biguint());
    let job_bytes = job_id_bytes(&job.id);
    let supplier_bytes = minimal_be_bytes(&body.supplier_id);
    let lc1_bytes = minimal_be_bytes(&lc1);
    let hash1 = wgp_common::sha256_concat([
        state_bytes.as_slice(),
        job_bytes.as_slice(),
        supplier_bytes.as_slice(),
        lc1_bytes.as_slice(),
    ]);

    // contractH2 is masked but never hashed.
    let hash2 = wgp_common::sha256_integers(&[
        &body.doc_hash1,
        &body.doc_hash2,
        &body.contract_h1,
        &lc2,
    ]);

    let (left1, right1) = split_digest(&hash1);
    let (left2, right2) = split_digest(&hash2);
    let commitment = wgp_common::sha256_integers(&[&left1, &right1, &left2, &right2]);
    let (nc1, nc2) = split_digest(&commitment);

    let container = body.container;
    Ok(VerifierInput {
        mj_id: job.id.clone(),
        state: meta.state,
        supplier_id: container.supplier_id,
        doc_hash1: container.doc_hash1,
        doc_hash2: container.doc_hash2,
        contract_h1: container.contract_h1,
        contract_h2: container.contract_h2,
        lc1,
        lc2,
        nc1,
        nc2,
    })
}

/// Builds commitments against a live commitment log.
pub struct CommitmentBuilder<L> {
    log: L,
    window: u64,
}

impl<L: CommitLog> CommitmentBuilder<L> {
    pub fn new(log: L) -> Self {
        Self {
            log,
            window: LEAF_WINDOW,
        }
    }

    /// Read leaves `[0, window)` when looking for the previous leaf.
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window.max(1);
        self
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Last leaf within the chaining window, if the shield has any.
    pub async fn latest_leaf(&self, shield: &str) -> Result<Option<Leaf>, CommitmentError> {
        let mut leaves = self.log.get_leaves(shield, 0, self.window).await?;
        Ok(leaves.pop())
    }

    pub async fn build(
        &self,
        job: &Job,
        meta: &CommitmentMetaData,
        supplier: Option<SupplierContainer>,
    ) -> Result<VerifierInput, CommitmentError> {
        let previous = if meta.state.is_genesis() {
            None
        } else {
            self.latest_leaf(&meta.shield_addr).await?
        };
        self.build_after(job, meta, supplier, previous.as_ref())
    }

    /// Build chained to a known `previous` leaf instead of searching the
    /// window. `previous` is ignored for the genesis state.
    pub fn build_after(
        &self,
        job: &Job,
        meta: &CommitmentMetaData,
        supplier: Option<SupplierContainer>,
        previous: Option<&Leaf>,
    ) -> Result<VerifierInput, CommitmentError> {
        let previous = if meta.state.is_genesis() {
            None
        } else {
            let leaf = previous.ok_or_else(|| CommitmentError::MissingPreviousLeaf {
                shield: meta.shield_addr.clone(),
                state: meta.state.0,
            })?;
            Some(leaf.hash.as_str())
        };

        let input = build_commitment(job, meta, supplier, previous)?;
        debug!(
            shield = %meta.shield_addr,
            state = %meta.state,
            job = %job.id,
            nc1 = %input.nc1,
            nc2 = %input.nc2,
            "generated commitment"
        );
        Ok(input)
    }
}
