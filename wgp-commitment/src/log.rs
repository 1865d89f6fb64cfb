//! Commitment log collaborator.
//!
//! The log is an append-only list of leaf hashes per shield address. The
//! production store is the commit manager service; [`MemoryCommitLog`] keeps
//! the same semantics in process.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use wgp_common::{normalize_hash, Leaf};

use crate::error::CommitLogError;

/// A new leaf together with the proof that justifies it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafSubmission {
    /// Organization address pushing the leaf.
    pub sender: String,
    /// `0x`-prefixed commitment hash.
    pub value: String,
    /// Public inputs of the state proof, decimal strings.
    pub public_inputs: Vec<String>,
    #[serde(default)]
    pub proof: Vec<u8>,
}

#[async_trait]
pub trait CommitLog: Send + Sync {
    /// Append a leaf, returning its index.
    async fn append_leaf(&self, shield: &str, leaf: &LeafSubmission)
        -> Result<u64, CommitLogError>;

    /// Up to `count` leaves starting at `start`, in index order.
    async fn get_leaves(
        &self,
        shield: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Leaf>, CommitLogError>;

    async fn get_tracked(&self) -> Result<Vec<String>, CommitLogError>;

    /// Start tracking a shield. Returns `false` if it was already tracked.
    async fn track(&self, shield: &str) -> Result<bool, CommitLogError>;
}

#[async_trait]
impl<T: CommitLog + ?Sized> CommitLog for Arc<T> {
    async fn append_leaf(
        &self,
        shield: &str,
        leaf: &LeafSubmission,
    ) -> Result<u64, CommitLogError> {
        (**self).append_leaf(shield, leaf).await
    }

    async fn get_leaves(
        &self,
        shield: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Leaf>, CommitLogError> {
        (**self).get_leaves(shield, start, count).await
    }

    async fn get_tracked(&self) -> Result<Vec<String>, CommitLogError> {
        (**self).get_tracked().await
    }

    async fn track(&self, shield: &str) -> Result<bool, CommitLogError> {
        (**self).track(shield).await
    }
}

#[derive(Default)]
pub struct MemoryCommitLog {
    trees: RwLock<HashMap<String, Vec<Leaf>>>,
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that already tracks `shield`.
    pub fn tracking(shield: &str) -> Self {
        let mut trees = HashMap::new();
        trees.insert(shield.to_string(), Vec::new());
        Self {
            trees: RwLock::new(trees),
        }
    }

    /// Insert a raw leaf hash without a proof, bypassing verification.
    pub async fn seed_leaf(&self, shield: &str, hash: &str) -> u64 {
        let mut trees = self.trees.write().await;
        let leaves = trees.entry(shield.to_string()).or_default();
        let index = leaves.len() as u64;
        leaves.push(Leaf {
            index,
            hash: normalize_hash(hash),
        });
        index
    }

    pub async fn len(&self, shield: &str) -> usize {
        self.trees
            .read()
            .await
            .get(shield)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CommitLog for MemoryCommitLog {
    async fn append_leaf(
        &self,
        shield: &str,
        leaf: &LeafSubmission,
    ) -> Result<u64, CommitLogError> {
        if leaf.public_inputs.is_empty() {
            return Err(CommitLogError::Rejected(
                "leaf submitted without public inputs".into(),
            ));
        }
        let mut trees = self.trees.write().await;
        let leaves = trees
            .get_mut(shield)
            .ok_or_else(|| CommitLogError::UntrackedShield(shield.to_string()))?;
        let index = leaves.len() as u64;
        leaves.push(Leaf {
            index,
            hash: normalize_hash(&leaf.value),
        });
        Ok(index)
    }

    async fn get_leaves(
        &self,
        shield: &str,
        start: u64,
        count: u64,
    ) -> Result<Vec<Leaf>, CommitLogError> {
        let trees = self.trees.read().await;
        let leaves = trees
            .get(shield)
            .ok_or_else(|| CommitLogError::UntrackedShield(shield.to_string()))?;
        Ok(leaves
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .cloned()
            .collect())
    }

    async fn get_tracked(&self) -> Result<Vec<String>, CommitLogError> {
        let mut tracked: Vec<String> = self.trees.read().await.keys().cloned().collect();
        tracked.sort();
        Ok(tracked)
    }

    async fn track(&self, shield: &str) -> Result<bool, CommitLogError> {
        let mut trees = self.trees.write().await;
        if trees.contains_key(shield) {
            return Ok(false);
        }
        trees.insert(shield.to_string(), Vec::new());
        Ok(true)
    }
}
