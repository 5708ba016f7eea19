use std::collections::{HashMap, HashSet};

use num_bigint::BigUint;
use tokio::sync::RwLock;

use super::{Entry, Store};
use crate::error::DbError;

#[derive(Default)]
struct Pending {
    inserts: HashMap<BigUint, Vec<BigUint>>,
    deletes: HashSet<BigUint>,
    root: Option<BigUint>,
}

/// Stages inserts and deletes on top of a backing store without touching it
/// until [`TxOverlayDb::commit`].
///
/// There is no locking across operations: one overlay serves exactly one
/// batch build, and commit must not be interleaved with further writes.
pub struct TxOverlayDb<B> {
    backing: B,
    pending: RwLock<Pending>,
}

impl<B: Store> TxOverlayDb<B> {
    pub fn new(backing: B) -> Self {
        Self {
            backing,
            pending: RwLock::new(Pending::default()),
        }
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    /// Number of staged inserts and deletes.
    pub async fn pending_len(&self) -> (usize, usize) {
        let pending = self.pending.read().await;
        (pending.inserts.len(), pending.deletes.len())
    }

    /// Merges the staged changes into the backing store and clears them.
    /// The staged root is dropped; whoever consolidates records roots.
    pub async fn commit(&self) -> Result<(), DbError> {
        self.commit_with(Vec::new(), None).await
    }

    /// Like [`TxOverlayDb::commit`], with `extra` entries and the backing
    /// root written in the same [`Store::apply`]. Staged changes are kept
    /// until the backing store accepts them, so a failed commit can be
    /// retried as is.
    pub async fn commit_with(&self, extra: Vec<Entry>, root: Option<BigUint>) -> Result<(), DbError> {
        let mut pending = self.pending.write().await;
        let mut inserts: Vec<Entry> = pending
            .inserts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        inserts.extend(extra);
        let deletes: Vec<BigUint> = pending.deletes.iter().cloned().collect();

        tracing::debug!(
            inserts = inserts.len(),
            deletes = deletes.len(),
            "committing overlay"
        );
        self.backing.apply(inserts, deletes, root).await?;
        *pending = Pending::default();
        Ok(())
    }
}

impl<B: Store> Store for TxOverlayDb<B> {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError> {
        {
            let pending = self.pending.read().await;
            if let Some(value) = pending.inserts.get(key) {
                return Ok(Some(value.clone()));
            }
            if pending.deletes.contains(key) {
                return Ok(None);
            }
        }
        self.backing.get(key).await
    }

    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError> {
        let mut pending = self.pending.write().await;
        for (key, value) in inserts {
            pending.deletes.remove(&key);
            pending.inserts.insert(key, value);
        }
        Ok(())
    }

    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError> {
        let mut pending = self.pending.write().await;
        for key in keys {
            pending.inserts.remove(&key);
            pending.deletes.insert(key);
        }
        Ok(())
    }

    async fn get_root(&self) -> Result<BigUint, DbError> {
        let staged = self.pending.read().await.root.clone();
        match staged {
            Some(root) => Ok(root),
            None => self.backing.get_root().await,
        }
    }

    async fn set_root(&self, root: BigUint) -> Result<(), DbError> {
        self.pending.write().await.root = Some(root);
        Ok(())
    }
}
