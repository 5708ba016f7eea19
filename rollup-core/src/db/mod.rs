//! Key-value stores holding tree nodes, account leaves and rollup records.
//!
//! Keys are field elements and values are arrays of field elements. Every
//! store is a shared handle: all operations take `&self`.

mod overlay;
mod sqlite;

use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigUint;
use rollup_common::{
    constants::{DB_BATCH_TAG, DB_IDX_TAG, DB_MASTER_TAG, DB_STATE_TAG},
    eth_to_field, poseidon, EthAddress, HashError,
};
use tokio::sync::RwLock;

use crate::error::DbError;

pub use overlay::TxOverlayDb;
pub use sqlite::SqliteStore;

pub type Entry = (BigUint, Vec<BigUint>);

#[allow(async_fn_in_trait)]
pub trait Store {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError>;
    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError>;
    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError>;
    async fn get_root(&self) -> Result<BigUint, DbError>;
    async fn set_root(&self, root: BigUint) -> Result<(), DbError>;

    /// Inserts, deletes and optionally moves the root as one unit. Stores
    /// that can fail halfway override this with a transaction.
    async fn apply(
        &self,
        inserts: Vec<Entry>,
        deletes: Vec<BigUint>,
        root: Option<BigUint>,
    ) -> Result<(), DbError> {
        self.multi_ins(inserts).await?;
        self.multi_del(deletes).await?;
        if let Some(root) = root {
            self.set_root(root).await?;
        }
        Ok(())
    }
}

impl<S: Store> Store for Arc<S> {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError> {
        (**self).get(key).await
    }

    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError> {
        (**self).multi_ins(inserts).await
    }

    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError> {
        (**self).multi_del(keys).await
    }

    async fn get_root(&self) -> Result<BigUint, DbError> {
        (**self).get_root().await
    }

    async fn set_root(&self, root: BigUint) -> Result<(), DbError> {
        (**self).set_root(root).await
    }

    async fn apply(
        &self,
        inserts: Vec<Entry>,
        deletes: Vec<BigUint>,
        root: Option<BigUint>,
    ) -> Result<(), DbError> {
        (**self).apply(inserts, deletes, root).await
    }
}

#[derive(Default)]
pub struct MemStore {
    entries: RwLock<HashMap<BigUint, Vec<BigUint>>>,
    root: RwLock<BigUint>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of every entry, in no particular order.
    pub async fn entries(&self) -> Vec<Entry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Store for MemStore {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError> {
        let mut entries = self.entries.write().await;
        for (key, value) in inserts {
            entries.insert(key, value);
        }
        Ok(())
    }

    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(&key);
        }
        Ok(())
    }

    async fn get_root(&self) -> Result<BigUint, DbError> {
        Ok(self.root.read().await.clone())
    }

    async fn set_root(&self, root: BigUint) -> Result<(), DbError> {
        *self.root.write().await = root;
        Ok(())
    }
}

/// Where the raw state of leaf `idx` with hash `state_hash` is kept.
pub fn state_key(state_hash: &BigUint, idx: u64) -> Result<BigUint, HashError> {
    poseidon(&[BigUint::from(DB_STATE_TAG), state_hash.clone(), BigUint::from(idx)])
}

/// Index of the account owned by `eth_address` for `coin`.
pub fn idx_key(coin: u32, eth_address: &EthAddress) -> Result<BigUint, HashError> {
    poseidon(&[
        BigUint::from(DB_IDX_TAG),
        BigUint::from(coin),
        eth_to_field(eth_address),
    ])
}

pub fn master_key() -> Result<BigUint, HashError> {
    poseidon(&[BigUint::from(DB_MASTER_TAG)])
}

pub fn batch_key(batch_number: u64) -> Result<BigUint, HashError> {
    poseidon(&[BigUint::from(DB_BATCH_TAG), BigUint::from(batch_number)])
}

pub(crate) fn single_u64(value: &[BigUint], what: &str) -> Result<u64, DbError> {
    use num_traits::ToPrimitive;

    value
        .first()
        .and_then(|v| v.to_u64())
        .ok_or_else(|| DbError::Corrupted(format!("{} is not a u64", what)))
}
