use std::sync::atomic::{AtomicBool, Ordering};

use num_bigint::BigUint;
use rollup_common::{EthAddress, OffChainTx, OnChainTx, Transaction, TxSignature};

use crate::batch::{BatchBuilder, BatchConfig};
use crate::db::{Entry, MemStore, Store};
use crate::error::DbError;
use crate::rollup_db::RollupDb;

/// Memory store whose writes can be switched to fail. A refused write
/// leaves the store untouched.
#[derive(Default)]
pub struct FailingStore {
    inner: MemStore,
    fail: AtomicBool,
}

impl FailingStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    fn check(&self) -> Result<(), DbError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DbError::Corrupted("write refused".to_string()));
        }
        Ok(())
    }
}

impl Store for FailingStore {
    async fn get(&self, key: &BigUint) -> Result<Option<Vec<BigUint>>, DbError> {
        self.inner.get(key).await
    }

    async fn multi_ins(&self, inserts: Vec<Entry>) -> Result<(), DbError> {
        self.check()?;
        self.inner.multi_ins(inserts).await
    }

    async fn multi_del(&self, keys: Vec<BigUint>) -> Result<(), DbError> {
        self.check()?;
        self.inner.multi_del(keys).await
    }

    async fn get_root(&self) -> Result<BigUint, DbError> {
        self.inner.get_root().await
    }

    async fn set_root(&self, root: BigUint) -> Result<(), DbError> {
        self.check()?;
        self.inner.set_root(root).await
    }

    async fn apply(
        &self,
        inserts: Vec<Entry>,
        deletes: Vec<BigUint>,
        root: Option<BigUint>,
    ) -> Result<(), DbError> {
        self.check()?;
        self.inner.apply(inserts, deletes, root).await
    }
}

pub fn eth(n: u8) -> EthAddress {
    [n; 20]
}

/// Deterministic stand-in for a BabyJubJub public key.
pub fn key(n: u8) -> (BigUint, BigUint) {
    (BigUint::from(1000u32 + n as u32), BigUint::from(2000u32 + n as u32))
}

pub fn deposit(coin: u32, owner: u8, load_amount: u64) -> Transaction {
    let (ax, ay) = key(owner);
    Transaction::OnChain(OnChainTx {
        coin,
        from_ax: ax,
        from_ay: ay,
        from_eth_addr: eth(owner),
        to_idx: 0,
        to_ax: BigUint::default(),
        to_ay: BigUint::default(),
        to_eth_addr: [0u8; 20],
        amount: BigUint::default(),
        load_amount: BigUint::from(load_amount),
    })
}

pub fn on_chain_transfer(coin: u32, owner: u8, to_idx: u64, amount: u64) -> Transaction {
    let (ax, ay) = key(owner);
    Transaction::OnChain(OnChainTx {
        coin,
        from_ax: ax,
        from_ay: ay,
        from_eth_addr: eth(owner),
        to_idx,
        to_ax: BigUint::default(),
        to_ay: BigUint::default(),
        to_eth_addr: [0u8; 20],
        amount: BigUint::from(amount),
        load_amount: BigUint::default(),
    })
}

pub fn transfer(owner: u8, from_idx: u64, to_idx: u64, amount: u64, fee: u64, nonce: u64) -> Transaction {
    let (ax, ay) = key(owner);
    Transaction::OffChain(OffChainTx {
        from_idx,
        to_idx,
        coin: 0,
        amount: BigUint::from(amount),
        user_fee: BigUint::from(fee),
        nonce,
        from_ax: ax,
        from_ay: ay,
        signature: TxSignature::default(),
    })
}

/// Builds and consolidates one batch holding `txs`.
pub async fn apply_batch<S: Store + Clone>(rollup: &mut RollupDb<S>, txs: Vec<Transaction>) -> BatchBuilder<S> {
    let mut batch = rollup
        .build_batch(&BatchConfig::default())
        .expect("Failed to start batch");
    for tx in txs {
        batch.add_tx(tx).expect("Failed to add transaction");
    }
    batch.build().await.expect("Failed to build batch");
    rollup
        .consolidate(&batch)
        .await
        .expect("Failed to consolidate batch");
    batch
}
