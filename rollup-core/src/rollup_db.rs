use num_bigint::BigUint;
use num_traits::Zero;
use rollup_common::constants::FIRST_IDX;
use rollup_common::{decimal, AccountState, EthAddress};
use serde::Serialize;
use tracing::info;

use crate::batch::{find_state, BatchBuilder, BatchConfig};
use crate::db::{batch_key, idx_key, master_key, single_u64, Entry, Store};
use crate::error::{DbError, RollupError};
use crate::smt::{Smt, SmtFind};
use crate::tmp_state::AccountSource;

/// What the rollup remembers about a consolidated batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub batch_number: u64,
    #[serde(with = "decimal")]
    pub state_root: BigUint,
    #[serde(with = "decimal")]
    pub exit_root: BigUint,
    pub final_idx: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitInfo {
    pub batch_number: u64,
    #[serde(with = "decimal")]
    pub exit_root: BigUint,
    pub proof: SmtFind,
    pub state: Option<AccountState>,
}

/// Canonical rollup state: the state tree with its account index, the exit
/// trees of every batch, and one record per consolidated batch.
///
/// Exit trees live in their own store: they are never pruned, so they must
/// not share nodes with the state tree.
pub struct RollupDb<S> {
    state: S,
    exits: S,
    last: BatchRecord,
}

impl<S: Store + Clone> RollupDb<S> {
    /// Opens the rollup, writing the genesis batch on first use.
    pub async fn new(state: S, exits: S) -> Result<Self, RollupError> {
        let last = match state.get(&master_key()?).await? {
            Some(value) => {
                let last_batch = single_u64(&value, "last batch")?;
                load_record(&state, last_batch)
                    .await?
                    .ok_or_else(|| DbError::Corrupted(format!("missing record of batch {}", last_batch)))?
            }
            None => {
                let genesis = BatchRecord {
                    batch_number: 0,
                    state_root: BigUint::zero(),
                    exit_root: BigUint::zero(),
                    final_idx: FIRST_IDX,
                };
                store_record(&state, &genesis).await?;
                info!("initialised genesis batch");
                genesis
            }
        };

        Ok(Self { state, exits, last })
    }

    pub fn last_batch(&self) -> u64 {
        self.last.batch_number
    }

    pub fn state_root(&self) -> &BigUint {
        &self.last.state_root
    }

    pub fn exit_root(&self) -> &BigUint {
        &self.last.exit_root
    }

    /// Index the next new account receives.
    pub fn next_idx(&self) -> u64 {
        self.last.final_idx
    }

    /// Starts the batch that follows the last consolidated one.
    pub fn build_batch(&self, config: &BatchConfig) -> Result<BatchBuilder<S>, RollupError> {
        BatchBuilder::new(
            self.state.clone(),
            self.last.batch_number + 1,
            self.last.state_root.clone(),
            self.last.final_idx,
            config,
        )
    }

    /// Makes a built batch canonical.
    pub async fn consolidate(&mut self, batch: &BatchBuilder<S>) -> Result<(), RollupError> {
        if batch.is_failed() {
            return Err(RollupError::BuildFailed);
        }
        if !batch.is_built() {
            return Err(RollupError::NotBuilt);
        }
        let expected = self.last.batch_number + 1;
        if batch.batch_number() != expected {
            return Err(RollupError::BatchMismatch {
                expected: format!("batch {}", expected),
                got: format!("batch {}", batch.batch_number()),
            });
        }
        if batch.old_state_root()? != &self.last.state_root {
            return Err(RollupError::BatchMismatch {
                expected: format!("old root {}", self.last.state_root),
                got: format!("old root {}", batch.old_state_root()?),
            });
        }

        let record = BatchRecord {
            batch_number: expected,
            state_root: batch.new_state_root()?.clone(),
            exit_root: batch.new_exit_root()?.clone(),
            final_idx: batch.final_idx()?,
        };
        // nodes, record, master pointer and root land together or not at all
        batch.commit_into(&self.exits, record_entries(&record)?).await?;

        info!(
            batch = record.batch_number,
            state_root = %record.state_root,
            exit_root = %record.exit_root,
            "batch consolidated"
        );
        self.last = record;
        Ok(())
    }

    pub async fn batch_record(&self, batch_number: u64) -> Result<Option<BatchRecord>, RollupError> {
        load_record(&self.state, batch_number).await
    }

    pub async fn get_idx(&self, coin: u32, eth_address: &EthAddress) -> Result<Option<u64>, RollupError> {
        match self.state.get(&idx_key(coin, eth_address)?).await? {
            Some(value) => Ok(Some(single_u64(&value, "account index")?)),
            None => Ok(None),
        }
    }

    pub async fn get_state_by_idx(&self, idx: u64) -> Result<Option<AccountState>, RollupError> {
        let tree = Smt::new(self.state.clone(), self.last.state_root.clone());
        let (_, state) = find_state(&tree, idx).await?;
        Ok(state)
    }

    /// Exit leaf of `idx` in batch `batch_number`, with the proof a
    /// withdrawal needs.
    pub async fn get_exit_info(&self, batch_number: u64, idx: u64) -> Result<ExitInfo, RollupError> {
        let record = self
            .batch_record(batch_number)
            .await?
            .ok_or(RollupError::BatchNotFound(batch_number))?;
        let tree = Smt::new(self.exits.clone(), record.exit_root.clone());
        let (proof, state) = find_state(&tree, idx).await?;
        Ok(ExitInfo {
            batch_number,
            exit_root: record.exit_root,
            proof,
            state,
        })
    }
}

impl<S: Store + Clone> AccountSource for RollupDb<S> {
    async fn get_state_by_idx(&self, idx: u64) -> Result<Option<AccountState>, RollupError> {
        RollupDb::get_state_by_idx(self, idx).await
    }
}

async fn load_record<S: Store>(store: &S, batch_number: u64) -> Result<Option<BatchRecord>, RollupError> {
    let value = match store.get(&batch_key(batch_number)?).await? {
        Some(value) => value,
        None => return Ok(None),
    };
    match value.as_slice() {
        [state_root, exit_root, final_idx] => Ok(Some(BatchRecord {
            batch_number,
            state_root: state_root.clone(),
            exit_root: exit_root.clone(),
            final_idx: single_u64(std::slice::from_ref(final_idx), "final index")?,
        })),
        _ => Err(DbError::Corrupted(format!("malformed record of batch {}", batch_number)).into()),
    }
}

/// The batch record and the master pointer advanced to it.
fn record_entries(record: &BatchRecord) -> Result<Vec<Entry>, RollupError> {
    Ok(vec![
        (
            batch_key(record.batch_number)?,
            vec![
                record.state_root.clone(),
                record.exit_root.clone(),
                BigUint::from(record.final_idx),
            ],
        ),
        (master_key()?, vec![BigUint::from(record.batch_number)]),
    ])
}

async fn store_record<S: Store>(store: &S, record: &BatchRecord) -> Result<(), RollupError> {
    store.multi_ins(record_entries(record)?).await?;
    Ok(())
}
