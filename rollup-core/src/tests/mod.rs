mod util;

use std::sync::Arc;

use crate::db::MemStore;
use crate::rollup_db::RollupDb;

pub async fn setup_rollup() -> RollupDb<Arc<MemStore>> {
    RollupDb::new(Arc::new(MemStore::new()), Arc::new(MemStore::new()))
        .await
        .expect("Failed to open rollup")
}

/// Rollup with account 1 (owner 1, balance 100) and account 2 (owner 2,
/// empty), both in coin 0.
pub async fn setup_two_accounts() -> RollupDb<Arc<MemStore>> {
    let mut rollup = setup_rollup().await;
    util::apply_batch(
        &mut rollup,
        vec![util::deposit(0, 1, 100), util::deposit(0, 2, 0)],
    )
    .await;
    rollup
}
