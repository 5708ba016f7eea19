pub mod account_tree;
pub mod batch;
pub mod db;
pub mod error;
pub mod rollup_db;
pub mod smt;
pub mod tmp_state;

pub use account_tree::AccountTree;
pub use batch::{BatchBuilder, BatchConfig, BatchInput};
pub use db::{MemStore, SqliteStore, Store, TxOverlayDb};
pub use error::{DbError, RollupError};
pub use rollup_db::{BatchRecord, ExitInfo, RollupDb};
pub use smt::Smt;
pub use tmp_state::{AccountSource, Admission, TmpState};

#[cfg(test)]
mod tests;
