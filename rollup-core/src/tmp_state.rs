//! Optimistic view of account balances used to decide which pending
//! off-chain transfers can go into the next batch.

use std::collections::HashMap;

use num_bigint::BigUint;
use rollup_common::{float16, AccountState, OffChainTx, Transaction};

use crate::error::RollupError;

/// Read access to the canonical account state.
#[allow(async_fn_in_trait)]
pub trait AccountSource {
    async fn get_state_by_idx(&self, idx: u64) -> Result<Option<AccountState>, RollupError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Yes,
    /// Could become valid later: the nonce is ahead or funds are short.
    NotNow,
    /// Can never be included against the current state.
    No,
}

pub struct TmpState<'a, A> {
    source: &'a A,
    cache: HashMap<u64, AccountState>,
}

struct Checked {
    amount: BigUint,
    fee: BigUint,
}

impl<'a, A: AccountSource> TmpState<'a, A> {
    pub fn new(source: &'a A) -> Self {
        Self {
            source,
            cache: HashMap::new(),
        }
    }

    pub async fn can_process(&mut self, tx: &Transaction) -> Result<Admission, RollupError> {
        let tx = match tx {
            Transaction::OffChain(tx) => tx,
            Transaction::OnChain(_) => return Ok(Admission::No),
        };
        let (verdict, _) = self.check(tx, false).await?;
        Ok(verdict)
    }

    /// Applies `tx` to the cached snapshot if it is admissible with exactly
    /// the sender's current nonce. Returns whether it was applied.
    pub async fn process(&mut self, tx: &Transaction) -> Result<bool, RollupError> {
        let tx = match tx {
            Transaction::OffChain(tx) => tx,
            Transaction::OnChain(_) => return Ok(false),
        };
        let checked = match self.check(tx, true).await? {
            (Admission::Yes, Some(checked)) => checked,
            _ => return Ok(false),
        };

        if let Some(sender) = self.cache.get_mut(&tx.from_idx) {
            sender.amount -= &checked.amount + &checked.fee;
            sender.nonce += 1;
        }
        if !tx_is_exit(tx) {
            if let Some(receiver) = self.cache.get_mut(&tx.to_idx) {
                receiver.amount += &checked.amount;
            }
        }
        Ok(true)
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }

    async fn check(
        &mut self,
        tx: &OffChainTx,
        exact_nonce: bool,
    ) -> Result<(Admission, Option<Checked>), RollupError> {
        let sender = match self.state(tx.from_idx).await? {
            Some(state) => state,
            None => return Ok((Admission::No, None)),
        };
        if sender.ax != tx.from_ax || sender.ay != tx.from_ay || sender.coin != tx.coin {
            return Ok((Admission::No, None));
        }

        if !tx_is_exit(tx) {
            match self.state(tx.to_idx).await? {
                Some(receiver) if receiver.coin == tx.coin => {}
                _ => return Ok((Admission::No, None)),
            }
        }

        if tx.nonce < sender.nonce {
            return Ok((Admission::No, None));
        }
        if tx.nonce > sender.nonce {
            let verdict = if exact_nonce { Admission::No } else { Admission::NotNow };
            return Ok((verdict, None));
        }

        let amount = float16::round(&tx.amount)?;
        let fee = float16::round(&tx.user_fee)?;
        if sender.amount < &amount + &fee {
            return Ok((Admission::NotNow, None));
        }

        Ok((Admission::Yes, Some(Checked { amount, fee })))
    }

    async fn state(&mut self, idx: u64) -> Result<Option<AccountState>, RollupError> {
        if let Some(state) = self.cache.get(&idx) {
            return Ok(Some(state.clone()));
        }
        let state = self.source.get_state_by_idx(idx).await?;
        if let Some(state) = &state {
            self.cache.insert(idx, state.clone());
        }
        Ok(state)
    }
}

fn tx_is_exit(tx: &OffChainTx) -> bool {
    tx.to_idx == rollup_common::constants::EXIT_IDX
}
