//! Batch builder: applies on-chain and off-chain transfers to the state tree
//! and produces the circuit witness and the published batch data.
//!
//! A batch collects transactions until [`BatchBuilder::build`] is called
//! once. Building lays out `max_n_tx` slots: on-chain transactions (and
//! off-chain deposits) first, then no-op padding, then off-chain transfers.
//! All tree mutations go to an overlay over the backing store and only reach
//! it when the batch is consolidated.

mod fee_plan;
mod input;

use num_bigint::BigUint;
use num_traits::Zero;
use rollup_common::constants::EXIT_IDX;
use rollup_common::encoding::{
    build_tx_data, da_row, da_row_bits, off_chain_hash, pack_rows, to_bytes_padded,
    to_hex_prefixed, TxDataFields,
};
use rollup_common::{
    eth_to_field, fix2float, float16, poseidon, AccountState, DepositOffChain, EthAddress,
    OffChainTx, OnChainTx, Transaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{idx_key, single_u64, state_key, Entry, MemStore, Store, TxOverlayDb};
use crate::error::{DbError, RollupError};
use crate::smt::{Smt, SmtFind};

pub use fee_plan::FeePlan;
pub use input::{fit_siblings, BatchInput, LeafWitness, SlotWriter, TxWitness};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    pub max_n_tx: usize,
    pub n_levels: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_n_tx: 4,
            n_levels: 24,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), RollupError> {
        if self.max_n_tx == 0 {
            return Err(RollupError::InvalidConfig(
                "max_n_tx must be greater than 0".to_string(),
            ));
        }
        if self.n_levels == 0 || self.n_levels > 64 || self.n_levels % 2 != 0 {
            return Err(RollupError::InvalidConfig(format!(
                "n_levels must be even and between 2 and 64, got {}",
                self.n_levels
            )));
        }
        Ok(())
    }

    fn fits(&self, idx: u64) -> bool {
        self.n_levels >= 64 || idx >> self.n_levels == 0
    }
}

struct Built {
    input: BatchInput,
    new_state_root: BigUint,
    new_exit_root: BigUint,
    on_chain_hash: BigUint,
    data_available: Vec<u8>,
    off_chain_hash: BigUint,
    fee_plan_coins: Vec<BigUint>,
    fee_totals: Vec<BigUint>,
}

/// Lifecycle of a batch. A failed build leaves the overlays half applied,
/// so `Failed` is terminal.
enum Stage {
    Collecting,
    Built(Built),
    Failed,
}

struct LeafProof {
    siblings: Vec<BigUint>,
    is_old0: bool,
    old_key: BigUint,
    old_value: BigUint,
}

pub struct BatchBuilder<S> {
    batch_number: u64,
    config: BatchConfig,
    initial_idx: u64,
    final_idx: u64,
    old_state_root: BigUint,
    state_tree: Smt<TxOverlayDb<S>>,
    exit_tree: Smt<MemStore>,
    on_chain_txs: Vec<OnChainTx>,
    off_chain_txs: Vec<OffChainTx>,
    deposits: Vec<DepositOffChain>,
    fee_plan: FeePlan,
    beneficiary: EthAddress,
    stage: Stage,
}

impl<S: Store> BatchBuilder<S> {
    pub fn new(
        db: S,
        batch_number: u64,
        root: BigUint,
        initial_idx: u64,
        config: &BatchConfig,
    ) -> Result<Self, RollupError> {
        config.validate()?;
        Ok(Self {
            batch_number,
            config: *config,
            initial_idx,
            final_idx: initial_idx,
            old_state_root: root.clone(),
            state_tree: Smt::new(TxOverlayDb::new(db), root),
            exit_tree: Smt::new(MemStore::new(), BigUint::zero()),
            on_chain_txs: Vec::new(),
            off_chain_txs: Vec::new(),
            deposits: Vec::new(),
            fee_plan: FeePlan::default(),
            beneficiary: [0u8; 20],
            stage: Stage::Collecting,
        })
    }

    pub fn batch_number(&self) -> u64 {
        self.batch_number
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn initial_idx(&self) -> u64 {
        self.initial_idx
    }

    pub fn is_built(&self) -> bool {
        matches!(self.stage, Stage::Built(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.stage, Stage::Failed)
    }

    pub fn tx_count(&self) -> usize {
        self.on_chain_txs.len() + self.off_chain_txs.len()
    }

    fn ensure_collecting(&self) -> Result<(), RollupError> {
        match self.stage {
            Stage::Collecting => Ok(()),
            Stage::Built(_) => Err(RollupError::AlreadyBuilt),
            Stage::Failed => Err(RollupError::BuildFailed),
        }
    }

    fn ensure_open(&self) -> Result<(), RollupError> {
        self.ensure_collecting()?;
        if self.tx_count() >= self.config.max_n_tx {
            return Err(RollupError::TooManyTx);
        }
        Ok(())
    }

    pub fn add_tx(&mut self, tx: Transaction) -> Result<(), RollupError> {
        self.ensure_open()?;
        match tx {
            Transaction::OnChain(tx) => self.on_chain_txs.push(tx),
            Transaction::OffChain(tx) => self.off_chain_txs.push(tx),
        }
        Ok(())
    }

    /// Queues an operator-collected account creation. It takes an on-chain
    /// slot.
    pub fn add_deposit_off_chain(&mut self, deposit: DepositOffChain) -> Result<(), RollupError> {
        self.ensure_open()?;
        self.on_chain_txs.push(OnChainTx::from(&deposit));
        self.deposits.push(deposit);
        Ok(())
    }

    pub fn add_coin(&mut self, coin: u32) -> Result<(), RollupError> {
        self.ensure_collecting()?;
        self.fee_plan.add_coin(coin)
    }

    pub fn set_beneficiary(&mut self, address: EthAddress) -> Result<(), RollupError> {
        self.ensure_collecting()?;
        self.beneficiary = address;
        Ok(())
    }

    /// Applies every queued transaction and freezes the batch. On error the
    /// batch is poisoned: it must be discarded and rebuilt from scratch.
    pub async fn build(&mut self) -> Result<(), RollupError> {
        self.ensure_collecting()?;
        match self.apply_all().await {
            Ok(built) => {
                self.stage = Stage::Built(built);
                Ok(())
            }
            Err(err) => {
                warn!(batch = self.batch_number, error = %err, "batch build failed");
                self.stage = Stage::Failed;
                Err(err)
            }
        }
    }

    async fn apply_all(&mut self) -> Result<Built, RollupError> {
        let n_levels = self.config.n_levels;
        let max_n_tx = self.config.max_n_tx;
        info!(
            batch = self.batch_number,
            on_chain = self.on_chain_txs.len(),
            off_chain = self.off_chain_txs.len(),
            "building batch"
        );

        let on_chain = self.on_chain_txs.clone();
        let off_chain = self.off_chain_txs.clone();

        let mut slots = SlotWriter::new(max_n_tx);
        let mut slot = 0;
        let mut chain = BigUint::zero();

        for tx in &on_chain {
            let witness = self.apply_on_chain(tx, &mut chain).await?;
            debug!(slot, from_idx = %witness.from_idx, to_idx = tx.to_idx, "on-chain slot");
            slots.set(slot, witness)?;
            slot += 1;
        }

        for _ in 0..max_n_tx - on_chain.len() - off_chain.len() {
            slots.set(
                slot,
                TxWitness::nop(n_levels, self.state_tree.root(), self.exit_tree.root(), &chain),
            )?;
            slot += 1;
        }

        let mut rows = Vec::with_capacity(off_chain.len());
        for tx in &off_chain {
            let (witness, row) = self.apply_off_chain(tx, &chain).await?;
            debug!(slot, from_idx = tx.from_idx, to_idx = tx.to_idx, "off-chain slot");
            slots.set(slot, witness)?;
            rows.push(row);
            slot += 1;
        }

        let fee_plan_coins = self.fee_plan.coins_words();
        let fee_totals = self.fee_plan.totals_words()?;
        let input = BatchInput::from_slots(
            self.initial_idx,
            self.old_state_root.clone(),
            fee_plan_coins.clone(),
            fee_totals.clone(),
            eth_to_field(&self.beneficiary),
            slots.finish()?,
        );

        let built = Built {
            input,
            new_state_root: self.state_tree.root().clone(),
            new_exit_root: self.exit_tree.root().clone(),
            on_chain_hash: chain,
            data_available: pack_rows(&rows, da_row_bits(n_levels)),
            off_chain_hash: off_chain_hash(&rows, max_n_tx, n_levels),
            fee_plan_coins,
            fee_totals,
        };
        info!(
            batch = self.batch_number,
            state_root = %built.new_state_root,
            exit_root = %built.new_exit_root,
            final_idx = self.final_idx,
            "batch built"
        );
        Ok(built)
    }

    async fn apply_on_chain(
        &mut self,
        tx: &OnChainTx,
        chain: &mut BigUint,
    ) -> Result<TxWitness, RollupError> {
        let n_levels = self.config.n_levels;
        // An amount float16 cannot carry is published, and applied, as zero.
        let (amount_f, amount) = match fix2float(&tx.amount) {
            Ok(amount_f) => (amount_f, float16::float2fix(amount_f)),
            Err(err) => {
                warn!(to_idx = tx.to_idx, error = %err, "nullifying unencodable on-chain amount");
                (0, BigUint::zero())
            }
        };

        // Sender: resolved from (coin, ethAddress), created if unknown.
        let index_key = idx_key(tx.coin, &tx.from_eth_addr)?;
        let (from_idx, sender_before) = match self.state_tree.db().get(&index_key).await? {
            Some(value) => {
                let idx = single_u64(&value, "account index")?;
                let (_, state) = find_state(&self.state_tree, idx).await?;
                let state = state.ok_or_else(|| {
                    DbError::Corrupted(format!("indexed account {} missing from tree", idx))
                })?;
                (idx, Some(state))
            }
            None => (self.final_idx, None),
        };
        let new_account = sender_before.is_none();
        if new_account && !self.config.fits(from_idx) {
            return Err(RollupError::IdxOverflow(from_idx));
        }
        let sender_before = sender_before.unwrap_or_else(|| {
            AccountState::empty(tx.coin, tx.from_ax.clone(), tx.from_ay.clone(), tx.from_eth_addr)
        });

        // Deposits are irrevocable: anything that cannot be applied is nullified.
        let is_exit = tx.to_idx == EXIT_IDX;
        let receiver_ok = if is_exit {
            true
        } else {
            matches!(find_state(&self.state_tree, tx.to_idx).await?, (_, Some(st)) if st.coin == tx.coin)
        };
        let funded = &sender_before.amount + &tx.load_amount >= amount;
        let effective = if receiver_ok && funded {
            amount
        } else {
            warn!(
                from_idx,
                to_idx = tx.to_idx,
                receiver_ok,
                funded,
                "nullifying on-chain transfer"
            );
            BigUint::zero()
        };

        let mut sender_after = sender_before.clone();
        sender_after.amount = &sender_before.amount + &tx.load_amount - &effective;
        let proof = put_state(&mut self.state_tree, from_idx, &sender_after, !new_account).await?;
        let sender = leaf_witness(&sender_before, proof, n_levels);
        if new_account {
            self.state_tree
                .db()
                .multi_ins(vec![(index_key, vec![BigUint::from(from_idx)])])
                .await?;
            self.final_idx += 1;
        }

        let receiver = if effective.is_zero() {
            nop_leaf(n_levels)
        } else if is_exit {
            self.add_exit(from_idx, &sender_after, &effective).await?
        } else {
            self.credit(tx.to_idx, &effective).await?
        };

        let tx_data = build_tx_data(&TxDataFields {
            amount_f,
            coin: tx.coin,
            nonce: 0,
            fee_f: 0,
            on_chain: true,
            new_account,
        });
        let data = poseidon(&[
            tx.from_ax.clone(),
            tx.from_ay.clone(),
            eth_to_field(&tx.to_eth_addr),
            tx.to_ax.clone(),
            tx.to_ay.clone(),
        ])?;
        *chain = poseidon(&[
            chain.clone(),
            tx_data.clone(),
            tx.load_amount.clone(),
            data,
            eth_to_field(&tx.from_eth_addr),
        ])?;

        Ok(TxWitness {
            tx_data,
            from_idx: BigUint::from(from_idx),
            to_idx: BigUint::from(tx.to_idx),
            to_ax: tx.to_ax.clone(),
            to_ay: tx.to_ay.clone(),
            to_eth_addr: eth_to_field(&tx.to_eth_addr),
            load_amount: tx.load_amount.clone(),
            from_eth_addr: eth_to_field(&tx.from_eth_addr),
            from_ax: tx.from_ax.clone(),
            from_ay: tx.from_ay.clone(),
            sender,
            receiver,
            im_state_root: self.state_tree.root().clone(),
            im_exit_root: self.exit_tree.root().clone(),
            im_on_chain_hash: chain.clone(),
            im_on_chain: true,
            ..Default::default()
        })
    }

    async fn apply_off_chain(
        &mut self,
        tx: &OffChainTx,
        chain: &BigUint,
    ) -> Result<(TxWitness, BigUint), RollupError> {
        let n_levels = self.config.n_levels;
        let amount_f = fix2float(&tx.amount)?;
        let fee_f = fix2float(&tx.user_fee)?;
        let amount = float16::float2fix(amount_f);
        let fee = float16::float2fix(fee_f);

        let (_, sender_before) = find_state(&self.state_tree, tx.from_idx).await?;
        let sender_before = sender_before.ok_or(RollupError::InvalidSender {
            from_idx: tx.from_idx,
        })?;
        if sender_before.coin != tx.coin {
            return Err(RollupError::CoinMismatch {
                expected: sender_before.coin,
                got: tx.coin,
            });
        }
        if sender_before.nonce != tx.nonce {
            return Err(RollupError::InvalidNonce {
                expected: sender_before.nonce,
                got: tx.nonce,
            });
        }

        let is_exit = tx.to_idx == EXIT_IDX;
        if !is_exit {
            let (_, receiver) = find_state(&self.state_tree, tx.to_idx).await?;
            let receiver = receiver.ok_or(RollupError::InvalidRecipient { to_idx: tx.to_idx })?;
            if receiver.coin != tx.coin {
                return Err(RollupError::CoinMismatch {
                    expected: receiver.coin,
                    got: tx.coin,
                });
            }
        }

        let spent = &amount + &fee;
        if sender_before.amount < spent {
            return Err(RollupError::Underflow { idx: tx.from_idx });
        }
        if is_exit && !amount.is_zero() && self.exit_exists(tx.from_idx).await? {
            return Err(RollupError::DuplicateExit { idx: tx.from_idx });
        }

        let mut sender_after = sender_before.clone();
        sender_after.amount = &sender_before.amount - &spent;
        sender_after.nonce += 1;
        let proof = put_state(&mut self.state_tree, tx.from_idx, &sender_after, true).await?;
        let sender = leaf_witness(&sender_before, proof, n_levels);

        let receiver = if amount.is_zero() {
            nop_leaf(n_levels)
        } else if is_exit {
            self.add_exit(tx.from_idx, &sender_after, &amount).await?
        } else {
            self.credit(tx.to_idx, &amount).await?
        };

        if !self.fee_plan.accumulate(tx.coin, &fee) && !fee.is_zero() {
            debug!(coin = tx.coin, %fee, "fee coin not in fee plan");
        }

        let tx_data = build_tx_data(&TxDataFields {
            amount_f,
            coin: tx.coin,
            nonce: tx.nonce,
            fee_f,
            on_chain: false,
            new_account: false,
        });
        let row = da_row(tx.from_idx, tx.to_idx, amount_f, fee_f, n_levels);

        let witness = TxWitness {
            tx_data,
            from_idx: BigUint::from(tx.from_idx),
            to_idx: BigUint::from(tx.to_idx),
            s: tx.signature.s.clone(),
            r8x: tx.signature.r8x.clone(),
            r8y: tx.signature.r8y.clone(),
            from_ax: tx.from_ax.clone(),
            from_ay: tx.from_ay.clone(),
            sender,
            receiver,
            im_state_root: self.state_tree.root().clone(),
            im_exit_root: self.exit_tree.root().clone(),
            im_on_chain_hash: chain.clone(),
            im_on_chain: false,
            ..Default::default()
        };
        Ok((witness, row))
    }

    async fn exit_exists(&self, idx: u64) -> Result<bool, RollupError> {
        Ok(self.exit_tree.find(&BigUint::from(idx)).await?.found)
    }

    /// Records `amount` as withdrawable by `idx` in this batch's exit tree.
    async fn add_exit(
        &mut self,
        idx: u64,
        owner: &AccountState,
        amount: &BigUint,
    ) -> Result<LeafWitness, RollupError> {
        if self.exit_exists(idx).await? {
            return Err(RollupError::DuplicateExit { idx });
        }
        let before = AccountState::empty(owner.coin, owner.ax.clone(), owner.ay.clone(), owner.eth_address);
        let mut leaf = before.clone();
        leaf.amount = amount.clone();
        let proof = put_state(&mut self.exit_tree, idx, &leaf, false).await?;
        Ok(leaf_witness(&before, proof, self.config.n_levels))
    }

    async fn credit(&mut self, idx: u64, amount: &BigUint) -> Result<LeafWitness, RollupError> {
        let (_, before) = find_state(&self.state_tree, idx).await?;
        let before = before.ok_or(RollupError::InvalidRecipient { to_idx: idx })?;
        let mut after = before.clone();
        after.amount += amount;
        let proof = put_state(&mut self.state_tree, idx, &after, true).await?;
        Ok(leaf_witness(&before, proof, self.config.n_levels))
    }

    fn built(&self) -> Result<&Built, RollupError> {
        match &self.stage {
            Stage::Built(built) => Ok(built),
            Stage::Collecting => Err(RollupError::NotBuilt),
            Stage::Failed => Err(RollupError::BuildFailed),
        }
    }

    pub fn input(&self) -> Result<&BatchInput, RollupError> {
        Ok(&self.built()?.input)
    }

    pub fn old_state_root(&self) -> Result<&BigUint, RollupError> {
        self.built()?;
        Ok(&self.old_state_root)
    }

    pub fn new_state_root(&self) -> Result<&BigUint, RollupError> {
        Ok(&self.built()?.new_state_root)
    }

    pub fn new_exit_root(&self) -> Result<&BigUint, RollupError> {
        Ok(&self.built()?.new_exit_root)
    }

    /// Fee-plan coins, packed 16 per word.
    pub fn fee_plan_coins(&self) -> Result<&[BigUint], RollupError> {
        Ok(&self.built()?.fee_plan_coins)
    }

    /// Collected fees as float16, packed like the coins.
    pub fn fee_totals(&self) -> Result<&[BigUint], RollupError> {
        Ok(&self.built()?.fee_totals)
    }

    pub fn final_idx(&self) -> Result<u64, RollupError> {
        self.built()?;
        Ok(self.final_idx)
    }

    pub fn beneficiary(&self) -> Result<&EthAddress, RollupError> {
        self.built()?;
        Ok(&self.beneficiary)
    }

    pub fn on_chain_hash(&self) -> Result<&BigUint, RollupError> {
        Ok(&self.built()?.on_chain_hash)
    }

    pub fn data_available(&self) -> Result<&[u8], RollupError> {
        Ok(&self.built()?.data_available)
    }

    /// Data-availability bytes as the `0x`-hex string sent to the contract.
    pub fn data_available_sm(&self) -> Result<String, RollupError> {
        Ok(to_hex_prefixed(self.data_available()?))
    }

    pub fn off_chain_hash(&self) -> Result<&BigUint, RollupError> {
        Ok(&self.built()?.off_chain_hash)
    }

    /// `ax(32) | ay(32) | ethAddress(20) | coin(4)` per queued deposit.
    pub fn deposit_off_chain_data(&self) -> Result<Vec<u8>, RollupError> {
        self.built()?;
        let mut out = Vec::with_capacity(self.deposits.len() * 88);
        for deposit in &self.deposits {
            out.extend(to_bytes_padded(&deposit.ax, 32));
            out.extend(to_bytes_padded(&deposit.ay, 32));
            out.extend_from_slice(&deposit.eth_address);
            out.extend_from_slice(&deposit.coin.to_be_bytes());
        }
        Ok(out)
    }

    /// Writes the final exit tree to `exits`, then the staged state changes,
    /// `records` and the new state root to the backing store in one unit.
    ///
    /// Exit nodes are content addressed and never pruned, so a failure after
    /// the first write only leaves unreferenced nodes behind. On error the
    /// overlay keeps its changes and the call can be repeated.
    pub(crate) async fn commit_into<E: Store>(
        &self,
        exits: &E,
        records: Vec<Entry>,
    ) -> Result<(), RollupError> {
        let built = self.built()?;
        exits.multi_ins(self.exit_tree.db().entries().await).await?;
        self.state_tree
            .db()
            .commit_with(records, Some(built.new_state_root.clone()))
            .await?;
        Ok(())
    }
}

/// Looks up leaf `idx` and its raw state.
pub(crate) async fn find_state<D: Store>(
    tree: &Smt<D>,
    idx: u64,
) -> Result<(SmtFind, Option<AccountState>), RollupError> {
    let find = tree.find(&BigUint::from(idx)).await?;
    if !find.found {
        return Ok((find, None));
    }
    let raw = tree
        .db()
        .get(&state_key(&find.found_value, idx)?)
        .await?
        .ok_or_else(|| DbError::Corrupted(format!("missing state for index {}", idx)))?;
    let state = AccountState::from_array(&raw)?;
    Ok((find, Some(state)))
}

async fn put_state<D: Store>(
    tree: &mut Smt<D>,
    idx: u64,
    state: &AccountState,
    exists: bool,
) -> Result<LeafProof, RollupError> {
    let hash = state.hash()?;
    tree.db()
        .multi_ins(vec![(state_key(&hash, idx)?, state.to_array())])
        .await?;

    let key = BigUint::from(idx);
    if exists {
        let res = tree.update(&key, &hash).await?;
        Ok(LeafProof {
            siblings: res.siblings,
            is_old0: false,
            old_key: BigUint::zero(),
            old_value: BigUint::zero(),
        })
    } else {
        let res = tree.insert(&key, &hash).await?;
        let (old_key, old_value) = if res.is_old0 {
            (BigUint::zero(), BigUint::zero())
        } else {
            (res.old_key, res.old_value)
        };
        Ok(LeafProof {
            siblings: res.siblings,
            is_old0: res.is_old0,
            old_key,
            old_value,
        })
    }
}

fn leaf_witness(before: &AccountState, proof: LeafProof, n_levels: usize) -> LeafWitness {
    LeafWitness {
        ax: before.ax.clone(),
        ay: before.ay.clone(),
        amount: before.amount.clone(),
        nonce: BigUint::from(before.nonce),
        eth_addr: eth_to_field(&before.eth_address),
        siblings: fit_siblings(proof.siblings, n_levels),
        is_old0: proof.is_old0,
        old_key: proof.old_key,
        old_value: proof.old_value,
    }
}

fn nop_leaf(n_levels: usize) -> LeafWitness {
    LeafWitness {
        siblings: vec![BigUint::zero(); n_levels + 1],
        ..Default::default()
    }
}
