use num_bigint::BigUint;
use num_traits::Zero;
use rollup_common::{decimal, decimal_matrix, decimal_vec};
use serde::{Deserialize, Serialize};

use crate::error::RollupError;

/// One side of a slot: the leaf before the operation and its Merkle proof.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafWitness {
    pub ax: BigUint,
    pub ay: BigUint,
    pub amount: BigUint,
    pub nonce: BigUint,
    pub eth_addr: BigUint,
    pub siblings: Vec<BigUint>,
    pub is_old0: bool,
    pub old_key: BigUint,
    pub old_value: BigUint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxWitness {
    pub tx_data: BigUint,
    pub from_idx: BigUint,
    pub to_idx: BigUint,
    pub to_ax: BigUint,
    pub to_ay: BigUint,
    pub to_eth_addr: BigUint,
    pub s: BigUint,
    pub r8x: BigUint,
    pub r8y: BigUint,
    pub load_amount: BigUint,
    pub from_eth_addr: BigUint,
    pub from_ax: BigUint,
    pub from_ay: BigUint,
    pub sender: LeafWitness,
    pub receiver: LeafWitness,
    pub im_state_root: BigUint,
    pub im_exit_root: BigUint,
    pub im_on_chain_hash: BigUint,
    pub im_on_chain: bool,
}

impl TxWitness {
    /// Witness of an empty slot: zero rows, roots and chain carried over.
    pub fn nop(n_levels: usize, state_root: &BigUint, exit_root: &BigUint, chain: &BigUint) -> Self {
        let empty_leaf = LeafWitness {
            siblings: vec![BigUint::zero(); n_levels + 1],
            ..Default::default()
        };
        Self {
            sender: empty_leaf.clone(),
            receiver: empty_leaf,
            im_state_root: state_root.clone(),
            im_exit_root: exit_root.clone(),
            im_on_chain_hash: chain.clone(),
            ..Default::default()
        }
    }
}

/// Fixed-size slot buffer: every slot must be written exactly once.
pub struct SlotWriter<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotWriter<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(len).collect(),
        }
    }

    pub fn set(&mut self, slot: usize, value: T) -> Result<(), RollupError> {
        let entry = self.slots.get_mut(slot).ok_or(RollupError::WitnessSlot {
            slot,
            reason: "out of range",
        })?;
        if entry.is_some() {
            return Err(RollupError::WitnessSlot {
                slot,
                reason: "written twice",
            });
        }
        *entry = Some(value);
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<T>, RollupError> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(slot, value)| {
                value.ok_or(RollupError::WitnessSlot {
                    slot,
                    reason: "never written",
                })
            })
            .collect()
    }
}

/// Circuit input for one batch. Every per-transaction array has one entry
/// per slot; the intermediate arrays omit the last slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInput {
    #[serde(with = "decimal")]
    pub initial_idx: BigUint,
    #[serde(with = "decimal")]
    pub old_st_root: BigUint,
    #[serde(with = "decimal_vec")]
    pub fee_plan_coins: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub fee_totals: Vec<BigUint>,
    #[serde(with = "decimal")]
    pub beneficiary: BigUint,

    #[serde(with = "decimal_vec")]
    pub im_state_root: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub im_exit_root: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub im_on_chain_hash: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub im_on_chain: Vec<BigUint>,

    #[serde(with = "decimal_vec")]
    pub tx_data: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub from_idx: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub to_idx: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub to_ax: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub to_ay: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub to_eth_addr: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub s: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub r8x: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub r8y: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub load_amount: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub from_eth_addr: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub from_ax: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub from_ay: Vec<BigUint>,

    #[serde(with = "decimal_vec")]
    pub ax1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub ay1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub amount1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub nonce1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub eth_addr1: Vec<BigUint>,
    #[serde(with = "decimal_matrix")]
    pub siblings1: Vec<Vec<BigUint>>,
    #[serde(rename = "isOld0_1", with = "decimal_vec")]
    pub is_old0_1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub old_key1: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub old_value1: Vec<BigUint>,

    #[serde(with = "decimal_vec")]
    pub ax2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub ay2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub amount2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub nonce2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub eth_addr2: Vec<BigUint>,
    #[serde(with = "decimal_matrix")]
    pub siblings2: Vec<Vec<BigUint>>,
    #[serde(rename = "isOld0_2", with = "decimal_vec")]
    pub is_old0_2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub old_key2: Vec<BigUint>,
    #[serde(with = "decimal_vec")]
    pub old_value2: Vec<BigUint>,
}

fn flag(value: bool) -> BigUint {
    BigUint::from(value as u8)
}

impl BatchInput {
    /// Lays the slots out column by column.
    pub fn from_slots(
        initial_idx: u64,
        old_st_root: BigUint,
        fee_plan_coins: Vec<BigUint>,
        fee_totals: Vec<BigUint>,
        beneficiary: BigUint,
        slots: Vec<TxWitness>,
    ) -> Self {
        let mut input = BatchInput {
            initial_idx: BigUint::from(initial_idx),
            old_st_root,
            fee_plan_coins,
            fee_totals,
            beneficiary,
            ..Default::default()
        };

        let last = slots.len().saturating_sub(1);
        for (i, slot) in slots.into_iter().enumerate() {
            if i < last {
                input.im_state_root.push(slot.im_state_root);
                input.im_exit_root.push(slot.im_exit_root);
                input.im_on_chain_hash.push(slot.im_on_chain_hash);
                input.im_on_chain.push(flag(slot.im_on_chain));
            }

            input.tx_data.push(slot.tx_data);
            input.from_idx.push(slot.from_idx);
            input.to_idx.push(slot.to_idx);
            input.to_ax.push(slot.to_ax);
            input.to_ay.push(slot.to_ay);
            input.to_eth_addr.push(slot.to_eth_addr);
            input.s.push(slot.s);
            input.r8x.push(slot.r8x);
            input.r8y.push(slot.r8y);
            input.load_amount.push(slot.load_amount);
            input.from_eth_addr.push(slot.from_eth_addr);
            input.from_ax.push(slot.from_ax);
            input.from_ay.push(slot.from_ay);

            let leaf = slot.sender;
            input.ax1.push(leaf.ax);
            input.ay1.push(leaf.ay);
            input.amount1.push(leaf.amount);
            input.nonce1.push(leaf.nonce);
            input.eth_addr1.push(leaf.eth_addr);
            input.siblings1.push(leaf.siblings);
            input.is_old0_1.push(flag(leaf.is_old0));
            input.old_key1.push(leaf.old_key);
            input.old_value1.push(leaf.old_value);

            let leaf = slot.receiver;
            input.ax2.push(leaf.ax);
            input.ay2.push(leaf.ay);
            input.amount2.push(leaf.amount);
            input.nonce2.push(leaf.nonce);
            input.eth_addr2.push(leaf.eth_addr);
            input.siblings2.push(leaf.siblings);
            input.is_old0_2.push(flag(leaf.is_old0));
            input.old_key2.push(leaf.old_key);
            input.old_value2.push(leaf.old_value);
        }

        input
    }
}

/// Pads or cuts a sibling path to `n_levels + 1` entries.
pub fn fit_siblings(mut siblings: Vec<BigUint>, n_levels: usize) -> Vec<BigUint> {
    siblings.resize(n_levels + 1, BigUint::zero());
    siblings
}
