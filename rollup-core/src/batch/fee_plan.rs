use num_bigint::BigUint;
use num_traits::Zero;
use rollup_common::constants::{
    FEE_PLAN_LAST_SLOT_BITS, FEE_PLAN_SLOTS_PER_WORD, FEE_PLAN_SLOT_BITS, FEE_PLAN_WORDS,
    MAX_FEE_PLAN_COINS,
};
use rollup_common::encoding::pack_words;
use rollup_common::fix2float;

use crate::error::RollupError;

/// Coins the operator collects fees in, with the total collected per coin.
#[derive(Debug, Clone, Default)]
pub struct FeePlan {
    coins: Vec<u32>,
    totals: Vec<BigUint>,
}

impl FeePlan {
    pub fn add_coin(&mut self, coin: u32) -> Result<(), RollupError> {
        if self.coins.len() >= MAX_FEE_PLAN_COINS {
            return Err(RollupError::FeePlanFull {
                max: MAX_FEE_PLAN_COINS,
            });
        }
        if self.coins.contains(&coin) {
            return Err(RollupError::FeePlanDuplicateCoin(coin));
        }

        let slot = self.coins.len();
        // The top slot of a word only has room for the bits left below the field size.
        let bits = if slot % FEE_PLAN_SLOTS_PER_WORD == FEE_PLAN_SLOTS_PER_WORD - 1 {
            FEE_PLAN_LAST_SLOT_BITS
        } else {
            FEE_PLAN_SLOT_BITS
        };
        if u64::from(coin) >> bits != 0 {
            return Err(RollupError::FeePlanCoinTooBig { slot, coin });
        }

        self.coins.push(coin);
        self.totals.push(BigUint::zero());
        Ok(())
    }

    /// Adds `fee` to the bucket of `coin`. Fees in coins outside the plan are
    /// dropped; returns whether a bucket took it.
    pub fn accumulate(&mut self, coin: u32, fee: &BigUint) -> bool {
        match self.coins.iter().position(|c| *c == coin) {
            Some(i) => {
                self.totals[i] += fee;
                true
            }
            None => false,
        }
    }

    pub fn coins(&self) -> &[u32] {
        &self.coins
    }

    pub fn totals(&self) -> &[BigUint] {
        &self.totals
    }

    pub fn coins_words(&self) -> Vec<BigUint> {
        let values: Vec<BigUint> = self.coins.iter().map(|c| BigUint::from(*c)).collect();
        pack_words(&values, FEE_PLAN_SLOT_BITS, FEE_PLAN_SLOTS_PER_WORD, FEE_PLAN_WORDS)
    }

    /// Totals encoded as float16, packed like the coins.
    pub fn totals_words(&self) -> Result<Vec<BigUint>, RollupError> {
        let values = self
            .totals
            .iter()
            .map(|total| Ok(BigUint::from(fix2float(total)?)))
            .collect::<Result<Vec<_>, RollupError>>()?;
        Ok(pack_words(&values, FEE_PLAN_SLOT_BITS, FEE_PLAN_SLOTS_PER_WORD, FEE_PLAN_WORDS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_duplicates_and_wide_coins() {
        let mut plan = FeePlan::default();
        plan.add_coin(1).unwrap();
        assert!(matches!(plan.add_coin(1), Err(RollupError::FeePlanDuplicateCoin(1))));
        assert!(matches!(
            plan.add_coin(1 << 16),
            Err(RollupError::FeePlanCoinTooBig { slot: 1, .. })
        ));
    }

    #[test]
    fn test_last_slot_of_word_is_narrow() {
        let mut plan = FeePlan::default();
        for coin in 0..15 {
            plan.add_coin(coin).unwrap();
        }
        assert!(matches!(
            plan.add_coin(1 << 13),
            Err(RollupError::FeePlanCoinTooBig { slot: 15, .. })
        ));
        plan.add_coin((1 << 13) - 1).unwrap();
        // next word starts wide again
        plan.add_coin(1 << 13).unwrap();
    }

    #[test]
    fn test_capacity() {
        let mut plan = FeePlan::default();
        for coin in 0..MAX_FEE_PLAN_COINS as u32 {
            plan.add_coin(coin).unwrap();
        }
        assert!(matches!(plan.add_coin(100), Err(RollupError::FeePlanFull { max: 64 })));
        assert_eq!(plan.coins_words().len(), FEE_PLAN_WORDS);
    }

    #[test]
    fn test_accumulate_and_encode() {
        let mut plan = FeePlan::default();
        plan.add_coin(7).unwrap();
        plan.add_coin(9).unwrap();

        assert!(plan.accumulate(9, &BigUint::from(3u32)));
        assert!(plan.accumulate(9, &BigUint::from(2u32)));
        assert!(!plan.accumulate(8, &BigUint::from(2u32)));
        assert_eq!(plan.totals()[1], BigUint::from(5u32));

        let coins = plan.coins_words();
        assert_eq!(coins[0], BigUint::from(7u32) + (BigUint::from(9u32) << 16));

        let totals = plan.totals_words().unwrap();
        assert_eq!(totals[0], BigUint::from(5u32) << 16);
    }
}
