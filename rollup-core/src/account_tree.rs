use num_bigint::BigUint;
use rollup_common::{AccountState, EthAddress};

use crate::db::Store;
use crate::error::{DbError, RollupError};
use crate::smt::{Smt, SmtFind, SmtInsert, SmtUpdate};

#[derive(Debug, Clone)]
pub struct AddIdResult {
    pub hash_value: BigUint,
    pub proof: SmtInsert,
}

#[derive(Debug, Clone)]
pub struct UpdateIdResult {
    pub hash_value: BigUint,
    pub proof: SmtUpdate,
}

#[derive(Debug, Clone)]
pub struct IdInfo {
    pub proof: SmtFind,
    pub state: Option<AccountState>,
}

impl IdInfo {
    pub fn found(&self) -> bool {
        self.proof.found
    }
}

/// Account ledger with membership proofs: the tree maps an id to the hash of
/// its leaf, the leaf store maps that hash back to the leaf.
pub struct AccountTree<S> {
    smt: Smt<S>,
    leafs: S,
}

impl<S: Store> AccountTree<S> {
    /// Opens the tree at the root recorded in `tree`.
    pub async fn new(tree: S, leafs: S) -> Result<Self, RollupError> {
        Ok(Self {
            smt: Smt::load(tree).await?,
            leafs,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_id(
        &mut self,
        id: u64,
        balance: BigUint,
        coin: u32,
        ax: BigUint,
        ay: BigUint,
        eth_address: EthAddress,
        nonce: u64,
    ) -> Result<AddIdResult, RollupError> {
        let state = AccountState {
            coin,
            nonce,
            amount: balance,
            ax,
            ay,
            eth_address,
        };
        let hash_value = state.hash()?;

        self.leafs
            .multi_ins(vec![(hash_value.clone(), state.to_array())])
            .await?;
        let proof = self.smt.insert(&BigUint::from(id), &hash_value).await?;

        tracing::debug!(id, coin, "account added");
        Ok(AddIdResult { hash_value, proof })
    }

    /// Sets the balance of `id` and bumps its nonce.
    pub async fn update_id(&mut self, id: u64, balance: BigUint) -> Result<UpdateIdResult, RollupError> {
        let key = BigUint::from(id);
        let found = self.smt.find(&key).await?;
        if !found.found {
            return Err(RollupError::IdNotFound(id));
        }

        let mut state = self.load_leaf(&found.found_value).await?;
        state.amount = balance;
        state.nonce += 1;
        let hash_value = state.hash()?;

        self.leafs
            .multi_ins(vec![(hash_value.clone(), state.to_array())])
            .await?;
        let proof = self.smt.update(&key, &hash_value).await?;

        Ok(UpdateIdResult { hash_value, proof })
    }

    pub async fn get_id_info(&self, id: u64) -> Result<IdInfo, RollupError> {
        let proof = self.smt.find(&BigUint::from(id)).await?;
        let state = if proof.found {
            Some(self.load_leaf(&proof.found_value).await?)
        } else {
            None
        };
        Ok(IdInfo { proof, state })
    }

    pub fn root(&self) -> &BigUint {
        self.smt.root()
    }

    async fn load_leaf(&self, hash: &BigUint) -> Result<AccountState, RollupError> {
        let values = self
            .leafs
            .get(hash)
            .await?
            .ok_or_else(|| DbError::Corrupted(format!("missing leaf {}", hash)))?;
        Ok(AccountState::from_array(&values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use num_traits::Zero;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_leaf_hash_is_stored_under_id() {
        let mut tree = AccountTree::new(Arc::new(MemStore::new()), Arc::new(MemStore::new()))
            .await
            .unwrap();
        assert!(tree.root().is_zero());

        let res = tree
            .add_id(1, BigUint::from(2u32), 3, BigUint::from(4u32), BigUint::from(5u32), [6u8; 20], 0)
            .await
            .unwrap();
        assert!(res.proof.is_old0);
        assert_eq!(
            *tree.root(),
            crate::smt::hash_leaf(&BigUint::from(1u32), &res.hash_value).unwrap()
        );
    }
}
