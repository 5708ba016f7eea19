//! Binary sparse Merkle tree in the iden3 layout.
//!
//! Keys are walked from the least significant bit. A subtree holding a single
//! leaf is collapsed into that leaf, so a leaf sits at the shallowest level
//! where its key prefix is unique. Nodes are content addressed:
//!
//! - leaf: stored as `[1, key, value]` under `poseidon([key, value, 1])`
//! - internal: stored as `[left, right]` under `poseidon([left, right])`
//!
//! The empty tree has root 0.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rollup_common::{decimal, decimal_vec, poseidon};
use serde::Serialize;

use crate::db::Store;
use crate::error::{DbError, RollupError};

/// Upper bound on tree depth; field elements have fewer bits than this.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtFind {
    pub found: bool,
    /// Value stored under the key, zero if absent.
    #[serde(with = "decimal")]
    pub found_value: BigUint,
    #[serde(with = "decimal_vec")]
    pub siblings: Vec<BigUint>,
    /// The search ended on an empty subtree rather than on another leaf.
    pub is_old0: bool,
    /// Leaf met instead of the key when not found.
    #[serde(with = "decimal")]
    pub not_found_key: BigUint,
    #[serde(with = "decimal")]
    pub not_found_value: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtInsert {
    pub old_root: BigUint,
    pub new_root: BigUint,
    pub siblings: Vec<BigUint>,
    pub is_old0: bool,
    pub old_key: BigUint,
    pub old_value: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtUpdate {
    pub old_root: BigUint,
    pub new_root: BigUint,
    pub old_value: BigUint,
    pub siblings: Vec<BigUint>,
}

pub fn hash_leaf(key: &BigUint, value: &BigUint) -> Result<BigUint, RollupError> {
    Ok(poseidon(&[key.clone(), value.clone(), BigUint::one()])?)
}

pub fn hash_node(left: &BigUint, right: &BigUint) -> Result<BigUint, RollupError> {
    Ok(poseidon(&[left.clone(), right.clone()])?)
}

fn key_bit(key: &BigUint, level: usize) -> bool {
    key.bit(level as u64)
}

pub struct Smt<S> {
    db: S,
    root: BigUint,
}

impl<S: Store> Smt<S> {
    pub fn new(db: S, root: BigUint) -> Self {
        Self { db, root }
    }

    /// Opens the tree at the root recorded in `db`.
    pub async fn load(db: S) -> Result<Self, RollupError> {
        let root = db.get_root().await?;
        Ok(Self { db, root })
    }

    pub fn root(&self) -> &BigUint {
        &self.root
    }

    pub fn db(&self) -> &S {
        &self.db
    }

    pub async fn find(&self, key: &BigUint) -> Result<SmtFind, RollupError> {
        let mut siblings = Vec::new();
        let mut node = self.root.clone();

        for level in 0..MAX_DEPTH {
            if node.is_zero() {
                return Ok(SmtFind {
                    found: false,
                    found_value: BigUint::zero(),
                    siblings,
                    is_old0: true,
                    not_found_key: key.clone(),
                    not_found_value: BigUint::zero(),
                });
            }

            let record = self
                .db
                .get(&node)
                .await?
                .ok_or_else(|| DbError::Corrupted(format!("missing tree node {}", node)))?;

            match record.as_slice() {
                [tag, leaf_key, leaf_value] if tag.is_one() => {
                    let found = leaf_key == key;
                    return Ok(SmtFind {
                        found,
                        found_value: if found { leaf_value.clone() } else { BigUint::zero() },
                        siblings,
                        is_old0: false,
                        not_found_key: if found { BigUint::zero() } else { leaf_key.clone() },
                        not_found_value: if found { BigUint::zero() } else { leaf_value.clone() },
                    });
                }
                [left, right] => {
                    if key_bit(key, level) {
                        siblings.push(left.clone());
                        node = right.clone();
                    } else {
                        siblings.push(right.clone());
                        node = left.clone();
                    }
                }
                _ => {
                    return Err(DbError::Corrupted(format!("malformed tree node {}", node)).into());
                }
            }
        }

        Err(DbError::Corrupted("tree deeper than a field element".to_string()).into())
    }

    pub async fn insert(&mut self, key: &BigUint, value: &BigUint) -> Result<SmtInsert, RollupError> {
        let old_root = self.root.clone();
        let found = self.find(key).await?;
        if found.found {
            return Err(RollupError::KeyExists(key.clone()));
        }

        let mut siblings = found.siblings.clone();
        let mut rt_old = BigUint::zero();
        let mut added_one = false;
        let mut mixed = false;

        if !found.is_old0 {
            // Extend the path until the old leaf and the new key diverge.
            let mut level = siblings.len();
            while key_bit(&found.not_found_key, level) == key_bit(key, level) {
                siblings.push(BigUint::zero());
                level += 1;
                if level >= MAX_DEPTH {
                    return Err(DbError::Corrupted("keys do not diverge".to_string()).into());
                }
            }
            rt_old = hash_leaf(&found.not_found_key, &found.not_found_value)?;
            siblings.push(rt_old.clone());
            added_one = true;
        } else if !siblings.is_empty() {
            mixed = true;
        }

        let mut inserts = Vec::with_capacity(siblings.len() + 1);
        let mut deletes = Vec::new();

        let mut rt = hash_leaf(key, value)?;
        inserts.push((rt.clone(), vec![BigUint::one(), key.clone(), value.clone()]));

        for level in (0..siblings.len()).rev() {
            let sibling = &siblings[level];
            if level < siblings.len() - 1 && !sibling.is_zero() {
                mixed = true;
            }
            if mixed {
                rt_old = if key_bit(key, level) {
                    hash_node(sibling, &rt_old)?
                } else {
                    hash_node(&rt_old, sibling)?
                };
                deletes.push(rt_old.clone());
            }

            let node = if key_bit(key, level) {
                vec![sibling.clone(), rt]
            } else {
                vec![rt, sibling.clone()]
            };
            rt = hash_node(&node[0], &node[1])?;
            inserts.push((rt.clone(), node));
        }

        if added_one {
            siblings.pop();
        }
        while siblings.last().is_some_and(|s| s.is_zero()) {
            siblings.pop();
        }

        self.db.multi_ins(inserts).await?;
        self.db.set_root(rt.clone()).await?;
        self.db.multi_del(deletes).await?;
        self.root = rt.clone();

        Ok(SmtInsert {
            old_root,
            new_root: rt,
            siblings,
            is_old0: found.is_old0,
            old_key: found.not_found_key,
            old_value: found.not_found_value,
        })
    }

    pub async fn update(&mut self, key: &BigUint, value: &BigUint) -> Result<SmtUpdate, RollupError> {
        let old_root = self.root.clone();
        let found = self.find(key).await?;
        if !found.found {
            return Err(RollupError::KeyNotFound(key.clone()));
        }

        let mut rt_old = hash_leaf(key, &found.found_value)?;
        let mut rt_new = hash_leaf(key, value)?;
        let mut inserts = vec![(rt_new.clone(), vec![BigUint::one(), key.clone(), value.clone()])];
        let mut deletes = vec![rt_old.clone()];

        for level in (0..found.siblings.len()).rev() {
            let sibling = &found.siblings[level];
            let (old_node, new_node) = if key_bit(key, level) {
                ([sibling.clone(), rt_old], vec![sibling.clone(), rt_new])
            } else {
                ([rt_old, sibling.clone()], vec![rt_new, sibling.clone()])
            };
            rt_old = hash_node(&old_node[0], &old_node[1])?;
            rt_new = hash_node(&new_node[0], &new_node[1])?;
            deletes.push(rt_old.clone());
            inserts.push((rt_new.clone(), new_node));
        }

        self.db.multi_del(deletes).await?;
        self.db.multi_ins(inserts).await?;
        self.db.set_root(rt_new.clone()).await?;
        self.root = rt_new.clone();

        Ok(SmtUpdate {
            old_root,
            new_root: rt_new,
            old_value: found.found_value,
            siblings: found.siblings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemStore;
    use std::sync::Arc;

    fn n(v: u64) -> BigUint {
        BigUint::from(v)
    }

    async fn empty_tree() -> Smt<Arc<MemStore>> {
        Smt::new(Arc::new(MemStore::new()), BigUint::zero())
    }

    #[tokio::test]
    async fn test_single_leaf_root_is_leaf_hash() {
        let mut smt = empty_tree().await;
        let res = smt.insert(&n(1), &n(77)).await.unwrap();
        assert!(res.is_old0);
        assert!(res.siblings.is_empty());
        assert_eq!(*smt.root(), hash_leaf(&n(1), &n(77)).unwrap());
        assert_eq!(smt.db().get_root().await.unwrap(), *smt.root());
    }

    #[tokio::test]
    async fn test_two_leaves_split_on_first_bit() {
        let mut smt = empty_tree().await;
        smt.insert(&n(1), &n(10)).await.unwrap();
        let res = smt.insert(&n(2), &n(20)).await.unwrap();

        // key 2 goes left (bit 0 = 0), key 1 goes right
        let expected = hash_node(
            &hash_leaf(&n(2), &n(20)).unwrap(),
            &hash_leaf(&n(1), &n(10)).unwrap(),
        )
        .unwrap();
        assert_eq!(*smt.root(), expected);
        assert!(!res.is_old0);
        assert_eq!(res.old_key, n(1));
        assert_eq!(res.old_value, n(10));
        // the displaced leaf is reported through old_key/old_value, not siblings
        assert!(res.siblings.is_empty());
    }

    #[tokio::test]
    async fn test_deep_split_pads_zero_siblings() {
        let mut smt = empty_tree().await;
        // 1 = 0b001, 5 = 0b101: they share the first two bits
        smt.insert(&n(1), &n(10)).await.unwrap();
        smt.insert(&n(5), &n(50)).await.unwrap();

        let find = smt.find(&n(5)).await.unwrap();
        assert!(find.found);
        assert_eq!(find.found_value, n(50));
        assert_eq!(find.siblings.len(), 3);
        assert!(find.siblings[0].is_zero());
        assert!(find.siblings[1].is_zero());
        assert_eq!(find.siblings[2], hash_leaf(&n(1), &n(10)).unwrap());
    }

    #[tokio::test]
    async fn test_find_missing_reports_neighbour() {
        let mut smt = empty_tree().await;
        smt.insert(&n(1), &n(10)).await.unwrap();
        smt.insert(&n(5), &n(50)).await.unwrap();

        // 9 = 0b1001 follows the path of 1 down to its leaf
        let find = smt.find(&n(9)).await.unwrap();
        assert!(!find.found);
        assert!(!find.is_old0);
        assert_eq!(find.not_found_key, n(1));
        assert_eq!(find.not_found_value, n(10));

        // 2 = 0b10 turns left at the root, where the subtree is empty
        let find = smt.find(&n(2)).await.unwrap();
        assert!(!find.found);
        assert!(find.is_old0);
        assert_eq!(find.siblings.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_existing_key_fails() {
        let mut smt = empty_tree().await;
        smt.insert(&n(1), &n(10)).await.unwrap();
        let err = smt.insert(&n(1), &n(11)).await.unwrap_err();
        assert!(matches!(err, RollupError::KeyExists(k) if k == n(1)));
    }

    #[tokio::test]
    async fn test_update_missing_key_fails() {
        let mut smt = empty_tree().await;
        let err = smt.update(&n(4), &n(1)).await.unwrap_err();
        assert!(matches!(err, RollupError::KeyNotFound(k) if k == n(4)));
    }

    #[tokio::test]
    async fn test_root_is_independent_of_insert_order() {
        let keys = [1u64, 2, 3, 5, 8, 13, 21];

        let mut forward = empty_tree().await;
        for k in keys {
            forward.insert(&n(k), &n(k * 100)).await.unwrap();
        }
        let mut backward = empty_tree().await;
        for k in keys.iter().rev() {
            backward.insert(&n(*k), &n(k * 100)).await.unwrap();
        }
        assert_eq!(forward.root(), backward.root());
    }

    #[tokio::test]
    async fn test_update_matches_fresh_insert_and_prunes() {
        let mut updated = empty_tree().await;
        for k in 1..=6u64 {
            updated.insert(&n(k), &n(k)).await.unwrap();
        }
        let nodes_before = updated.db().len().await;
        let res = updated.update(&n(3), &n(333)).await.unwrap();
        assert_eq!(res.old_value, n(3));
        assert_eq!(res.new_root, *updated.root());
        assert_eq!(updated.db().len().await, nodes_before);

        let mut fresh = empty_tree().await;
        for k in 1..=6u64 {
            let v = if k == 3 { 333 } else { k };
            fresh.insert(&n(k), &n(v)).await.unwrap();
        }
        assert_eq!(updated.root(), fresh.root());
    }

    #[tokio::test]
    async fn test_insert_removes_stale_nodes() {
        let mut smt = empty_tree().await;
        for k in 1..=16u64 {
            smt.insert(&n(k), &n(k)).await.unwrap();
        }
        // a full collapsed tree over n leaves has exactly n leaves and n - 1 internal nodes
        assert_eq!(smt.db().len().await, 31);
    }

    #[tokio::test]
    async fn test_random_keys_in_random_order() {
        use rand::seq::SliceRandom;
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut keys: Vec<u64> = (0..40).map(|_| rng.gen_range(1..u64::MAX)).collect();
        keys.sort_unstable();
        keys.dedup();

        let mut ordered = empty_tree().await;
        for &k in &keys {
            ordered.insert(&n(k), &n(k / 2)).await.unwrap();
        }
        keys.shuffle(&mut rng);
        let mut shuffled = empty_tree().await;
        for &k in &keys {
            shuffled.insert(&n(k), &n(k / 2)).await.unwrap();
        }

        assert_eq!(ordered.root(), shuffled.root());
        assert_eq!(shuffled.db().len().await, 2 * keys.len() - 1);
        for &k in &keys {
            let find = shuffled.find(&n(k)).await.unwrap();
            assert!(find.found);
            assert_eq!(find.found_value, n(k / 2));
        }
    }

    #[tokio::test]
    async fn test_load_uses_stored_root() {
        let db = Arc::new(MemStore::new());
        let mut smt = Smt::new(db.clone(), BigUint::zero());
        smt.insert(&n(9), &n(1)).await.unwrap();

        let reopened = Smt::load(db).await.unwrap();
        assert_eq!(reopened.root(), smt.root());
        assert!(reopened.find(&n(9)).await.unwrap().found);
    }
}
