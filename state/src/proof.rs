//! Membership proofs for the versioned tree
//!
//! An existence proof carries the leaf and the root-ward path of sibling
//! hashes; an absence proof carries the missing key's adjacent neighbors,
//! each with its own existence proof. Verification recomputes the root
//! hash from the canonical node encodings alone, so a proof checks out
//! against `(key, value-or-absence, trusted root hash)` without any access
//! to the serving node.

use serde::{Deserialize, Serialize};
use tidemark_core::{Hash, Height, StoreError, StoreResult};
use tidemark_crypto::hashing;

use crate::node::{self, NodeId};
use crate::tree::VersionedTree;

/// Which side of the recomputed hash the sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// One inner node on the path from a leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub version: u64,
    pub height: i32,
    pub size: u64,
    pub split_key: Vec<u8>,
    pub side: Side,
    pub sibling_hash: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceProof {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub leaf_version: u64,
    /// Leaf-to-root order
    pub path: Vec<PathStep>,
}

/// Absence shown through the missing key's neighbors: the largest key
/// below it and the smallest key above it, whichever exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsenceProof {
    pub missing_key: Vec<u8>,
    pub left: Option<ExistenceProof>,
    pub right: Option<ExistenceProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeProof {
    Existence(ExistenceProof),
    Absence(AbsenceProof),
}

impl TreeProof {
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Check this proof against a trusted root hash. `expected` is the
    /// claimed value, or `None` to claim absence.
    pub fn verify(&self, root: &Hash, key: &[u8], expected: Option<&[u8]>) -> bool {
        verify_proof(root, key, expected, self)
    }
}

/// Stateless verification entry point.
pub fn verify_proof(root: &Hash, key: &[u8], expected: Option<&[u8]>, proof: &TreeProof) -> bool {
    match (expected, proof) {
        (Some(value), TreeProof::Existence(p)) => verify_existence(root, key, value, p),
        (None, TreeProof::Absence(p)) => verify_absence(root, key, p),
        _ => false,
    }
}

fn recompute_root(proof: &ExistenceProof) -> Hash {
    let mut acc = node::leaf_hash(proof.leaf_version, &proof.key, &proof.value);
    for step in &proof.path {
        let (left, right) = match step.side {
            Side::Left => (step.sibling_hash, acc),
            Side::Right => (acc, step.sibling_hash),
        };
        acc = node::inner_hash(
            step.version,
            step.height,
            step.size,
            &step.split_key,
            &left,
            &right,
        );
    }
    acc
}

fn verify_existence(root: &Hash, key: &[u8], value: &[u8], proof: &ExistenceProof) -> bool {
    proof.key == key && proof.value == value && recompute_root(proof) == *root
}

fn verify_absence(root: &Hash, missing_key: &[u8], proof: &AbsenceProof) -> bool {
    if proof.missing_key != missing_key {
        return false;
    }

    if proof.left.is_none() && proof.right.is_none() {
        // only an empty tree proves absence with no neighbors
        return *root == hashing::empty_hash();
    }

    if let Some(left) = &proof.left {
        if left.key.as_slice() >= missing_key {
            return false;
        }
        if !verify_existence(root, &left.key, &left.value, left) {
            return false;
        }
    }
    if let Some(right) = &proof.right {
        if right.key.as_slice() <= missing_key {
            return false;
        }
        if !verify_existence(root, &right.key, &right.value, right) {
            return false;
        }
    }
    if let (Some(left), Some(right)) = (&proof.left, &proof.right) {
        if left.key >= right.key {
            return false;
        }
    }
    true
}

impl VersionedTree {
    /// Value-or-absence at `height`, plus a proof anchored to that
    /// version's root hash.
    pub fn get_versioned_with_proof(
        &self,
        key: &[u8],
        height: Height,
    ) -> StoreResult<(Option<Vec<u8>>, TreeProof)> {
        let root = self
            .versions
            .get(&height)
            .ok_or(StoreError::VersionNotFound(height))?
            .root;

        let value = self.get_at(root, key).map(|v| v.to_vec());
        let proof = if value.is_some() {
            let existence = self.build_existence(root, key).ok_or_else(|| {
                StoreError::Internal("failed to build existence proof".into())
            })?;
            TreeProof::Existence(existence)
        } else {
            TreeProof::Absence(AbsenceProof {
                missing_key: key.to_vec(),
                left: self
                    .find_predecessor(root, key)
                    .and_then(|k| self.build_existence(root, &k)),
                right: self
                    .find_successor(root, key)
                    .and_then(|k| self.build_existence(root, &k)),
            })
        };
        Ok((value, proof))
    }

    fn build_existence(&self, root: Option<NodeId>, key: &[u8]) -> Option<ExistenceProof> {
        let mut path = Vec::new();
        let mut cur = root?;
        loop {
            let n = self.node(cur);
            if n.is_leaf() {
                if n.key == key {
                    path.reverse();
                    return Some(ExistenceProof {
                        key: n.key.clone(),
                        value: n.value.clone(),
                        leaf_version: n.version,
                        path,
                    });
                }
                return None;
            }

            let (left, right) = (n.left?, n.right?);
            let (next, side, sibling_hash) = if key <= n.key.as_slice() {
                (left, Side::Right, self.hash_of(Some(right)))
            } else {
                (right, Side::Left, self.hash_of(Some(left)))
            };
            path.push(PathStep {
                version: n.version,
                height: n.height,
                size: n.size,
                split_key: n.key.clone(),
                side,
                sibling_hash,
            });
            cur = next;
        }
    }

    /// Largest key smaller than `key` in the subtree.
    fn find_predecessor(&self, root: Option<NodeId>, key: &[u8]) -> Option<Vec<u8>> {
        let mut cur = root;
        let mut predecessor = None;
        while let Some(id) = cur {
            let n = self.node(id);
            if n.is_leaf() {
                if n.key.as_slice() < key {
                    predecessor = Some(n.key.clone());
                }
                break;
            }
            if n.key.as_slice() < key {
                predecessor = Some(n.key.clone());
                cur = n.right;
            } else {
                cur = n.left;
            }
        }
        predecessor
    }

    /// Smallest key larger than `key` in the subtree.
    fn find_successor(&self, root: Option<NodeId>, key: &[u8]) -> Option<Vec<u8>> {
        let mut cur = root;
        let mut successor = None;
        while let Some(id) = cur {
            let n = self.node(id);
            if n.is_leaf() {
                if n.key.as_slice() > key {
                    successor = Some(n.key.clone());
                }
                break;
            }
            if n.key.as_slice() >= key {
                successor = Some(n.key.clone());
                cur = n.left;
            } else {
                cur = n.right;
            }
        }
        successor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_tree() -> VersionedTree {
        let mut tree = VersionedTree::in_memory();
        for (key, value) in [
            (b"alice".as_slice(), b"100".as_slice()),
            (b"bob", b"50"),
            (b"carol", b"75"),
            (b"dave", b"20"),
        ] {
            tree.set(key, value).unwrap();
        }
        tree.save_version(1).unwrap();
        tree
    }

    #[test]
    fn test_existence_proof_verifies() {
        let tree = populated_tree();
        let root = tree.root_hash_at(1).unwrap();

        let (value, proof) = tree.get_versioned_with_proof(b"bob", 1).unwrap();
        assert_eq!(value, Some(b"50".to_vec()));
        assert!(proof.verify(&root, b"bob", Some(b"50")));
    }

    #[test]
    fn test_tampered_proof_rejected() {
        let tree = populated_tree();
        let root = tree.root_hash_at(1).unwrap();

        let (_, proof) = tree.get_versioned_with_proof(b"bob", 1).unwrap();
        // wrong value
        assert!(!proof.verify(&root, b"bob", Some(b"51")));
        // wrong key
        assert!(!proof.verify(&root, b"bo", Some(b"50")));
        // wrong root
        assert!(!proof.verify(&Hash([0xFF; 32]), b"bob", Some(b"50")));
        // existence proof cannot claim absence
        assert!(!proof.verify(&root, b"bob", None));
    }

    #[test]
    fn test_absence_proof_verifies() {
        let tree = populated_tree();
        let root = tree.root_hash_at(1).unwrap();

        let (value, proof) = tree.get_versioned_with_proof(b"bobby", 1).unwrap();
        assert_eq!(value, None);
        assert!(proof.verify(&root, b"bobby", None));
        assert!(!proof.verify(&root, b"bobby", Some(b"1")));
        // an absence proof for one key does not transfer to another
        assert!(!proof.verify(&root, b"carl", None));
    }

    #[test]
    fn test_absence_before_first_and_after_last_key() {
        let tree = populated_tree();
        let root = tree.root_hash_at(1).unwrap();

        let (_, below) = tree.get_versioned_with_proof(b"aaron", 1).unwrap();
        assert!(below.verify(&root, b"aaron", None));
        let (_, above) = tree.get_versioned_with_proof(b"zed", 1).unwrap();
        assert!(above.verify(&root, b"zed", None));
    }

    #[test]
    fn test_empty_tree_absence() {
        let mut tree = VersionedTree::in_memory();
        tree.save_version(1).unwrap();
        let root = tree.root_hash_at(1).unwrap();

        let (value, proof) = tree.get_versioned_with_proof(b"anything", 1).unwrap();
        assert_eq!(value, None);
        assert!(proof.verify(&root, b"anything", None));
    }

    #[test]
    fn test_proof_bytes_roundtrip() {
        let tree = populated_tree();
        let root = tree.root_hash_at(1).unwrap();

        let (_, proof) = tree.get_versioned_with_proof(b"carol", 1).unwrap();
        let bytes = proof.to_bytes().unwrap();
        let restored = TreeProof::from_bytes(&bytes).unwrap();
        assert!(restored.verify(&root, b"carol", Some(b"75")));
    }

    #[test]
    fn test_historical_proof_stable_after_later_commits() {
        let mut tree = populated_tree();
        let root1 = tree.root_hash_at(1).unwrap();
        let (_, proof) = tree.get_versioned_with_proof(b"alice", 1).unwrap();

        tree.set(b"alice", b"999").unwrap();
        tree.save_version(2).unwrap();

        // the old proof still verifies against the old root
        assert!(proof.verify(&root1, b"alice", Some(b"100")));
        // and a fresh proof at height 1 matches the original value
        let (value, fresh) = tree.get_versioned_with_proof(b"alice", 1).unwrap();
        assert_eq!(value, Some(b"100".to_vec()));
        assert!(fresh.verify(&root1, b"alice", Some(b"100")));
        assert_ne!(tree.root_hash_at(2).unwrap(), root1);
    }

    #[test]
    fn test_proof_for_missing_version() {
        let tree = populated_tree();
        assert!(matches!(
            tree.get_versioned_with_proof(b"alice", 3).unwrap_err(),
            StoreError::VersionNotFound(3)
        ));
    }
}
