//! Merkle inclusion proof construction and verification.

use teraindex_core::{Hash32, MerkleHash};

use crate::builder::{hash_pair, MerkleBuilder};
use crate::error::{MerkleError, Result};

/// A single sibling step in a merkle proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofNode {
    /// Sibling digest to fold in.
    pub hash: Hash32,
    /// Whether the sibling sits on the left side of the pair.
    pub is_left: bool,
    /// Leaf position of the sibling subtree (diagnostic).
    pub position: u32,
}

/// A merkle inclusion proof for one transaction.
///
/// `nodes[0]` is the outermost sibling (directly under the root);
/// verification folds from the innermost entry outward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// The proven transaction ID.
    pub txid: Hash32,
    /// Leaf position of the transaction within the tree.
    pub position: u32,
    /// Sibling path from root to leaf.
    pub nodes: Vec<ProofNode>,
}

impl MerkleProof {
    /// Fold the sibling path over the txid and compare against
    /// `expected_root`.
    pub fn verify(&self, expected_root: &Hash32) -> bool {
        let mut current = self.txid;

        for node in self.nodes.iter().rev() {
            current = if node.is_left {
                hash_pair(&node.hash, &current)
            } else {
                hash_pair(&current, &node.hash)
            };
        }

        current == *expected_root
    }
}

impl MerkleBuilder {
    /// Build an inclusion proof for the leaf at `position` by walking the
    /// stored tree down from `tree_root`.
    ///
    /// The walk tracks the physical tree height alongside the real leaf
    /// count. A node at height `h` gives each child capacity for `2^(h-1)`
    /// leaves: when more leaves remain, the left child is full and the
    /// position decides the side; when they all fit in one child, the node
    /// is odd-duplication padding (`X || X`) and the descent continues into
    /// the left copy, folding against the duplicate. A remainder leaf can
    /// sit under several levels of such padding, so the walk only treats a
    /// hash as the leaf once the height reaches zero.
    pub async fn build_merkle_proof(
        &self,
        tree_root: MerkleHash,
        position: u32,
        tx_count: u32,
    ) -> Result<MerkleProof> {
        if position >= tx_count {
            return Err(MerkleError::BadPosition {
                position,
                count: tx_count,
            });
        }

        let mut proof = MerkleProof {
            txid: [0u8; 32],
            position,
            nodes: Vec::new(),
        };

        let mut node_hash = tree_root;
        let mut pos = position;
        let mut count = tx_count;
        let mut height = tx_count.next_power_of_two().trailing_zeros();

        while height > 0 {
            let data = self
                .store()
                .get(node_hash.as_bytes())
                .await?
                .ok_or(MerkleError::MissingNode(node_hash))?;
            if data.len() != 64 {
                return Err(MerkleError::CorruptNode {
                    hash: node_hash,
                    got: data.len(),
                });
            }

            let mut left = [0u8; 32];
            let mut right = [0u8; 32];
            left.copy_from_slice(&data[..32]);
            right.copy_from_slice(&data[32..]);

            // Leaves each child can hold at this height.
            let cap = 1u32 << (height - 1);

            if count > cap {
                if pos < cap {
                    proof.nodes.push(ProofNode {
                        hash: right,
                        is_left: false,
                        position: cap,
                    });
                    node_hash = MerkleHash::wrap(left);
                    count = cap;
                } else {
                    proof.nodes.push(ProofNode {
                        hash: left,
                        is_left: true,
                        position: 0,
                    });
                    node_hash = MerkleHash::wrap(right);
                    pos -= cap;
                    count -= cap;
                }
            } else {
                // Every real leaf fits under the left child; the right half
                // is the duplicated copy.
                proof.nodes.push(ProofNode {
                    hash: right,
                    is_left: false,
                    position: count,
                });
                node_hash = MerkleHash::wrap(left);
            }

            height -= 1;
        }

        proof.txid = node_hash.raw();
        Ok(proof)
    }

    /// Build a proof from a subtree root up to the block merkle root.
    ///
    /// Operates entirely in memory on the ordered subtree roots; nothing is
    /// read from or written to the store.
    pub fn build_block_proof(
        &self,
        subtree_roots: &[Hash32],
        subtree_index: u32,
    ) -> Result<MerkleProof> {
        if subtree_index as usize >= subtree_roots.len() {
            return Err(MerkleError::BadPosition {
                position: subtree_index,
                count: subtree_roots.len() as u32,
            });
        }

        let mut proof = MerkleProof {
            txid: subtree_roots[subtree_index as usize],
            position: subtree_index,
            nodes: Vec::new(),
        };

        let mut level = subtree_roots.to_vec();
        let mut pos = subtree_index as usize;

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));

            for (i, pair) in level.chunks(2).enumerate() {
                let left = pair[0];
                let right = *pair.get(1).unwrap_or(&pair[0]);
                let left_idx = i * 2;
                let right_idx = i * 2 + 1;

                if left_idx == pos {
                    proof.nodes.insert(
                        0,
                        ProofNode {
                            hash: right,
                            is_left: false,
                            position: right_idx as u32,
                        },
                    );
                } else if right_idx == pos && right_idx < level.len() {
                    proof.nodes.insert(
                        0,
                        ProofNode {
                            hash: left,
                            is_left: true,
                            position: left_idx as u32,
                        },
                    );
                }

                next.push(hash_pair(&left, &right));
            }

            level = next;
            pos /= 2;
        }

        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sha2::{Digest, Sha256};
    use teraindex_store::{ContentStore, MemoryStore};

    use super::*;

    fn sha(data: &[u8]) -> Hash32 {
        Sha256::digest(data).into()
    }

    #[tokio::test]
    async fn test_build_and_verify_proof_all_positions() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let txids = vec![sha(b"tx1"), sha(b"tx2"), sha(b"tx3"), sha(b"tx4")];

        let root = b.build_tree(&txids).await.unwrap();
        let raw_root = root.raw();

        for i in 0..4u32 {
            let proof = b.build_merkle_proof(root, i, 4).await.unwrap();
            assert_eq!(proof.position, i);
            assert_eq!(proof.txid, txids[i as usize]);
            assert_eq!(proof.nodes.len(), 2);
            assert!(proof.verify(&raw_root), "position {i}");
        }
    }

    #[tokio::test]
    async fn test_proof_roundtrip_various_sizes() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));

        for n in 1..=9u32 {
            let txids: Vec<Hash32> = (0..n)
                .map(|i| sha(format!("tx-{n}-{i}").as_bytes()))
                .collect();
            let root = b.build_tree(&txids).await.unwrap();

            for i in 0..n {
                let proof = b.build_merkle_proof(root, i, n).await.unwrap();
                assert_eq!(proof.txid, txids[i as usize], "{n} leaves, position {i}");
                assert!(proof.verify(&root.raw()), "{n} leaves, position {i}");
            }
        }
    }

    #[tokio::test]
    async fn test_remainder_leaf_proof_folds_through_duplicate() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let txids = vec![sha(b"tx1"), sha(b"tx2"), sha(b"tx3")];

        let root = b.build_tree(&txids).await.unwrap();
        let proof = b.build_merkle_proof(root, 2, 3).await.unwrap();

        // The recorded txid is the leaf itself, not the duplicated pair
        // node above it.
        assert_eq!(proof.txid, txids[2]);
        assert_eq!(proof.nodes.len(), 2);

        // Innermost step folds the leaf against its own duplicate.
        let innermost = proof.nodes.last().unwrap();
        assert_eq!(innermost.hash, txids[2]);
        assert!(!innermost.is_left);

        // Outermost sibling is the left pair, on the left.
        assert_eq!(proof.nodes[0].hash, hash_pair(&txids[0], &txids[1]));
        assert!(proof.nodes[0].is_left);

        assert!(proof.verify(&root.raw()));
    }

    #[tokio::test]
    async fn test_single_tx_proof_is_empty() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let txid = sha(b"single-tx");

        let root = b.build_tree(&[txid]).await.unwrap();
        let proof = b.build_merkle_proof(root, 0, 1).await.unwrap();

        assert!(proof.nodes.is_empty());
        assert_eq!(proof.txid, txid);
        assert!(proof.verify(&txid));
    }

    #[tokio::test]
    async fn test_proof_position_out_of_range() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let txids = vec![sha(b"tx1"), sha(b"tx2")];

        let root = b.build_tree(&txids).await.unwrap();
        let err = b.build_merkle_proof(root, 5, 2).await.unwrap_err();
        assert!(matches!(
            err,
            MerkleError::BadPosition {
                position: 5,
                count: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_proof_missing_node() {
        let store = Arc::new(MemoryStore::new());
        let b = MerkleBuilder::new(store.clone());
        let txids = vec![sha(b"tx1"), sha(b"tx2"), sha(b"tx3"), sha(b"tx4")];

        let root = b.build_tree(&txids).await.unwrap();
        store.delete(root.as_bytes()).await.unwrap();

        let err = b.build_merkle_proof(root, 0, 4).await.unwrap_err();
        assert!(matches!(err, MerkleError::MissingNode(h) if h == root));
    }

    #[tokio::test]
    async fn test_proof_corrupt_node() {
        let store = Arc::new(MemoryStore::new());
        let b = MerkleBuilder::new(store.clone());
        let txids = vec![sha(b"tx1"), sha(b"tx2")];

        let root = b.build_tree(&txids).await.unwrap();
        store.put(root.as_bytes(), b"not 64 bytes").await.unwrap();

        let err = b.build_merkle_proof(root, 0, 2).await.unwrap_err();
        assert!(matches!(err, MerkleError::CorruptNode { got: 12, .. }));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_root() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let txids = vec![sha(b"tx1"), sha(b"tx2")];

        let root = b.build_tree(&txids).await.unwrap();
        let proof = b.build_merkle_proof(root, 0, 2).await.unwrap();

        assert!(!proof.verify(&sha(b"wrong root")));
    }

    #[test]
    fn test_block_proof_all_indices() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let roots = vec![
            sha(b"subtree1"),
            sha(b"subtree2"),
            sha(b"subtree3"),
            sha(b"subtree4"),
        ];

        let h01 = hash_pair(&roots[0], &roots[1]);
        let h23 = hash_pair(&roots[2], &roots[3]);
        let block_root = hash_pair(&h01, &h23);

        for i in 0..4u32 {
            let proof = b.build_block_proof(&roots, i).unwrap();
            assert_eq!(proof.position, i);
            assert_eq!(proof.txid, roots[i as usize]);
            assert!(proof.verify(&block_root), "index {i}");
        }
    }

    #[test]
    fn test_block_proof_odd_count() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let roots = vec![sha(b"s1"), sha(b"s2"), sha(b"s3")];

        let h01 = hash_pair(&roots[0], &roots[1]);
        let h22 = hash_pair(&roots[2], &roots[2]);
        let block_root = hash_pair(&h01, &h22);

        for i in 0..3u32 {
            let proof = b.build_block_proof(&roots, i).unwrap();
            assert!(proof.verify(&block_root), "index {i}");
        }
    }

    #[test]
    fn test_block_proof_single_subtree() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let roots = vec![sha(b"single-subtree")];

        let proof = b.build_block_proof(&roots, 0).unwrap();
        assert!(proof.nodes.is_empty());
        assert_eq!(proof.txid, roots[0]);
        assert!(proof.verify(&roots[0]));
    }

    #[test]
    fn test_block_proof_index_out_of_range() {
        let b = MerkleBuilder::new(Arc::new(MemoryStore::new()));
        let roots = vec![sha(b"s1"), sha(b"s2")];

        assert!(matches!(
            b.build_block_proof(&roots, 2),
            Err(MerkleError::BadPosition {
                position: 2,
                count: 2
            })
        ));
    }
}
