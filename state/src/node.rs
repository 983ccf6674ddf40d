//! Tree nodes and their canonical byte encoding
//!
//! Nodes are stored in an arena and addressed by index; versions share
//! unchanged subtrees by holding the same indices. The canonical encoding
//! doubles as the hash preimage and the durable storage record, so a node
//! fetched from disk re-hashes to its own storage key.

use tidemark_core::{Hash, StoreError, StoreResult};
use tidemark_crypto::hashing;

/// Stable arena index of a node
pub(crate) type NodeId = usize;

/// A node of the versioned tree. Leaves carry key/value pairs; inner
/// nodes carry the split key (largest key of the left subtree) and route
/// lookups: keys `<= split` go left, the rest go right.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Leaf key, or split key for inner nodes
    pub key: Vec<u8>,
    /// Leaf value; empty for inner nodes
    pub value: Vec<u8>,
    /// Height that created this node
    pub version: u64,
    /// Subtree height; 0 for leaves
    pub height: i32,
    /// Leaf count of the subtree
    pub size: u64,
    pub hash: Hash,
    pub left: Option<NodeId>,
    pub right: Option<NodeId>,
}

impl Node {
    pub(crate) fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

const LEAF_TAG: u8 = 0x00;
const INNER_TAG: u8 = 0x01;

/// Canonical leaf encoding:
/// `0x00 || version || height=0 || size=1 || klen || key || vlen || value`
pub(crate) fn encode_leaf(version: u64, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + 8 + 4 + 8 + 4 + key.len() + 4 + value.len());
    data.push(LEAF_TAG);
    data.extend_from_slice(&version.to_le_bytes());
    data.extend_from_slice(&0i32.to_le_bytes());
    data.extend_from_slice(&1u64.to_le_bytes());
    data.extend_from_slice(&(key.len() as u32).to_le_bytes());
    data.extend_from_slice(key);
    data.extend_from_slice(&(value.len() as u32).to_le_bytes());
    data.extend_from_slice(value);
    data
}

/// Canonical inner-node encoding:
/// `0x01 || version || height || size || klen || split_key || left_hash || right_hash`
pub(crate) fn encode_inner(
    version: u64,
    height: i32,
    size: u64,
    split_key: &[u8],
    left_hash: &Hash,
    right_hash: &Hash,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(1 + 8 + 4 + 8 + 4 + split_key.len() + 64);
    data.push(INNER_TAG);
    data.extend_from_slice(&version.to_le_bytes());
    data.extend_from_slice(&height.to_le_bytes());
    data.extend_from_slice(&size.to_le_bytes());
    data.extend_from_slice(&(split_key.len() as u32).to_le_bytes());
    data.extend_from_slice(split_key);
    data.extend_from_slice(left_hash.as_bytes());
    data.extend_from_slice(right_hash.as_bytes());
    data
}

/// Hash of a node's canonical encoding
pub(crate) fn leaf_hash(version: u64, key: &[u8], value: &[u8]) -> Hash {
    hashing::hash(&encode_leaf(version, key, value))
}

pub(crate) fn inner_hash(
    version: u64,
    height: i32,
    size: u64,
    split_key: &[u8],
    left_hash: &Hash,
    right_hash: &Hash,
) -> Hash {
    hashing::hash(&encode_inner(
        version, height, size, split_key, left_hash, right_hash,
    ))
}

/// A node record parsed back from its canonical encoding
#[derive(Debug, Clone)]
pub(crate) struct DecodedNode {
    pub is_leaf: bool,
    pub version: u64,
    pub height: i32,
    pub size: u64,
    /// Split key for inner nodes, leaf key for leaves
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub left_hash: Hash,
    pub right_hash: Hash,
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> StoreResult<&'a [u8]> {
    if bytes.len() - *pos < n {
        return Err(StoreError::Serialization("truncated node record".into()));
    }
    let out = &bytes[*pos..*pos + n];
    *pos += n;
    Ok(out)
}

pub(crate) fn decode_node(bytes: &[u8]) -> StoreResult<DecodedNode> {
    let mut pos = 0;

    let tag = take(bytes, &mut pos, 1)?[0];
    let version = u64::from_le_bytes(take(bytes, &mut pos, 8)?.try_into().unwrap_or([0; 8]));
    let height = i32::from_le_bytes(take(bytes, &mut pos, 4)?.try_into().unwrap_or([0; 4]));
    let size = u64::from_le_bytes(take(bytes, &mut pos, 8)?.try_into().unwrap_or([0; 8]));
    let klen =
        u32::from_le_bytes(take(bytes, &mut pos, 4)?.try_into().unwrap_or([0; 4])) as usize;
    let key = take(bytes, &mut pos, klen)?.to_vec();

    match tag {
        LEAF_TAG => {
            let vlen =
                u32::from_le_bytes(take(bytes, &mut pos, 4)?.try_into().unwrap_or([0; 4])) as usize;
            let value = take(bytes, &mut pos, vlen)?.to_vec();
            Ok(DecodedNode {
                is_leaf: true,
                version,
                height,
                size,
                key,
                value,
                left_hash: Hash::ZERO,
                right_hash: Hash::ZERO,
            })
        }
        INNER_TAG => {
            let mut left = [0u8; 32];
            left.copy_from_slice(take(bytes, &mut pos, 32)?);
            let mut right = [0u8; 32];
            right.copy_from_slice(take(bytes, &mut pos, 32)?);
            Ok(DecodedNode {
                is_leaf: false,
                version,
                height,
                size,
                key,
                value: Vec::new(),
                left_hash: Hash::from_bytes(left),
                right_hash: Hash::from_bytes(right),
            })
        }
        other => Err(StoreError::Serialization(format!(
            "unknown node tag {other:#04x}"
        ))),
    }
}
