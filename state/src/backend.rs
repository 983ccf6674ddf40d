//! Durable node storage backed by sled
//!
//! Three named trees: `nodes` maps a node hash to its canonical encoding,
//! `roots` maps a committed height to its root hash, and `meta` holds the
//! latest committed height. A version becomes durable in one
//! `persist_version` call: node batch, root record, meta update, flush.

use sled::{Db, Tree};
use std::path::{Path, PathBuf};
use tidemark_core::{Hash, Height, StoreError, StoreResult};

const NODES_TREE: &str = "nodes";
const ROOTS_TREE: &str = "roots";
const META_TREE: &str = "meta";
const LATEST_KEY: &[u8] = b"latest_height";

/// Resolve a storage directory name the way external callers pass it in:
/// make it absolute and drop an accidental extension suffix (some callers
/// append a stray ".db").
pub(crate) fn normalize_db_path(path: &Path) -> StoreResult<PathBuf> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| StoreError::Internal(format!("invalid database name: {e}")))?
            .join(path)
    };
    Ok(abs.with_extension(""))
}

#[derive(Clone)]
pub(crate) struct NodeBackend {
    db: Db,
    nodes: Tree,
    roots: Tree,
    meta: Tree,
}

impl NodeBackend {
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        let path = normalize_db_path(path)?;
        let db = sled::open(&path)
            .map_err(|e| StoreError::Internal(format!("opening state db: {e}")))?;
        let nodes = db
            .open_tree(NODES_TREE)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let roots = db
            .open_tree(ROOTS_TREE)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let meta = db
            .open_tree(META_TREE)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(Self {
            db,
            nodes,
            roots,
            meta,
        })
    }

    pub(crate) fn latest_height(&self) -> StoreResult<Height> {
        match self
            .meta
            .get(LATEST_KEY)
            .map_err(|e| StoreError::Internal(e.to_string()))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Serialization("corrupt height record".into()))?;
                Ok(u64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }

    /// All retained version roots, in ascending height order.
    pub(crate) fn version_roots(&self) -> StoreResult<Vec<(Height, Hash)>> {
        let mut out = Vec::new();
        for entry in self.roots.iter() {
            let (key, value) = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            let harr: [u8; 8] = key
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Serialization("corrupt root key".into()))?;
            let rarr: [u8; 32] = value
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Serialization("corrupt root hash".into()))?;
            out.push((u64::from_be_bytes(harr), Hash::from_bytes(rarr)));
        }
        Ok(out)
    }

    pub(crate) fn node(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        self.nodes
            .get(hash.as_bytes())
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    /// Durably record a version: its new nodes, its root hash, and the new
    /// latest height, flushed before returning.
    pub(crate) fn persist_version(
        &self,
        height: Height,
        root_hash: Hash,
        new_nodes: &[(Hash, Vec<u8>)],
    ) -> StoreResult<()> {
        let mut batch = sled::Batch::default();
        for (hash, bytes) in new_nodes {
            batch.insert(hash.as_bytes().as_slice(), bytes.as_slice());
        }
        self.nodes
            .apply_batch(batch)
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        self.roots
            .insert(height.to_be_bytes(), root_hash.as_bytes().as_slice())
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        self.meta
            .insert(LATEST_KEY, &height.to_be_bytes())
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        self.db
            .flush()
            .map_err(|e| StoreError::Internal(format!("flushing version {height}: {e}")))?;
        Ok(())
    }

    pub(crate) fn remove_root(&self, height: Height) -> StoreResult<()> {
        self.roots
            .remove(height.to_be_bytes())
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }
}
