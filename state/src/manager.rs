//! Three-view state manager
//!
//! One `VersionedTree` seen through three views: Committed (read-only,
//! last durable version), Append (the block's ordered write set), and
//! Check (an independent scratch overlay for admission checks). Commit
//! folds Append into the tree as the next version; Check writes never
//! reach disk.

use std::path::Path;

use tidemark_core::{Hash, Height, RootHash, StoreConfig, StoreError, StoreResult};

use crate::overlay::{WriteOp, WriteOverlay};
use crate::proof::TreeProof;
use crate::tree::VersionedTree;

/// Apphash reported while the store holds no entries at all, keeping the
/// genesis apphash stable instead of exposing a tree hash of zero entries.
pub const EMPTY_APP_HASH: Hash = Hash::ZERO;

pub struct StateManager {
    tree: VersionedTree,
    append: WriteOverlay,
    check: WriteOverlay,
    history_size: u64,
}

impl StateManager {
    /// Open the store described by `config` and load its latest version.
    pub fn load(config: &StoreConfig) -> StoreResult<Self> {
        let tree = match &config.db_path {
            Some(path) => VersionedTree::load(Path::new(path))?,
            None => VersionedTree::in_memory(),
        };
        Ok(Self {
            tree,
            append: WriteOverlay::new(),
            check: WriteOverlay::new(),
            history_size: config.history_size,
        })
    }

    /// Read-only view of the last durable version. External queries go
    /// through here and never observe partial-block state.
    pub fn committed(&self) -> CommittedView<'_> {
        CommittedView { tree: &self.tree }
    }

    /// The single mutable overlay for ordered transaction execution
    /// within the current block.
    pub fn append(&mut self) -> StagedView<'_> {
        StagedView {
            tree: &self.tree,
            overlay: &mut self.append,
        }
    }

    /// Scratch overlay for pre-execution admission checks, independent of
    /// the append overlay and never durable.
    pub fn check(&mut self) -> StagedView<'_> {
        StagedView {
            tree: &self.tree,
            overlay: &mut self.check,
        }
    }

    /// Throw away all staged check writes. Safe at any time.
    pub fn reset_check(&mut self) {
        self.check.clear();
    }

    pub fn committed_height(&self) -> Height {
        self.tree.latest_height()
    }

    /// The height currently under construction.
    pub fn working_height(&self) -> Height {
        self.tree.latest_height() + 1
    }

    /// Key count of the committed version.
    pub fn size(&self) -> u64 {
        self.tree.size()
    }

    /// Latest apphash; the fixed sentinel while the store is empty.
    pub fn root_hash(&self) -> RootHash {
        if self.tree.size() == 0 {
            EMPTY_APP_HASH
        } else {
            self.tree.root_hash()
        }
    }

    /// Fold the append overlay into the tree as version `height`,
    /// advancing the committed height by exactly one. Both overlays are
    /// empty afterwards and versions older than the retention window are
    /// pruned. Any error from this path leaves the store suspect; the
    /// caller must treat it as fatal and halt instead of serving more
    /// blocks.
    pub fn commit(&mut self, height: Height) -> StoreResult<RootHash> {
        let expected = self.working_height();
        if height != expected {
            return Err(StoreError::HeightMismatch {
                expected,
                got: height,
            });
        }

        for (key, op) in self.append.drain() {
            match op {
                WriteOp::Set(value) => self.tree.set(&key, &value)?,
                WriteOp::Delete => self.tree.remove(&key)?,
            }
        }
        let root = self.tree.save_version(height)?;
        self.check.clear();

        if height > self.history_size {
            self.tree.prune_below(height - self.history_size + 1)?;
        }

        if self.tree.size() == 0 {
            Ok(EMPTY_APP_HASH)
        } else {
            Ok(root)
        }
    }
}

/// Read-only access to committed versions
pub struct CommittedView<'a> {
    tree: &'a VersionedTree,
}

impl CommittedView<'_> {
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.tree.get(key)
    }

    pub fn get_versioned(&self, key: &[u8], height: Height) -> StoreResult<Option<Vec<u8>>> {
        self.tree.get_versioned(key, height)
    }

    pub fn get_versioned_with_proof(
        &self,
        key: &[u8],
        height: Height,
    ) -> StoreResult<(Option<Vec<u8>>, TreeProof)> {
        self.tree.get_versioned_with_proof(key, height)
    }

    pub fn version_exists(&self, height: Height) -> bool {
        self.tree.version_exists(height)
    }

    pub fn root_hash_at(&self, height: Height) -> StoreResult<RootHash> {
        self.tree.root_hash_at(height)
    }
}

/// Read-through view combining an overlay with the committed tree
pub struct StagedView<'a> {
    tree: &'a VersionedTree,
    overlay: &'a mut WriteOverlay,
}

impl StagedView<'_> {
    /// Staged write if the overlay has one, committed value otherwise.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.get(key) {
            Some(WriteOp::Set(value)) => Some(value.clone()),
            Some(WriteOp::Delete) => None,
            None => self.tree.get(key),
        }
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.overlay.set(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.overlay.delete(key);
    }

    pub fn staged_len(&self) -> usize {
        self.overlay.len()
    }
}
