//! The store application facade
//!
//! Implements the block lifecycle the consensus engine drives:
//! Info/SetOption/Query/InitChain/BeginBlock/EndBlock/Commit, plus the
//! AddValChange hook the transaction-execution layer calls while
//! delivering transactions. Block operations are invoked strictly
//! sequentially by the engine; Info and Query may arrive concurrently
//! from serving layers and only ever read the committed view.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use tidemark_core::{
    Address, Height, ParamStore, PublicKey, RootHash, StoreConfig, StoreResult, Unrecoverable,
    ValidatorUpdate,
};
use tidemark_stake::{encode_records, StakeReader};
use tidemark_state::{StateManager, EMPTY_APP_HASH};

use crate::protocol::{InfoResponse, QueryCode, QueryRequest, QueryResponse};
use crate::valchange::ValidatorChangeSet;

/// Protocol facade over the versioned state store.
///
/// Holds the last committed height; the block being delivered lands at
/// `committed_height() + 1`.
pub struct StoreApp {
    name: String,
    state: RwLock<StateManager>,
    /// Last committed block height
    height: RwLock<Height>,
    /// Validator changes cached between BeginBlock and EndBlock
    pending: Mutex<ValidatorChangeSet>,
    params: Mutex<ParamStore>,
    stake: Arc<dyn StakeReader>,
}

impl StoreApp {
    pub fn new(config: &StoreConfig, stake: Arc<dyn StakeReader>) -> StoreResult<Self> {
        let state = StateManager::load(config)?;
        let height = state.committed_height();
        tracing::info!(name = %config.name, height, "store loaded");
        Ok(Self {
            name: config.name.clone(),
            state: RwLock::new(state),
            height: RwLock::new(height),
            pending: Mutex::new(ValidatorChangeSet::new()),
            params: Mutex::new(ParamStore::new()),
            stake,
        })
    }

    /// App with no persistence, for tests and tooling.
    pub fn in_memory(name: &str, stake: Arc<dyn StakeReader>) -> StoreResult<Self> {
        Self::new(&StoreConfig::in_memory(name), stake)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last block height committed to the store.
    pub fn committed_height(&self) -> Height {
        *self.height.read()
    }

    /// The block height currently being written.
    pub fn working_height(&self) -> Height {
        self.committed_height() + 1
    }

    /// Latest apphash.
    pub fn hash(&self) -> RootHash {
        self.state.read().root_hash()
    }

    /// Mutable state access for the transaction-execution layer: the
    /// append overlay during block delivery, the check overlay for
    /// admission. Sequenced externally by the consensus engine.
    pub fn state_mut(&self) -> RwLockWriteGuard<'_, StateManager> {
        self.state.write()
    }

    /// The runtime parameter table.
    pub fn params(&self) -> MutexGuard<'_, ParamStore> {
        self.params.lock()
    }

    // ============ Protocol operations ============

    /// Height and apphash of the last committed block. Read-only and
    /// idempotent.
    pub fn info(&self) -> InfoResponse {
        let state = self.state.read();
        let height = state.committed_height();
        let hash = state.root_hash();
        tracing::info!(height, hash = %hash, "info synced");
        InfoResponse {
            data: self.name.clone(),
            last_block_height: height,
            last_block_app_hash: hash,
        }
    }

    /// Unimplemented option hook; acknowledged, never applied.
    pub fn set_option(&self, _key: &str, _value: &str) -> String {
        "not implemented".to_string()
    }

    pub fn query(&self, req: &QueryRequest) -> QueryResponse {
        let mut res = QueryResponse::default();
        if req.data.is_empty() {
            res.code = QueryCode::Encoding;
            res.log = "query cannot be zero length".to_string();
            return res;
        }

        let state = self.state.read();
        let committed = state.committed();
        let committed_height = state.committed_height();

        // A height of 0 means "current". For proven lookups prefer the
        // previous version: our own apphash for the just-produced block
        // may not be externally confirmed yet, so a proof against it
        // would not verify for the caller.
        let height = if req.height == 0 {
            let prior = committed_height.saturating_sub(1);
            if req.prove && prior > 0 && committed.version_exists(prior) {
                prior
            } else {
                committed_height
            }
        } else {
            req.height
        };
        res.height = height;

        match req.path.as_str() {
            "/store" | "/key" => {
                res.key = req.data.clone();
                if req.prove {
                    match committed.get_versioned_with_proof(&req.data, height) {
                        Ok((value, proof)) => {
                            res.value = value.unwrap_or_default();
                            match proof.to_bytes() {
                                Ok(bytes) => res.proof = Some(bytes),
                                Err(err) => {
                                    res.code = QueryCode::from(&err);
                                    res.log = err.to_string();
                                }
                            }
                        }
                        Err(err) => {
                            res.code = QueryCode::from(&err);
                            res.log = err.to_string();
                        }
                    }
                } else if height == 0 {
                    // nothing committed yet; every key is absent
                    res.value = committed.get(&req.data).unwrap_or_default();
                } else {
                    match committed.get_versioned(&req.data, height) {
                        Ok(value) => res.value = value.unwrap_or_default(),
                        Err(err) => {
                            res.code = QueryCode::from(&err);
                            res.log = err.to_string();
                        }
                    }
                }
            }
            "/slot" => match std::str::from_utf8(&req.data) {
                Ok(id) => {
                    self.encode_into(&mut res, self.stake.slot(id));
                }
                Err(_) => {
                    res.code = QueryCode::Encoding;
                    res.log = "slot id is not valid utf-8".to_string();
                }
            },
            "/slots" => {
                self.encode_list_into(&mut res, &self.stake.slots());
            }
            "/validators" => {
                self.encode_list_into(&mut res, &self.stake.candidates());
            }
            "/validator" => match parse_pub_key(&req.data) {
                Ok(pub_key) => {
                    self.encode_into(&mut res, self.stake.candidate(&pub_key));
                }
                Err(log) => {
                    res.code = QueryCode::Encoding;
                    res.log = log;
                }
            },
            "/delegator" => match parse_address(&req.data) {
                Ok(address) => {
                    self.encode_list_into(
                        &mut res,
                        &self.stake.slot_delegates_by_address(&address),
                    );
                }
                Err(log) => {
                    res.code = QueryCode::Encoding;
                    res.log = log;
                }
            },
            other => {
                res.code = QueryCode::UnknownRequest;
                res.log = format!("Unexpected query path: {other}");
                tracing::warn!(path = other, "rejected query");
            }
        }

        res
    }

    /// Genesis hook. Deliberately empty: seeding the initial candidate
    /// set is the embedding application's decision, not the store's.
    pub fn init_chain(&self, _validators: &[ValidatorUpdate]) {}

    /// Per-block setup hook for the embedding application.
    pub fn begin_block(&self) {}

    /// Record validator power changes produced while delivering
    /// transactions. The sole way validator state accumulates within a
    /// block; repeated keys overwrite in place.
    pub fn add_val_change(&self, diffs: &[ValidatorUpdate]) {
        self.pending.lock().merge_all(diffs);
    }

    /// All validator changes made in this block, drained for the
    /// consensus engine. Relies on `add_val_change` having merged by key;
    /// no further deduplication happens here.
    pub fn end_block(&self) -> Vec<ValidatorUpdate> {
        self.pending.lock().drain()
    }

    /// Fold the delivered block into the next version and report its
    /// apphash. A failure here means the durable store may be
    /// inconsistent: the caller must halt the node rather than keep
    /// serving blocks.
    pub fn commit(&self) -> Result<RootHash, Unrecoverable> {
        let mut height = self.height.write();
        *height += 1;

        match self.state.write().commit(*height) {
            Ok(hash) => {
                if hash == EMPTY_APP_HASH {
                    tracing::debug!(height = *height, "empty hash for empty store");
                } else {
                    tracing::debug!(height = *height, hash = %hash, "commit synced");
                }
                Ok(hash)
            }
            Err(err) => {
                tracing::error!(height = *height, error = %err, "commit failed, halting");
                Err(Unrecoverable(err))
            }
        }
    }

    // ============ Helpers ============

    fn encode_into<T: serde::Serialize>(&self, res: &mut QueryResponse, record: Option<T>) {
        let Some(record) = record else {
            // absence is an empty value, not an error
            return;
        };
        match bincode::serialize(&record) {
            Ok(bytes) => res.value = bytes,
            Err(err) => {
                res.code = QueryCode::Internal;
                res.log = err.to_string();
            }
        }
    }

    fn encode_list_into<T: serde::Serialize>(&self, res: &mut QueryResponse, records: &[T]) {
        match encode_records(records) {
            Ok(bytes) => res.value = bytes,
            Err(err) => {
                res.code = QueryCode::from(&err);
                res.log = err.to_string();
            }
        }
    }
}

fn parse_pub_key(data: &[u8]) -> Result<PublicKey, String> {
    let text = std::str::from_utf8(data).map_err(|_| "pubkey is not valid utf-8".to_string())?;
    PublicKey::from_hex(text.trim()).map_err(|e| format!("invalid pubkey: {e}"))
}

fn parse_address(data: &[u8]) -> Result<Address, String> {
    let text = std::str::from_utf8(data).map_err(|_| "address is not valid utf-8".to_string())?;
    Address::from_hex(text.trim()).map_err(|e| format!("invalid address: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_stake::{Candidate, MemoryStakeStore, Slot};
    use tidemark_state::TreeProof;

    fn test_app() -> (StoreApp, Arc<MemoryStakeStore>) {
        let stake = MemoryStakeStore::shared();
        let app = StoreApp::in_memory("test-app", stake.clone()).unwrap();
        (app, stake)
    }

    fn deliver(app: &StoreApp, key: &[u8], value: &[u8]) {
        app.state_mut().append().set(key, value);
    }

    #[test]
    fn test_info_tracks_commits() {
        let (app, _) = test_app();
        let info = app.info();
        assert_eq!(info.data, "test-app");
        assert_eq!(info.last_block_height, 0);
        assert_eq!(info.last_block_app_hash, EMPTY_APP_HASH);

        deliver(&app, b"k", b"v");
        let hash = app.commit().unwrap();

        let info = app.info();
        assert_eq!(info.last_block_height, 1);
        assert_eq!(info.last_block_app_hash, hash);
        assert_ne!(hash, EMPTY_APP_HASH);
    }

    #[test]
    fn test_empty_store_commits_sentinel_hash() {
        let (app, _) = test_app();
        assert_eq!(app.commit().unwrap(), EMPTY_APP_HASH);
        assert_eq!(app.commit().unwrap(), EMPTY_APP_HASH);
        assert_eq!(app.committed_height(), 2);
        assert_eq!(app.working_height(), 3);
    }

    #[test]
    fn test_set_option_is_acknowledged_noop() {
        let (app, _) = test_app();
        assert_eq!(app.set_option("anything", "at all"), "not implemented");
    }

    #[test]
    fn test_empty_query_rejected_without_store_access() {
        let (app, _) = test_app();
        let res = app.query(&QueryRequest::new("/store", Vec::new()));
        assert_eq!(res.code, QueryCode::Encoding);
        assert!(res.log.contains("zero length"));
    }

    #[test]
    fn test_unknown_path_rejected() {
        let (app, _) = test_app();
        let res = app.query(&QueryRequest::new("/nonsense", b"data".to_vec()));
        assert_eq!(res.code, QueryCode::UnknownRequest);
        assert!(res.log.contains("/nonsense"));
        // the serving loop survives and keeps answering
        assert!(app.query(&QueryRequest::new("/key", b"x".to_vec())).is_ok());
    }

    #[test]
    fn test_versioned_reads_across_heights() {
        let (app, _) = test_app();
        for _ in 0..4 {
            app.commit().unwrap();
        }
        deliver(&app, b"alice", b"100");
        app.commit().unwrap(); // height 5
        deliver(&app, b"alice", b"150");
        app.commit().unwrap(); // height 6

        let at5 = app.query(&QueryRequest::new("/store", b"alice".to_vec()).at_height(5));
        assert!(at5.is_ok());
        assert_eq!(at5.value, b"100");
        assert_eq!(at5.height, 5);

        let at6 = app.query(&QueryRequest::new("/store", b"alice".to_vec()).at_height(6));
        assert_eq!(at6.value, b"150");

        let current = app.query(&QueryRequest::new("/store", b"alice".to_vec()));
        assert_eq!(current.value, b"150");
        assert_eq!(current.height, 6);
    }

    #[test]
    fn test_absent_key_is_empty_value_not_error() {
        let (app, _) = test_app();
        deliver(&app, b"present", b"1");
        app.commit().unwrap();

        let res = app.query(&QueryRequest::new("/key", b"missing".to_vec()));
        assert!(res.is_ok());
        assert!(res.value.is_empty());
        assert_eq!(res.key, b"missing");
    }

    #[test]
    fn test_proven_query_verifies_against_root() {
        let (app, _) = test_app();
        deliver(&app, b"alice", b"100");
        let root = app.commit().unwrap();

        let res = app.query(
            &QueryRequest::new("/store", b"alice".to_vec())
                .at_height(1)
                .with_proof(),
        );
        assert!(res.is_ok());
        assert_eq!(res.value, b"100");

        let proof = TreeProof::from_bytes(res.proof.as_deref().unwrap()).unwrap();
        assert!(proof.verify(&root, b"alice", Some(b"100")));
        assert!(!proof.verify(&root, b"alice", Some(b"999")));
    }

    #[test]
    fn test_height_zero_prefers_prior_version_for_proofs() {
        let (app, _) = test_app();
        deliver(&app, b"k", b"v1");
        let root1 = app.commit().unwrap();
        deliver(&app, b"k", b"v2");
        app.commit().unwrap();

        let res = app.query(&QueryRequest::new("/store", b"k".to_vec()).with_proof());
        assert_eq!(res.height, 1);
        assert_eq!(res.value, b"v1");
        let proof = TreeProof::from_bytes(res.proof.as_deref().unwrap()).unwrap();
        assert!(proof.verify(&root1, b"k", Some(b"v1")));
    }

    #[test]
    fn test_pruned_height_reports_version_not_found() {
        let stake = MemoryStakeStore::shared();
        let mut config = StoreConfig::in_memory("test-app");
        config.history_size = 3;
        let app = StoreApp::new(&config, stake).unwrap();

        for i in 0..6u64 {
            deliver(&app, b"k", i.to_string().as_bytes());
            app.commit().unwrap();
        }

        let pruned = app.query(&QueryRequest::new("/store", b"k".to_vec()).at_height(1));
        assert_eq!(pruned.code, QueryCode::VersionNotFound);
        assert!(!pruned.log.is_empty());

        // distinct from an absent key at a retained height
        let absent = app.query(&QueryRequest::new("/store", b"other".to_vec()).at_height(6));
        assert!(absent.is_ok());
        assert!(absent.value.is_empty());
    }

    #[test]
    fn test_validator_changes_merge_and_drain() {
        let (app, _) = test_app();
        let a = PublicKey([b'A'; 32]);
        let b = PublicKey([b'B'; 32]);

        app.add_val_change(&[ValidatorUpdate::new(a, 10)]);
        app.add_val_change(&[ValidatorUpdate::new(a, 20), ValidatorUpdate::new(b, 5)]);

        let updates = app.end_block();
        assert_eq!(
            updates,
            vec![ValidatorUpdate::new(a, 20), ValidatorUpdate::new(b, 5)]
        );
        // drained exactly once per block
        assert!(app.end_block().is_empty());
    }

    #[test]
    fn test_slot_query_roundtrips_through_codec() {
        let (app, stake) = test_app();
        let slot = Slot {
            id: "slot-1".to_string(),
            validator_pub_key: PublicKey([1u8; 32]),
            total_amount: 1000,
            available_amount: 400,
            proposed_roi: 9,
            created_at: 1,
            updated_at: 2,
        };
        stake.upsert_slot(slot.clone());

        let res = app.query(&QueryRequest::new("/slot", b"slot-1".to_vec()));
        assert!(res.is_ok());
        assert_eq!(Slot::from_bytes(&res.value).unwrap(), slot);
        assert!(res.proof.is_none());

        // absence is an empty value, never an error
        let missing = app.query(&QueryRequest::new("/slot", b"slot-9".to_vec()));
        assert!(missing.is_ok());
        assert!(missing.value.is_empty());
    }

    #[test]
    fn test_validator_queries_route_to_stake() {
        let (app, stake) = test_app();
        let candidate = Candidate {
            pub_key: PublicKey([7u8; 32]),
            owner_address: Address([1u8; 20]),
            shares: 100,
            voting_power: 10,
            created_at: 1,
        };
        stake.upsert_candidate(candidate.clone());

        let one = app.query(&QueryRequest::new(
            "/validator",
            candidate.pub_key.to_hex().into_bytes(),
        ));
        assert!(one.is_ok());
        assert_eq!(Candidate::from_bytes(&one.value).unwrap(), candidate);

        let all = app.query(&QueryRequest::new("/validators", b"*".to_vec()));
        let decoded: Vec<Candidate> = bincode::deserialize(&all.value).unwrap();
        assert_eq!(decoded, vec![candidate]);

        let bad = app.query(&QueryRequest::new("/validator", b"zz".to_vec()));
        assert_eq!(bad.code, QueryCode::Encoding);
    }

    #[test]
    fn test_check_overlay_never_commits() {
        let (app, _) = test_app();
        app.state_mut().check().set(b"tentative", b"1");
        deliver(&app, b"real", b"2");
        app.commit().unwrap();

        assert!(app
            .query(&QueryRequest::new("/key", b"tentative".to_vec()))
            .value
            .is_empty());
        assert_eq!(
            app.query(&QueryRequest::new("/key", b"real".to_vec())).value,
            b"2"
        );
    }

    #[test]
    fn test_params_settable_by_external_name() {
        let (app, _) = test_app();
        assert!(app.params().set("gas_price", "123"));
        assert_eq!(app.params().params().gas_price, 123);
        assert!(!app.params().set("gas_price", "oops"));
    }

    #[test]
    fn test_reopen_resumes_at_committed_height() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = StoreConfig::persistent("test-app", tmp.path().join("state"));

        let root = {
            let app = StoreApp::new(&config, MemoryStakeStore::shared()).unwrap();
            deliver(&app, b"alice", b"100");
            app.commit().unwrap();
            deliver(&app, b"alice", b"150");
            app.commit().unwrap()
        };

        let app = StoreApp::new(&config, MemoryStakeStore::shared()).unwrap();
        assert_eq!(app.committed_height(), 2);
        assert_eq!(app.hash(), root);
        assert_eq!(
            app.query(&QueryRequest::new("/store", b"alice".to_vec()).at_height(1))
                .value,
            b"100"
        );
    }
}
