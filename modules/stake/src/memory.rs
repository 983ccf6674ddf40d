//! In-memory stake store for embedding apps and tests

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tidemark_core::{Address, PublicKey};

use crate::reader::StakeReader;
use crate::records::{Candidate, Slot, SlotDelegate};

/// DashMap-backed stake store
#[derive(Default)]
pub struct MemoryStakeStore {
    slots: DashMap<String, Slot>,
    candidates: DashMap<PublicKey, Candidate>,
    delegates: RwLock<Vec<SlotDelegate>>,
}

impl MemoryStakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn upsert_slot(&self, slot: Slot) {
        self.slots.insert(slot.id.clone(), slot);
    }

    pub fn upsert_candidate(&self, candidate: Candidate) {
        self.candidates.insert(candidate.pub_key, candidate);
    }

    pub fn add_delegate(&self, delegate: SlotDelegate) {
        self.delegates.write().push(delegate);
    }
}

impl StakeReader for MemoryStakeStore {
    fn slot(&self, id: &str) -> Option<Slot> {
        self.slots.get(id).map(|s| s.clone())
    }

    fn slots(&self) -> Vec<Slot> {
        let mut out: Vec<Slot> = self.slots.iter().map(|s| s.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn candidates(&self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = self.candidates.iter().map(|c| c.clone()).collect();
        out.sort_by(|a, b| a.pub_key.as_bytes().cmp(b.pub_key.as_bytes()));
        out
    }

    fn candidate(&self, pub_key: &PublicKey) -> Option<Candidate> {
        self.candidates.get(pub_key).map(|c| c.clone())
    }

    fn slot_delegates_by_address(&self, address: &Address) -> Vec<SlotDelegate> {
        let mut out: Vec<SlotDelegate> = self
            .delegates
            .read()
            .iter()
            .filter(|d| d.delegator_address == *address)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.slot_id.cmp(&b.slot_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::now_millis;

    fn slot(id: &str) -> Slot {
        Slot {
            id: id.to_string(),
            validator_pub_key: PublicKey([1u8; 32]),
            total_amount: 1000,
            available_amount: 1000,
            proposed_roi: 10,
            created_at: now_millis(),
            updated_at: now_millis(),
        }
    }

    #[test]
    fn test_slot_lookup() {
        let store = MemoryStakeStore::new();
        store.upsert_slot(slot("b"));
        store.upsert_slot(slot("a"));

        assert!(store.slot("a").is_some());
        assert!(store.slot("missing").is_none());

        let ids: Vec<String> = store.slots().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_candidate_lookup() {
        let store = MemoryStakeStore::new();
        let candidate = Candidate {
            pub_key: PublicKey([7u8; 32]),
            owner_address: Address([1u8; 20]),
            shares: 100,
            voting_power: 10,
            created_at: now_millis(),
        };
        store.upsert_candidate(candidate.clone());

        assert_eq!(store.candidate(&PublicKey([7u8; 32])), Some(candidate));
        assert_eq!(store.candidate(&PublicKey([8u8; 32])), None);
        assert_eq!(store.candidates().len(), 1);
    }

    #[test]
    fn test_delegates_filtered_by_address() {
        let store = MemoryStakeStore::new();
        let alice = Address([1u8; 20]);
        let bob = Address([2u8; 20]);

        for (addr, slot_id) in [(alice, "s2"), (bob, "s1"), (alice, "s1")] {
            store.add_delegate(SlotDelegate {
                delegator_address: addr,
                slot_id: slot_id.to_string(),
                amount: 50,
                created_at: now_millis(),
                updated_at: now_millis(),
            });
        }

        let mine = store.slot_delegates_by_address(&alice);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].slot_id, "s1");
        assert_eq!(mine[1].slot_id, "s2");
        assert!(store
            .slot_delegates_by_address(&Address([9u8; 20]))
            .is_empty());
    }
}
