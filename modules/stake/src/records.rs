//! Stake domain records
//!
//! Record shapes served through the query facade. Encoding goes through
//! the canonical binary codec so every node serializes a record to the
//! same bytes.

use serde::{Deserialize, Serialize};
use tidemark_core::{Address, PublicKey, StoreError, StoreResult};

/// Millisecond Unix timestamp
pub type Timestamp = u64;

/// Current wall clock as a record timestamp
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis() as u64
}

/// A staking slot opened by a validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub id: String,
    pub validator_pub_key: PublicKey,
    pub total_amount: u64,
    pub available_amount: u64,
    pub proposed_roi: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Slot {
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A validator candidacy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub pub_key: PublicKey,
    pub owner_address: Address,
    pub shares: u64,
    pub voting_power: u64,
    pub created_at: Timestamp,
}

impl Candidate {
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// A delegation into a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDelegate {
    pub delegator_address: Address,
    pub slot_id: String,
    pub amount: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SlotDelegate {
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Canonical encoding of a record list
pub fn encode_records<T: Serialize>(records: &[T]) -> StoreResult<Vec<u8>> {
    bincode::serialize(records).map_err(|e| StoreError::Serialization(e.to_string()))
}
