//! Read-only stake collaborator contract
//!
//! The store facade routes domain-prefixed queries through this trait.
//! Lookups report absence as `None` or an empty list, never as an error;
//! the relational store behind it is someone else's concern.

use tidemark_core::{Address, PublicKey};

use crate::records::{Candidate, Slot, SlotDelegate};

pub trait StakeReader: Send + Sync {
    /// Slot by its identifier.
    fn slot(&self, id: &str) -> Option<Slot>;

    /// Every known slot, in stable id order.
    fn slots(&self) -> Vec<Slot>;

    /// Every candidacy, in stable pubkey order.
    fn candidates(&self) -> Vec<Candidate>;

    /// Candidacy for a validator public key.
    fn candidate(&self, pub_key: &PublicKey) -> Option<Candidate>;

    /// Delegations made by an address, in stable slot order.
    fn slot_delegates_by_address(&self, address: &Address) -> Vec<SlotDelegate>;
}
