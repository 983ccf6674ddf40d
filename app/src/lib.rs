//! TIDEMARK Store Application
//!
//! The protocol facade a consensus engine drives:
//! - block lifecycle (Info / Query / BeginBlock / EndBlock / Commit)
//! - store-prefixed queries against the versioned tree, with proofs
//! - domain-prefixed queries routed to the stake collaborator
//! - per-block validator change aggregation

pub mod app;
pub mod protocol;
pub mod valchange;

pub use app::*;
pub use protocol::*;
pub use valchange::*;
