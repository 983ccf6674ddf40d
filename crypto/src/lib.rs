//! TIDEMARK Cryptography Module
//!
//! Hashing primitives used for tree node hashes, root hashes, and proof
//! verification:
//! - BLAKE3 as the default hash
//! - SHA-256 fallback

pub mod hashing;

pub use hashing::*;
