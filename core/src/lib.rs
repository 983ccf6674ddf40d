//! TIDEMARK Core Library
//!
//! Core types, errors, and configuration shared by all TIDEMARK
//! components. This crate provides the foundation for the versioned state
//! store and the protocol facade.

pub mod config;
pub mod error;
pub mod params;
pub mod types;

pub use config::*;
pub use error::*;
pub use params::*;
pub use types::*;
