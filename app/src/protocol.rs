//! Protocol request/response shapes
//!
//! The shapes the consensus engine drives the facade with. The wire
//! transport carrying them is out of scope here.

use serde::{Deserialize, Serialize};
use tidemark_core::{Hash, Height, StoreError};

/// Response code of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum QueryCode {
    Ok = 0,
    /// Malformed or empty query payload
    Encoding = 1,
    /// Unrecognized query path
    UnknownRequest = 2,
    /// Height never committed or already pruned
    VersionNotFound = 3,
    Internal = 4,
}

impl QueryCode {
    pub fn is_ok(self) -> bool {
        self == QueryCode::Ok
    }
}

impl From<&StoreError> for QueryCode {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::Encoding(_) => QueryCode::Encoding,
            StoreError::UnknownRequest(_) => QueryCode::UnknownRequest,
            StoreError::VersionNotFound(_) => QueryCode::VersionNotFound,
            _ => QueryCode::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub path: String,
    pub data: Vec<u8>,
    /// 0 asks the facade to resolve a height itself
    pub height: Height,
    pub prove: bool,
}

impl QueryRequest {
    pub fn new(path: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.to_string(),
            data: data.into(),
            height: 0,
            prove: false,
        }
    }

    pub fn at_height(mut self, height: Height) -> Self {
        self.height = height;
        self
    }

    pub fn with_proof(mut self) -> Self {
        self.prove = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub code: QueryCode,
    pub key: Vec<u8>,
    /// Requested value; empty bytes encode absence
    pub value: Vec<u8>,
    /// Serialized membership proof, when one was requested and available
    pub proof: Option<Vec<u8>>,
    /// The height the lookup was resolved against
    pub height: Height,
    pub log: String,
}

impl Default for QueryResponse {
    fn default() -> Self {
        Self {
            code: QueryCode::Ok,
            key: Vec::new(),
            value: Vec::new(),
            proof: None,
            height: 0,
            log: String::new(),
        }
    }
}

impl QueryResponse {
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }
}

/// Answer to an Info call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Application name
    pub data: String,
    pub last_block_height: Height,
    pub last_block_app_hash: Hash,
}
