//! Runtime parameter table
//!
//! Governance-style updates arrive as `(name, value)` string pairs. Instead
//! of reflecting over struct fields at runtime, each externally settable
//! parameter is registered in an explicit table built once at startup,
//! mapping its stable name to a type tag, a shape check, and a setter.

use crate::error::{StoreError, StoreResult};
use crate::types::Address;
use serde::{Deserialize, Serialize};

/// Store key under which the serialized parameter set lives
pub const PARAM_STORE_KEY: &[u8] = &[0x01];

/// Global chain parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Account where all bonded coins are held
    pub hold_account: Address,
    /// Maximum number of validators
    pub max_vals: u16,
    pub self_staking_ratio: f64,
    pub inflation_rate: f64,
    pub validator_size_threshold: f64,
    pub unstake_waiting_period: u64,
    pub proposal_expire_period: u64,
    pub declare_candidacy: u64,
    pub update_candidacy: u64,
    pub transfer_fund_proposal: u64,
    pub change_params_proposal: u64,
    pub gas_price: u64,
    pub min_staking_amount: u64,
    pub validators_block_award_ratio: f64,
    pub max_slashing_blocks: u16,
    pub slashing_ratio: f64,
    /// JSON-encoded auxiliary validator keys
    pub cube_pub_keys: String,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            hold_account: Address::ZERO,
            max_vals: 100,
            self_staking_ratio: 0.10,
            inflation_rate: 0.08,
            validator_size_threshold: 0.12,
            unstake_waiting_period: 7 * 24 * 3600 / 10,
            proposal_expire_period: 7 * 24 * 3600,
            declare_candidacy: 1_000_000,
            update_candidacy: 1_000_000,
            transfer_fund_proposal: 2_000_000,
            change_params_proposal: 2_000_000,
            gas_price: 2_000_000_000,
            min_staking_amount: 1000,
            validators_block_award_ratio: 0.80,
            max_slashing_blocks: 12,
            slashing_ratio: 0.001,
            cube_pub_keys: "{}".to_string(),
        }
    }
}

/// External value shape of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Uint,
    Float,
    Json,
    Str,
}

struct ParamSpec {
    name: &'static str,
    ty: ParamType,
    set: fn(&mut Params, &str) -> bool,
}

fn set_uint<F: Fn(&mut Params, u64)>(params: &mut Params, value: &str, apply: F) -> bool {
    match value.parse::<u64>() {
        Ok(v) => {
            apply(params, v);
            true
        }
        Err(_) => false,
    }
}

fn set_float<F: Fn(&mut Params, f64)>(params: &mut Params, value: &str, apply: F) -> bool {
    match value.parse::<f64>() {
        Ok(v) if v > 0.0 => {
            apply(params, v);
            true
        }
        _ => false,
    }
}

fn build_table() -> Vec<ParamSpec> {
    vec![
        ParamSpec {
            name: "hold_account",
            ty: ParamType::Str,
            set: |p, v| match Address::from_hex(v) {
                Ok(addr) => {
                    p.hold_account = addr;
                    true
                }
                Err(_) => false,
            },
        },
        ParamSpec {
            name: "max_vals",
            ty: ParamType::Uint,
            set: |p, v| match v.parse::<u16>() {
                Ok(n) => {
                    p.max_vals = n;
                    true
                }
                Err(_) => false,
            },
        },
        ParamSpec {
            name: "self_staking_ratio",
            ty: ParamType::Float,
            set: |p, v| set_float(p, v, |p, x| p.self_staking_ratio = x),
        },
        ParamSpec {
            name: "inflation_rate",
            ty: ParamType::Float,
            set: |p, v| set_float(p, v, |p, x| p.inflation_rate = x),
        },
        ParamSpec {
            name: "validator_size_threshold",
            ty: ParamType::Float,
            set: |p, v| set_float(p, v, |p, x| p.validator_size_threshold = x),
        },
        ParamSpec {
            name: "unstake_waiting_period",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.unstake_waiting_period = x),
        },
        ParamSpec {
            name: "proposal_expire_period",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.proposal_expire_period = x),
        },
        ParamSpec {
            name: "declare_candidacy",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.declare_candidacy = x),
        },
        ParamSpec {
            name: "update_candidacy",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.update_candidacy = x),
        },
        ParamSpec {
            name: "transfer_fund_proposal",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.transfer_fund_proposal = x),
        },
        ParamSpec {
            name: "change_params_proposal",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.change_params_proposal = x),
        },
        ParamSpec {
            name: "gas_price",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.gas_price = x),
        },
        ParamSpec {
            name: "min_staking_amount",
            ty: ParamType::Uint,
            set: |p, v| set_uint(p, v, |p, x| p.min_staking_amount = x),
        },
        ParamSpec {
            name: "validators_block_award_ratio",
            ty: ParamType::Float,
            set: |p, v| set_float(p, v, |p, x| p.validators_block_award_ratio = x),
        },
        ParamSpec {
            name: "max_slashing_blocks",
            ty: ParamType::Uint,
            set: |p, v| match v.parse::<u16>() {
                Ok(n) => {
                    p.max_slashing_blocks = n;
                    true
                }
                Err(_) => false,
            },
        },
        ParamSpec {
            name: "slashing_ratio",
            ty: ParamType::Float,
            set: |p, v| set_float(p, v, |p, x| p.slashing_ratio = x),
        },
        ParamSpec {
            name: "cube_pub_keys",
            ty: ParamType::Json,
            set: |p, v| {
                p.cube_pub_keys = v.to_string();
                true
            },
        },
    ]
}

/// Parameter set plus the lookup table for by-name updates
pub struct ParamStore {
    params: Params,
    table: Vec<ParamSpec>,
    dirty: bool,
}

impl ParamStore {
    pub fn new() -> Self {
        Self {
            params: Params::default(),
            table: build_table(),
            dirty: false,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Set a parameter by its external name. Returns false for unknown
    /// names or values that fail the type check; the store is only marked
    /// dirty on success.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let Some(spec) = self.table.iter().find(|s| s.name == name) else {
            return false;
        };
        if !Self::check_value(spec.ty, value) {
            return false;
        }
        if (spec.set)(&mut self.params, value) {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Validate a candidate value's shape without applying it.
    pub fn check(&self, name: &str, value: &str) -> bool {
        self.table
            .iter()
            .find(|s| s.name == name)
            .map(|s| Self::check_value(s.ty, value))
            .unwrap_or(false)
    }

    fn check_value(ty: ParamType, value: &str) -> bool {
        match ty {
            ParamType::Uint => value.parse::<u64>().is_ok(),
            ParamType::Float => value.parse::<f64>().map(|v| v > 0.0).unwrap_or(false),
            ParamType::Json => {
                serde_json::from_str::<serde_json::Value>(value).is_ok()
            }
            ParamType::Str => true,
        }
    }

    /// Replace the parameter set from its canonical encoding.
    pub fn load(&mut self, bytes: &[u8]) -> StoreResult<()> {
        self.params =
            bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(())
    }

    /// Canonical encoding of the current parameter set.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(&self.params).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Report and clear the dirty flag; used to decide whether the
    /// serialized set must be rewritten to the store this block.
    pub fn take_dirty(&mut self) -> bool {
        let before = self.dirty;
        self.dirty = false;
        before
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}
