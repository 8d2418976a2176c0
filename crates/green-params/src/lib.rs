//! Green wallet network parameters
//!
//! This crate provides per-network constants for transaction construction:
//! ledger kind, policy asset, fee-rate floor, dust thresholds and the CSV
//! timelock buckets a multisig wallet may use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod asset;
pub mod network;
pub mod policy;

pub use asset::AssetId;
pub use network::{Ledger, Network, NetworkOverrides, NetworkType};
pub use policy::{FeePolicy, DEFAULT_DUST_THRESHOLD, DEFAULT_MIN_FEE_RATE, MAX_MONEY};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Invalid asset identifier
    #[error("Invalid asset id: {0}")]
    InvalidAssetId(String),

    /// Invalid parameter value
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// IO error while reading a parameter file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON parameters
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
