//! Green wallet network definitions

use crate::asset::AssetId;
use crate::policy::{DEFAULT_DUST_THRESHOLD, DEFAULT_MIN_FEE_RATE};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const LIQUID_POLICY_ASSET: &str = "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";
const TESTNET_LIQUID_POLICY_ASSET: &str =
    "144c654344aa716d6f3abcc1ca90e5641e4e2a7f633bc09fe3baf64585819a49";
const LOCALTEST_LIQUID_POLICY_ASSET: &str =
    "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";

/// Minimum relay fee rate on confidential ledgers (sat/kvB)
const CONFIDENTIAL_MIN_FEE_RATE: u64 = 100;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    /// Bitcoin mainnet
    Bitcoin,
    /// Bitcoin testnet
    Testnet,
    /// Local Bitcoin regtest
    Localtest,
    /// Liquid mainnet
    Liquid,
    /// Liquid testnet
    TestnetLiquid,
    /// Local Elements regtest
    LocaltestLiquid,
}

/// Kind of ledger a network runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ledger {
    /// Explicit amounts, single native coin
    Transparent,
    /// Blinded amounts and assets (Pedersen commitments, rangeproofs, surjection proofs)
    Confidential,
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: String,
    /// Ledger kind
    pub ledger: Ledger,
    /// Asset fees are paid in
    pub policy_asset: AssetId,
    /// Minimum relay fee rate (sat/kvB)
    pub min_fee_rate: u64,
    /// Fee rate used when a request does not name one (sat/kvB)
    pub default_fee_rate: u64,
    /// Dust threshold for the policy asset
    pub dust_threshold: u64,
    /// Permitted CSV timelocks (blocks) for 2of2 CSV outputs
    pub csv_buckets: Vec<u32>,
    /// Minimum number of private bits in a rangeproof
    pub ct_bits: u32,
    /// Rangeproof exponent
    pub ct_exponent: i32,
    /// Whether new inputs signal replace-by-fee
    pub rbf_enabled: bool,
}

/// Partial network description used to override built-in parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOverrides {
    /// Base network to start from
    pub network: Option<NetworkType>,
    /// Human-readable name
    pub name: Option<String>,
    /// Asset fees are paid in
    pub policy_asset: Option<AssetId>,
    /// Minimum relay fee rate (sat/kvB)
    pub min_fee_rate: Option<u64>,
    /// Default fee rate (sat/kvB)
    pub default_fee_rate: Option<u64>,
    /// Dust threshold for the policy asset
    pub dust_threshold: Option<u64>,
    /// Permitted CSV timelocks
    pub csv_buckets: Option<Vec<u32>>,
    /// Whether new inputs signal replace-by-fee
    pub rbf_enabled: Option<bool>,
}

impl Network {
    /// Get Bitcoin mainnet parameters
    pub fn bitcoin() -> Self {
        Self {
            network_type: NetworkType::Bitcoin,
            name: "mainnet".to_string(),
            ledger: Ledger::Transparent,
            policy_asset: AssetId::NATIVE,
            min_fee_rate: DEFAULT_MIN_FEE_RATE,
            default_fee_rate: DEFAULT_MIN_FEE_RATE,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            csv_buckets: vec![25_920, 51_840, 65_535],
            ct_bits: 52,
            ct_exponent: 0,
            rbf_enabled: true,
        }
    }

    /// Get Bitcoin testnet parameters
    pub fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet".to_string(),
            csv_buckets: vec![144, 4_320, 51_840],
            ..Self::bitcoin()
        }
    }

    /// Get local regtest parameters
    pub fn localtest() -> Self {
        Self {
            network_type: NetworkType::Localtest,
            name: "localtest".to_string(),
            csv_buckets: vec![144, 4_320, 51_840],
            ..Self::bitcoin()
        }
    }

    /// Get Liquid mainnet parameters
    pub fn liquid() -> Self {
        Self {
            network_type: NetworkType::Liquid,
            name: "liquid".to_string(),
            ledger: Ledger::Confidential,
            policy_asset: builtin_asset(LIQUID_POLICY_ASSET),
            min_fee_rate: CONFIDENTIAL_MIN_FEE_RATE,
            default_fee_rate: CONFIDENTIAL_MIN_FEE_RATE,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            csv_buckets: vec![65_535],
            ct_bits: 52,
            ct_exponent: 0,
            rbf_enabled: false,
        }
    }

    /// Get Liquid testnet parameters
    pub fn testnet_liquid() -> Self {
        Self {
            network_type: NetworkType::TestnetLiquid,
            name: "testnet-liquid".to_string(),
            policy_asset: builtin_asset(TESTNET_LIQUID_POLICY_ASSET),
            csv_buckets: vec![1_440, 65_535],
            ..Self::liquid()
        }
    }

    /// Get local Elements regtest parameters
    pub fn localtest_liquid() -> Self {
        Self {
            network_type: NetworkType::LocaltestLiquid,
            name: "localtest-liquid".to_string(),
            policy_asset: builtin_asset(LOCALTEST_LIQUID_POLICY_ASSET),
            csv_buckets: vec![1_440, 65_535],
            ..Self::liquid()
        }
    }

    /// Get network by type
    pub fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Bitcoin => Self::bitcoin(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Localtest => Self::localtest(),
            NetworkType::Liquid => Self::liquid(),
            NetworkType::TestnetLiquid => Self::testnet_liquid(),
            NetworkType::LocaltestLiquid => Self::localtest_liquid(),
        }
    }

    /// Build a network from a JSON override document.
    ///
    /// The document must name a base `network`; any other present field
    /// replaces the base value.
    pub fn from_json(json: &str) -> Result<Self> {
        let overrides: NetworkOverrides = serde_json::from_str(json)?;
        let base = overrides
            .network
            .ok_or_else(|| Error::InvalidNetwork("missing base network".to_string()))?;
        Self::from_type(base).with_overrides(overrides)
    }

    /// Load a JSON override document from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Apply overrides, validating the result
    pub fn with_overrides(mut self, overrides: NetworkOverrides) -> Result<Self> {
        if let Some(name) = overrides.name {
            self.name = name;
        }
        if let Some(asset) = overrides.policy_asset {
            self.policy_asset = asset;
        }
        if let Some(rate) = overrides.min_fee_rate {
            self.min_fee_rate = rate;
        }
        if let Some(rate) = overrides.default_fee_rate {
            self.default_fee_rate = rate;
        }
        if let Some(dust) = overrides.dust_threshold {
            self.dust_threshold = dust;
        }
        if let Some(buckets) = overrides.csv_buckets {
            self.csv_buckets = buckets;
        }
        if let Some(rbf) = overrides.rbf_enabled {
            self.rbf_enabled = rbf;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.min_fee_rate == 0 {
            return Err(Error::InvalidParameter {
                name: "min_fee_rate",
                reason: "must be positive".to_string(),
            });
        }
        if self.dust_threshold == 0 {
            return Err(Error::InvalidParameter {
                name: "dust_threshold",
                reason: "must be positive".to_string(),
            });
        }
        if self.csv_buckets.iter().any(|b| *b == 0 || *b > 0xffff) {
            return Err(Error::InvalidParameter {
                name: "csv_buckets",
                reason: "bucket out of range".to_string(),
            });
        }
        Ok(())
    }

    /// True for networks with blinded amounts and assets
    pub fn is_confidential(&self) -> bool {
        self.ledger == Ledger::Confidential
    }

    /// Whether `blocks` is an allowed CSV timelock on this network
    pub fn is_csv_bucket(&self, blocks: u32) -> bool {
        self.csv_buckets.contains(&blocks)
    }

    /// Default input sequence number: signals RBF when enabled
    pub fn default_sequence(&self) -> u32 {
        if self.rbf_enabled {
            0xffff_fffd
        } else {
            0xffff_fffe
        }
    }
}

fn builtin_asset(hex: &str) -> AssetId {
    // Built-in constants are valid 64-char hex
    AssetId::from_hex(hex).unwrap_or(AssetId::NATIVE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bitcoin_params() {
        let net = Network::bitcoin();
        assert_eq!(net.network_type, NetworkType::Bitcoin);
        assert_eq!(net.ledger, Ledger::Transparent);
        assert_eq!(net.min_fee_rate, 1_000);
        assert_eq!(net.dust_threshold, 546);
        assert!(net.is_csv_bucket(51_840));
        assert!(!net.is_csv_bucket(144));
        assert_eq!(net.default_sequence(), 0xffff_fffd);
    }

    #[test]
    fn test_liquid_params() {
        let net = Network::liquid();
        assert!(net.is_confidential());
        assert_eq!(net.policy_asset.to_hex(), LIQUID_POLICY_ASSET);
        assert_eq!(net.min_fee_rate, 100);
        assert_eq!(net.csv_buckets, vec![65_535]);
        assert_eq!(net.default_sequence(), 0xffff_fffe);
    }

    #[test]
    fn test_network_from_type() {
        let net = Network::from_type(NetworkType::TestnetLiquid);
        assert_eq!(net.network_type, NetworkType::TestnetLiquid);
        assert_eq!(net.policy_asset.to_hex(), TESTNET_LIQUID_POLICY_ASSET);
    }

    #[test]
    fn test_json_overrides() {
        let net = Network::from_json(
            r#"{"network": "localtest", "min_fee_rate": 2000, "csv_buckets": [144]}"#,
        )
        .unwrap();
        assert_eq!(net.network_type, NetworkType::Localtest);
        assert_eq!(net.min_fee_rate, 2_000);
        assert_eq!(net.csv_buckets, vec![144]);
        assert_eq!(net.dust_threshold, 546);
    }

    #[test]
    fn test_json_requires_base_network() {
        assert!(matches!(
            Network::from_json(r#"{"min_fee_rate": 2000}"#),
            Err(Error::InvalidNetwork(_))
        ));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let result = Network::from_json(r#"{"network": "testnet", "min_fee_rate": 0}"#);
        assert!(matches!(result, Err(Error::InvalidParameter { name: "min_fee_rate", .. })));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"network": "liquid", "rbf_enabled": true}}"#).unwrap();
        let net = Network::from_json_file(file.path()).unwrap();
        assert!(net.is_confidential());
        assert!(net.rbf_enabled);
    }
}
