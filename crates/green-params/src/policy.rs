//! Fee and dust policy

use crate::asset::AssetId;
use crate::network::{Ledger, Network};

/// Default minimum relay fee rate (satoshi per 1000 virtual bytes)
pub const DEFAULT_MIN_FEE_RATE: u64 = 1_000;

/// Default dust threshold for the policy asset (satoshi)
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Dust threshold for issued assets on a confidential ledger
pub const ASSET_DUST_THRESHOLD: u64 = 1;

/// Maximum amount of the policy asset that can exist (21M coins)
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Fee floor and dust rules derived from a [`Network`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    ledger: Ledger,
    policy_asset: AssetId,
    min_fee_rate: u64,
    dust_threshold: u64,
}

impl FeePolicy {
    /// Policy for the given network
    pub fn for_network(network: &Network) -> Self {
        Self {
            ledger: network.ledger,
            policy_asset: network.policy_asset,
            min_fee_rate: network.min_fee_rate,
            dust_threshold: network.dust_threshold,
        }
    }

    /// Minimum relay fee rate (sat/kvB)
    pub fn min_fee_rate(&self) -> u64 {
        self.min_fee_rate
    }

    /// The rate a transaction is charged at: the requested rate, floored at the minimum
    pub fn effective_fee_rate(&self, requested: u64) -> u64 {
        requested.max(self.min_fee_rate)
    }

    /// Smallest output value considered economic for `asset`
    pub fn dust_threshold(&self, asset: &AssetId) -> u64 {
        match self.ledger {
            Ledger::Confidential if *asset != self.policy_asset => ASSET_DUST_THRESHOLD,
            _ => self.dust_threshold,
        }
    }

    /// Whether `value` would be dust for `asset`
    pub fn is_dust(&self, asset: &AssetId, value: u64) -> bool {
        value < self.dust_threshold(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_fee_rate_floors_at_minimum() {
        let policy = FeePolicy::for_network(&Network::bitcoin());
        assert_eq!(policy.effective_fee_rate(500), DEFAULT_MIN_FEE_RATE);
        assert_eq!(policy.effective_fee_rate(5_000), 5_000);
    }

    #[test]
    fn test_dust_threshold_by_ledger() {
        let btc = FeePolicy::for_network(&Network::bitcoin());
        assert_eq!(btc.dust_threshold(&AssetId::NATIVE), 546);
        assert!(btc.is_dust(&AssetId::NATIVE, 545));
        assert!(!btc.is_dust(&AssetId::NATIVE, 546));

        let liquid = Network::liquid();
        let policy = FeePolicy::for_network(&liquid);
        assert_eq!(policy.dust_threshold(&liquid.policy_asset), 546);
        let other = AssetId::from_bytes([7u8; 32]);
        assert_eq!(policy.dust_threshold(&other), ASSET_DUST_THRESHOLD);
    }
}
