//! Configuration for the wallet sync manager.

use crate::error::{Result, WalletSyncError};
use crate::types::{ChainKind, SyncMode};

/// Default bound on reissues of one sync range before the manager reports a
/// connectivity error and suspends querying.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Configuration for a [`WalletManager`](crate::manager::WalletManager).
///
/// The retry bound is a policy parameter, not a protocol constant: the
/// external client owns timeouts, so the manager only counts failed or
/// reissued cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Chain backend tag carried by amounts and fee bases.
    pub chain: ChainKind,

    /// Synchronization mode.
    pub mode: SyncMode,

    /// The account's primary address, derived from key material by the
    /// caller. Key derivation itself is out of scope here.
    pub account_address: String,

    /// Default gas limit for new wallets.
    pub default_gas_limit: u64,

    /// Default gas price for new wallets.
    pub default_gas_price: u128,

    /// Maximum attempts for one sync range before suspending.
    pub retry_limit: u32,

    /// Name given to the dispatcher worker thread.
    pub worker_name: String,
}

impl ManagerConfig {
    /// Create a configuration for the given chain and account address.
    pub fn new(chain: ChainKind, account_address: impl Into<String>) -> Self {
        Self {
            chain,
            mode: SyncMode::RemoteQuery,
            account_address: account_address.into(),
            default_gas_limit: 21_000,
            default_gas_price: 0,
            retry_limit: DEFAULT_RETRY_LIMIT,
            worker_name: "wallet-sync-dispatch".to_string(),
        }
    }

    /// Set the synchronization mode.
    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the sync retry limit.
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    /// Set the default gas limit applied to new wallets.
    pub fn with_default_gas_limit(mut self, gas_limit: u64) -> Self {
        self.default_gas_limit = gas_limit;
        self
    }

    /// Set the default gas price applied to new wallets.
    pub fn with_default_gas_price(mut self, gas_price: u128) -> Self {
        self.default_gas_price = gas_price;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.account_address.is_empty() {
            return Err(WalletSyncError::Config("account address must not be empty".to_string()));
        }
        if self.retry_limit == 0 {
            return Err(WalletSyncError::Config("retry limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ManagerConfig::new(ChainKind::Ethereum, "0xabc");
        assert_eq!(config.mode, SyncMode::RemoteQuery);
        assert_eq!(config.retry_limit, DEFAULT_RETRY_LIMIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builders() {
        let config = ManagerConfig::new(ChainKind::Bitcoin, "addr")
            .with_mode(SyncMode::PeerToPeer)
            .with_retry_limit(5)
            .with_default_gas_limit(90_000)
            .with_default_gas_price(7);
        assert_eq!(config.mode, SyncMode::PeerToPeer);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.default_gas_limit, 90_000);
        assert_eq!(config.default_gas_price, 7);
    }

    #[test]
    fn test_config_rejects_empty_address_and_zero_retries() {
        assert!(ManagerConfig::new(ChainKind::Ethereum, "").validate().is_err());
        assert!(ManagerConfig::new(ChainKind::Ethereum, "0xabc")
            .with_retry_limit(0)
            .validate()
            .is_err());
    }
}
