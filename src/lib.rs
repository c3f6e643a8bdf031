//! Synchronization and event-coordination core for a multi-chain wallet
//! engine.
//!
//! This crate is the chain-agnostic middle layer of a wallet: it owns the
//! entity model (wallets, transactions, blocks, logs), the single-threaded
//! mutation path they are updated on, and the request/announce protocol that
//! connects them to an external backend. Chain-specific concerns such as key
//! derivation, transaction encoding, and network transports live above and
//! below it.
//!
//! ## Architecture
//!
//! - **Signal/handle split**: every externally visible operation validates
//!   and deep-copies on the caller's thread, then enqueues onto a dispatcher
//!   whose single worker thread performs all state mutation in order.
//! - **Request correlation**: backend queries carry monotonically increasing
//!   request ids; an announcement bearing an id that is no longer
//!   outstanding is dropped as stale with no side effects.
//! - **Opaque ids**: wallets, transactions, blocks, and listeners are
//!   addressed by integer ids that are never reused, so a stale reference is
//!   always a detectable miss.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wallet_sync::{Client, ManagerConfig, Persisted, WalletManager};
//! use wallet_sync::types::{ChainKind, RequestId, WalletId, TransactionId};
//!
//! struct Backend;
//!
//! impl Client for Backend {
//!     fn get_balance(&self, _: WalletId, _: &str, _: RequestId) {}
//!     fn get_gas_price(&self, _: WalletId, _: RequestId) {}
//!     fn estimate_gas(&self, _: WalletId, _: TransactionId, _: &str, _: &str, _: &str, _: RequestId) {}
//!     fn submit_transaction(&self, _: WalletId, _: TransactionId, _: &[u8], _: RequestId) {}
//!     fn get_transactions(&self, _: &str, _: RequestId) {}
//!     fn get_logs(&self, _: Option<&str>, _: &str, _: &str, _: RequestId) {}
//!     fn get_block_number(&self, rid: RequestId) {
//!         // Answer asynchronously via manager.announce_block_number(..., rid).
//!         let _ = rid;
//!     }
//!     fn get_nonce(&self, _: &str, _: RequestId) {}
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagerConfig::new(ChainKind::Ethereum, "0xa9d8724bf9db8c3ed4b44cbb2bfca2604c048041");
//! let manager = WalletManager::new(config, Arc::new(Backend), Persisted::default())?;
//! manager.connect();
//! # Ok(())
//! # }
//! ```

pub mod amount;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use amount::{parse_decimal, parse_decimal_u64, Amount, FeeBasis};
pub use client::{Client, EventListener};
pub use config::{ManagerConfig, DEFAULT_RETRY_LIMIT};
pub use dispatch::{EventDispatcher, HandlerTable, ShutdownMode};
pub use entity::{Transaction, TransactionOrigin, TransactionStatus, Wallet};
pub use error::{Result, Status, WalletSyncError};
pub use manager::WalletManager;
pub use sync::{RequestKind, SyncProgressSnapshot};
pub use types::{
    BlockEventKind, ChainKind, Event, EventKind, ManagerEventKind, PeerEventKind, Persisted,
    SyncMode, Token, TransactionEventKind, WalletEventKind,
};

/// Version of the wallet-sync library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
