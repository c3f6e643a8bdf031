//! Common type definitions for the wallet sync engine.
//!
//! Every cross-boundary reference is an opaque integer id, never a pointer or
//! handle into internal memory. Ids are assigned at creation, monotonically
//! increasing, and never reused within a manager's lifetime, so a stale id is
//! always detectable as "not found" rather than aliasing a later entity.

use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Build an id from a registry slot index.
            pub fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            /// The registry slot index for this id.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id! {
    /// Opaque identifier of a wallet within one manager.
    WalletId
}
entity_id! {
    /// Opaque identifier of a transaction within one manager.
    TransactionId
}
entity_id! {
    /// Opaque identifier of a block within one manager.
    BlockId
}
entity_id! {
    /// Opaque identifier of a registered event listener.
    ListenerId
}

/// Identifier correlating an asynchronous client query with its eventual
/// announcement. Generated by a monotonic per-manager counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rid={}", self.0)
    }
}

/// Chain backend tag. Carried by amounts and fee bases so the entity layer
/// stays chain-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChainKind {
    Bitcoin,
    Ethereum,
    /// A chain identified only by an opaque registry number.
    Other(u32),
}

/// Synchronization mode for a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Block heights and transactions arrive from a peer-to-peer backend.
    PeerToPeer,
    /// State is queried from a remote endpoint and merged via announcements.
    RemoteQuery,
}

/// A token held by a wallet. `None` in wallet fields means the chain's
/// native currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    /// Contract address identifying the token.
    pub contract: String,
    /// Display symbol.
    pub symbol: String,
}

impl Token {
    pub fn new(contract: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            symbol: symbol.into(),
        }
    }
}

/// A transaction or block hash in its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHash(String);

impl EntityHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Change kind for persistence callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Add,
    Remove,
    Update,
}

/// A persisted record: an opaque byte blob uniquely keyed by hash.
///
/// The core issues save/load requests with these; it never interprets the
/// blob itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistRecord {
    pub hash: EntityHash,
    pub blob: Vec<u8>,
}

impl PersistRecord {
    pub fn new(hash: EntityHash, blob: Vec<u8>) -> Self {
        Self {
            hash,
            blob,
        }
    }
}

/// Persisted state handed to a manager at construction.
#[derive(Debug, Clone, Default)]
pub struct Persisted {
    pub peers: Vec<PersistRecord>,
    pub blocks: Vec<PersistRecord>,
    pub transactions: Vec<PersistRecord>,
    pub logs: Vec<PersistRecord>,
}

/// Half-open block range `[begin, end)` targeted by one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub begin: u64,
    pub end: u64,
}

impl BlockRange {
    /// Create a range. Invariant: begin <= end.
    pub fn new(begin: u64, end: u64) -> Self {
        debug_assert!(begin <= end);
        Self {
            begin,
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    /// Advance to the next cycle: begin takes the old end, end takes the
    /// current block height.
    pub fn advanced(&self, height: u64) -> Self {
        Self::new(self.end, height.max(self.end))
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Manager lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerEventKind {
    Created,
    SyncStarted,
    SyncContinues,
    SyncStopped,
    NetworkUnavailable,
    Deleted,
}

/// Peer lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerEventKind {
    Created,
    Deleted,
}

/// Wallet lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEventKind {
    Created,
    BalanceUpdated,
    DefaultGasLimitUpdated,
    DefaultGasPriceUpdated,
    Deleted,
}

/// Block lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEventKind {
    Created,
    Chained,
    Orphaned,
    Deleted,
}

/// Transaction lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEventKind {
    Created,
    Signed,
    Submitted,
    Blocked,
    Errored,
    GasEstimateUpdated,
    ConfirmationsUpdated,
    Deleted,
}

/// A lifecycle event as delivered to listeners: the entity id, the event
/// kind, a status code, and an optional human-readable error description.
/// One event per state mutation, in mutation order, never batched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub status: crate::error::Status,
    pub error: Option<String>,
}

/// The entity scope and kind of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Manager(ManagerEventKind),
    Peer(PeerEventKind),
    Wallet(WalletId, WalletEventKind),
    Block(BlockId, BlockEventKind),
    Transaction(WalletId, TransactionId, TransactionEventKind),
}

/// A transaction announcement as it crosses the boundary: every field is
/// borrowed from the caller's context and numeric fields are decimal-ASCII.
/// The signal path deep-copies and parses this before enqueueing.
#[derive(Debug, Clone, Copy)]
pub struct TransactionWire<'a> {
    pub hash: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    /// Token contract address, empty for native-currency transfers.
    pub contract: &'a str,
    pub amount: &'a str,
    pub gas_limit: &'a str,
    pub gas_price: &'a str,
    pub data: &'a str,
    pub nonce: &'a str,
    pub gas_used: &'a str,
    pub block_number: &'a str,
    pub block_hash: &'a str,
    pub block_confirmations: &'a str,
    pub block_transaction_index: &'a str,
    pub block_timestamp: &'a str,
    pub is_error: bool,
}

/// A deep-copied, parsed transaction announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncedTransaction {
    pub hash: EntityHash,
    pub from: String,
    pub to: String,
    pub contract: Option<String>,
    pub amount: u128,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: String,
    pub nonce: u64,
    pub gas_used: u64,
    pub block_number: u64,
    pub block_hash: EntityHash,
    pub block_confirmations: u64,
    pub block_transaction_index: u64,
    pub block_timestamp: u64,
    pub is_error: bool,
}

/// A log announcement as it crosses the boundary.
#[derive(Debug, Clone, Copy)]
pub struct LogWire<'a> {
    pub hash: &'a str,
    pub contract: &'a str,
    pub topics: &'a [&'a str],
    pub data: &'a str,
    pub gas_price: &'a str,
    pub gas_used: &'a str,
    pub log_index: &'a str,
    pub block_number: &'a str,
    pub block_transaction_index: &'a str,
    pub block_timestamp: &'a str,
}

/// A deep-copied, parsed log announcement. The payload stays opaque; only
/// numeric framing fields are parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncedLog {
    pub hash: EntityHash,
    pub contract: String,
    pub topics: Vec<String>,
    pub data: String,
    pub gas_price: u128,
    pub gas_used: u64,
    pub log_index: u64,
    pub block_number: u64,
    pub block_transaction_index: u64,
    pub block_timestamp: u64,
}

/// Tag identifying each event kind in the dispatcher's closed catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTag {
    Connect,
    Disconnect,
    ManagerCreated,
    ManagerDeleted,

    RequestBlockNumber,
    RequestBalance,
    RequestGasPrice,
    RequestGasEstimate,
    RequestNonce,
    RequestLogs,

    WalletCreate,
    WalletSetGasLimit,
    WalletSetGasPrice,

    TransactionCreate,
    TransactionSign,
    TransactionSubmit,
    TransactionDelete,

    AnnounceBlockNumber,
    AnnounceNonce,
    AnnounceBalance,
    AnnounceGasPrice,
    AnnounceGasEstimate,
    AnnounceSubmit,
    AnnounceTransaction,
    AnnounceTransactionsComplete,
    AnnounceLog,

    PeerConnected,
    PeerDisconnected,
    PeerBlockHeight,
    PeerTransaction,
}

impl std::fmt::Display for SignalTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
