//! Error types for the wallet sync engine.

use thiserror::Error;

use crate::types::{BlockId, ListenerId, TransactionId, WalletId};

/// Status code reported across the client boundary.
///
/// Every lifecycle event carries one of these. Reference and parse errors are
/// local to the offending call and leave all other state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Success,

    // Reference access
    UnknownNode,
    UnknownWallet,
    UnknownTransaction,
    UnknownBlock,
    UnknownListener,

    // Node
    NotConnected,

    // Transaction
    TransactionHashMismatch,
    TransactionSubmission,

    // Numeric
    NumericParse,

    // Entity state machine
    InvalidState,
}

impl Status {
    /// Whether this status denotes success.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::UnknownNode => "unknown node",
            Status::UnknownWallet => "unknown wallet",
            Status::UnknownTransaction => "unknown transaction",
            Status::UnknownBlock => "unknown block",
            Status::UnknownListener => "unknown listener",
            Status::NotConnected => "not connected",
            Status::TransactionHashMismatch => "transaction hash mismatch",
            Status::TransactionSubmission => "transaction submission failed",
            Status::NumericParse => "numeric parse failure",
            Status::InvalidState => "invalid state transition",
        };
        f.write_str(name)
    }
}

/// Errors from decimal-ASCII numeric parsing.
///
/// Announced numeric fields arrive as decimal strings; parsing must
/// distinguish success from malformed input rather than defaulting to zero.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty numeric string")]
    Empty,

    #[error("invalid decimal digit in {0:?}")]
    InvalidDigit(String),

    #[error("numeric overflow parsing {0:?}")]
    Overflow(String),
}

/// Event dispatcher errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("dispatcher worker is gone")]
    WorkerGone,

    #[error("failed to spawn dispatcher worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("no handler registered for event tag {0}")]
    UnregisteredTag(String),
}

/// Entity registry and state machine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("unknown wallet {0}")]
    UnknownWallet(WalletId),

    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("unknown listener {0}")]
    UnknownListener(ListenerId),

    #[error("invalid transaction status transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::entity::TransactionStatus,
        to: crate::entity::TransactionStatus,
    },

    #[error("transaction hash mismatch: held {held}, announced {announced}")]
    HashMismatch {
        held: String,
        announced: String,
    },
}

impl EntityError {
    /// The boundary status code for this error.
    pub fn status(&self) -> Status {
        match self {
            EntityError::UnknownWallet(_) => Status::UnknownWallet,
            EntityError::UnknownTransaction(_) => Status::UnknownTransaction,
            EntityError::UnknownBlock(_) => Status::UnknownBlock,
            EntityError::UnknownListener(_) => Status::UnknownListener,
            EntityError::InvalidTransition {
                ..
            } => Status::InvalidState,
            EntityError::HashMismatch {
                ..
            } => Status::TransactionHashMismatch,
        }
    }
}

/// Synchronization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("retry limit {limit} exceeded for block range {range}")]
    RetriesExhausted {
        limit: u32,
        range: crate::types::BlockRange,
    },
}

/// Logging initialization errors.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("subscriber initialization failed: {0}")]
    SubscriberInit(String),
}

/// Main error type for the wallet sync engine.
#[derive(Debug, Error)]
pub enum WalletSyncError {
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Type alias for Result with WalletSyncError.
pub type Result<T> = std::result::Result<T, WalletSyncError>;

/// Type alias for parse operation results.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Type alias for dispatch operation results.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// Type alias for entity operation results.
pub type EntityResult<T> = std::result::Result<T, EntityError>;

/// Type alias for logging operation results.
pub type LoggingResult<T> = std::result::Result<T, LoggingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_error_status_mapping() {
        assert_eq!(EntityError::UnknownWallet(WalletId::from_index(3)).status(), Status::UnknownWallet);
        assert_eq!(
            EntityError::UnknownTransaction(TransactionId::from_index(0)).status(),
            Status::UnknownTransaction
        );
        assert_eq!(
            EntityError::HashMismatch {
                held: "0xaa".into(),
                announced: "0xbb".into(),
            }
            .status(),
            Status::TransactionHashMismatch
        );
    }

    #[test]
    fn test_wallet_sync_error_from_parse_error() {
        let err: WalletSyncError = ParseError::Empty.into();
        match err {
            WalletSyncError::Parse(ParseError::Empty) => {
                assert!(err.to_string().contains("empty numeric string"));
            }
            _ => panic!("expected WalletSyncError::Parse variant"),
        }
    }

    #[test]
    fn test_sync_error_display() {
        let err = SyncError::RetriesExhausted {
            limit: 3,
            range: crate::types::BlockRange::new(0, 1000),
        };
        assert_eq!(err.to_string(), "retry limit 3 exceeded for block range [0, 1000)");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::NotConnected.to_string(), "not connected");
        assert!(Status::Success.is_success());
        assert!(!Status::NumericParse.is_success());
    }
}
