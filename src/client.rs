//! The client contract: the external collaborator a manager drives.
//!
//! A [`Client`] is the function table supplied at manager construction. The
//! manager has limited capabilities on its own; these callbacks request data
//! from a backend (each tagged with a request id and answered later through
//! an `announce_*` entry point), request that state be saved for restart, and
//! deliver lifecycle events.
//!
//! Backend requests are fire-and-forget: a request whose announcement never
//! arrives must not deadlock the manager. The client implementation owns the
//! decision to give up and must then invoke the failure form of the
//! corresponding announcement. All callbacks run on the manager's dispatcher
//! thread and should return promptly.

use crate::error::Status;
use crate::types::{
    BlockEventKind, ChangeKind, Event, ManagerEventKind, PeerEventKind, PersistRecord, RequestId,
    TransactionEventKind, TransactionId, WalletEventKind, WalletId,
};

/// Callbacks from the manager out to the embedding application.
pub trait Client: Send + Sync {
    // Backend requests. Each must eventually be answered by the matching
    // announce entry point carrying the same request id.

    fn get_balance(&self, wallet: WalletId, address: &str, rid: RequestId);

    fn get_gas_price(&self, wallet: WalletId, rid: RequestId);

    fn estimate_gas(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        to: &str,
        amount: &str,
        data: &str,
        rid: RequestId,
    );

    fn submit_transaction(
        &self,
        wallet: WalletId,
        transaction: TransactionId,
        raw_transaction: &[u8],
        rid: RequestId,
    );

    fn get_transactions(&self, address: &str, rid: RequestId);

    fn get_logs(&self, contract: Option<&str>, address: &str, event_signature: &str, rid: RequestId);

    fn get_block_number(&self, rid: RequestId);

    fn get_nonce(&self, address: &str, rid: RequestId);

    // Persistence. Fired on every mutation requiring durability; records are
    // `(hash, opaque blob)` pairs uniquely keyed by hash.

    fn save_peers(&self, _records: &[PersistRecord]) {}

    fn save_blocks(&self, _records: &[PersistRecord]) {}

    fn change_transaction(&self, _change: ChangeKind, _record: &PersistRecord) {}

    fn change_log(&self, _change: ChangeKind, _record: &PersistRecord) {}

    // Lifecycle events. One callback per state mutation, in mutation order.

    fn manager_event(&self, _event: ManagerEventKind, _status: Status, _error: Option<&str>) {}

    fn peer_event(&self, _event: PeerEventKind, _status: Status, _error: Option<&str>) {}

    fn wallet_event(
        &self,
        _wallet: WalletId,
        _event: WalletEventKind,
        _status: Status,
        _error: Option<&str>,
    ) {
    }

    fn block_event(
        &self,
        _block: crate::types::BlockId,
        _event: BlockEventKind,
        _status: Status,
        _error: Option<&str>,
    ) {
    }

    fn transaction_event(
        &self,
        _wallet: WalletId,
        _transaction: TransactionId,
        _event: TransactionEventKind,
        _status: Status,
        _error: Option<&str>,
    ) {
    }
}

/// An additional event sink registered at runtime and addressed by an opaque
/// [`ListenerId`](crate::types::ListenerId). Listeners receive the same
/// lifecycle events the client does, in the same order.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}
