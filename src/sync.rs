//! Sync-progress bookkeeping and request-id correlation.
//!
//! Every asynchronous client query carries a request id from a monotonic
//! per-manager counter. Announcements are validated against the table of
//! currently outstanding ids before their payload is consumed; an id that is
//! not outstanding makes the announcement a no-op. The remote-query sync
//! cycle additionally tracks its one in-flight query here: issuing a new
//! query invalidates the previous id, so a stale announcement can never
//! advance the cycle.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{BlockRange, RequestId, TransactionId, WalletId};

/// What an outstanding request id was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    BlockNumber,
    Balance(WalletId),
    GasPrice(WalletId),
    GasEstimate(WalletId, TransactionId),
    Submit(WalletId, TransactionId),
    /// Streaming: transactions announce one-by-one under the same id until
    /// the completion announcement consumes it.
    Transactions,
    /// Streaming, like `Transactions`.
    Logs,
    Nonce,
}

/// Monotonic request-id generator plus the outstanding-request table.
#[derive(Debug, Default)]
pub struct RequestTracker {
    next: u64,
    outstanding: HashMap<u64, RequestKind>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id and mark it outstanding for `kind`.
    pub fn register(&mut self, kind: RequestKind) -> RequestId {
        self.next += 1;
        let rid = RequestId(self.next);
        self.outstanding.insert(rid.0, kind);
        rid
    }

    pub fn is_outstanding(&self, rid: RequestId) -> bool {
        self.outstanding.contains_key(&rid.0)
    }

    /// The kind an outstanding id was issued for, without consuming it.
    /// Streaming announcements peek; one-shot announcements consume.
    pub fn kind(&self, rid: RequestId) -> Option<RequestKind> {
        self.outstanding.get(&rid.0).copied()
    }

    /// Consume a one-shot id. Returns `None` for ids that are stale, already
    /// consumed, or never issued — the caller must then drop the
    /// announcement without side effects.
    pub fn consume(&mut self, rid: RequestId) -> Option<RequestKind> {
        self.outstanding.remove(&rid.0)
    }

    /// Drop an id so later announcements bearing it become no-ops.
    pub fn invalidate(&mut self, rid: RequestId) {
        self.outstanding.remove(&rid.0);
    }

    /// Invalidate every outstanding id. Used on disconnect: in-flight
    /// external I/O is not aborted, its eventual announcement is simply
    /// dropped as stale.
    pub fn clear(&mut self) {
        self.outstanding.clear();
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}

/// Progress of the remote-query synchronization mode: the address-derivation
/// horizon and the half-open block range currently targeted.
#[derive(Debug)]
pub struct SyncProgress {
    last_external_address: Option<String>,
    last_internal_address: Option<String>,
    range: BlockRange,
    /// The in-flight query. Valid only while that query is outstanding; at
    /// most one per manager.
    rid: Option<RequestId>,
    completed: bool,
    attempts: u32,
    staged_external: Option<String>,
    staged_internal: Option<String>,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            last_external_address: None,
            last_internal_address: None,
            range: BlockRange::new(0, 0),
            rid: None,
            completed: false,
            attempts: 0,
            staged_external: None,
            staged_internal: None,
        }
    }

    pub fn range(&self) -> BlockRange {
        self.range
    }

    pub fn active_rid(&self) -> Option<RequestId> {
        self.rid
    }

    pub fn is_idle(&self) -> bool {
        self.rid.is_none()
    }

    pub fn is_active_rid(&self, rid: RequestId) -> bool {
        self.rid == Some(rid)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the current range finished successfully. A range that never
    /// completed must be re-queried, never skipped.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Begin a query cycle over `range` under `rid`. Any previously active
    /// rid is implicitly invalidated by being replaced.
    pub fn begin_query(&mut self, rid: RequestId, range: BlockRange) {
        self.range = range;
        self.rid = Some(rid);
        self.completed = false;
    }

    /// Extend the in-flight query's end when a block-number announcement
    /// raises the height mid-cycle. No-op while idle; the next cycle picks
    /// the new height up through [`advance_range`](Self::advance_range).
    pub fn extend_end(&mut self, height: u64) {
        if self.rid.is_some() && height > self.range.end {
            self.range = BlockRange::new(self.range.begin, height);
        }
    }

    /// Stage addresses touched by a merged transaction so the horizon can
    /// advance when the cycle completes.
    pub fn stage_addresses(&mut self, external: Option<&str>, internal: Option<&str>) {
        if let Some(address) = external {
            self.staged_external = Some(address.to_string());
        }
        if let Some(address) = internal {
            self.staged_internal = Some(address.to_string());
        }
    }

    /// Mark the outstanding query completed. The completed flag transitions
    /// false to true exactly once per outstanding rid; a stale rid returns
    /// false and changes nothing.
    pub fn complete_success(&mut self, rid: RequestId) -> bool {
        if !self.is_active_rid(rid) {
            return false;
        }
        self.rid = None;
        self.completed = true;
        self.attempts = 0;
        if let Some(address) = self.staged_external.take() {
            self.last_external_address = Some(address);
        }
        if let Some(address) = self.staged_internal.take() {
            self.last_internal_address = Some(address);
        }
        true
    }

    /// Record a failed cycle. Returns the attempt count so far for the
    /// current range, or `None` for a stale rid.
    pub fn complete_failure(&mut self, rid: RequestId) -> Option<u32> {
        if !self.is_active_rid(rid) {
            return None;
        }
        self.rid = None;
        self.attempts += 1;
        Some(self.attempts)
    }

    /// Advance to the next cycle's range (begin takes the old end, end takes
    /// the current height) and reset the completed flag.
    pub fn advance_range(&mut self, height: u64) {
        self.range = self.range.advanced(height);
        self.completed = false;
    }

    /// Drop the in-flight query without completing it, e.g. on disconnect.
    pub fn abandon(&mut self) {
        self.rid = None;
        self.attempts = 0;
        self.staged_external = None;
        self.staged_internal = None;
    }

    pub fn snapshot(&self) -> SyncProgressSnapshot {
        SyncProgressSnapshot {
            last_external_address: self.last_external_address.clone(),
            last_internal_address: self.last_internal_address.clone(),
            begin_block: self.range.begin,
            end_block: self.range.end,
            rid: self.rid,
            completed: self.completed,
            attempts: self.attempts,
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the sync progress for synchronous getters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgressSnapshot {
    pub last_external_address: Option<String>,
    pub last_internal_address: Option<String>,
    pub begin_block: u64,
    pub end_block: u64,
    pub rid: Option<RequestId>,
    pub completed: bool,
    pub attempts: u32,
}
