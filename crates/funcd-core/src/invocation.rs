// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation lifecycle tracking.
//!
//! ```text
//!   admit ──► Queued ──► Running ──► AwaitingResult
//!               │           │              │
//!               └───────────┴──────┬───────┘
//!                                  ▼
//!                    finalize (record removed, uid tombstoned)
//! ```
//!
//! A uid has at most one live record. Once finalized it is tombstoned for
//! the configured TTL: re-admission and further terminal output for that uid
//! are refused until the tombstone expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a live invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationState {
    /// Admitted, waiting for a worker.
    Queued,
    /// The handler is executing.
    Running,
    /// The handler returned without a terminal response.
    AwaitingResult,
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationState::Queued => "queued",
            InvocationState::Running => "running",
            InvocationState::AwaitingResult => "awaiting_result",
        };
        f.write_str(s)
    }
}

/// A one-shot callback on the tokio runtime. Dropping it cancels the callback.
pub(crate) struct Timer {
    handle: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn after<F>(runtime: &Handle, delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        Self { handle }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub(crate) struct InvocationRecord {
    pub(crate) state: InvocationState,
    pub(crate) cancel: CancellationToken,
    pub(crate) cancel_requested: bool,
    pub(crate) schedule_key: String,
    pub(crate) awaiting_since: Option<Instant>,
    pub(crate) fallback_timer: Option<Timer>,
    pub(crate) awaiting_timer: Option<Timer>,
}

/// Admission verdict for a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Accepted,
    /// A live record already exists for the uid.
    DuplicateActive,
    /// The uid finalized recently.
    DuplicateTombstone,
    /// The uid is empty or contains whitespace or control characters.
    Invalid,
}

/// Outcome of handing a scheduled request to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Start {
    Started,
    /// The invocation was finalized while it waited.
    Missing,
    /// Cancellation arrived before the handler could start.
    Canceled,
}

/// Result of trying to finalize a uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Finalization {
    /// The uid was tombstoned already; nothing may be emitted.
    Late,
    /// The uid is now tombstoned. Carries the schedule key if a record existed.
    Finalized { schedule_key: Option<String> },
    /// A live invocation owns the uid; a response for an unadmitted request
    /// must not touch it.
    Conflict,
}

pub(crate) fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && !uid.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Live records and tombstones. Always used under the manager's table lock.
pub(crate) struct InvocationTable {
    records: HashMap<String, InvocationRecord>,
    tombstones: HashMap<String, Instant>,
    tombstone_ttl: Duration,
}

impl InvocationTable {
    pub(crate) fn new(tombstone_ttl: Duration) -> Self {
        Self {
            records: HashMap::new(),
            tombstones: HashMap::new(),
            tombstone_ttl,
        }
    }

    pub(crate) fn admit(
        &mut self,
        uid: &str,
        cancel: CancellationToken,
        schedule_key: &str,
        now: Instant,
    ) -> Admission {
        if !is_valid_uid(uid) {
            return Admission::Invalid;
        }
        self.prune_tombstones(now);
        if self.records.contains_key(uid) {
            return Admission::DuplicateActive;
        }
        if self.tombstones.contains_key(uid) {
            return Admission::DuplicateTombstone;
        }
        self.records.insert(
            uid.to_string(),
            InvocationRecord {
                state: InvocationState::Queued,
                cancel,
                cancel_requested: false,
                schedule_key: schedule_key.to_string(),
                awaiting_since: None,
                fallback_timer: None,
                awaiting_timer: None,
            },
        );
        Admission::Accepted
    }

    /// Move a queued record to running unless it is gone or canceled.
    pub(crate) fn start(&mut self, uid: &str) -> Start {
        match self.records.get_mut(uid) {
            None => Start::Missing,
            Some(record) if record.cancel_requested || record.cancel.is_cancelled() => {
                Start::Canceled
            }
            Some(record) => {
                record.state = InvocationState::Running;
                Start::Started
            }
        }
    }

    pub(crate) fn get(&self, uid: &str) -> Option<&InvocationRecord> {
        self.records.get(uid)
    }

    pub(crate) fn get_mut(&mut self, uid: &str) -> Option<&mut InvocationRecord> {
        self.records.get_mut(uid)
    }

    /// Remove the record and tombstone the uid. Timers die with the record.
    pub(crate) fn finalize(&mut self, uid: &str, now: Instant) -> Finalization {
        self.prune_tombstones(now);
        if self.tombstones.contains_key(uid) {
            return Finalization::Late;
        }
        let schedule_key = self.records.remove(uid).map(|record| record.schedule_key);
        self.tombstones.insert(uid.to_string(), now);
        Finalization::Finalized { schedule_key }
    }

    /// Tombstone a uid that was never admitted.
    ///
    /// Unlike [`finalize`](Self::finalize), a live record under the same uid
    /// is left alone and reported as a conflict.
    pub(crate) fn finalize_unadmitted(&mut self, uid: &str, now: Instant) -> Finalization {
        if self.records.contains_key(uid) {
            return Finalization::Conflict;
        }
        self.finalize(uid, now)
    }

    /// Cancel every live record's token.
    pub(crate) fn cancel_all(&mut self) {
        for record in self.records.values_mut() {
            record.cancel_requested = true;
            record.cancel.cancel();
        }
    }

    pub(crate) fn active_uids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(active, awaiting_result)` record counts.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let awaiting = self
            .records
            .values()
            .filter(|r| r.state == InvocationState::AwaitingResult)
            .count();
        (self.records.len(), awaiting)
    }

    pub(crate) fn state(&self, uid: &str) -> Option<InvocationState> {
        self.records.get(uid).map(|r| r.state)
    }

    fn prune_tombstones(&mut self, now: Instant) {
        let ttl = self.tombstone_ttl;
        self.tombstones
            .retain(|_, finalized_at| now.saturating_duration_since(*finalized_at) < ttl);
    }

    #[cfg(test)]
    fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
}
