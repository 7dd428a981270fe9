// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time view of manager activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Parsed call requests.
    pub calls_total: u64,
    /// Requests rejected because the scheduler was full.
    pub queue_full_total: u64,
    /// Invocations finalized by the cancel fallback timer.
    pub cancel_fallback_total: u64,
    /// Terminal responses dropped by the tombstone guard.
    pub late_terminal_dropped_total: u64,
    /// Duplicate transaction ids ignored at admission.
    pub duplicate_uid_ignored_total: u64,
    /// Warnings about invocations still awaiting their terminal response.
    pub awaiting_result_warnings_total: u64,
    /// Invocations currently tracked.
    pub invocations_active: usize,
    /// Invocations waiting for an asynchronous terminal response.
    pub invocations_awaiting_result: usize,
    /// Requests queued or ready in the scheduler.
    pub scheduler_pending: usize,
}

#[derive(Debug, Default)]
pub(crate) struct ManagerCounters {
    calls_total: AtomicU64,
    queue_full_total: AtomicU64,
    cancel_fallback_total: AtomicU64,
    late_terminal_dropped_total: AtomicU64,
    duplicate_uid_ignored_total: AtomicU64,
    awaiting_result_warnings_total: AtomicU64,
}

impl ManagerCounters {
    pub(crate) fn observe_call(&self) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_queue_full(&self) {
        self.queue_full_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_cancel_fallback(&self) {
        self.cancel_fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_late_terminal_dropped(&self) {
        self.late_terminal_dropped_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_duplicate_uid_ignored(&self) {
        self.duplicate_uid_ignored_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_awaiting_result_warning(&self) {
        self.awaiting_result_warnings_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Counter values; gauges are filled in by the caller.
    pub(crate) fn snapshot(&self) -> ManagerStats {
        ManagerStats {
            calls_total: self.calls_total.load(Ordering::Relaxed),
            queue_full_total: self.queue_full_total.load(Ordering::Relaxed),
            cancel_fallback_total: self.cancel_fallback_total.load(Ordering::Relaxed),
            late_terminal_dropped_total: self.late_terminal_dropped_total.load(Ordering::Relaxed),
            duplicate_uid_ignored_total: self.duplicate_uid_ignored_total.load(Ordering::Relaxed),
            awaiting_result_warnings_total: self
                .awaiting_result_warnings_total
                .load(Ordering::Relaxed),
            ..ManagerStats::default()
        }
    }
}
