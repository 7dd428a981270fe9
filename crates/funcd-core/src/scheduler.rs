// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-key FIFO scheduler.
//!
//! Requests sharing a schedule key run one at a time in arrival order.
//! Requests with different keys may run in parallel, up to the number of
//! workers pulling from [`KeyScheduler::next`].
//!
//! Each key has a lane. The first request of an idle lane becomes its owner
//! and goes straight to the ready queue; later requests wait in the lane
//! until the owner completes. Capacity counts queued plus ready requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::SchedulerError;

/// Something the scheduler can order.
pub trait ScheduledRequest: Send {
    /// Transaction id; empty marks the request invalid.
    fn uid(&self) -> &str;
    /// Serialization key; empty marks the request invalid.
    fn schedule_key(&self) -> &str;
}

struct Lane<R> {
    owner_uid: Option<String>,
    queue: VecDeque<R>,
}

impl<R> Default for Lane<R> {
    fn default() -> Self {
        Self {
            owner_uid: None,
            queue: VecDeque::new(),
        }
    }
}

struct SchedulerState<R> {
    ready: VecDeque<R>,
    lanes: HashMap<String, Lane<R>>,
    pending: usize,
    accepting: bool,
    stopping: bool,
}

impl<R> SchedulerState<R> {
    fn drained(&self) -> bool {
        !self.accepting && self.pending == 0 && self.ready.is_empty()
    }
}

/// Blocking per-key FIFO scheduler shared by the worker threads.
pub struct KeyScheduler<R> {
    max_pending: usize,
    state: Mutex<SchedulerState<R>>,
    cond: Condvar,
}

impl<R: ScheduledRequest> KeyScheduler<R> {
    /// Scheduler holding at most `max_pending` requests; `0` means unbounded.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            state: Mutex::new(SchedulerState {
                ready: VecDeque::new(),
                lanes: HashMap::new(),
                pending: 0,
                accepting: true,
                stopping: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Admit a request to its lane.
    pub fn enqueue(&self, request: R) -> Result<(), SchedulerError> {
        if request.uid().is_empty() || request.schedule_key().is_empty() {
            return Err(SchedulerError::Invalid);
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.accepting || state.stopping {
            return Err(SchedulerError::Stopping);
        }
        if self.max_pending > 0 && state.pending >= self.max_pending {
            return Err(SchedulerError::QueueFull);
        }

        state.pending += 1;
        let lane = state
            .lanes
            .entry(request.schedule_key().to_string())
            .or_default();
        if lane.owner_uid.is_none() {
            lane.owner_uid = Some(request.uid().to_string());
            state.ready.push_back(request);
            self.cond.notify_one();
        } else {
            lane.queue.push_back(request);
        }
        Ok(())
    }

    /// Block until a request is ready.
    ///
    /// Returns `None` once the scheduler is stopped, or drained after
    /// [`stop_accepting`](Self::stop_accepting).
    pub fn next(&self) -> Option<R> {
        let mut state = self.lock();
        while state.ready.is_empty() && !state.stopping {
            if state.drained() {
                return None;
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.stopping {
            return None;
        }

        let request = state.ready.pop_front()?;
        state.pending = state.pending.saturating_sub(1);
        if state.drained() {
            self.cond.notify_all();
        }
        Some(request)
    }

    /// Remove a request still waiting in its lane. Returns whether it was found.
    pub fn cancel_queued(&self, key: &str, uid: &str) -> bool {
        if key.is_empty() || uid.is_empty() {
            return false;
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(lane) = state.lanes.get_mut(key) else {
            return false;
        };
        let Some(pos) = lane.queue.iter().position(|r| r.uid() == uid) else {
            return false;
        };
        lane.queue.remove(pos);
        state.pending = state.pending.saturating_sub(1);
        if state.drained() {
            self.cond.notify_all();
        }
        true
    }

    /// Release the lane owned by `uid` and promote its next request.
    ///
    /// A no-op unless `uid` currently owns the lane for `key`.
    pub fn complete(&self, key: &str, uid: &str) {
        if key.is_empty() || uid.is_empty() {
            return;
        }

        let mut guard = self.lock();
        let state = &mut *guard;
        let owns_lane = state
            .lanes
            .get(key)
            .is_some_and(|lane| lane.owner_uid.as_deref() == Some(uid));
        if !owns_lane {
            return;
        }

        // The owner may still sit in the ready queue if it was finalized
        // before a worker picked it up.
        if let Some(pos) = state.ready.iter().position(|r| r.uid() == uid) {
            state.ready.remove(pos);
            state.pending = state.pending.saturating_sub(1);
        }

        if state.stopping {
            state.lanes.remove(key);
            self.cond.notify_all();
            return;
        }

        let mut skipped = 0;
        let mut promoted = None;
        if let Some(lane) = state.lanes.get_mut(key) {
            while let Some(candidate) = lane.queue.pop_front() {
                if candidate.uid().is_empty() {
                    skipped += 1;
                    continue;
                }
                lane.owner_uid = Some(candidate.uid().to_string());
                promoted = Some(candidate);
                break;
            }
        }
        state.pending = state.pending.saturating_sub(skipped);

        match promoted {
            Some(request) => {
                state.ready.push_back(request);
                self.cond.notify_one();
            }
            None => {
                state.lanes.remove(key);
            }
        }

        if state.drained() {
            self.cond.notify_all();
        }
    }

    /// Refuse new requests; already admitted work still drains.
    pub fn stop_accepting(&self) {
        let mut state = self.lock();
        state.accepting = false;
        self.cond.notify_all();
    }

    /// Refuse new requests and wake every blocked [`next`](Self::next).
    pub fn stop(&self) {
        let mut state = self.lock();
        state.accepting = false;
        state.stopping = true;
        self.cond.notify_all();
    }

    /// Requests queued or ready.
    pub fn pending_count(&self) -> usize {
        self.lock().pending
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
