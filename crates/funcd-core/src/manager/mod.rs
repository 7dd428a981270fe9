// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The functions manager.
//!
//! [`FunctionManager`] reads protocol lines, admits call requests, schedules
//! them per key onto a pool of worker threads and guarantees exactly one
//! terminal response per admitted transaction id.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use funcd_core::{FunctionManager, FunctionRegistry, input};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(FunctionRegistry::new());
//!     registry.register("ping", Arc::new(|call| {
//!         call.respond(200, "pong");
//!     }));
//!
//!     let manager = FunctionManager::builder().registry(registry).build()?;
//!     manager.run(input::stdin_lines(), CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Terminal responses
//!
//! Every terminal response, whether it comes from a handler, the cancel
//! path, the fallback timer or shutdown, is routed through
//! [`FunctionManager::try_finalize`]. The first one for a uid removes the
//! invocation record, tombstones the uid and releases its schedule lane.
//! Any later one is dropped.
//!
//! # Shutdown
//!
//! Input EOF, `QUIT` or the run token starts shutdown: admission stops,
//! workers drain what is already scheduled, and after
//! `shutdown_drain_timeout` every unresolved invocation is canceled and
//! answered with 499.

mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::{Error, Result, SchedulerError};
use crate::finalizer::{Responder, TerminalFinalizer};
use crate::handler::Handler;
use crate::input::LineInput;
use crate::invocation::{
    Admission, Finalization, InvocationState, InvocationTable, Start, Timer,
};
use crate::output::ResultWriter;
use crate::protocol::{Function, FunctionResult, InputEvent, LineParser};
use crate::registry::{
    FunctionRegistry, Registry, SCHEDULE_KEY_UNREGISTERED, route_schedule_key,
    unregistered_function_handler,
};
use crate::scheduler::{KeyScheduler, ScheduledRequest};
use crate::stats::{ManagerCounters, ManagerStats};

/// Status code for canceled requests.
pub const STATUS_CANCELED: u16 = 499;
/// Status code for handler failures and invalid requests.
pub const STATUS_INTERNAL_ERROR: u16 = 500;
/// Status code for refused admission.
pub const STATUS_UNAVAILABLE: u16 = 503;

const MSG_CANCELED: &str = "request canceled";
const MSG_SHUTDOWN_CANCELED: &str = "request canceled during shutdown";
const MSG_STOPPING: &str = "functions manager is stopping";
const MSG_QUEUE_FULL: &str = "function queue is full";
const MSG_INVALID_REQUEST: &str = "invalid scheduler request";
const MSG_HANDLER_PANIC: &str = "function handler panic";

/// A scheduled invocation.
pub(crate) struct InvocationRequest {
    pub(crate) function: Function,
    pub(crate) handler: Handler,
    pub(crate) cancel: CancellationToken,
    pub(crate) schedule_key: String,
}

impl ScheduledRequest for InvocationRequest {
    fn uid(&self) -> &str {
        &self.function.uid
    }

    fn schedule_key(&self) -> &str {
        &self.schedule_key
    }
}

/// Builder for [`FunctionManager`].
pub struct FunctionManagerBuilder {
    registry: Option<Arc<dyn Registry>>,
    writer: Option<ResultWriter>,
    config: ManagerConfig,
    quit_notify: Option<CancellationToken>,
}

impl Default for FunctionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionManagerBuilder {
    /// Builder with default configuration.
    pub fn new() -> Self {
        Self {
            registry: None,
            writer: None,
            config: ManagerConfig::default(),
            quit_notify: None,
        }
    }

    /// Set the function registry.
    ///
    /// Default: an empty [`FunctionRegistry`].
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the sink for terminal responses.
    ///
    /// Default: stdout
    pub fn writer(mut self, writer: ResultWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of workers.
    ///
    /// Default: 1
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set the scheduler capacity; `0` means unbounded.
    ///
    /// Default: 64
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = size;
        self
    }

    /// Set the delay before a canceled in-flight invocation is force-finalized.
    ///
    /// Default: 5 seconds
    pub fn cancel_fallback_delay(mut self, delay: Duration) -> Self {
        self.config.cancel_fallback_delay = delay;
        self
    }

    /// Set how long shutdown waits for workers.
    ///
    /// Default: 8 seconds
    pub fn shutdown_drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_drain_timeout = timeout;
        self
    }

    /// Set the tombstone lifetime.
    ///
    /// Default: 60 seconds
    pub fn tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.config.tombstone_ttl = ttl;
        self
    }

    /// Set the awaiting-result warning delay.
    ///
    /// Default: 30 seconds
    pub fn awaiting_warn_delay(mut self, delay: Duration) -> Self {
        self.config.awaiting_warn_delay = delay;
        self
    }

    /// Token canceled when a `QUIT` line is received.
    pub fn quit_notify(mut self, token: CancellationToken) -> Self {
        self.quit_notify = Some(token);
        self
    }

    /// Build the manager.
    ///
    /// Must be called from within a tokio runtime; timers run on it.
    pub fn build(self) -> Result<FunctionManager> {
        let runtime = Handle::try_current()?;
        let mut config = self.config;
        config.worker_count = config.worker_count.max(1);

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(FunctionRegistry::new()));
        let writer = self.writer.unwrap_or_else(ResultWriter::stdout);

        Ok(FunctionManager {
            inner: Arc::new(ManagerInner {
                scheduler: KeyScheduler::new(config.queue_size),
                table: Mutex::new(InvocationTable::new(config.tombstone_ttl)),
                config,
                registry,
                writer,
                runtime,
                root: CancellationToken::new(),
                stopping: AtomicBool::new(false),
                running: AtomicBool::new(false),
                counters: ManagerCounters::default(),
                quit_notify: self.quit_notify,
            }),
        })
    }
}

/// Admits, schedules and finalizes function invocations.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FunctionManager {
    inner: Arc<ManagerInner>,
}

impl FunctionManager {
    /// Create a builder.
    pub fn builder() -> FunctionManagerBuilder {
        FunctionManagerBuilder::new()
    }

    /// Process input until EOF, `QUIT` or `shutdown` is canceled, then shut down.
    ///
    /// Canceling `shutdown` also cancels every in-flight invocation's token.
    /// A manager runs at most once.
    pub async fn run<I: LineInput>(&self, mut input: I, shutdown: CancellationToken) -> Result<()> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        let (done_tx, done_rx) = mpsc::channel::<()>(1);
        worker::spawn_workers(inner, done_tx)?;

        info!(
            workers = inner.config.worker_count,
            queue_size = inner.config.queue_size,
            "Functions manager started"
        );

        let mut parser = LineParser::new();
        let quit = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping functions manager");
                    inner.root.cancel();
                    break false;
                }
                line = input.next_line() => match line {
                    Ok(Some(line)) => {
                        if inner.handle_line(&mut parser, &line) {
                            break true;
                        }
                    }
                    Ok(None) => {
                        info!("Input closed, stopping functions manager");
                        break false;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read input, stopping functions manager");
                        break false;
                    }
                },
            }
        };

        inner.shutdown(quit, done_rx).await;
        info!("Functions manager stopped");
        Ok(())
    }

    /// Admit a call request as if its line had been read.
    ///
    /// Requests admitted before [`run`](Self::run) wait for its workers.
    pub fn dispatch(&self, function: Function) {
        self.inner.counters.observe_call();
        self.inner.dispatch(function);
    }

    /// Request cancellation as if a `FUNCTION_CANCEL` line had been read.
    pub fn cancel(&self, uid: &str) {
        self.inner.handle_cancel(uid, false);
    }

    /// Run `emit` if this is the first terminal response for `uid`.
    ///
    /// Returns whether `emit` ran.
    pub fn try_finalize<F: FnOnce()>(&self, uid: &str, source: &str, emit: F) -> bool {
        self.inner.try_finalize(uid, source, emit)
    }

    /// Send a JSON status response through the finalization guard.
    pub fn respond(&self, uid: &str, code: u16, message: &str) -> bool {
        self.inner.respond(uid, code, message, "manager.respond")
    }

    /// Finalizer routing through this manager.
    pub fn terminal_finalizer(&self) -> TerminalFinalizer {
        self.inner.terminal_finalizer()
    }

    /// Responder routing through this manager.
    pub fn responder(&self) -> Responder {
        self.inner.responder()
    }

    /// Current state of a live invocation.
    pub fn invocation_state(&self, uid: &str) -> Option<InvocationState> {
        self.inner.table().state(uid)
    }

    /// Whether shutdown has started.
    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::Acquire)
    }

    /// Snapshot of counters and gauges.
    pub fn stats(&self) -> ManagerStats {
        let mut stats = self.inner.counters.snapshot();
        let (active, awaiting) = self.inner.table().counts();
        stats.invocations_active = active;
        stats.invocations_awaiting_result = awaiting;
        stats.scheduler_pending = self.inner.scheduler.pending_count();
        stats
    }

    /// The effective configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }
}

pub(crate) struct ManagerInner {
    config: ManagerConfig,
    registry: Arc<dyn Registry>,
    writer: ResultWriter,
    runtime: Handle,
    scheduler: KeyScheduler<InvocationRequest>,
    // Lock order: table, then scheduler.
    table: Mutex<InvocationTable>,
    root: CancellationToken,
    stopping: AtomicBool,
    running: AtomicBool,
    counters: ManagerCounters,
    quit_notify: Option<CancellationToken>,
}

impl ManagerInner {
    fn table(&self) -> MutexGuard<'_, InvocationTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when the line asks to quit.
    fn handle_line(self: &Arc<Self>, parser: &mut LineParser, line: &str) -> bool {
        match parser.parse_event(line) {
            Err(e) => {
                warn!(error = %e, line = %line, "Failed to parse function line");
                false
            }
            Ok(InputEvent::None) => false,
            Ok(InputEvent::Progress { uid }) => {
                debug!(uid = ?uid, "Progress line ignored");
                false
            }
            Ok(InputEvent::Quit) => {
                info!("Received QUIT");
                true
            }
            Ok(InputEvent::Cancel { uid, pre_admission }) => {
                self.handle_cancel(&uid, pre_admission);
                false
            }
            Ok(InputEvent::Call(function)) => {
                self.counters.observe_call();
                debug!(uid = %function.uid, function = %function.name, "Received function call");
                self.dispatch(function);
                false
            }
        }
    }

    fn dispatch(&self, function: Function) {
        let uid = function.uid.clone();

        if self.stopping.load(Ordering::Acquire) {
            self.respond_unadmitted(&uid, STATUS_UNAVAILABLE, MSG_STOPPING, "dispatch.stopping");
            return;
        }

        let (handler, schedule_key) = match self
            .registry
            .resolve(&function.name, function.first_arg())
        {
            Some(route) => (route.handler, route.schedule_key),
            None => {
                debug!(uid = %uid, function = %function.name, "Function is not registered");
                (
                    unregistered_function_handler(),
                    route_schedule_key(&function.name, SCHEDULE_KEY_UNREGISTERED),
                )
            }
        };

        let cancel = self.root.child_token();
        let admission = self
            .table()
            .admit(&uid, cancel.clone(), &schedule_key, Instant::now());
        match admission {
            Admission::Accepted => {}
            Admission::DuplicateActive => {
                cancel.cancel();
                self.counters.observe_duplicate_uid_ignored();
                warn!(uid = %uid, "Ignoring duplicate transaction id of an active invocation");
                return;
            }
            Admission::DuplicateTombstone => {
                cancel.cancel();
                self.counters.observe_duplicate_uid_ignored();
                warn!(uid = %uid, "Ignoring recently finalized transaction id");
                return;
            }
            Admission::Invalid => {
                cancel.cancel();
                warn!(uid = ?uid, "Ignoring request with invalid transaction id");
                return;
            }
        }

        let request = InvocationRequest {
            function,
            handler,
            cancel: cancel.clone(),
            schedule_key,
        };
        if let Err(e) = self.scheduler.enqueue(request) {
            cancel.cancel();
            let (code, message) = match e {
                SchedulerError::QueueFull => {
                    self.counters.observe_queue_full();
                    (STATUS_UNAVAILABLE, MSG_QUEUE_FULL)
                }
                SchedulerError::Stopping => (STATUS_UNAVAILABLE, MSG_STOPPING),
                SchedulerError::Invalid => (STATUS_INTERNAL_ERROR, MSG_INVALID_REQUEST),
            };
            warn!(uid = %uid, error = %e, "Failed to schedule function");
            self.respond(&uid, code, message, "dispatch.enqueue");
        }
    }

    fn handle_cancel(self: &Arc<Self>, uid: &str, pre_admission: bool) {
        if pre_admission {
            debug!(uid = %uid, "Cancel received while payload was being read");
            self.respond_unadmitted(uid, STATUS_CANCELED, MSG_CANCELED, "cancel.pre_admission");
            return;
        }

        match self.request_cancellation(uid) {
            None => debug!(uid = %uid, "Ignoring cancel for unknown transaction id"),
            Some(InvocationState::Queued) => {
                self.respond(uid, STATUS_CANCELED, MSG_CANCELED, "cancel.queued");
            }
            Some(state) => debug!(uid = %uid, state = %state, "Cancel requested for in-flight invocation"),
        }
    }

    /// Mark the invocation canceled and cancel its token.
    ///
    /// Returns the state at the time of the request, or `None` for unknown
    /// uids. Repeated requests only report the state.
    fn request_cancellation(self: &Arc<Self>, uid: &str) -> Option<InvocationState> {
        let mut table = self.table();
        let record = table.get_mut(uid)?;
        let state = record.state;
        if record.cancel_requested {
            return Some(state);
        }

        record.cancel_requested = true;
        record.cancel.cancel();
        match state {
            InvocationState::Queued => {
                self.scheduler.cancel_queued(&record.schedule_key, uid);
            }
            InvocationState::Running | InvocationState::AwaitingResult => {
                if record.fallback_timer.is_none() {
                    record.fallback_timer = Some(self.cancel_fallback_timer(uid));
                }
            }
        }
        Some(state)
    }

    fn cancel_fallback_timer(self: &Arc<Self>, uid: &str) -> Timer {
        let inner = Arc::downgrade(self);
        let uid = uid.to_string();
        Timer::after(&self.runtime, self.config.cancel_fallback_delay, move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.respond(&uid, STATUS_CANCELED, MSG_CANCELED, "cancel.fallback") {
                inner.counters.observe_cancel_fallback();
                warn!(uid = %uid, "Handler ignored cancellation, finalized by fallback");
            }
        })
    }

    fn start_invocation(&self, uid: &str) -> Start {
        self.table().start(uid)
    }

    /// The handler returned. Unless it already responded, wait for an
    /// asynchronous terminal response.
    fn set_awaiting_result(self: &Arc<Self>, uid: &str, timeout: Duration) {
        let mut table = self.table();
        let Some(record) = table.get_mut(uid) else {
            return;
        };
        record.state = InvocationState::AwaitingResult;
        record.awaiting_since = Some(Instant::now());

        let mut delay = self.config.awaiting_warn_delay;
        if !timeout.is_zero() {
            delay = delay.min(timeout);
        }
        if delay.is_zero() {
            return;
        }

        let inner = Arc::downgrade(self);
        let uid = uid.to_string();
        record.awaiting_timer = Some(Timer::after(&self.runtime, delay, move || {
            if let Some(inner) = inner.upgrade() {
                inner.log_awaiting_result(&uid);
            }
        }));
    }

    fn log_awaiting_result(&self, uid: &str) {
        let table = self.table();
        let Some(record) = table.get(uid) else {
            return;
        };
        if record.state != InvocationState::AwaitingResult {
            return;
        }
        let waited = record
            .awaiting_since
            .map(|since| since.elapsed())
            .unwrap_or_default();
        self.counters.observe_awaiting_result_warning();
        warn!(
            uid = %uid,
            waited_ms = waited.as_millis() as u64,
            cancel_requested = record.cancel_requested,
            "Function handler returned without a terminal response"
        );
    }

    fn try_finalize<F: FnOnce()>(&self, uid: &str, source: &str, emit: F) -> bool {
        if uid.is_empty() {
            debug!(source = %source, "Ignoring terminal response without transaction id");
            return false;
        }

        let outcome = self.table().finalize(uid, Instant::now());
        self.complete_finalization(uid, source, outcome, emit)
    }

    /// Answer a request that never got an invocation record.
    ///
    /// A live invocation under the same uid belongs to an earlier admission
    /// and is left untouched; the response is dropped instead.
    fn respond_unadmitted(&self, uid: &str, code: u16, message: &str, source: &str) -> bool {
        if uid.is_empty() {
            debug!(source = %source, "Ignoring terminal response without transaction id");
            return false;
        }

        let result = FunctionResult::status(uid, code, message);
        let writer = self.writer.clone();
        let outcome = self.table().finalize_unadmitted(uid, Instant::now());
        self.complete_finalization(uid, source, outcome, move || writer.emit(&result))
    }

    fn complete_finalization<F: FnOnce()>(
        &self,
        uid: &str,
        source: &str,
        outcome: Finalization,
        emit: F,
    ) -> bool {
        match outcome {
            Finalization::Conflict => {
                self.counters.observe_duplicate_uid_ignored();
                warn!(
                    uid = %uid,
                    source = %source,
                    "Ignoring response for duplicate transaction id of an active invocation"
                );
                false
            }
            Finalization::Late => {
                self.counters.observe_late_terminal_dropped();
                debug!(uid = %uid, source = %source, "Dropping late terminal response");
                false
            }
            Finalization::Finalized { schedule_key } => {
                if let Some(key) = schedule_key {
                    self.scheduler.complete(&key, uid);
                }
                emit();
                true
            }
        }
    }

    fn respond(&self, uid: &str, code: u16, message: &str, source: &str) -> bool {
        let result = FunctionResult::status(uid, code, message);
        let writer = self.writer.clone();
        self.try_finalize(uid, source, move || writer.emit(&result))
    }

    fn terminal_finalizer(self: &Arc<Self>) -> TerminalFinalizer {
        let inner: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |uid, source, emit| match inner.upgrade() {
            Some(inner) => inner.try_finalize(uid, source, emit),
            None => false,
        })
    }

    fn responder(self: &Arc<Self>) -> Responder {
        Responder::new(self.writer.clone(), self.terminal_finalizer())
    }

    async fn shutdown(&self, quit: bool, mut workers_done: mpsc::Receiver<()>) {
        self.stopping.store(true, Ordering::Release);
        if quit {
            if let Some(token) = &self.quit_notify {
                token.cancel();
            }
        }
        self.scheduler.stop_accepting();

        let drain_timeout = self.config.shutdown_drain_timeout;
        // Resolves once every worker dropped its sender.
        let timed_out = tokio::time::timeout(drain_timeout, workers_done.recv())
            .await
            .is_err();
        self.finalize_unresolved(timed_out);
    }

    fn finalize_unresolved(&self, timed_out: bool) {
        let uids = {
            let mut table = self.table();
            if !timed_out && table.is_empty() {
                return;
            }
            table.cancel_all();
            table.active_uids()
        };

        if timed_out {
            warn!(
                unresolved = uids.len(),
                timeout_ms = self.config.shutdown_drain_timeout.as_millis() as u64,
                "Workers did not drain before shutdown timeout"
            );
        } else {
            info!(unresolved = uids.len(), "Finalizing unresolved invocations on shutdown");
        }

        for uid in uids {
            self.respond(&uid, STATUS_CANCELED, MSG_SHUTDOWN_CANCELED, "shutdown");
        }
        self.scheduler.stop();
    }
}
