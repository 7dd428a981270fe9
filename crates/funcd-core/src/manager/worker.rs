// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution workers.
//!
//! Workers are plain OS threads: handlers are synchronous and may block.
//! Each worker holds a clone of the drain sender, so the receiver observes
//! the channel closing once every worker has exited.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{InvocationRequest, MSG_HANDLER_PANIC, ManagerInner, STATUS_INTERNAL_ERROR};
use crate::handler::FunctionCall;
use crate::invocation::Start;

pub(super) fn spawn_workers(
    inner: &Arc<ManagerInner>,
    done: mpsc::Sender<()>,
) -> std::io::Result<()> {
    for id in 0..inner.config.worker_count {
        let worker_inner = inner.clone();
        let worker_done = done.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("funcd-worker-{id}"))
            .spawn(move || {
                let _done = worker_done;
                run_worker(&worker_inner, id);
            });
        if let Err(e) = spawned {
            error!(worker = id, error = %e, "Failed to spawn function worker");
            inner.scheduler.stop();
            return Err(e);
        }
    }
    Ok(())
}

fn run_worker(inner: &Arc<ManagerInner>, id: usize) {
    debug!(worker = id, "Function worker started");
    while let Some(request) = inner.scheduler.next() {
        execute(inner, request);
    }
    debug!(worker = id, "Function worker stopped");
}

fn execute(inner: &Arc<ManagerInner>, request: InvocationRequest) {
    let InvocationRequest {
        function,
        handler,
        cancel,
        ..
    } = request;
    let uid = function.uid.clone();

    // The cancel path or shutdown owns the terminal response of a canceled
    // request, and its finalization advances the lane.
    if cancel.is_cancelled() {
        debug!(uid = %uid, "Skipping canceled invocation");
        return;
    }
    match inner.start_invocation(&uid) {
        Start::Started => {}
        Start::Missing => {
            debug!(uid = %uid, "Skipping invocation finalized before start");
            return;
        }
        Start::Canceled => {
            debug!(uid = %uid, "Skipping invocation canceled before start");
            return;
        }
    }

    let timeout = function.timeout;
    debug!(uid = %uid, function = %function.name, "Running function handler");
    let call = FunctionCall::new(function, cancel, inner.responder());

    match panic::catch_unwind(AssertUnwindSafe(|| handler(call))) {
        Ok(()) => inner.set_awaiting_result(&uid, timeout),
        Err(payload) => {
            error!(uid = %uid, panic = %panic_message(payload.as_ref()), "Function handler panicked");
            inner.respond(&uid, STATUS_INTERNAL_ERROR, MSG_HANDLER_PANIC, "worker.panic");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
