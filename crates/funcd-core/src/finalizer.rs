// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terminal response routing.
//!
//! All terminal output for a transaction goes through a [`TerminalFinalizer`].
//! The manager's finalizer emits at most once per uid; the
//! [`direct_terminal_finalizer`] emits unconditionally and is meant for
//! responders that run without a manager.

use std::sync::Arc;

use crate::output::ResultWriter;
use crate::protocol::FunctionResult;

/// Deferred write of a terminal response.
pub type Emit = Box<dyn FnOnce() + Send>;

/// Routes the terminal response for `uid`; returns whether `emit` ran.
///
/// Arguments are `(uid, source, emit)` where `source` names the caller for
/// diagnostics.
pub type TerminalFinalizer = Arc<dyn Fn(&str, &str, Emit) -> bool + Send + Sync>;

/// Finalizer that emits without deduplication.
pub fn direct_terminal_finalizer() -> TerminalFinalizer {
    Arc::new(|_uid, _source, emit| {
        emit();
        true
    })
}

/// Sends terminal responses through a [`TerminalFinalizer`].
///
/// Cheap to clone; handlers may move a clone to another thread and respond
/// later.
#[derive(Clone)]
pub struct Responder {
    writer: ResultWriter,
    finalize: TerminalFinalizer,
}

impl Responder {
    /// Responder using the given finalizer.
    pub fn new(writer: ResultWriter, finalize: TerminalFinalizer) -> Self {
        Self { writer, finalize }
    }

    /// Responder that writes without deduplication.
    pub fn direct(writer: ResultWriter) -> Self {
        Self::new(writer, direct_terminal_finalizer())
    }

    /// Replace the finalizer.
    pub fn set_terminal_finalizer(&mut self, finalize: TerminalFinalizer) {
        self.finalize = finalize;
    }

    /// The finalizer currently in use.
    pub fn terminal_finalizer(&self) -> TerminalFinalizer {
        self.finalize.clone()
    }

    /// Send a JSON status response.
    pub fn respond(&self, uid: &str, code: u16, message: &str) -> bool {
        if uid.is_empty() {
            return false;
        }
        self.finalize_result(
            "responder.respond",
            FunctionResult::status(uid, code, message),
        )
    }

    /// Send a prepared result.
    pub fn respond_with(&self, result: FunctionResult) -> bool {
        if result.uid.is_empty() {
            return false;
        }
        self.finalize_result("responder.respond_with", result)
    }

    /// Send an arbitrary payload with the given content type.
    pub fn respond_payload(
        &self,
        uid: &str,
        code: u16,
        content_type: &str,
        payload: impl Into<String>,
    ) -> bool {
        if uid.is_empty() {
            return false;
        }
        self.finalize_result(
            "responder.respond_payload",
            FunctionResult {
                uid: uid.to_string(),
                code,
                content_type: content_type.to_string(),
                expire_timestamp: chrono::Utc::now().timestamp(),
                payload: payload.into(),
            },
        )
    }

    fn finalize_result(&self, source: &str, result: FunctionResult) -> bool {
        let uid = result.uid.clone();
        let writer = self.writer.clone();
        (self.finalize)(&uid, source, Box::new(move || writer.emit(&result)))
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}
