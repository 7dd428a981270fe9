// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler callback type and its call context.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::finalizer::Responder;
use crate::protocol::{Function, FunctionResult};

/// A function handler.
///
/// Handlers run synchronously on a worker thread. A handler either responds
/// before returning or keeps a [`Responder`] and responds later; in the latter
/// case the invocation waits in the awaiting-result state.
pub type Handler = Arc<dyn Fn(FunctionCall) + Send + Sync>;

/// Everything a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    /// The resolved request.
    pub function: Function,
    cancel: CancellationToken,
    responder: Responder,
}

impl FunctionCall {
    /// Assemble a call context.
    pub fn new(function: Function, cancel: CancellationToken, responder: Responder) -> Self {
        Self {
            function,
            cancel,
            responder,
        }
    }

    /// Transaction id of this invocation.
    pub fn uid(&self) -> &str {
        &self.function.uid
    }

    /// Cancellation token for this invocation.
    ///
    /// Cancellation is advisory: a handler that ignores it keeps running, and
    /// its eventual response is dropped if a forced 499 went out first.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A responder that can outlive this call.
    pub fn responder(&self) -> Responder {
        self.responder.clone()
    }

    /// Send a JSON status response for this invocation.
    pub fn respond(&self, code: u16, message: &str) -> bool {
        self.responder.respond(&self.function.uid, code, message)
    }

    /// Send a prepared result; its uid must be this invocation's.
    pub fn respond_with(&self, result: FunctionResult) -> bool {
        if result.uid != self.function.uid {
            return false;
        }
        self.responder.respond_with(result)
    }

    /// Send an arbitrary payload for this invocation.
    pub fn respond_payload(&self, code: u16, content_type: &str, payload: impl Into<String>) -> bool {
        self.responder
            .respond_payload(&self.function.uid, code, content_type, payload)
    }
}
