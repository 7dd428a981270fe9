// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Serialized writer for terminal result blocks.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::protocol::FunctionResult;

/// Shared sink for terminal responses.
///
/// Every result block is written and flushed under one lock so concurrent
/// finalizations never interleave on the wire.
#[derive(Clone)]
pub struct ResultWriter {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ResultWriter {
    /// Wrap an arbitrary writer.
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Writer bound to the process stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Write and flush one result block.
    pub fn write_result(&self, result: &FunctionResult) -> std::io::Result<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        result.write_to(&mut *sink)?;
        sink.flush()
    }

    /// Write a result block, logging failures.
    pub fn emit(&self, result: &FunctionResult) {
        if let Err(e) = self.write_result(result) {
            warn!(uid = %result.uid, code = result.code, error = %e, "Failed to write function result");
        }
    }
}

impl std::fmt::Debug for ResultWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultWriter").finish_non_exhaustive()
    }
}
