// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for funcd-core integration tests.
//!
//! Provides TestContext for running a manager over an in-memory line channel
//! and capturing its output.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use funcd_core::{
    FunctionManager, FunctionManagerBuilder, FunctionRegistry, InvocationState, ResultWriter,
};

pub const PERMISSIONS: &str = "0xFFFF";
pub const SOURCE: &str = "method=api,role=test";

/// How long helpers wait for an expected condition.
pub const WAIT: Duration = Duration::from_secs(5);

/// `FUNCTION` line with no timeout.
pub fn call_line(uid: &str, name_and_args: &str) -> String {
    format!(r#"FUNCTION {uid} 0 "{name_and_args}" {PERMISSIONS} "{SOURCE}""#)
}

/// `FUNCTION_PAYLOAD` opening line.
pub fn payload_line(uid: &str, name_and_args: &str, content_type: &str) -> String {
    format!(r#"FUNCTION_PAYLOAD {uid} 0 "{name_and_args}" {PERMISSIONS} "{SOURCE}" {content_type}"#)
}

pub fn cancel_line(uid: &str) -> String {
    format!("FUNCTION_CANCEL {uid}")
}

/// In-memory output sink shared between the manager and the test.
#[derive(Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedOutput {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// `(uid, code)` for every result block, in output order.
    pub fn results(&self) -> Vec<(String, u16)> {
        self.text()
            .lines()
            .filter_map(|line| line.strip_prefix("FUNCTION_RESULT_BEGIN "))
            .map(|header| {
                let mut fields = header.split_whitespace();
                let uid = fields.next().unwrap().to_string();
                let code = fields.next().unwrap().parse().unwrap();
                (uid, code)
            })
            .collect()
    }

    /// Result codes emitted for `uid`.
    pub fn codes_for(&self, uid: &str) -> Vec<u16> {
        self.results()
            .into_iter()
            .filter(|(u, _)| u == uid)
            .map(|(_, code)| code)
            .collect()
    }

    /// Wait until `uid` has at least one result; returns its codes.
    pub async fn wait_for_result(&self, uid: &str) -> Vec<u16> {
        wait_until(|| !self.codes_for(uid).is_empty()).await;
        self.codes_for(uid)
    }
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "condition not met within {WAIT:?}");
}

/// A latch handlers block on until the test opens it.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (open, cond) = &*self.0;
        *open.lock().unwrap() = true;
        cond.notify_all();
    }

    pub fn wait(&self) {
        let (open, cond) = &*self.0;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cond.wait(guard).unwrap();
        }
    }
}

/// Ordered record of handler invocations.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, uid: &str) {
        self.0.lock().unwrap().push(uid.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, uid: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|u| *u == uid).count()
    }
}

/// A running manager fed through a channel.
pub struct TestContext {
    pub manager: FunctionManager,
    pub registry: Arc<FunctionRegistry>,
    pub output: SharedOutput,
    pub shutdown: CancellationToken,
    lines: Option<mpsc::UnboundedSender<String>>,
    run: Option<JoinHandle<funcd_core::Result<()>>>,
}

impl TestContext {
    /// Start a manager with `configure` applied to a builder that already
    /// carries the registry and output sink.
    pub fn start(
        registry: Arc<FunctionRegistry>,
        configure: impl FnOnce(FunctionManagerBuilder) -> FunctionManagerBuilder,
    ) -> Self {
        let output = SharedOutput::default();
        let builder = FunctionManager::builder()
            .registry(registry.clone())
            .writer(ResultWriter::new(output.clone()));
        let manager = configure(builder).build().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let run = {
            let manager = manager.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { manager.run(rx, shutdown).await })
        };

        Self {
            manager,
            registry,
            output,
            shutdown,
            lines: Some(tx),
            run: Some(run),
        }
    }

    pub fn send(&self, line: impl Into<String>) {
        self.lines
            .as_ref()
            .expect("input already closed")
            .send(line.into())
            .unwrap();
    }

    /// Close the input and wait for the manager to finish.
    pub async fn close(&mut self) {
        self.lines.take();
        self.join().await;
    }

    /// Wait for the run task to finish.
    pub async fn join(&mut self) {
        if let Some(run) = self.run.take() {
            tokio::time::timeout(WAIT, run)
                .await
                .expect("manager did not stop in time")
                .unwrap()
                .unwrap();
        }
    }

    pub async fn wait_for_state(&self, uid: &str, state: InvocationState) {
        wait_until(|| self.manager.invocation_state(uid) == Some(state)).await;
    }
}
