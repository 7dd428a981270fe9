// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! funcd Core - Function Call Admission and Execution
//!
//! This crate admits, schedules and executes function calls streamed by an
//! external controller over a line protocol, and guarantees exactly one
//! terminal response per transaction id, even under cancellation, duplicate
//! delivery, handler panics and shutdown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Controller (stdin)                          │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │ lines
//!                                   ▼
//! ┌──────────────────────┐   ┌─────────────────────────────────────────┐
//! │     LineParser       │──►│           FunctionManager               │
//! │  (payload capture)   │   │  admission · cancel · shutdown          │
//! └──────────────────────┘   └─────────────────────────────────────────┘
//!                               │ resolve        │ admit      │ enqueue
//!                               ▼                ▼            ▼
//!                      ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!                      │   Registry   │ │ Invocation   │ │ KeyScheduler │
//!                      │ name/prefix  │ │ table +      │ │ lanes +      │
//!                      └──────────────┘ │ tombstones   │ │ ready queue  │
//!                                       └──────────────┘ └──────────────┘
//!                                              ▲               │ next
//!                                   finalize   │               ▼
//!                                       ┌─────────────────────────────┐
//!                                       │  Worker threads (handlers)  │
//!                                       └─────────────────────────────┘
//!                                              │ emit
//!                                              ▼
//!                                       ┌─────────────────────────────┐
//!                                       │  ResultWriter (stdout)      │
//!                                       └─────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! | Line | Meaning |
//! |------|---------|
//! | `FUNCTION <uid> <timeout> "<name> <args…>" <permissions> "<source>" [<content_type>]` | Immediate call |
//! | `FUNCTION_PAYLOAD <uid> <timeout> "<name> …" <permissions> "<source>" <content_type>` | Call with body, terminated by `FUNCTION_PAYLOAD_END` |
//! | `FUNCTION_CANCEL <uid>` | Cancel |
//! | `FUNCTION_PROGRESS <uid> …` | Informational |
//! | `QUIT` | Orderly shutdown |
//!
//! Terminal responses are framed as
//! `FUNCTION_RESULT_BEGIN <uid> <code> <content_type> <expire>` / payload /
//! `FUNCTION_RESULT_END`.
//!
//! # Status Codes
//!
//! | Code | When |
//! |------|------|
//! | 499 | Canceled (queued, before admission, by fallback timer, or at shutdown) |
//! | 500 | Handler panic, invalid scheduler request |
//! | 501 | Unregistered function |
//! | 503 | Manager stopping, queue full, no matching route |
//!
//! # Ordering
//!
//! Calls are serialized per schedule key: `name` for direct handlers,
//! `name|prefix` for prefix routes. Calls with different keys run
//! concurrently up to the worker count.

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod finalizer;
pub mod handler;
pub mod input;
pub mod invocation;
pub mod manager;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use config::ManagerConfig;
pub use error::{Error, ParseError, Result, SchedulerError};
pub use finalizer::{Responder, TerminalFinalizer, direct_terminal_finalizer};
pub use handler::{FunctionCall, Handler};
pub use invocation::InvocationState;
pub use manager::{FunctionManager, FunctionManagerBuilder};
pub use output::ResultWriter;
pub use protocol::{Function, FunctionResult, InputEvent, LineParser};
pub use registry::{FunctionRegistry, Registry, Route};
pub use stats::ManagerStats;
