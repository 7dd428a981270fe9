// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Line-oriented function call protocol.
//!
//! Inbound lines:
//!
//! ```text
//! FUNCTION <uid> <timeout_s> "<name> <arg1> ..." <permissions> "<source>" [<content_type>]
//! FUNCTION_PAYLOAD <uid> <timeout_s> "<name> ..." <permissions> "<source>" <content_type>
//!   ...body lines...
//! FUNCTION_PAYLOAD_END
//! FUNCTION_CANCEL <uid>
//! FUNCTION_PROGRESS <uid> <done> <total>
//! QUIT
//! ```
//!
//! Outbound terminal responses are framed by [`response::FunctionResult`].

pub mod parser;
pub mod response;

pub use parser::{Function, InputEvent, LineParser};
pub use response::{FunctionResult, build_json_payload};
