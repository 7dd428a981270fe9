// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Terminal response payloads and result framing.

use std::io::Write;

use serde::Serialize;

/// Content type used for status payloads built by [`build_json_payload`].
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Serialize)]
struct SuccessPayload<'a> {
    status: u16,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorPayload<'a> {
    status: u16,
    error_message: &'a str,
}

/// Build the standard JSON payload for a terminal response.
///
/// Codes in `400..600` carry `errorMessage`, everything else carries `message`.
pub fn build_json_payload(code: u16, message: &str) -> String {
    let encoded = if (400..600).contains(&code) {
        serde_json::to_string(&ErrorPayload {
            status: code,
            error_message: message,
        })
    } else {
        serde_json::to_string(&SuccessPayload {
            status: code,
            message,
        })
    };
    // Serializing a struct of an integer and a string cannot fail.
    encoded.unwrap_or_default()
}

/// A terminal response for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResult {
    /// Transaction id the result answers.
    pub uid: String,
    /// Status code.
    pub code: u16,
    /// Payload content type.
    pub content_type: String,
    /// Unix timestamp after which the result may be discarded by the caller.
    pub expire_timestamp: i64,
    /// Response body.
    pub payload: String,
}

impl FunctionResult {
    /// A JSON status response expiring now.
    pub fn status(uid: impl Into<String>, code: u16, message: &str) -> Self {
        Self {
            uid: uid.into(),
            code,
            content_type: CONTENT_TYPE_JSON.to_string(),
            expire_timestamp: chrono::Utc::now().timestamp(),
            payload: build_json_payload(code, message),
        }
    }

    /// Write the framed result block.
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        write!(
            w,
            "FUNCTION_RESULT_BEGIN {} {} {} {}\n{}\nFUNCTION_RESULT_END\n\n",
            self.uid, self.code, self.content_type, self.expire_timestamp, self.payload
        )
    }
}
