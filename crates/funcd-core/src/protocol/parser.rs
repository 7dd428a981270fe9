// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stateful line decoder for the function call protocol.
//!
//! The parser consumes one line at a time and yields an [`InputEvent`]. A
//! `FUNCTION_PAYLOAD` line switches it into payload capture, where every
//! following line is body content until `FUNCTION_PAYLOAD_END`, except for the
//! control lines handled in [`LineParser::parse_event`].

use std::fmt;
use std::time::Duration;

use crate::error::ParseError;

/// Immediate call keyword.
pub const LINE_FUNCTION: &str = "FUNCTION";
/// Call-with-body keyword.
pub const LINE_FUNCTION_PAYLOAD: &str = "FUNCTION_PAYLOAD";
/// Body terminator.
pub const LINE_FUNCTION_PAYLOAD_END: &str = "FUNCTION_PAYLOAD_END";
/// Cancel keyword.
pub const LINE_FUNCTION_CANCEL: &str = "FUNCTION_CANCEL";
/// Progress keyword.
pub const LINE_FUNCTION_PROGRESS: &str = "FUNCTION_PROGRESS";
/// Orderly shutdown.
pub const LINE_QUIT: &str = "QUIT";

/// A parsed invocation request. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    /// Keyword the request arrived with (`FUNCTION` or `FUNCTION_PAYLOAD`).
    pub keyword: String,
    /// Caller-assigned transaction id.
    pub uid: String,
    /// Caller timeout. Zero when the caller sent zero or a negative value.
    pub timeout: Duration,
    /// Logical function name.
    pub name: String,
    /// Arguments following the name in the quoted field.
    pub args: Vec<String>,
    /// Request body, present only for payload calls.
    pub payload: Option<Vec<u8>>,
    /// Caller permissions token.
    pub permissions: String,
    /// Caller source descriptor.
    pub source: String,
    /// Content type of the payload, if sent.
    pub content_type: Option<String>,
}

impl Function {
    /// Create a function request with only a transaction id and a name.
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyword: LINE_FUNCTION.to_string(),
            uid: uid.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// First argument, used for prefix routing.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key: '{}', uid: '{}', timeout: '{:?}', function: '{}', args: '{:?}', permissions: '{}', source: '{}', contentType: '{}', payload: '{}'",
            self.keyword,
            self.uid,
            self.timeout,
            self.name,
            self.args,
            self.permissions,
            self.source,
            self.content_type.as_deref().unwrap_or_default(),
            self.payload
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default(),
        )
    }
}

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Nothing to act on (blank line, payload line, payload opening).
    None,
    /// A complete call request.
    Call(Function),
    /// A cancel request.
    Cancel {
        /// Transaction id to cancel.
        uid: String,
        /// The cancel aborted a payload that was still being captured, so the
        /// request was never admitted.
        pre_admission: bool,
    },
    /// Informational progress line.
    Progress {
        /// Transaction id, if the line carried one.
        uid: Option<String>,
    },
    /// Orderly shutdown.
    Quit,
}

#[derive(Debug)]
struct PendingPayload {
    function: Function,
    body: String,
}

/// Line-by-line protocol decoder.
#[derive(Debug, Default)]
pub struct LineParser {
    pending: Option<PendingPayload>,
}

impl LineParser {
    /// Create a parser in normal (non-capturing) mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a payload is currently being captured.
    pub fn is_reading_payload(&self) -> bool {
        self.pending.is_some()
    }

    /// Transaction id of the payload being captured.
    pub fn pending_uid(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.function.uid.as_str())
    }

    /// Body captured so far for the in-progress payload.
    pub fn pending_body(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.body.as_str())
    }

    /// Convenience wrapper returning only call requests.
    pub fn parse(&mut self, line: &str) -> Result<Option<Function>, ParseError> {
        match self.parse_event(line)? {
            InputEvent::Call(function) => Ok(Some(function)),
            _ => Ok(None),
        }
    }

    /// Decode a single input line.
    ///
    /// While a payload is being captured:
    /// - `FUNCTION_PAYLOAD_END` closes the payload and yields the call;
    /// - a cancel for the captured uid aborts the payload (pre-admission cancel);
    /// - a cancel for another uid or a progress line is reported and capture continues;
    /// - a malformed cancel is an error that leaves the captured state intact;
    /// - `QUIT` aborts the payload and yields quit;
    /// - any other `FUNCTION`/`FUNCTION_*` line aborts the payload and is reparsed.
    pub fn parse_event(&mut self, line: &str) -> Result<InputEvent, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(InputEvent::None);
        }

        if self.pending.is_some() {
            return self.parse_payload_line(line);
        }

        if line == LINE_QUIT {
            return Ok(InputEvent::Quit);
        }
        if has_line_prefix(line, LINE_FUNCTION_CANCEL) {
            return parse_cancel(line);
        }
        if has_line_prefix(line, LINE_FUNCTION_PROGRESS) {
            return Ok(parse_progress(line));
        }
        if strip_keyword(line, LINE_FUNCTION).is_some() {
            return Ok(InputEvent::Call(parse_function(line)?));
        }
        if strip_keyword(line, LINE_FUNCTION_PAYLOAD).is_some() {
            let function = parse_function(line)?;
            self.pending = Some(PendingPayload {
                function,
                body: String::new(),
            });
            return Ok(InputEvent::None);
        }

        Err(ParseError::UnexpectedLine)
    }

    fn parse_payload_line(&mut self, line: &str) -> Result<InputEvent, ParseError> {
        if line == LINE_FUNCTION_PAYLOAD_END {
            return Ok(match self.pending.take() {
                Some(PendingPayload { mut function, body }) => {
                    function.payload = Some(body.into_bytes());
                    InputEvent::Call(function)
                }
                None => InputEvent::None,
            });
        }

        if has_line_prefix(line, LINE_FUNCTION_CANCEL) {
            // A malformed cancel leaves the captured payload untouched.
            let event = parse_cancel(line)?;
            if let InputEvent::Cancel { uid, .. } = &event {
                if self.pending_uid() == Some(uid.as_str()) {
                    self.pending = None;
                    return Ok(InputEvent::Cancel {
                        uid: uid.clone(),
                        pre_admission: true,
                    });
                }
            }
            return Ok(event);
        }

        if has_line_prefix(line, LINE_FUNCTION_PROGRESS) {
            return Ok(parse_progress(line));
        }

        if line == LINE_QUIT {
            self.pending = None;
            return Ok(InputEvent::Quit);
        }

        if has_line_prefix(line, LINE_FUNCTION) || line.starts_with("FUNCTION_") {
            self.pending = None;
            return self.parse_event(line).map_err(|e| match e {
                ParseError::UnexpectedLine => ParseError::UnexpectedControl(first_token(line)),
                other => other,
            });
        }

        if let Some(pending) = self.pending.as_mut() {
            if !pending.body.is_empty() {
                pending.body.push('\n');
            }
            pending.body.push_str(line);
        }

        Ok(InputEvent::None)
    }
}

fn has_line_prefix(line: &str, keyword: &str) -> bool {
    line == keyword || strip_keyword(line, keyword).is_some()
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    line.strip_prefix(keyword)?.strip_prefix(' ')
}

fn first_token(line: &str) -> String {
    line.split_whitespace().next().unwrap_or_default().to_string()
}

fn parse_cancel(line: &str) -> Result<InputEvent, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [keyword, uid] if *keyword == LINE_FUNCTION_CANCEL && !uid.is_empty() => {
            Ok(InputEvent::Cancel {
                uid: (*uid).to_string(),
                pre_admission: false,
            })
        }
        _ => Err(ParseError::MalformedCancel),
    }
}

fn parse_progress(line: &str) -> InputEvent {
    InputEvent::Progress {
        uid: line.split_whitespace().nth(1).map(str::to_string),
    }
}

/// Split a call line into its quoted, space-delimited fields.
fn split_fields(line: &str) -> Result<Vec<String>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    match reader.records().next() {
        Some(record) => Ok(record?.iter().map(str::to_string).collect()),
        None => Ok(Vec::new()),
    }
}

fn parse_function(line: &str) -> Result<Function, ParseError> {
    let mut parts = split_fields(line)?;

    let n = parts.len();
    if n != 6 && n != 7 {
        return Err(ParseError::FieldCount(n));
    }

    let timeout: i64 = parts[2].parse()?;

    if parts[3].trim().is_empty() {
        return Err(ParseError::EmptyFunctionName);
    }
    let mut name_and_args = parts[3].split(' ').map(str::to_string);
    let name = name_and_args.next().unwrap_or_default();
    let args = name_and_args.collect();

    let content_type = if n == 7 { parts.pop() } else { None };
    let mut parts = parts.into_iter();
    let keyword = parts.next().unwrap_or_default();
    let uid = parts.next().unwrap_or_default();
    let permissions = parts.nth(2).unwrap_or_default();
    let source = parts.next().unwrap_or_default();

    Ok(Function {
        keyword,
        uid,
        timeout: Duration::from_secs(timeout.max(0) as u64),
        name,
        args,
        payload: None,
        permissions,
        source,
        content_type,
    })
}
