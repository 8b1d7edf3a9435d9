//! Wire message types and frame classification.
//!
//! Defines the message format exchanged with the browser endpoint and the
//! rule that splits incoming traffic into responses and events.
//!
//! # Wire Format
//!
//! Outgoing command:
//!
//! ```json
//! { "id": 1, "method": "Page.enable", "params": {}, "sessionId": "ABC" }
//! ```
//!
//! An incoming frame is a **response** iff it carries `id` (with `result`
//! or `error`), and an **event** iff it carries `method` without `id`
//! (with `params`, optional `sessionId`). Anything else is a protocol
//! error; the receive loop logs and drops it.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};

// ============================================================================
// Command
// ============================================================================

/// A command frame from local end to browser.
///
/// Transient; one per call. Presence of `sessionId` activates flattened
/// routing, disambiguating logical targets sharing one connection.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Unique identifier for request/response correlation.
    pub id: CommandId,

    /// Method in `Domain.method` format.
    pub method: String,

    /// Method parameters.
    pub params: Value,

    /// Session routing, omitted for browser-level commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Command {
    /// Creates a command frame.
    #[inline]
    #[must_use]
    pub fn new(
        id: CommandId,
        method: impl Into<String>,
        params: Value,
        session_id: Option<SessionId>,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            params,
            session_id,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response frame correlating to exactly one command.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error object (if failure).
    #[serde(default)]
    pub error: Option<ResponseError>,

    /// Session the command was routed through, echoed back.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl Response {
    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Extracts the result value, mapping a remote error object to
    /// [`Error::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] if the remote end reported an error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(err) => Err(Error::command_failed(err.code, err.message)),
        }
    }
}

/// Remote error object carried in a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Event
// ============================================================================

/// An asynchronous notification frame.
///
/// Fans out to zero or more registered callbacks; never correlated.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    /// Event name in `Domain.event` format.
    pub method: String,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,

    /// Session the event originated from, if routed.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl Event {
    /// Returns the domain portion of the method.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// An incoming frame after classification.
#[derive(Debug)]
pub enum IncomingMessage {
    /// Correlates to a pending command.
    Response(Response),
    /// Fans out to the event dispatcher.
    Event(Event),
}

/// Classifies raw frame text as a response or event.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for unparseable or unclassifiable frames.
/// Callers log and drop these; they are never surfaced to a specific
/// command issuer.
pub fn classify(text: &str) -> Result<IncomingMessage> {
    let value: Value = serde_json::from_str(text)?;

    let obj = value
        .as_object()
        .ok_or_else(|| Error::protocol("frame is not a JSON object"))?;

    if obj.contains_key("id") {
        let response: Response = serde_json::from_value(value)?;
        return Ok(IncomingMessage::Response(response));
    }

    if obj.contains_key("method") {
        let event: Event = serde_json::from_value(value)?;
        return Ok(IncomingMessage::Event(event));
    }

    Err(Error::protocol("frame carries neither id nor method"))
}

// ============================================================================
// Tests
// ============================================================================
