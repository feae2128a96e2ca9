//! IPC protocol types and validation for the sleepguard daemon.
//!
//! This crate is shared by the daemon and whatever host integration feeds
//! it power events, so the two cannot drift apart on schema. The daemon
//! remains the authority on validation.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024; // power events are tiny

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    PowerEvent,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Typed power events the host delivers over the socket. `SuspendQuery` is
/// the one the daemon answers with allow/busy; the rest are edges and
/// lifecycle notifications.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum PowerEventKind {
    SuspendQuery,
    SuspendCancelled,
    SuspendStarted,
    SwitchPressed,
    SwitchReleased,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PowerEventEnvelope {
    pub event: PowerEventKind,
    #[serde(default)]
    pub recorded_at: Option<String>,
    /// Free-form origin tag for diagnostics (e.g. "power_switch",
    /// "dock", "remote"). Never consulted by the policy.
    #[serde(default)]
    pub origin: Option<String>,
}

impl PowerEventEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(recorded_at) = &self.recorded_at {
            if DateTime::parse_from_rfc3339(recorded_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be RFC3339",
                ));
            }
        }
        if let Some(origin) = &self.origin {
            if origin.len() > 64 {
                return Err(ErrorInfo::new(
                    "invalid_origin",
                    "origin must be 64 characters or fewer",
                ));
            }
        }
        Ok(())
    }
}

pub fn parse_power_event(params: Value) -> Result<PowerEventEnvelope, ErrorInfo> {
    let envelope: PowerEventEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("power event payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}
