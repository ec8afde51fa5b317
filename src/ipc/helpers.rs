use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Session};

/// Error carrier shared by handler helper functions; maps onto the wire
/// error envelope at the handler boundary.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("bad_params", message)
}

/// Required non-empty string param.
pub fn require_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(bad_params(format!("missing {}", key))),
    }
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn optional_f64(req: &Request, key: &str) -> Option<f64> {
    req.params.get(key).and_then(|v| v.as_f64())
}

pub fn optional_i64(req: &Request, key: &str) -> Option<i64> {
    req.params.get(key).and_then(|v| v.as_i64())
}

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Resolves the caller's session token. Every mutating method goes through
/// this; read-side student lookups stay open.
pub fn require_session(state: &AppState, req: &Request) -> Result<Session, HandlerErr> {
    let token = req
        .params
        .get("sessionToken")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::new("unauthorized", "missing sessionToken"))?;
    state
        .sessions
        .get(token)
        .cloned()
        .ok_or_else(|| HandlerErr::new("unauthorized", "invalid or expired session"))
}
