use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The JSON message a task process sends to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: HashMap::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// The JSON reply from the orchestrator. Exactly one of `result`/`error`
/// carries meaning; `error` is serialized as `null` on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: String::new(),
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_with_params() {
        let req = Request::new("get_secret").param("key", "db_conn");
        let raw = serde_json::to_string(&req).expect("serialize");
        let back: Request = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, req);
    }

    #[test]
    fn request_params_default_to_empty() {
        let back: Request = serde_json::from_str("{\"method\":\"ping\"}").expect("deserialize");
        assert!(back.params.is_empty());
    }

    #[test]
    fn ok_response_serializes_null_error() {
        let raw = serde_json::to_string(&Response::ok("Server=X")).expect("serialize");
        assert_eq!(raw, "{\"result\":\"Server=X\",\"error\":null}");
    }

    #[test]
    fn error_response_carries_message() {
        let raw = serde_json::to_string(&Response::err("unknown method: nope")).expect("serialize");
        assert_eq!(raw, "{\"result\":\"\",\"error\":\"unknown method: nope\"}");
    }
}
