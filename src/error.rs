use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session storage is unavailable: {0}")]
    Unavailable(String),
    #[error("session file error")]
    Io(#[from] std::io::Error),
    #[error("session file is not valid json")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: Value,
    },
    #[error("network error")]
    Network(#[from] reqwest::Error),
    #[error("invalid json in response")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Builds a status error, pulling the human-readable text out of the body.
    pub fn from_status(status: u16, body: Value) -> Self {
        let message = server_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
        Self::Status {
            status,
            message,
            body,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// The body's `error` field only; `message` is not consulted.
    pub fn error_field(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } => text_field(body, "error"),
            _ => None,
        }
    }

    /// The backend's own `error` (or `message`) text, when the failure came from the backend.
    pub fn server_message(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } => server_message(body),
            _ => None,
        }
    }
}

fn text_field(body: &Value, key: &str) -> Option<String> {
    let s = body.get(key)?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn server_message(body: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|key| text_field(body, key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_status_prefers_error_field() {
        let err = ApiError::from_status(400, json!({"error": "Email taken", "message": "x"}));
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.server_message().as_deref(), Some("Email taken"));
        assert_eq!(err.to_string(), "backend returned 400: Email taken");
    }

    #[test]
    fn from_status_falls_back_to_message_then_code() {
        let err = ApiError::from_status(401, json!({"message": "Missing Authorization Header"}));
        assert!(err.is_unauthorized());
        assert_eq!(
            err.server_message().as_deref(),
            Some("Missing Authorization Header")
        );

        assert_eq!(err.error_field(), None);

        let err = ApiError::from_status(502, Value::Null);
        assert_eq!(err.server_message(), None);
        assert_eq!(err.to_string(), "backend returned 502: HTTP 502");
    }
}
