use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body the dashboard backend returns on a rejected request, e.g.
/// `{"status":403,"error":"Forbidden","message":"kit not assigned"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}", self.describe())]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
            status: None,
        }
    }

    pub fn with_reason(mut self, status: u16, error: impl Into<String>) -> Self {
        self.status = Some(status);
        self.error = Some(error.into());
        self
    }

    /// Parses a response body, returning `None` when it does not have the expected shape.
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    fn describe(&self) -> String {
        match &self.error {
            Some(error) => format!("{error}: {}", self.message),
            None => self.message.clone(),
        }
    }
}
