use serde::{Deserialize, Serialize};

use crate::error::LadderError;

/// Response envelope shared by every route: `{ success, data?, message, error? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: message.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            error: Some(error.into()),
        }
    }

    /// Wrap an engine result; errors carry their kind in `error` and text in `message`.
    pub fn from_result(result: crate::Result<T>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(data, message),
            Err(e) => Self::from(e),
        }
    }
}

impl<T> From<LadderError> for ApiResponse<T> {
    fn from(e: LadderError) -> Self {
        Self::failure(e.kind(), e.to_string())
    }
}
