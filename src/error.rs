use axum::http::StatusCode;
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("user id must not be empty")]
    EmptyUser,

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("text exceeds maximum length")]
    TextTooLong,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage io error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Storage(_) | Self::Encoding(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl axum::response::IntoResponse for MemoryError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
