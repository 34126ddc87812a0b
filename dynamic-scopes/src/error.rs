use crate::source::ConfigId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    // Record errors
    #[error("invalid scope configuration: {0}")]
    InvalidConfiguration(String),

    // Query errors
    #[error("scope is not configured")]
    NotConfigured,

    // Registry bookkeeping errors
    #[error("configuration {0} is already registered")]
    DuplicateConfig(ConfigId),
    #[error("no scope registered for configuration {0}")]
    UnknownConfig(ConfigId),

    // Host errors
    #[error("authorization server rejected registration: {0}")]
    Registration(String),
    #[error("manifest error: {0}")]
    Manifest(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Manifest(e.to_string())
    }
}

// axum IntoResponse implementation
#[cfg(feature = "axum")]
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::Json;
        use axum::http::StatusCode;

        let status = match self {
            Error::InvalidConfiguration(_) | Error::Manifest(_) => StatusCode::BAD_REQUEST,
            Error::NotConfigured | Error::UnknownConfig(_) => StatusCode::NOT_FOUND,
            Error::DuplicateConfig(_) => StatusCode::CONFLICT,
            Error::Registration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
