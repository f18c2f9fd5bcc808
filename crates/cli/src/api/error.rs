use poem::{error::ResponseError, http::StatusCode, Body, Response};
use serde_json::json;
use w2e_model::ErrorKind;

/// Error returned by the HTTP handlers.
///
/// Rendered as `{"ok": false, "error": <tag>, "message": <text>}`. Internal
/// failures never expose their message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Ledger error.
    #[error(transparent)]
    Ledger(#[from] w2e_ledger::Error),
    /// The route is disabled by configuration.
    #[error("disabled_in_prod")]
    Disabled,
    /// A blocking task panicked or was cancelled.
    #[error("worker: {0}")]
    Worker(String),
}

impl From<w2e_model::Error> for ApiError {
    fn from(err: w2e_model::Error) -> Self {
        Self::Ledger(err.into())
    }
}

impl ApiError {
    /// Kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(err) => err.kind(),
            Self::Disabled => ErrorKind::NotFound,
            Self::Worker(_) => ErrorKind::Internal,
        }
    }

    /// Machine-readable tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Ledger(err) => err.tag(),
            Self::Disabled => "disabled_in_prod",
            Self::Worker(_) => "internal",
        }
    }
}

/// HTTP status of an error kind.
pub fn status_of(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput | ErrorKind::InsufficientBalance => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ApiError {
    fn status(&self) -> StatusCode {
        status_of(self.kind())
    }

    fn as_response(&self) -> Response {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::Internal => {
                tracing::error!(%self, "internal error");
                "internal error".to_string()
            }
            _ => self.to_string(),
        };
        let body = json!({
            "ok": false,
            "error": self.tag(),
            "message": message,
        });
        Response::builder()
            .status(status_of(kind))
            .content_type("application/json")
            .body(Body::from_json(body).unwrap_or_else(|_| Body::empty()))
    }
}
