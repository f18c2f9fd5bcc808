use w2e_model::ErrorKind;

/// Error type for `w2e-ledger`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Model error.
    #[error(transparent)]
    Model(#[from] w2e_model::Error),
    /// SQLite error.
    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// Lock poisoned by a panicking thread.
    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),
}

impl Error {
    /// Create "invalid argument" error.
    pub fn invalid_argument(msg: impl ToString) -> Self {
        Self::Model(w2e_model::Error::invalid_argument(msg))
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Model(err) => err.kind(),
            _ => ErrorKind::Internal,
        }
    }

    /// Returns the machine-readable tag of this error.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Model(err) => err.tag(),
            _ => "internal",
        }
    }
}

impl From<Error> for w2e_model::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Model(err) => err,
            err => Self::storage(err),
        }
    }
}
