use crate::{AccountId, Amount, WithdrawalId};

/// Error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A required argument is absent.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    /// Non-positive amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(Amount),
    /// Malformed destination address.
    #[error("invalid address for network `{0}`")]
    InvalidAddress(String),
    /// Requested amount is below the withdrawal minimum.
    #[error("amount {amount} is below the minimum {min}")]
    BelowMinimum {
        /// Requested amount.
        amount: Amount,
        /// Configured minimum.
        min: Amount,
    },
    /// Debit would make the balance negative.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: Amount,
        /// Required amount.
        required: Amount,
    },
    /// Check-in already claimed for the current day.
    #[error("already claimed today")]
    AlreadyClaimedToday,
    /// A pending withdrawal already exists for the account.
    #[error("a pending withdrawal already exists")]
    DuplicatePending,
    /// The idempotency token has already been used.
    #[error("duplicate request")]
    DuplicateRequest,
    /// The follow reward requires channel membership.
    #[error("not a member of the channel")]
    NotChannelMember,
    /// The task is unknown.
    #[error("task not found")]
    TaskNotFound,
    /// The task has already been completed.
    #[error("task is not pending")]
    TaskNotPending,
    /// The account is unknown.
    #[error("account not found")]
    AccountNotFound,
    /// The withdrawal does not exist or is not pending.
    #[error("withdrawal {0} not found or not pending")]
    NotFoundOrNotPending(WithdrawalId),
    /// Bad identity proof or shared secret.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),
    /// Transient collaborator failure.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// An account outside of the locked scope was accessed.
    #[error("account {0} is out of the unit scope")]
    OutOfScope(AccountId),
    /// Storage failure.
    #[error("storage: {0}")]
    Storage(String),
    /// Overflow.
    #[error("overflow")]
    Overflow,
}

impl Error {
    /// Create "invalid argument" error.
    pub fn invalid_argument(msg: impl ToString) -> Self {
        Self::InvalidArgument(msg.to_string())
    }

    /// Create storage error.
    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Create unavailable error.
    pub fn unavailable(msg: impl ToString) -> Self {
        Self::Unavailable(msg.to_string())
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::MissingArgument(_)
            | Self::InvalidAmount(_)
            | Self::InvalidAddress(_)
            | Self::BelowMinimum { .. } => ErrorKind::InvalidInput,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::AlreadyClaimedToday
            | Self::DuplicatePending
            | Self::DuplicateRequest
            | Self::NotChannelMember
            | Self::TaskNotPending => ErrorKind::Conflict,
            Self::TaskNotFound | Self::AccountNotFound | Self::NotFoundOrNotPending(_) => {
                ErrorKind::NotFound
            }
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::OutOfScope(_) | Self::Storage(_) | Self::Overflow => ErrorKind::Internal,
        }
    }

    /// Returns the machine-readable tag of this error.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) | Self::MissingArgument(_) => "invalid_argument",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidAddress(_) => "invalid_address",
            Self::BelowMinimum { .. } => "below_minimum",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::AlreadyClaimedToday => "already_claimed_today",
            Self::DuplicatePending => "duplicate_pending",
            Self::DuplicateRequest => "duplicate_request",
            Self::NotChannelMember => "not_member",
            Self::TaskNotFound | Self::TaskNotPending => "task_invalid",
            Self::AccountNotFound => "account_not_found",
            Self::NotFoundOrNotPending(_) => "not_found_or_not_pending",
            Self::Unauthorized(_) => "unauthorized",
            Self::Unavailable(_) => "unavailable",
            Self::OutOfScope(_) | Self::Storage(_) | Self::Overflow => "internal",
        }
    }
}

/// Coarse-grained error classification exposed to callers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input.
    InvalidInput,
    /// Bad or stale identity proof, bad shared secret.
    Unauthorized,
    /// The request conflicts with the current state.
    Conflict,
    /// Balance is not sufficient.
    InsufficientBalance,
    /// Unknown entity.
    NotFound,
    /// Transient collaborator failure, retryable by the client.
    Unavailable,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Whether the client may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}
