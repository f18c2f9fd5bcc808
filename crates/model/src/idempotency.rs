use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AccountId;

const MAX_TOKEN_LEN: usize = 128;

/// Endpoint that consumed an idempotency token.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Ad-network postback.
    Postback,
    /// Check-in claim.
    Checkin,
    /// Follow reward claim.
    Follow,
    /// Client task completion.
    TaskComplete,
    /// Withdrawal request.
    Withdraw,
}

/// A unique event token, namespaced by endpoint.
///
/// Keys built from client tokens must be narrowed with
/// [`for_account`](Self::for_account) before they are claimed, so that two
/// users sending the same token do not collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    endpoint: Endpoint,
    value: String,
    token: String,
}

impl IdempotencyKey {
    /// Create a key from a caller-supplied token.
    pub fn new(endpoint: Endpoint, token: &str) -> crate::Result<Self> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_TOKEN_LEN {
            return Err(crate::Error::invalid_argument("idempotency token"));
        }
        Ok(Self {
            endpoint,
            value: token.to_string(),
            token: format!("{endpoint}:{token}"),
        })
    }

    /// Narrow the key to one account: `<endpoint>:account-<id>:<token>`.
    pub fn for_account(&self, account: AccountId) -> Self {
        Self {
            endpoint: self.endpoint,
            value: self.value.clone(),
            token: format!("{}:account-{account}:{}", self.endpoint, self.value),
        }
    }

    /// The one-time key of the follow reward of an account.
    pub fn follow(account: AccountId) -> Self {
        Self {
            endpoint: Endpoint::Follow,
            value: String::new(),
            token: format!("{}:account-{account}", Endpoint::Follow),
        }
    }

    /// Get the endpoint.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Get the unique token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// A consumed idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Unique token.
    pub token: String,
    /// Endpoint.
    pub endpoint: Endpoint,
    /// First-seen time.
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
}

impl IdempotencyRecord {
    /// Create a record for the given key.
    pub fn new(key: &IdempotencyKey, first_seen: OffsetDateTime) -> Self {
        Self {
            token: key.token.clone(),
            endpoint: key.endpoint,
            first_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_namespaced() -> crate::Result<()> {
        let a = IdempotencyKey::new(Endpoint::Postback, "abc")?;
        let b = IdempotencyKey::new(Endpoint::Checkin, "abc")?;
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token(), "postback:abc");
        assert!(IdempotencyKey::new(Endpoint::Withdraw, "  ").is_err());
        assert!(IdempotencyKey::new(Endpoint::Withdraw, &"x".repeat(200)).is_err());
        Ok(())
    }

    #[test]
    fn account_keys_do_not_collide() -> crate::Result<()> {
        let key = IdempotencyKey::new(Endpoint::Checkin, "req-1")?;
        let a = key.for_account(AccountId(1));
        let b = key.for_account(AccountId(2));
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token(), "checkin:account-1:req-1");
        assert_eq!(a, key.for_account(AccountId(1)));
        assert_ne!(a.token(), IdempotencyKey::follow(AccountId(1)).token());
        Ok(())
    }
}
