use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AccountId, Amount};

/// Default withdrawal network.
pub const DEFAULT_NETWORK: &str = "BSC";

const EVM_NETWORKS: &[&str] = &["BSC", "BEP20", "ETH", "ERC20", "POLYGON", "ARBITRUM", "BASE"];

const EVM_ADDRESS_BYTES: usize = 20;

/// Withdrawal id assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(pub u64);

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Settlement network tag, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Network(String);

impl Network {
    /// Create a network tag.
    pub fn new(tag: &str) -> crate::Result<Self> {
        let tag = tag.trim();
        if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(crate::Error::invalid_argument("network"));
        }
        Ok(Self(tag.to_ascii_uppercase()))
    }

    /// Whether addresses on this network are EVM addresses.
    pub fn is_evm(&self) -> bool {
        EVM_NETWORKS.contains(&self.0.as_str())
    }

    /// Validate and normalize a destination address for this network.
    pub fn validate_address(&self, address: &str) -> crate::Result<String> {
        let address = address.trim();
        let valid = if self.is_evm() {
            address
                .strip_prefix("0x")
                .filter(|hex| hex.len() == EVM_ADDRESS_BYTES * 2)
                .map(|hex| hex::decode(hex).is_ok())
                .unwrap_or(false)
        } else {
            !address.is_empty() && !address.chars().any(char::is_whitespace)
        };
        if valid {
            Ok(address.to_string())
        } else {
            Err(crate::Error::InvalidAddress(self.0.clone()))
        }
    }

    /// Get the tag as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Network {
    fn default() -> Self {
        Self(DEFAULT_NETWORK.to_string())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Withdrawal status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::EnumString,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Debited, waiting for settlement.
    Pending,
    /// Settled by an operator.
    Processed,
}

/// A withdrawal request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    /// Withdrawal id.
    pub id: WithdrawalId,
    /// Owning account.
    pub account: AccountId,
    /// Debited amount.
    pub amount: Amount,
    /// Destination address.
    pub address: String,
    /// Network.
    pub network: Network,
    /// Status.
    pub status: WithdrawalStatus,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Settlement time.
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    /// Settlement reference, e.g. a transaction hash.
    pub settlement_ref: Option<String>,
}

impl WithdrawalRequest {
    /// Whether the request is pending.
    pub fn is_pending(&self) -> bool {
        self.status == WithdrawalStatus::Pending
    }

    /// Transition `pending -> processed`.
    pub fn mark_processed(
        &mut self,
        settlement_ref: String,
        now: OffsetDateTime,
    ) -> crate::Result<()> {
        if !self.is_pending() {
            return Err(crate::Error::NotFoundOrNotPending(self.id));
        }
        self.status = WithdrawalStatus::Processed;
        self.processed_at = Some(now);
        self.settlement_ref = Some(settlement_ref);
        Ok(())
    }
}

/// A withdrawal request to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWithdrawal {
    /// Owning account.
    pub account: AccountId,
    /// Debited amount.
    pub amount: Amount,
    /// Destination address.
    pub address: String,
    /// Network.
    pub network: Network,
}

impl NewWithdrawal {
    /// Assign id and timestamp.
    pub fn into_request(self, id: WithdrawalId, created_at: OffsetDateTime) -> WithdrawalRequest {
        WithdrawalRequest {
            id,
            account: self.account,
            amount: self.amount,
            address: self.address,
            network: self.network,
            status: WithdrawalStatus::Pending,
            created_at,
            processed_at: None,
            settlement_ref: None,
        }
    }
}
