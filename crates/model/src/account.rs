use std::{fmt, str::FromStr};

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::Amount;

/// Alphabet of generated codes and tokens; visually ambiguous characters are excluded.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Length of generated codes and tokens.
pub const CODE_LEN: usize = 8;

/// Minimum length of a referral code accepted from an invite link.
pub const MIN_REFERRAL_CODE_LEN: usize = 5;

const MAX_REFERRAL_CODE_LEN: usize = 32;

/// Generate a random code from [`CODE_ALPHABET`].
pub fn random_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0, CODE_ALPHABET.len())] as char)
        .collect()
}

/// Internal account id assigned by the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// External user id (the messaging platform's user id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub i64);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExternalId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<i64>() {
            Ok(id) if id > 0 => Ok(Self(id)),
            _ => Err(crate::Error::invalid_argument("external id")),
        }
    }
}

/// Unique referral code of an account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Generate a new random code.
    ///
    /// Uniqueness must be checked by the store.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(random_code(rng))
    }

    /// Parse a code taken from an invite link.
    ///
    /// Returns `None` for codes that cannot belong to any account.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        let valid = (MIN_REFERRAL_CODE_LEN..=MAX_REFERRAL_CODE_LEN).contains(&code.len())
            && code.bytes().all(|b| b.is_ascii_alphanumeric());
        valid.then(|| Self(code.to_string()))
    }

    /// Get the code as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display fields reported by the identity oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// External user id.
    pub external_id: ExternalId,
    /// Username.
    #[serde(default)]
    pub username: Option<String>,
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
}

impl Profile {
    /// Create a profile without display fields.
    pub fn bare(external_id: ExternalId) -> Self {
        Self {
            external_id,
            username: None,
            first_name: None,
        }
    }
}

/// Account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: AccountId,
    /// External user id.
    pub external_id: ExternalId,
    /// Username.
    pub username: Option<String>,
    /// First name.
    pub first_name: Option<String>,
    /// Referral code of this account.
    pub referral_code: ReferralCode,
    /// Referral code of the inviting account.
    pub referred_by: Option<ReferralCode>,
    /// Current balance, never negative.
    pub balance: Amount,
    /// Total credited amount, never decreases.
    pub lifetime_earned: Amount,
    /// Number of completed tasks.
    pub total_tasks: u64,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Account {
    /// Create a new account with zero balance.
    pub fn new(
        id: AccountId,
        profile: &Profile,
        referral_code: ReferralCode,
        referred_by: Option<ReferralCode>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            external_id: profile.external_id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            referral_code,
            referred_by,
            balance: Amount::ZERO,
            lifetime_earned: Amount::ZERO,
            total_tasks: 0,
            created_at,
        }
    }

    /// Refresh display fields. Referral linkage is left untouched.
    pub fn refresh_profile(&mut self, profile: &Profile) -> bool {
        let changed =
            self.username != profile.username || self.first_name != profile.first_name;
        self.username.clone_from(&profile.username);
        self.first_name.clone_from(&profile.first_name);
        changed
    }

    /// Apply a credit to balance and lifetime earnings.
    pub fn apply_credit(&mut self, amount: &Amount) -> crate::Result<()> {
        if !amount.is_sign_positive() || amount.is_zero() {
            return Err(crate::Error::InvalidAmount(*amount));
        }
        let balance = self
            .balance
            .checked_add(*amount)
            .ok_or(crate::Error::Overflow)?;
        let lifetime_earned = self
            .lifetime_earned
            .checked_add(*amount)
            .ok_or(crate::Error::Overflow)?;
        self.balance = balance;
        self.lifetime_earned = lifetime_earned;
        Ok(())
    }

    /// Apply a debit to balance.
    pub fn apply_debit(&mut self, amount: &Amount) -> crate::Result<()> {
        if !amount.is_sign_positive() || amount.is_zero() {
            return Err(crate::Error::InvalidAmount(*amount));
        }
        if self.balance < *amount {
            return Err(crate::Error::InsufficientBalance {
                balance: self.balance,
                required: *amount,
            });
        }
        self.balance -= *amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn account() -> Account {
        Account::new(
            AccountId(1),
            &Profile::bare(ExternalId(42)),
            ReferralCode::parse("ABCDE234").unwrap(),
            None,
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn credit_and_debit() -> crate::Result<()> {
        let mut account = account();
        account.apply_credit(&dec!(1.5))?;
        account.apply_debit(&dec!(0.5))?;
        assert_eq!(account.balance, dec!(1.0));
        assert_eq!(account.lifetime_earned, dec!(1.5));
        Ok(())
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut account = account();
        assert!(matches!(
            account.apply_credit(&dec!(0)),
            Err(crate::Error::InvalidAmount(_))
        ));
        assert!(matches!(
            account.apply_credit(&dec!(-1)),
            Err(crate::Error::InvalidAmount(_))
        ));
        assert!(matches!(
            account.apply_debit(&dec!(0)),
            Err(crate::Error::InvalidAmount(_))
        ));
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut account = account();
        let err = account.apply_debit(&dec!(0.01)).unwrap_err();
        assert!(matches!(err, crate::Error::InsufficientBalance { .. }));
        assert_eq!(account.balance, dec!(0));
    }

    #[test]
    fn referral_code_parsing() {
        assert!(ReferralCode::parse("AB12").is_none());
        assert!(ReferralCode::parse("AB 12C").is_none());
        assert_eq!(
            ReferralCode::parse(" XYZ234 ").map(|c| c.to_string()),
            Some("XYZ234".to_string())
        );
        let mut rng = rand::thread_rng();
        let code = ReferralCode::generate(&mut rng);
        assert_eq!(code.as_str().len(), CODE_LEN);
        assert!(ReferralCode::parse(code.as_str()).is_some());
    }
}
