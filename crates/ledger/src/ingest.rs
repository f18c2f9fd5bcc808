use std::{collections::BTreeMap, fmt, str::FromStr};

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use w2e_model::{Amount, ExternalId};

type HmacSha256 = Hmac<Sha256>;

/// Query parameters of an ad-network postback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostbackQuery {
    /// Shared secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Unique event id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reqid: Option<String>,
    /// External user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_id: Option<String>,
    /// Estimated payout of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<String>,
    /// Paid flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<String>,
    /// Paid flag, alternative name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_event_type: Option<String>,
    /// Any other parameter, kept for the audit trail.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A validated postback.
#[derive(Debug, Clone, PartialEq)]
pub struct PostbackEvent {
    /// Unique event id.
    pub event_id: String,
    /// External user id.
    pub external_id: ExternalId,
    /// Reported amount, zero if absent or malformed.
    pub amount: Amount,
    /// Whether the event is billable.
    pub paid: bool,
    /// The raw query without the secret.
    pub raw: Value,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_truthy(flag: &str) -> bool {
    matches!(flag.to_ascii_lowercase().as_str(), "1" | "yes" | "true")
}

fn digits_at(bytes: &[u8], from: usize) -> usize {
    bytes
        .get(from..)
        .map_or(0, |rest| rest.iter().take_while(|b| b.is_ascii_digit()).count())
}

/// Integer at the start of `s`. Trailing characters are ignored.
fn leading_integer(s: &str) -> Option<i64> {
    let sign = usize::from(s.starts_with(['+', '-']));
    let end = sign + digits_at(s.as_bytes(), sign);
    if end == sign {
        return None;
    }
    s[..end].parse().ok()
}

/// Decimal number at the start of `s`, in plain or exponent form.
/// Trailing characters are ignored.
fn leading_decimal(s: &str) -> Option<Decimal> {
    let bytes = s.as_bytes();
    let sign = usize::from(s.starts_with(['+', '-']));
    let int_len = digits_at(bytes, sign);
    let mut end = sign + int_len;
    let mut frac = "";
    if bytes.get(end) == Some(&b'.') {
        let frac_len = digits_at(bytes, end + 1);
        frac = &s[end + 1..end + 1 + frac_len];
        end += 1 + frac_len;
    }
    if int_len == 0 && frac.is_empty() {
        return None;
    }
    let int = match &s[sign..sign + int_len] {
        "" => "0",
        int => int,
    };
    let mantissa = format!(
        "{}{int}.{}",
        &s[..sign],
        if frac.is_empty() { "0" } else { frac }
    );
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let exp_sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_len = digits_at(bytes, end + 1 + exp_sign);
        if exp_len > 0 {
            let exp = &s[end + 1..end + 1 + exp_sign + exp_len];
            return Decimal::from_scientific(&format!("{mantissa}e{exp}")).ok();
        }
    }
    Decimal::from_str(&mantissa).ok()
}

impl PostbackQuery {
    /// Validate and normalize the query.
    ///
    /// Numbers are read from the start of their value, so `42abc` is user
    /// `42` and `1e-3` is `0.001`. Returns
    /// [`MissingArgument`](w2e_model::Error::MissingArgument) if the event id
    /// is absent or the user id is absent, zero or not a number, and
    /// [`InvalidArgument`](w2e_model::Error::InvalidArgument) for a negative
    /// user id.
    pub fn into_event(self) -> crate::Result<PostbackEvent> {
        let event_id = non_empty(self.reqid.as_deref())
            .ok_or(w2e_model::Error::MissingArgument("reqid"))?;
        let external_id = match non_empty(self.telegram_id.as_deref()).and_then(leading_integer) {
            None | Some(0) => return Err(w2e_model::Error::MissingArgument("telegram_id").into()),
            Some(id) if id < 0 => return Err(crate::Error::invalid_argument("telegram_id")),
            Some(id) => ExternalId(id),
        };
        let amount = non_empty(self.estimated_price.as_deref())
            .and_then(leading_decimal)
            .filter(|amount| amount.is_sign_positive())
            .unwrap_or_default();
        let paid = non_empty(self.is_paid.as_deref())
            .or(non_empty(self.reward_event_type.as_deref()))
            .map(is_truthy)
            .unwrap_or(false);
        let event_id = event_id.to_string();
        let raw = serde_json::to_value(PostbackQuery {
            token: None,
            ..self
        })?;
        Ok(PostbackEvent {
            event_id,
            external_id,
            amount,
            paid,
            raw,
        })
    }
}

/// A shared secret presented as a plain token, e.g. by the postback
/// endpoint or by operators.
#[derive(Clone)]
pub struct SharedSecret(String);

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedSecret").field(&"***").finish()
    }
}

impl SharedSecret {
    /// Create a secret. An empty secret rejects every token.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    fn mac(&self, msg: &[u8]) -> crate::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.0.as_bytes())
            .map_err(|_| crate::Error::invalid_argument("shared secret"))?;
        mac.update(msg);
        Ok(mac)
    }

    /// Check a presented token in constant time.
    pub fn verify(&self, presented: Option<&str>) -> crate::Result<()> {
        let unauthorized = || crate::Error::Model(w2e_model::Error::Unauthorized("bad token"));
        let presented = presented.ok_or_else(unauthorized)?;
        if self.0.is_empty() {
            return Err(unauthorized());
        }
        let expected = self.mac(self.0.as_bytes())?.finalize().into_bytes();
        self.mac(presented.as_bytes())?
            .verify_slice(&expected)
            .map_err(|_| unauthorized())
    }
}
