use std::fmt;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use w2e_model::{ExternalId, Profile};

type HmacSha256 = Hmac<Sha256>;

/// Key of the first HMAC round of the init-data signature.
const WEB_APP_DATA: &[u8] = b"WebAppData";

/// External id of the user assumed in dev mode.
pub const DEV_USER_ID: i64 = 999;

/// A verified identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Profile of the user.
    pub profile: Profile,
    /// Referral code carried by the invite link, if any.
    pub start_param: Option<String>,
}

/// Identity verification oracle.
pub trait IdentityVerifier: Send + Sync {
    /// Verify a signed payload.
    fn verify(&self, payload: &str, now: OffsetDateTime) -> w2e_model::Result<Identity>;
}

/// Verifier of signed mini-app init data.
///
/// The payload is a urlencoded list of fields signed with
/// `HMAC(HMAC("WebAppData", bot_token), data_check_string)`, where the data
/// check string is every `key=value` pair except `hash`, sorted by key and
/// joined by `\n`.
#[derive(Clone)]
pub struct InitDataVerifier {
    secret: Vec<u8>,
    ttl: Duration,
    dev_mode: bool,
}

impl fmt::Debug for InitDataVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitDataVerifier")
            .field("ttl", &self.ttl)
            .field("dev_mode", &self.dev_mode)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

fn unauthorized() -> w2e_model::Error {
    w2e_model::Error::Unauthorized("bad init data")
}

fn mac(key: &[u8]) -> w2e_model::Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|_| w2e_model::Error::invalid_argument("hmac key"))
}

impl InitDataVerifier {
    /// Create a verifier for init data signed with `bot_token`.
    pub fn new(bot_token: &str, ttl: Duration) -> w2e_model::Result<Self> {
        let mut secret = mac(WEB_APP_DATA)?;
        secret.update(bot_token.as_bytes());
        Ok(Self {
            secret: secret.finalize().into_bytes().to_vec(),
            ttl,
            dev_mode: false,
        })
    }

    /// Accept every payload as the dev user.
    pub fn dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Sign `fields` the way the platform does, returning the hex hash.
    pub fn sign<'a>(
        &self,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> w2e_model::Result<String> {
        let mut fields = fields.into_iter().collect::<Vec<_>>();
        fields.sort_unstable();
        let mut mac = mac(&self.secret)?;
        mac.update(data_check_string(fields.into_iter()).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn dev_identity() -> Identity {
        Identity {
            profile: Profile {
                external_id: ExternalId(DEV_USER_ID),
                username: Some("dev".to_string()),
                first_name: None,
            },
            start_param: None,
        }
    }
}

fn data_check_string<'a>(fields: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    fields
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl IdentityVerifier for InitDataVerifier {
    fn verify(&self, payload: &str, now: OffsetDateTime) -> w2e_model::Result<Identity> {
        if self.dev_mode {
            return Ok(Self::dev_identity());
        }
        if payload.is_empty() {
            return Err(unauthorized());
        }

        let mut fields = url::form_urlencoded::parse(payload.as_bytes())
            .into_owned()
            .collect::<Vec<_>>();
        let hash = fields
            .iter()
            .position(|(key, _)| key == "hash")
            .map(|idx| fields.swap_remove(idx).1)
            .ok_or_else(unauthorized)?;
        let hash = hex::decode(hash).map_err(|_| unauthorized())?;
        fields.sort_unstable();

        let auth_date = fields
            .iter()
            .find(|(key, _)| key == "auth_date")
            .and_then(|(_, value)| value.parse::<i64>().ok())
            .filter(|date| *date > 0)
            .ok_or_else(unauthorized)?;
        let age = now.unix_timestamp().saturating_sub(auth_date);
        if age > self.ttl.whole_seconds() {
            return Err(w2e_model::Error::Unauthorized("stale init data"));
        }

        let mut mac = mac(&self.secret)?;
        mac.update(
            data_check_string(fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))).as_bytes(),
        );
        mac.verify_slice(&hash).map_err(|_| unauthorized())?;

        let field = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let user: User = serde_json::from_str(field("user").ok_or_else(unauthorized)?)
            .map_err(|_| unauthorized())?;
        if user.id <= 0 {
            return Err(unauthorized());
        }
        Ok(Identity {
            profile: Profile {
                external_id: ExternalId(user.id),
                username: user.username,
                first_name: user.first_name,
            },
            start_param: field("start_param").map(str::to_string),
        })
    }
}
