use std::{collections::HashSet, fmt, sync::Arc};

use futures_util::{future::BoxFuture, FutureExt};
use serde::Deserialize;
use url::Url;
use w2e_model::ExternalId;

use crate::config::ChannelConfig;

/// Statuses that count as channel membership.
const MEMBER_STATUSES: [&str; 4] = ["member", "administrator", "creator", "restricted"];

/// Channel-membership oracle.
///
/// A transport or API failure is reported as
/// [`Unavailable`](w2e_model::Error::Unavailable), never as "not a member".
pub trait MembershipOracle: Send + Sync {
    /// Whether `user` is a member of the configured channel.
    fn is_member(&self, user: ExternalId) -> BoxFuture<'_, w2e_model::Result<bool>>;
}

impl<T: MembershipOracle + ?Sized> MembershipOracle for Arc<T> {
    fn is_member(&self, user: ExternalId) -> BoxFuture<'_, w2e_model::Result<bool>> {
        (**self).is_member(user)
    }
}

/// Oracle backed by the Bot API `getChatMember` method.
#[derive(Clone)]
pub struct TelegramMembership {
    endpoint: Url,
    chat_id: String,
    client: reqwest::Client,
}

impl fmt::Debug for TelegramMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramMembership")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<ChatMember>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

impl TelegramMembership {
    /// Create from config. Returns `None` if no channel is configured.
    pub fn from_config(bot_token: &str, config: &ChannelConfig) -> eyre::Result<Option<Self>> {
        let Some(chat_id) = config.chat_id() else {
            return Ok(None);
        };
        let mut endpoint = Url::parse(&config.api_base)?;
        endpoint
            .path_segments_mut()
            .map_err(|_| eyre::eyre!("invalid Bot API base: {}", config.api_base))?
            .pop_if_empty()
            .push(&format!("bot{bot_token}"))
            .push("getChatMember");
        Ok(Some(Self {
            endpoint,
            chat_id,
            client: reqwest::Client::new(),
        }))
    }

    async fn fetch(&self, user: ExternalId) -> w2e_model::Result<bool> {
        let unavailable = |err: reqwest::Error| w2e_model::Error::unavailable(err.without_url());
        let response: ApiResponse = self
            .client
            .get(self.endpoint.clone())
            .query(&[("chat_id", self.chat_id.clone()), ("user_id", user.to_string())])
            .send()
            .await
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;
        if !response.ok {
            return Err(w2e_model::Error::unavailable(
                response
                    .description
                    .unwrap_or_else(|| "getChatMember failed".to_string()),
            ));
        }
        let status = response
            .result
            .map(|member| member.status)
            .unwrap_or_default();
        Ok(MEMBER_STATUSES.contains(&status.as_str()))
    }
}

impl MembershipOracle for TelegramMembership {
    fn is_member(&self, user: ExternalId) -> BoxFuture<'_, w2e_model::Result<bool>> {
        self.fetch(user).boxed()
    }
}

/// Oracle with a fixed answer, used when no channel is configured and in
/// tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    members: HashSet<ExternalId>,
    unavailable: bool,
}

impl StaticMembership {
    /// Create an oracle that knows the given members.
    pub fn new(members: impl IntoIterator<Item = ExternalId>) -> Self {
        Self {
            members: members.into_iter().collect(),
            unavailable: false,
        }
    }

    /// Create an oracle that always fails.
    pub fn unavailable() -> Self {
        Self {
            members: HashSet::new(),
            unavailable: true,
        }
    }
}

impl MembershipOracle for StaticMembership {
    fn is_member(&self, user: ExternalId) -> BoxFuture<'_, w2e_model::Result<bool>> {
        let res = if self.unavailable {
            Err(w2e_model::Error::unavailable("membership oracle is down"))
        } else {
            Ok(self.members.contains(&user))
        };
        futures_util::future::ready(res).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_and_chat_id() -> eyre::Result<()> {
        let config = ChannelConfig {
            id: None,
            username: Some("w2e_news".to_string()),
            ..Default::default()
        };
        let oracle = TelegramMembership::from_config("1:abc", &config)?.expect("configured");
        assert_eq!(oracle.chat_id, "@w2e_news");
        assert_eq!(
            oracle.endpoint.as_str(),
            "https://api.telegram.org/bot1:abc/getChatMember"
        );
        assert!(TelegramMembership::from_config("1:abc", &ChannelConfig::default())?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn static_oracle() {
        let oracle = StaticMembership::new([ExternalId(1)]);
        assert!(oracle.is_member(ExternalId(1)).await.expect("available"));
        assert!(!oracle.is_member(ExternalId(2)).await.expect("available"));
        let err = StaticMembership::unavailable()
            .is_member(ExternalId(1))
            .await
            .unwrap_err();
        assert!(err.kind().is_retryable());
    }
}
