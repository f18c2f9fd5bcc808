use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;
use w2e_model::{
    checkin::CHECKIN_CYCLE, CascadeMode, Category, CheckinSchedule, ReferralPolicy, RewardPolicy,
};

const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
const DEFAULT_TTL_SECS: u64 = 86_400;
const DEFAULT_BOT_API: &str = "https://api.telegram.org";
const WEBAPP_PATH: [&str; 3] = ["webapp", "mini", "index.html"];

/// Configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen: String,
    /// Public base URL of the mini app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,
    /// Path to the SQLite database. An in-memory store is used if absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// Skip identity verification and act as a fixed dev user.
    pub dev_mode: bool,
    /// Enable client-side task completion.
    pub allow_client_fallback: bool,
    /// Token required by the admin routes. Admin routes are disabled if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    /// VAST tag handed to clients.
    pub vast_tag: String,
    /// Identity verification.
    pub identity: IdentityConfig,
    /// Reward constants.
    pub rewards: RewardsConfig,
    /// Postback endpoint.
    pub postback: PostbackConfig,
    /// Channel of the follow task.
    pub channel: ChannelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            base_url: None,
            database: None,
            dev_mode: false,
            allow_client_fallback: false,
            admin_token: None,
            vast_tag: String::new(),
            identity: Default::default(),
            rewards: Default::default(),
            postback: Default::default(),
            channel: Default::default(),
        }
    }
}

impl Config {
    /// Public URL of the mini app page, under `base_url`.
    pub fn webapp_url(&self) -> eyre::Result<Option<Url>> {
        let Some(base) = &self.base_url else {
            return Ok(None);
        };
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| eyre::eyre!("`base_url` cannot be a base URL: {base}"))?
            .pop_if_empty()
            .extend(WEBAPP_PATH);
        Ok(Some(url))
    }
}

/// Identity verification config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Bot token the init data is signed with.
    pub bot_token: String,
    /// Maximum age of the init data in seconds.
    pub ttl_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

/// Reward constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    /// Reward of one task.
    pub task: Decimal,
    /// Minimum withdrawal amount.
    pub min_withdraw: Decimal,
    /// Referral bonus percentage.
    pub referral_pct: Decimal,
    /// Follow reward.
    pub follow: Decimal,
    /// Check-in schedule, truncated or zero-padded to the cycle length.
    pub checkin: Vec<Decimal>,
    /// Categories that pay a referral bonus.
    pub cascade_on: Vec<Category>,
    /// Referral cascade mode.
    pub cascade_mode: CascadeMode,
    /// Minimum ad watch time reported to clients.
    pub min_watch_secs: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        let policy = RewardPolicy::default();
        Self {
            task: policy.task_reward(),
            min_withdraw: policy.min_withdraw(),
            referral_pct: *policy.referral().pct(),
            follow: policy.follow_reward(),
            checkin: policy.checkin_schedule().amounts().to_vec(),
            cascade_on: vec![Category::TaskCredit, Category::ExternalPostback],
            cascade_mode: policy.referral().mode(),
            min_watch_secs: policy.min_watch_secs(),
        }
    }
}

impl RewardsConfig {
    /// Build the reward policy.
    pub fn to_policy(&self) -> eyre::Result<RewardPolicy> {
        if self.checkin.len() > usize::from(CHECKIN_CYCLE) {
            tracing::warn!(
                len = self.checkin.len(),
                "check-in schedule is longer than the cycle, extra days are ignored"
            );
        }
        let policy = RewardPolicy::builder()
            .task_reward(self.task)
            .checkin_schedule(CheckinSchedule::from_amounts(self.checkin.iter().copied()))
            .referral(
                ReferralPolicy::builder()
                    .pct(self.referral_pct)
                    .cascade_on(self.cascade_on.clone())
                    .mode(self.cascade_mode)
                    .build(),
            )
            .follow_reward(self.follow)
            .min_withdraw(self.min_withdraw)
            .min_watch_secs(self.min_watch_secs)
            .build();
        policy.validate()?;
        Ok(policy)
    }
}

/// Postback endpoint config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostbackConfig {
    /// Shared secret. Every postback is rejected if empty.
    pub token: String,
}

/// Channel of the follow task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Chat id, preferred over the username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Public username, without `@`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Base URL of the Bot API.
    pub api_base: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            id: None,
            username: None,
            api_base: DEFAULT_BOT_API.to_string(),
        }
    }
}

impl ChannelConfig {
    /// Chat identifier in Bot API form.
    pub fn chat_id(&self) -> Option<String> {
        match (&self.id, &self.username) {
            (Some(id), _) => Some(id.to_string()),
            (None, Some(username)) if !username.is_empty() => {
                Some(format!("@{}", username.trim_start_matches('@')))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn default_policy_matches_model_defaults() -> eyre::Result<()> {
        let policy = Config::default().rewards.to_policy()?;
        assert_eq!(policy, RewardPolicy::default());
        Ok(())
    }

    #[test]
    fn parse_toml() -> eyre::Result<()> {
        let config: Config = toml::from_str(
            r#"
            listen = "127.0.0.1:8080"
            dev_mode = true

            [rewards]
            task = "0.02"
            referral_pct = 5
            checkin = ["0.1", "0.2"]
            cascade_mode = "first_only"
            cascade_on = ["task_credit", "checkin"]

            [channel]
            username = "@w2e_news"
            "#,
        )?;
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert!(config.dev_mode);
        assert_eq!(config.identity.ttl_secs, DEFAULT_TTL_SECS);

        let policy = config.rewards.to_policy()?;
        assert_eq!(policy.task_reward(), dec!(0.02));
        assert_eq!(policy.checkin_reward(1), dec!(0.2));
        assert_eq!(policy.checkin_reward(2), dec!(0));
        assert_eq!(policy.referral().mode(), CascadeMode::FirstOnly);
        assert!(policy.referral().applies_to(Category::Checkin));
        assert!(!policy.referral().applies_to(Category::ExternalPostback));
        assert_eq!(config.channel.chat_id().as_deref(), Some("@w2e_news"));
        Ok(())
    }

    #[test]
    fn default_config_round_trips_through_toml() -> eyre::Result<()> {
        let content = toml::to_string_pretty(&Config::default())?;
        let config: Config = toml::from_str(&content)?;
        assert_eq!(config.rewards.to_policy()?, RewardPolicy::default());
        Ok(())
    }

    #[test]
    fn webapp_url_is_built_under_base_url() -> eyre::Result<()> {
        let mut config = Config::default();
        assert_eq!(config.webapp_url()?, None);

        for (base, expected) in [
            ("https://w2e.example", "https://w2e.example/webapp/mini/index.html"),
            ("https://w2e.example/app/", "https://w2e.example/app/webapp/mini/index.html"),
            ("https://w2e.example/app", "https://w2e.example/app/webapp/mini/index.html"),
        ] {
            config.base_url = Some(base.parse()?);
            assert_eq!(config.webapp_url()?.map(String::from).as_deref(), Some(expected));
        }

        config.base_url = Some("mailto:ops@w2e.example".parse()?);
        assert!(config.webapp_url().is_err());
        Ok(())
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let mut config = Config::default();
        config.rewards.referral_pct = dec!(150);
        assert!(config.rewards.to_policy().is_err());
    }
}
