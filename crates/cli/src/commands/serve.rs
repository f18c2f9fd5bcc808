use std::sync::Arc;

use time::Duration;
use w2e_model::{Clock, SystemClock};

use crate::{
    api::{self, ApiSettings, AppState},
    identity::InitDataVerifier,
    membership::{MembershipOracle, StaticMembership, TelegramMembership},
};

use super::{Command, Context};

/// Run the HTTP service.
#[derive(Debug, clap::Args)]
pub struct Serve {
    /// Override the listen address.
    #[arg(long, short)]
    listen: Option<String>,
}

impl Command for Serve {
    async fn execute(&self, ctx: Context<'_>) -> eyre::Result<()> {
        let config = ctx.config();
        if config.dev_mode {
            tracing::warn!("dev mode: init data is not verified");
        } else if config.identity.bot_token.is_empty() {
            eyre::bail!("`identity.bot_token` is required unless `dev_mode` is set");
        }
        if config.postback.token.is_empty() {
            tracing::warn!("`postback.token` is empty, every postback will be rejected");
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let engine = Arc::new(ctx.engine(clock.clone())?);
        let ttl = Duration::seconds(i64::try_from(config.identity.ttl_secs)?);
        let identity =
            InitDataVerifier::new(&config.identity.bot_token, ttl)?.dev_mode(config.dev_mode);
        let membership: Arc<dyn MembershipOracle> =
            match TelegramMembership::from_config(&config.identity.bot_token, &config.channel)? {
                Some(oracle) => Arc::new(oracle),
                None => {
                    tracing::warn!("no channel configured, follow rewards are unavailable");
                    Arc::new(StaticMembership::unavailable())
                }
            };

        let state = AppState::new(engine, Arc::new(identity), membership, clock)
            .admin_token(config.admin_token.as_deref())
            .settings(ApiSettings {
                allow_client_fallback: config.allow_client_fallback,
                vast_tag: config.vast_tag.clone(),
                webapp_url: config.webapp_url()?,
            });
        let listen = self.listen.as_deref().unwrap_or(&config.listen);
        api::serve(listen, state).await
    }
}
