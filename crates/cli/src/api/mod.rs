/// Error type of the handlers.
pub mod error;

mod admin;
mod postback;
mod user;

use std::sync::Arc;

use poem::{
    get, http::HeaderMap, listener::TcpListener, middleware::Tracing, post, Endpoint, EndpointExt,
    Route, Server,
};
use w2e_ledger::{Engine, SharedSecret};
use w2e_model::{Account, Clock, Endpoint as TokenEndpoint, IdempotencyKey};

use crate::{
    identity::{Identity, IdentityVerifier},
    membership::MembershipOracle,
};

pub use error::ApiError;

/// Header carrying a client-chosen idempotency token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Header carrying the operator token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Settings of the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct ApiSettings {
    /// Enable client-side task completion.
    pub allow_client_fallback: bool,
    /// VAST tag handed to clients.
    pub vast_tag: String,
    /// Public URL of the mini app page.
    pub webapp_url: Option<url::Url>,
}

/// Shared state of the HTTP API.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
    identity: Arc<dyn IdentityVerifier>,
    membership: Arc<dyn MembershipOracle>,
    clock: Arc<dyn Clock>,
    admin_token: Arc<SharedSecret>,
    settings: Arc<ApiSettings>,
}

impl AppState {
    /// Create the state.
    ///
    /// `clock` must be the clock the engine was built with.
    pub fn new(
        engine: Arc<Engine>,
        identity: Arc<dyn IdentityVerifier>,
        membership: Arc<dyn MembershipOracle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            identity,
            membership,
            clock,
            admin_token: Arc::new(SharedSecret::new("")),
            settings: Default::default(),
        }
    }

    /// Set the operator token. Admin routes reject every request without it.
    pub fn admin_token(mut self, token: Option<&str>) -> Self {
        self.admin_token = Arc::new(SharedSecret::new(token.unwrap_or_default()));
        self
    }

    /// Set the API settings.
    pub fn settings(mut self, settings: ApiSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    /// Run `f` against the engine on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Engine) -> w2e_ledger::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|err| ApiError::Worker(err.to_string()))?
            .map_err(ApiError::from)
    }

    /// Verify the init data and resolve the caller's account.
    async fn authenticate(&self, init_data: &str) -> Result<(Identity, Account), ApiError> {
        let identity = self.identity.verify(init_data, self.clock.now())?;
        let account = {
            let identity = identity.clone();
            self.blocking(move |engine| {
                engine.get_or_create(&identity.profile, identity.start_param.as_deref())
            })
            .await?
        };
        Ok((identity, account))
    }

    fn check_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        self.admin_token.verify(presented)?;
        Ok(())
    }
}

/// Read the idempotency token of a request, if any.
fn idempotency_key(
    headers: &HeaderMap,
    endpoint: TokenEndpoint,
) -> Result<Option<IdempotencyKey>, ApiError> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| -> Result<IdempotencyKey, ApiError> {
            let token = value
                .to_str()
                .map_err(|_| w2e_model::Error::invalid_argument("idempotency key"))?;
            Ok(IdempotencyKey::new(endpoint, token)?)
        })
        .transpose()
}

#[poem::handler]
fn health() -> &'static str {
    "OK"
}

/// Build the HTTP application.
pub fn app(state: AppState) -> impl Endpoint {
    Route::new()
        .at("/health", get(health))
        .at("/api/config", post(user::config))
        .at("/api/checkin/status", post(user::checkin_status))
        .at("/api/checkin/claim", post(user::checkin_claim))
        .at("/api/task/start", post(user::task_start))
        .at("/api/task/complete", post(user::task_complete))
        .at("/api/follow/claim", post(user::follow_claim))
        .at("/api/withdraw", post(user::withdraw))
        .at("/api/referral", post(user::referral))
        .at("/postback/monetag", get(postback::monetag))
        .at("/admin/withdrawals/pending", get(admin::pending))
        .at("/admin/withdrawals/:id/processed", post(admin::mark_processed))
        .data(state)
        .with(Tracing)
}

/// Serve the application until the listener fails.
pub async fn serve(listen: &str, state: AppState) -> eyre::Result<()> {
    tracing::info!(%listen, "serving");
    Server::new(TcpListener::bind(listen.to_string())).run(app(state)).await?;
    Ok(())
}
