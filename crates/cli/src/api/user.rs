use poem::{
    handler,
    http::HeaderMap,
    web::{Data, Json},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use w2e_model::{
    action::withdrawal::WithdrawalParams, Endpoint as TokenEndpoint, Network, TaskToken,
};

use super::{idempotency_key, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub(super) struct AuthRequest {
    #[serde(rename = "initData", alias = "init_data", default)]
    init_data: String,
}

#[derive(Debug, Deserialize)]
struct TaskCompleteRequest {
    #[serde(rename = "initData", alias = "init_data", default)]
    init_data: String,
    task_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WithdrawRequest {
    #[serde(rename = "initData", alias = "init_data", default)]
    init_data: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    amount: Option<Decimal>,
}

#[handler]
pub(super) async fn config(
    Data(state): Data<&AppState>,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let policy = state.engine.policy();
    Ok(Json(json!({
        "ok": true,
        "vastTag": state.settings.vast_tag,
        "webapp_url": state.settings.webapp_url,
        "reward": policy.task_reward(),
        "min_withdraw": policy.min_withdraw(),
        "ref_bonus_pct": policy.referral().pct(),
        "follow_reward": policy.follow_reward(),
        "checkin_amounts": policy.checkin_schedule().amounts(),
        "min_watch_sec": policy.min_watch_secs(),
        "balance": account.balance,
        "total_tasks": account.total_tasks,
        "referral_code": account.referral_code,
    })))
}

#[handler]
pub(super) async fn checkin_status(
    Data(state): Data<&AppState>,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let id = account.id;
    let status = state
        .blocking(move |engine| engine.checkin_status(id))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "streak": status.streak,
        "last_claim": status.last_claim,
        "can_claim": status.can_claim,
        "next_amount": status.next_amount,
    })))
}

#[handler]
pub(super) async fn checkin_claim(
    Data(state): Data<&AppState>,
    headers: &HeaderMap,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let key = idempotency_key(headers, TokenEndpoint::Checkin)?;
    let id = account.id;
    let report = state
        .blocking(move |engine| engine.claim_checkin(id, key.as_ref()))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "balance_delta": report.amount(),
        "streak": report.streak(),
        "next_amount": report.next_amount(),
        "balance": report.balance(),
    })))
}

#[handler]
pub(super) async fn task_start(
    Data(state): Data<&AppState>,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let id = account.id;
    let task = state.blocking(move |engine| engine.start_task(id)).await?;
    Ok(Json(json!({
        "ok": true,
        "task_id": task.token,
        "amount": task.amount,
        "min_watch_sec": state.engine.policy().min_watch_secs(),
    })))
}

/// Client-side task completion, only routed when explicitly enabled.
///
/// The body is parsed after the switch so that a disabled route answers 404
/// whatever the payload.
#[handler]
pub(super) async fn task_complete(
    Data(state): Data<&AppState>,
    headers: &HeaderMap,
    body: String,
) -> poem::Result<Json<Value>> {
    if !state.settings.allow_client_fallback {
        return Err(ApiError::Disabled.into());
    }
    let req: TaskCompleteRequest = serde_json::from_str(&body)
        .map_err(|err| ApiError::from(w2e_model::Error::invalid_argument(err)))?;
    let (_, account) = state.authenticate(&req.init_data).await?;
    let key = idempotency_key(headers, TokenEndpoint::TaskComplete)?;
    let id = account.id;
    let token = TaskToken::from(req.task_id);
    let report = state
        .blocking(move |engine| engine.complete_task(id, token, key.as_ref()))
        .await?;
    let account = report.reward().account();
    Ok(Json(json!({
        "ok": true,
        "balance_delta": report.reward().amount(),
        "balance": account.balance,
        "total_tasks": account.total_tasks,
    })))
}

#[handler]
pub(super) async fn follow_claim(
    Data(state): Data<&AppState>,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (identity, account) = state.authenticate(&req.init_data).await?;
    let is_member = state
        .membership
        .is_member(identity.profile.external_id)
        .await
        .map_err(ApiError::from)?;
    let id = account.id;
    let report = state
        .blocking(move |engine| engine.claim_follow(id, is_member))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "balance_delta": report.amount(),
        "balance": report.account().balance,
    })))
}

#[handler]
pub(super) async fn withdraw(
    Data(state): Data<&AppState>,
    headers: &HeaderMap,
    Json(req): Json<WithdrawRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let key = idempotency_key(headers, TokenEndpoint::Withdraw)?;
    let network = match req.network.as_deref() {
        Some(tag) => Network::new(tag).map_err(ApiError::from)?,
        None => Network::default(),
    };
    let builder = WithdrawalParams::builder()
        .address(req.address)
        .network(network);
    let params = match req.amount {
        Some(amount) => builder.amount(amount).build(),
        None => builder.build(),
    };
    let id = account.id;
    let report = state
        .blocking(move |engine| engine.request_withdrawal(id, params, key.as_ref()))
        .await?;
    let request = report.request();
    Ok(Json(json!({
        "ok": true,
        "id": request.id,
        "amount": request.amount,
        "network": request.network,
        "address": request.address,
        "balance": report.balance(),
    })))
}

#[handler]
pub(super) async fn referral(
    Data(state): Data<&AppState>,
    Json(req): Json<AuthRequest>,
) -> poem::Result<Json<Value>> {
    let (_, account) = state.authenticate(&req.init_data).await?;
    let id = account.id;
    let summary = state
        .blocking(move |engine| engine.referral_summary(id))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "code": summary.code,
        "count": summary.count,
        "total_bonus": summary.total_bonus,
    })))
}
