use poem::{
    handler,
    http::HeaderMap,
    web::{Data, Json, Path, Query},
};
use serde::Deserialize;
use serde_json::{json, Value};
use w2e_model::WithdrawalId;

use super::AppState;

#[derive(Debug, Deserialize)]
pub(super) struct PendingQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProcessedRequest {
    #[serde(alias = "tx_hash")]
    settlement_ref: String,
}

#[handler]
pub(super) async fn pending(
    Data(state): Data<&AppState>,
    headers: &HeaderMap,
    Query(query): Query<PendingQuery>,
) -> poem::Result<Json<Value>> {
    state.check_admin(headers)?;
    let withdrawals = state
        .blocking(move |engine| engine.pending_withdrawals(query.limit))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "withdrawals": withdrawals,
    })))
}

#[handler]
pub(super) async fn mark_processed(
    Data(state): Data<&AppState>,
    headers: &HeaderMap,
    Path(id): Path<u64>,
    Json(req): Json<ProcessedRequest>,
) -> poem::Result<Json<Value>> {
    state.check_admin(headers)?;
    let withdrawal = state
        .blocking(move |engine| engine.mark_processed(WithdrawalId(id), &req.settlement_ref))
        .await?;
    Ok(Json(json!({
        "ok": true,
        "withdrawal": withdrawal,
    })))
}
