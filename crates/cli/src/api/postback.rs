use poem::{
    handler,
    http::StatusCode,
    web::{Data, Query},
    IntoResponse, Response,
};
use w2e_ledger::{engine::PostbackOutcome, PostbackQuery};
use w2e_model::ErrorKind;

use super::{ApiError, AppState};

fn is_missing(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::Ledger(w2e_ledger::Error::Model(
            w2e_model::Error::MissingArgument(_)
        ))
    )
}

/// Server-to-server postback of the ad network.
///
/// Answers in plain text. Duplicates are acknowledged with 200 so the network
/// stops retrying. An absent parameter is answered with `Missing params`, a
/// malformed one with `Invalid params`.
#[handler]
pub(super) async fn monetag(
    Data(state): Data<&AppState>,
    Query(query): Query<PostbackQuery>,
) -> Response {
    let res = state
        .blocking(move |engine| engine.ingest_postback(query))
        .await;
    let (status, text) = match res {
        Ok(PostbackOutcome::Duplicate) => (StatusCode::OK, "Duplicate ignored"),
        Ok(_) => (StatusCode::OK, "OK"),
        Err(err) => match err.kind() {
            ErrorKind::Unauthorized => {
                tracing::warn!("postback with a bad token rejected");
                (StatusCode::FORBIDDEN, "Forbidden")
            }
            ErrorKind::InvalidInput if is_missing(&err) => {
                (StatusCode::BAD_REQUEST, "Missing params")
            }
            ErrorKind::InvalidInput => {
                tracing::debug!(%err, "malformed postback rejected");
                (StatusCode::BAD_REQUEST, "Invalid params")
            }
            _ => {
                tracing::error!(%err, "postback failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Error")
            }
        },
    };
    text.with_status(status).into_response()
}
