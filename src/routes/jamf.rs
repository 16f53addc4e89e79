//! Public read API consumed by Jamf Pro

use hyper::StatusCode;

use crate::state::AppState;
use crate::types::{ApiRequest, ApiResponse, Result};

/// GET /v1/{contributor}/software[?extend]
pub async fn handle_software(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
) -> Result<ApiResponse> {
    let extend = req.query_pairs().iter().any(|(k, _)| k == "extend");
    let summaries = state.titles.list_summaries(contributor, extend).await?;
    Ok(ApiResponse::json(StatusCode::OK, &summaries))
}

/// GET /v1/{contributor}/software/{id,id,...}
pub async fn handle_software_select(
    state: &AppState,
    contributor: &str,
    titles: &[String],
) -> Result<ApiResponse> {
    let summaries = state.titles.select_summaries(contributor, titles).await?;
    Ok(ApiResponse::json(StatusCode::OK, &summaries))
}

/// GET /v1/{contributor}/patch/{title}
pub async fn handle_patch(state: &AppState, contributor: &str, title: &str) -> Result<ApiResponse> {
    let document = state.titles.read(contributor, title).await?;
    Ok(ApiResponse::json(StatusCode::OK, &document))
}
