//! Title and version endpoints (bearer auth)

use hyper::StatusCode;

use super::{authorize, parse_body};
use crate::auth::{Access, ResourceRef};
use crate::definitions::{Definition, Placement, VersionEntry};
use crate::services::SubscribeRequest;
use crate::state::AppState;
use crate::types::{ApiRequest, ApiResponse, Result};

/// POST /v1/{contributor}/titles
pub async fn handle_create_title(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::contributor(contributor, Access::Create)).await?;
    let document: Definition = parse_body(req)?;

    let summary = state.titles.create(contributor, document).await?;
    Ok(ApiResponse::message(
        StatusCode::CREATED,
        format!("Title '{}' created", summary.id),
    ))
}

/// GET /v1/{contributor}/titles/{title}
pub async fn handle_read_title(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    title: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::title(contributor, title, Access::Read)).await?;
    let document = state.titles.read(contributor, title).await?;
    Ok(ApiResponse::json(StatusCode::OK, &document))
}

/// PUT /v1/{contributor}/titles/{title}
pub async fn handle_replace_title(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    title: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::title(contributor, title, Access::Mutate)).await?;
    let document: Definition = parse_body(req)?;

    let summary = state.titles.replace(contributor, title, document).await?;
    Ok(ApiResponse::message(
        StatusCode::OK,
        format!("Title '{}' updated", summary.id),
    ))
}

/// DELETE /v1/{contributor}/titles/{title}
pub async fn handle_delete_title(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    title: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::title(contributor, title, Access::Remove)).await?;
    state.titles.delete(contributor, title).await?;
    Ok(ApiResponse::message(
        StatusCode::OK,
        format!("Title '{}' deleted", title.to_lowercase()),
    ))
}

/// POST /v1/{contributor}/titles/{title}/versions[?insert_after=|insert_before=]
pub async fn handle_add_version(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    title: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::title(contributor, title, Access::Mutate)).await?;
    let entry: VersionEntry = parse_body(req)?;
    let placement = Placement::from_pairs(&req.query_pairs());

    let version = entry.version.clone();
    let updated = state
        .versions
        .add_version(contributor, title, entry, &placement)
        .await?;
    Ok(ApiResponse::message(
        StatusCode::CREATED,
        format!("Version '{}' added to title '{}'", version, updated.id),
    ))
}

/// DELETE /v1/{contributor}/titles/{title}/versions/{version}
pub async fn handle_delete_version(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    title: &str,
    version: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::title(contributor, title, Access::Mutate)).await?;
    state
        .versions
        .delete_version(contributor, title, version)
        .await?;
    Ok(ApiResponse::message(
        StatusCode::OK,
        format!("Version '{}' deleted from title", version),
    ))
}

/// POST /v1/{contributor}/subscriptions
pub async fn handle_subscribe(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::contributor(contributor, Access::Create)).await?;
    let request: SubscribeRequest = parse_body(req)?;

    let summary = state.sync.subscribe(contributor, request).await?;
    Ok(ApiResponse::message(
        StatusCode::CREATED,
        format!("Title '{}' created", summary.id),
    ))
}
