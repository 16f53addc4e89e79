//! Contributor registration and token endpoints

use hyper::StatusCode;

use super::{authorize, parse_body};
use crate::auth::{Access, ResourceRef};
use crate::services::{RegisterRequest, TokenRequest, TokenResponse, VerifyRequest};
use crate::state::AppState;
use crate::types::{ApiRequest, ApiResponse, PatchError, Result};

/// POST /v1/contributors/register
pub async fn handle_register(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let request: RegisterRequest = parse_body(req)?;
    state.contributors.register(request).await?;
    Ok(ApiResponse::message(StatusCode::CREATED, "Success"))
}

/// GET /v1/contributors/verify?id=&code=
pub async fn handle_verify(state: &AppState, req: &ApiRequest) -> Result<ApiResponse> {
    let (Some(id), Some(code)) = (req.query_param("id"), req.query_param("code")) else {
        return Err(PatchError::Validation("missing-values".into()));
    };
    // The token itself is only delivered by email
    state.contributors.verify(VerifyRequest { id, code }).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Success"))
}

/// POST /v1/{contributor}/tokens
pub async fn handle_create_token(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
) -> Result<ApiResponse> {
    let ctx = authorize(state, req, ResourceRef::contributor(contributor, Access::ManageTokens)).await?;
    // All fields are optional; an empty body is an empty request
    let request: TokenRequest = if req.body.iter().all(u8::is_ascii_whitespace) {
        TokenRequest::default()
    } else {
        parse_body(req)?
    };

    let issued = state.contributors.create_token(&ctx, request).await?;
    Ok(ApiResponse::json(
        StatusCode::CREATED,
        &TokenResponse::from(&issued),
    ))
}

/// DELETE /v1/{contributor}/tokens/{jti}
pub async fn handle_revoke_token(
    state: &AppState,
    req: &ApiRequest,
    contributor: &str,
    jti: &str,
) -> Result<ApiResponse> {
    authorize(state, req, ResourceRef::contributor(contributor, Access::ManageTokens)).await?;
    state.contributors.revoke_token(contributor, jti).await?;
    Ok(ApiResponse::no_content())
}
