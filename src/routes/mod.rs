//! Request dispatch for CommunityPatch
//!
//! [`handle_request`] maps an [`ApiRequest`] to a handler by method and path.
//! Path segments are percent-decoded before matching. Handlers return
//! `Result<ApiResponse>`; errors become `{"message": ...}` bodies here.

pub mod contributors;
pub mod jamf;
pub mod titles;

use hyper::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::{AuthContext, ResourceRef};
use crate::state::AppState;
use crate::types::{ApiRequest, ApiResponse, PatchError, Result};

/// A matched endpoint with its path parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Register,
    Verify,
    Titles { contributor: String },
    Title { contributor: String, title: String },
    Versions { contributor: String, title: String },
    Version { contributor: String, title: String, version: String },
    Subscriptions { contributor: String },
    Tokens { contributor: String },
    Token { contributor: String, jti: String },
    Software { contributor: String },
    SoftwareSelect { contributor: String, titles: Vec<String> },
    Patch { contributor: String, title: String },
}

impl Route {
    /// Match a request path; `None` for unknown paths
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        let route = match segments.as_slice() {
            ["v1", "contributors", "register"] => Self::Register,
            ["v1", "contributors", "verify"] => Self::Verify,
            ["v1", cid, "titles"] => Self::Titles {
                contributor: cid.to_string(),
            },
            ["v1", cid, "titles", title] => Self::Title {
                contributor: cid.to_string(),
                title: title.to_string(),
            },
            ["v1", cid, "titles", title, "versions"] => Self::Versions {
                contributor: cid.to_string(),
                title: title.to_string(),
            },
            ["v1", cid, "titles", title, "versions", version] => Self::Version {
                contributor: cid.to_string(),
                title: title.to_string(),
                version: version.to_string(),
            },
            ["v1", cid, "subscriptions"] => Self::Subscriptions {
                contributor: cid.to_string(),
            },
            ["v1", cid, "tokens"] => Self::Tokens {
                contributor: cid.to_string(),
            },
            ["v1", cid, "tokens", jti] => Self::Token {
                contributor: cid.to_string(),
                jti: jti.to_string(),
            },
            ["v1", cid, "software"] => Self::Software {
                contributor: cid.to_string(),
            },
            ["v1", cid, "software", list] => Self::SoftwareSelect {
                contributor: cid.to_string(),
                titles: list.split(',').map(str::to_string).collect(),
            },
            ["v1", cid, "patch", title] => Self::Patch {
                contributor: cid.to_string(),
                title: title.to_string(),
            },
            _ => return None,
        };
        Some(route)
    }
}

/// Dispatch one request
pub async fn handle_request(state: &AppState, req: ApiRequest) -> ApiResponse {
    debug!(method = %req.method, path = %req.path, "Handling request");

    let Some(route) = Route::parse(&req.path) else {
        return ApiResponse::message(StatusCode::NOT_FOUND, "Not Found");
    };

    let result = match (&req.method, route) {
        (&Method::POST, Route::Register) => contributors::handle_register(state, &req).await,
        (&Method::GET, Route::Verify) => contributors::handle_verify(state, &req).await,
        (&Method::POST, Route::Tokens { contributor }) => {
            contributors::handle_create_token(state, &req, &contributor).await
        }
        (&Method::DELETE, Route::Token { contributor, jti }) => {
            contributors::handle_revoke_token(state, &req, &contributor, &jti).await
        }

        (&Method::POST, Route::Titles { contributor }) => {
            titles::handle_create_title(state, &req, &contributor).await
        }
        (&Method::GET, Route::Title { contributor, title }) => {
            titles::handle_read_title(state, &req, &contributor, &title).await
        }
        (&Method::PUT, Route::Title { contributor, title }) => {
            titles::handle_replace_title(state, &req, &contributor, &title).await
        }
        (&Method::DELETE, Route::Title { contributor, title }) => {
            titles::handle_delete_title(state, &req, &contributor, &title).await
        }
        (&Method::POST, Route::Versions { contributor, title }) => {
            titles::handle_add_version(state, &req, &contributor, &title).await
        }
        (&Method::DELETE, Route::Version { contributor, title, version }) => {
            titles::handle_delete_version(state, &req, &contributor, &title, &version).await
        }
        (&Method::POST, Route::Subscriptions { contributor }) => {
            titles::handle_subscribe(state, &req, &contributor).await
        }

        (&Method::GET, Route::Software { contributor }) => {
            jamf::handle_software(state, &req, &contributor).await
        }
        (&Method::GET, Route::SoftwareSelect { contributor, titles }) => {
            jamf::handle_software_select(state, &contributor, &titles).await
        }
        (&Method::GET, Route::Patch { contributor, title }) => {
            jamf::handle_patch(state, &contributor, &title).await
        }

        _ => Ok(ApiResponse::message(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
        )),
    };

    result.unwrap_or_else(PatchError::into_response)
}

/// Run the authorizer for a bearer-protected route
pub(crate) async fn authorize(
    state: &AppState,
    req: &ApiRequest,
    resource: ResourceRef,
) -> Result<AuthContext> {
    state
        .authorizer
        .authorize(req.header("authorization"), &resource)
        .await
        .into_result()
}

/// Decode a JSON request body
pub(crate) fn parse_body<T: DeserializeOwned>(req: &ApiRequest) -> Result<T> {
    if req.body.iter().all(u8::is_ascii_whitespace) {
        return Err(PatchError::Validation("No JSON content found".into()));
    }
    Ok(serde_json::from_slice(&req.body)?)
}
