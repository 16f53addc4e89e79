//! Per-request authorization
//!
//! Every authenticated call runs through [`Authorizer::authorize`], which
//! reaches exactly one terminal decision:
//!
//! 1. bearer credential present in the `Authorization` header
//! 2. token verifies (signature, expiry, issuer, audience, key family)
//! 3. the path's contributor segment equals `sub`, and any `scope` covers the title
//! 4. the contributor exists
//! 5. mutations of a synced title are refused
//! 6. `jti` is the contributor's current `token_id` and is not blacklisted
//!
//! Denials are logged with their reason and surfaced as a bare 401 (steps
//! 1-2) or 403 (steps 3-6). A failed or slow store lookup denies; it is never
//! retried.

use std::sync::Arc;

use tracing::{debug, warn};

use super::token::{Claims, KeyFamily, TokenCodec, TokenError};
use crate::store::Stores;
use crate::types::PatchError;

pub const SCOPE_PREFIX: &str = "titles-api/";
pub const FULL_ACCESS_SCOPE: &str = "titles-api/full_access";

/// What the request wants to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    /// Creates a new title; needs full access
    Create,
    /// Edits the content of an existing title; refused for synced titles
    Mutate,
    /// Removes a title, synced or not
    Remove,
    /// Creates or revokes tokens; needs full access
    ManageTokens,
}

/// The resource a request touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// `{contributor_id}` segment of the path
    pub subject: String,
    pub title: Option<String>,
    pub access: Access,
}

impl ResourceRef {
    pub fn title(subject: &str, title: &str, access: Access) -> Self {
        Self {
            subject: subject.to_string(),
            title: Some(title.to_lowercase()),
            access,
        }
    }

    pub fn contributor(subject: &str, access: Access) -> Self {
        Self {
            subject: subject.to_string(),
            title: None,
            access,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    MalformedHeader,
    InvalidToken(TokenError),
    AlgorithmMismatch,
    SubjectMismatch { subject: String, path: String },
    ScopeDenied,
    UnknownSubject,
    SyncedReadOnly,
    RevokedToken,
    LookupFailed(String),
}

impl DenyReason {
    /// Header and token failures are authentication failures (401)
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader | Self::InvalidToken(_) | Self::AlgorithmMismatch
        )
    }

    pub fn into_error(self) -> PatchError {
        if self.is_authentication_failure() {
            PatchError::Unauthorized
        } else {
            PatchError::Forbidden
        }
    }
}

/// Claims of an allowed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub claims: Claims,
}

impl AuthContext {
    pub fn contributor_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn jti(&self) -> &str {
        &self.claims.jti
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(AuthContext),
    Deny(DenyReason),
}

impl Decision {
    pub fn into_result(self) -> Result<AuthContext, PatchError> {
        match self {
            Self::Allow(ctx) => Ok(ctx),
            Self::Deny(reason) => Err(reason.into_error()),
        }
    }
}

/// Extract the credential from a `Bearer <token>` header
pub fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
    let token = auth_header?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Whether the token's scopes cover the resource
fn scope_allows(claims: &Claims, resource: &ResourceRef) -> bool {
    if claims.scope.is_none() {
        return true;
    }
    let needs_full = matches!(resource.access, Access::Create | Access::ManageTokens);
    claims.scopes().any(|scope| {
        if scope == FULL_ACCESS_SCOPE {
            return true;
        }
        match (&resource.title, scope.strip_prefix(SCOPE_PREFIX)) {
            (Some(title), Some(scoped)) if !needs_full => scoped.eq_ignore_ascii_case(title),
            _ => false,
        }
    })
}

#[derive(Clone)]
pub struct Authorizer {
    codec: Arc<TokenCodec>,
    stores: Stores,
    required_family: Option<KeyFamily>,
}

impl Authorizer {
    pub fn new(codec: Arc<TokenCodec>, stores: Stores) -> Self {
        Self {
            codec,
            stores,
            required_family: None,
        }
    }

    /// Only accept tokens of one key family
    pub fn with_required_family(mut self, family: Option<KeyFamily>) -> Self {
        self.required_family = family;
        self
    }

    pub async fn authorize(&self, auth_header: Option<&str>, resource: &ResourceRef) -> Decision {
        match self.evaluate(auth_header, resource).await {
            Ok(ctx) => {
                debug!(
                    contributor = %ctx.contributor_id(),
                    jti = %ctx.jti(),
                    access = ?resource.access,
                    "Request authorized"
                );
                Decision::Allow(ctx)
            }
            Err(reason) => {
                warn!(
                    subject = %resource.subject,
                    title = ?resource.title,
                    access = ?resource.access,
                    reason = ?reason,
                    "Request denied"
                );
                Decision::Deny(reason)
            }
        }
    }

    async fn evaluate(
        &self,
        auth_header: Option<&str>,
        resource: &ResourceRef,
    ) -> Result<AuthContext, DenyReason> {
        let token = extract_bearer(auth_header).ok_or(DenyReason::MalformedHeader)?;

        let decoded = match self.required_family {
            Some(family) => self.codec.decode_as(token, family).await,
            None => self.codec.decode(token).await,
        };
        let claims = decoded.map_err(|e| match e {
            TokenError::AlgorithmMismatch(_) => DenyReason::AlgorithmMismatch,
            other => DenyReason::InvalidToken(other),
        })?;

        if claims.sub != resource.subject {
            return Err(DenyReason::SubjectMismatch {
                subject: claims.sub,
                path: resource.subject.clone(),
            });
        }
        if !scope_allows(&claims, resource) {
            return Err(DenyReason::ScopeDenied);
        }

        let contributor = self
            .stores
            .contributor(&claims.sub)
            .await
            .map_err(|e| DenyReason::LookupFailed(e.to_string()))?
            .ok_or(DenyReason::UnknownSubject)?;

        if let (Access::Mutate, Some(title)) = (resource.access, &resource.title) {
            let record = self
                .stores
                .title(&claims.sub, title)
                .await
                .map_err(|e| DenyReason::LookupFailed(e.to_string()))?;
            if record.is_some_and(|r| r.is_synced) {
                return Err(DenyReason::SyncedReadOnly);
            }
        }

        let current = contributor.token_id.as_deref().unwrap_or("");
        if !constant_time_compare(current, &claims.jti) {
            return Err(DenyReason::RevokedToken);
        }
        let revoked = self
            .stores
            .is_revoked(&claims.sub, &claims.jti)
            .await
            .map_err(|e| DenyReason::LookupFailed(e.to_string()))?;
        if revoked {
            return Err(DenyReason::RevokedToken);
        }

        Ok(AuthContext { claims })
    }
}
