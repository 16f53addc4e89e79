//! Authentication and authorization for CommunityPatch
//!
//! Provides:
//! - API token issuing and decoding (HS256 and RS256)
//! - Lazily loaded key material
//! - The per-request authorization decision

pub mod authorizer;
pub mod keys;
pub mod token;

pub use authorizer::{
    extract_bearer, Access, AuthContext, Authorizer, Decision, DenyReason, ResourceRef,
    FULL_ACCESS_SCOPE, SCOPE_PREFIX,
};
pub use keys::{KeyRing, KeySource, MIN_SECRET_LEN};
pub use token::{Claims, IssuedToken, KeyFamily, TokenCodec, TokenError, DEFAULT_TOKEN_TTL};
