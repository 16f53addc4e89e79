//! API token issuing and decoding
//!
//! Tokens are JWTs carrying the contributor id as `sub`, a unique `jti`, and
//! an optional space-delimited `scope`. Two key families are supported:
//! - Symmetric: HS256 with a shared secret (legacy and internal tokens)
//! - Asymmetric: RS256, signed with a private key and verified with the public key
//!
//! The family is chosen from the unverified header, and each family only ever
//! verifies with its own key. Signature comparison is constant time inside
//! `jsonwebtoken`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::keys::KeyRing;

/// Default lifetime of an API token (365 days)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyFamily {
    Symmetric,
    Asymmetric,
}

impl KeyFamily {
    /// Family of a header algorithm; `None` for algorithms we do not accept
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 => Some(Self::Symmetric),
            Algorithm::RS256 => Some(Self::Asymmetric),
            _ => None,
        }
    }

    pub fn algorithm(self) -> Algorithm {
        match self {
            Self::Symmetric => Algorithm::HS256,
            Self::Asymmetric => Algorithm::RS256,
        }
    }
}

impl std::fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symmetric => write!(f, "symmetric"),
            Self::Asymmetric => write!(f, "asymmetric"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Issuer mismatch")]
    IssuerMismatch,

    #[error("Audience mismatch")]
    AudienceMismatch,

    #[error("Token algorithm does not belong to the {0} key family")]
    AlgorithmMismatch(KeyFamily),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No {0} key configured")]
    KeyUnavailable(KeyFamily),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Payload stored in an API token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Contributor id
    pub sub: String,
    /// Unique token id, compared against the contributor's current `token_id`
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
    /// Space-delimited scopes; absent means unrestricted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub iss: String,
    pub aud: String,
}

impl Claims {
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or("").split_whitespace()
    }
}

/// A freshly minted token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
    pub family: KeyFamily,
}

impl IssuedToken {
    pub fn jti(&self) -> &str {
        &self.claims.jti
    }

    pub fn expires_at(&self) -> u64 {
        self.claims.exp
    }
}

/// Issues and decodes API tokens for one issuer/audience pair
#[derive(Debug, Clone)]
pub struct TokenCodec {
    keys: Arc<KeyRing>,
    issuer: String,
    audience: String,
}

impl TokenCodec {
    pub fn new(keys: Arc<KeyRing>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Issuer and audience derived from the service domain
    pub fn for_domain(keys: Arc<KeyRing>, domain: &str) -> Self {
        Self::new(
            keys,
            format!("https://contributors.{}", domain),
            format!("https://api.{}", domain),
        )
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Mint a token with the key ring's preferred family
    pub async fn issue(
        &self,
        subject: &str,
        ttl: Duration,
        scope: Option<String>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_with(self.keys.signing_family(), subject, ttl, scope)
            .await
    }

    /// Mint a token with an explicit family
    pub async fn issue_with(
        &self,
        family: KeyFamily,
        subject: &str,
        ttl: Duration,
        scope: Option<String>,
    ) -> Result<IssuedToken, TokenError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TokenError::Signing(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: subject.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
            scope,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let key = self.keys.encoding_key(family).await?;
        let token = encode(&Header::new(family.algorithm()), &claims, key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            claims,
            family,
        })
    }

    /// Verify a token with the key family named by its header
    pub async fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        self.decode_inner(token, None).await
    }

    /// Verify a token that must belong to `family`
    pub async fn decode_as(&self, token: &str, family: KeyFamily) -> Result<Claims, TokenError> {
        self.decode_inner(token, Some(family)).await
    }

    async fn decode_inner(
        &self,
        token: &str,
        expected: Option<KeyFamily>,
    ) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        let family = KeyFamily::of(header.alg)
            .ok_or_else(|| TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)))?;

        if let Some(expected) = expected {
            if family != expected {
                return Err(TokenError::AlgorithmMismatch(expected));
            }
        }

        let key = self.keys.decoding_key(family).await?;

        let mut validation = Validation::new(family.algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(decode::<Claims>(token, key, &validation)?.claims)
    }
}
