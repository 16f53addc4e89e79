//! Signing and verification keys
//!
//! The shared secret is turned into keys at construction. RSA PEM material is
//! read on first use and cached for the life of the process; a failed load is
//! retried on the next call.

use std::fmt;
use std::path::PathBuf;

use jsonwebtoken::{DecodingKey, EncodingKey};
use tokio::sync::OnceCell;
use tracing::info;

use super::token::{KeyFamily, TokenError};

/// Minimum length of the shared secret
pub const MIN_SECRET_LEN: usize = 32;

const DEV_SECRET: &str = "dev-mode-secret-not-for-production-use-123456";

/// Where PEM material comes from
#[derive(Debug, Clone)]
pub enum KeySource {
    Inline(String),
    File(PathBuf),
}

impl KeySource {
    async fn load(&self) -> Result<Vec<u8>, TokenError> {
        match self {
            Self::Inline(pem) => Ok(pem.as_bytes().to_vec()),
            Self::File(path) => tokio::fs::read(path).await.map_err(|e| {
                TokenError::InvalidKey(format!("Failed to read {}: {}", path.display(), e))
            }),
        }
    }
}

struct SymmetricKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

#[derive(Default)]
struct AsymmetricKeys {
    encoding: Option<EncodingKey>,
    decoding: Option<DecodingKey>,
}

/// Read-only key cache shared by the codec
pub struct KeyRing {
    symmetric: Option<SymmetricKeys>,
    private_key: Option<KeySource>,
    public_key: Option<KeySource>,
    asymmetric: OnceCell<AsymmetricKeys>,
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing")
            .field("symmetric", &self.symmetric.is_some())
            .field("private_key", &self.private_key.is_some())
            .field("public_key", &self.public_key.is_some())
            .finish()
    }
}

impl KeyRing {
    /// Build a key ring
    ///
    /// Returns an error if a secret is given but shorter than 32 characters,
    /// or if no key material is configured at all.
    pub fn new(
        secret: Option<String>,
        private_key: Option<KeySource>,
        public_key: Option<KeySource>,
    ) -> Result<Self, TokenError> {
        let symmetric = match secret {
            Some(secret) if secret.len() < MIN_SECRET_LEN => {
                return Err(TokenError::InvalidKey(format!(
                    "Token secret must be at least {} characters",
                    MIN_SECRET_LEN
                )));
            }
            Some(secret) => Some(SymmetricKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            }),
            None => None,
        };

        if symmetric.is_none() && private_key.is_none() && public_key.is_none() {
            return Err(TokenError::InvalidKey("No token key material configured".into()));
        }

        Ok(Self {
            symmetric,
            private_key,
            public_key,
            asymmetric: OnceCell::new(),
        })
    }

    /// Shared-secret only key ring
    pub fn symmetric(secret: impl Into<String>) -> Result<Self, TokenError> {
        Self::new(Some(secret.into()), None, None)
    }

    /// Key ring for dev mode with a fixed, well-known secret
    pub fn new_dev() -> Self {
        Self {
            symmetric: Some(SymmetricKeys {
                encoding: EncodingKey::from_secret(DEV_SECRET.as_bytes()),
                decoding: DecodingKey::from_secret(DEV_SECRET.as_bytes()),
            }),
            private_key: None,
            public_key: None,
            asymmetric: OnceCell::new(),
        }
    }

    /// Family used for new tokens: asymmetric when a private key is configured
    pub fn signing_family(&self) -> KeyFamily {
        if self.private_key.is_some() {
            KeyFamily::Asymmetric
        } else {
            KeyFamily::Symmetric
        }
    }

    async fn asymmetric(&self) -> Result<&AsymmetricKeys, TokenError> {
        self.asymmetric
            .get_or_try_init(|| async {
                let mut keys = AsymmetricKeys::default();
                if let Some(source) = &self.private_key {
                    let pem = source.load().await?;
                    keys.encoding = Some(
                        EncodingKey::from_rsa_pem(&pem)
                            .map_err(|e| TokenError::InvalidKey(format!("Bad private key: {}", e)))?,
                    );
                }
                if let Some(source) = &self.public_key {
                    let pem = source.load().await?;
                    keys.decoding = Some(
                        DecodingKey::from_rsa_pem(&pem)
                            .map_err(|e| TokenError::InvalidKey(format!("Bad public key: {}", e)))?,
                    );
                }
                info!(
                    signing = keys.encoding.is_some(),
                    verifying = keys.decoding.is_some(),
                    "Loaded RSA token keys"
                );
                Ok(keys)
            })
            .await
    }

    pub async fn encoding_key(&self, family: KeyFamily) -> Result<&EncodingKey, TokenError> {
        let key = match family {
            KeyFamily::Symmetric => self.symmetric.as_ref().map(|k| &k.encoding),
            KeyFamily::Asymmetric => self.asymmetric().await?.encoding.as_ref(),
        };
        key.ok_or(TokenError::KeyUnavailable(family))
    }

    pub async fn decoding_key(&self, family: KeyFamily) -> Result<&DecodingKey, TokenError> {
        let key = match family {
            KeyFamily::Symmetric => self.symmetric.as_ref().map(|k| &k.decoding),
            KeyFamily::Asymmetric => self.asymmetric().await?.decoding.as_ref(),
        };
        key.ok_or(TokenError::KeyUnavailable(family))
    }
}
