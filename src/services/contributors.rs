//! Contributor registration, verification and API token management

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use super::notify::{publish_and_forget, MessageType, Notification, Notifier};
use crate::auth::{AuthContext, IssuedToken, TokenCodec, FULL_ACCESS_SCOPE, SCOPE_PREFIX};
use crate::definitions::format_timestamp;
use crate::store::records::fields;
use crate::store::{
    Attributes, CatalogRecord, Condition, ContributorRecord, RevokedTokenRecord, StoreError,
    Stores,
};
use crate::types::{PatchError, Result};

/// Longest lifetime a caller may request for a token
pub const MAX_TOKEN_DAYS: u32 = 365;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Contributor id: first 32 hex chars of SHA256 over the lower-cased name
pub fn contributor_id_for(name: &str) -> String {
    let digest = Sha256::digest(name.trim().to_lowercase().as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(32);
    id
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
}

/// Query of the verification link
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub id: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    pub expires_in_days: Option<u32>,
    #[serde(default)]
    pub titles_in_scope: Option<Vec<String>>,
}

/// Returned from token creation
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub id: String,
    pub api_token: String,
}

impl From<&IssuedToken> for TokenResponse {
    fn from(issued: &IssuedToken) -> Self {
        Self {
            id: issued.jti().to_string(),
            api_token: issued.token.clone(),
        }
    }
}

/// Settings for the contributor service
#[derive(Debug, Clone)]
pub struct ContributorSettings {
    /// Public domain the verification link points at
    pub domain: String,
    /// Topic the email worker listens on
    pub email_topic: String,
    /// Lifetime of tokens minted without an explicit request
    pub token_ttl: Duration,
}

#[derive(Clone)]
pub struct ContributorService {
    stores: Stores,
    codec: Arc<TokenCodec>,
    notifier: Arc<dyn Notifier>,
    settings: ContributorSettings,
}

impl ContributorService {
    pub fn new(
        stores: Stores,
        codec: Arc<TokenCodec>,
        notifier: Arc<dyn Notifier>,
        settings: ContributorSettings,
    ) -> Self {
        Self {
            stores,
            codec,
            notifier,
            settings,
        }
    }

    fn verification_url(&self, contributor_id: &str, code: &str) -> String {
        let query = serde_urlencoded::to_string([("id", contributor_id), ("code", code)])
            .unwrap_or_default();
        format!(
            "https://{}/api/v1/contributors/verify?{}",
            self.settings.domain, query
        )
    }

    /// Register a new contributor and send the verification link
    pub async fn register(&self, request: RegisterRequest) -> Result<String> {
        let name = request.name.trim();
        let email = request.email.trim();
        if name.is_empty() {
            return Err(PatchError::Validation("'name' must not be empty".into()));
        }
        if email.is_empty() || !email.contains('@') {
            return Err(PatchError::Validation("'email' is not a valid address".into()));
        }

        let contributor_id = contributor_id_for(name);
        let code = Uuid::new_v4().simple().to_string();
        let record = ContributorRecord {
            contributor_id: contributor_id.clone(),
            display_name: name.to_string(),
            email: email.to_string(),
            verification_code: Some(code.clone()),
            verified: false,
            date_registered: Utc::now().timestamp(),
            token_id: None,
        };

        match self.stores.put_record(&record, Condition::NotExists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(PatchError::Conflict("The provided name is already in use".into()));
            }
            Err(e) => return Err(e.into()),
        }

        let notification = Notification {
            recipient: record.email.clone(),
            message_type: MessageType::Verification,
            message_data: json!({
                "display_name": record.display_name,
                "url": self.verification_url(&contributor_id, &code),
            }),
        };
        publish_and_forget(self.notifier.as_ref(), &self.settings.email_topic, &notification).await;

        info!(contributor = %contributor_id, "Contributor registered");
        Ok(contributor_id)
    }

    /// Confirm a verification code and mint the first token
    pub async fn verify(&self, request: VerifyRequest) -> Result<IssuedToken> {
        if request.id.is_empty() || request.code.is_empty() {
            return Err(PatchError::Validation("'id' and 'code' are required".into()));
        }

        let issued = self
            .codec
            .issue(&request.id, self.settings.token_ttl, Some(FULL_ACCESS_SCOPE.to_string()))
            .await
            .map_err(|e| PatchError::Internal(format!("Token issue failed: {}", e)))?;

        let mut set = Attributes::new();
        set.insert(fields::VERIFIED.into(), Value::Bool(true));
        set.insert(fields::VERIFICATION_CODE.into(), Value::Null);
        set.insert(fields::TOKEN_ID.into(), Value::String(issued.jti().to_string()));
        let condition = Condition::equals(fields::VERIFICATION_CODE, Value::String(request.code));

        let item = match self
            .stores
            .update_item(&ContributorRecord::key_for(&request.id), set, condition)
            .await
        {
            Ok(item) => item,
            Err(StoreError::ConditionFailed) => return Err(PatchError::Forbidden),
            Err(e) => return Err(e.into()),
        };
        let record = ContributorRecord::from_item(item)?;

        let notification = Notification {
            recipient: record.email.clone(),
            message_type: MessageType::ApiToken,
            message_data: json!({
                "display_name": record.display_name,
                "api_token": issued.token,
                "expires": issued.expires_at(),
            }),
        };
        publish_and_forget(self.notifier.as_ref(), &self.settings.email_topic, &notification).await;

        info!(contributor = %request.id, jti = %issued.jti(), "Contributor verified");
        Ok(issued)
    }

    /// Mint a replacement token; the caller's token stops working
    pub async fn create_token(&self, ctx: &AuthContext, request: TokenRequest) -> Result<IssuedToken> {
        let ttl = match request.expires_in_days {
            None => self.settings.token_ttl,
            Some(days) if (1..=MAX_TOKEN_DAYS).contains(&days) => {
                Duration::from_secs(u64::from(days) * SECONDS_PER_DAY)
            }
            Some(days) => {
                return Err(PatchError::Validation(format!(
                    "'expires_in_days' must be between 1 and {}, got {}",
                    MAX_TOKEN_DAYS, days
                )));
            }
        };
        let scope = scope_for(request.titles_in_scope.as_deref())?;

        let contributor_id = ctx.contributor_id();
        let issued = self
            .codec
            .issue(contributor_id, ttl, Some(scope))
            .await
            .map_err(|e| PatchError::Internal(format!("Token issue failed: {}", e)))?;

        let mut set = Attributes::new();
        set.insert(fields::TOKEN_ID.into(), Value::String(issued.jti().to_string()));
        let condition = Condition::equals(fields::TOKEN_ID, Value::String(ctx.jti().to_string()));
        match self
            .stores
            .update_item(&ContributorRecord::key_for(contributor_id), set, condition)
            .await
        {
            Ok(_) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(PatchError::Conflict(
                    "The API token was replaced by another request".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            contributor = %contributor_id,
            previous = %ctx.jti(),
            jti = %issued.jti(),
            "API token rotated"
        );
        Ok(issued)
    }

    /// Blacklist a token id and clear it as the current token
    pub async fn revoke_token(&self, contributor_id: &str, jti: &str) -> Result<()> {
        let record = RevokedTokenRecord {
            contributor_id: contributor_id.to_string(),
            jti: jti.to_string(),
            revoked_at: format_timestamp(Utc::now()),
        };
        match self.stores.put_record(&record, Condition::NotExists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => return Err(PatchError::NotFound("Not Found".into())),
            Err(e) => return Err(e.into()),
        }

        let mut set = Attributes::new();
        set.insert(fields::TOKEN_ID.into(), Value::Null);
        let condition = Condition::equals(fields::TOKEN_ID, Value::String(jti.to_string()));
        match self
            .stores
            .update_item(&ContributorRecord::key_for(contributor_id), set, condition)
            .await
        {
            Ok(_) | Err(StoreError::ConditionFailed) => {}
            Err(e) => return Err(e.into()),
        }

        info!(contributor = %contributor_id, jti = %jti, "API token revoked");
        Ok(())
    }

    /// The record for a contributor id
    pub async fn get(&self, contributor_id: &str) -> Result<Option<ContributorRecord>> {
        Ok(self.stores.contributor(contributor_id).await?)
    }
}

/// Scope string for a token request; no titles means full access
fn scope_for(titles: Option<&[String]>) -> Result<String> {
    let titles = match titles {
        None | Some([]) => return Ok(FULL_ACCESS_SCOPE.to_string()),
        Some(titles) => titles,
    };
    let mut scopes = Vec::with_capacity(titles.len());
    for title in titles {
        let title = title.trim().to_lowercase();
        if title.is_empty() || title.contains(char::is_whitespace) {
            return Err(PatchError::Validation(format!(
                "Invalid title id in scope: '{}'",
                title
            )));
        }
        scopes.push(format!("{}{}", SCOPE_PREFIX, title));
    }
    Ok(scopes.join(" "))
}
