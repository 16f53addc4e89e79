//! Shared application state
//!
//! Every collaborator is injected as an `Arc<dyn Trait>`; the services are
//! assembled once and shared read-only across requests.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authorizer, KeyFamily, KeyRing, TokenCodec, DEFAULT_TOKEN_TTL};
use crate::config::Args;
use crate::services::{
    ContributorService, ContributorSettings, DefinitionFetcher, Notifier, Reconciler,
    SubscriptionSync, TitleService, VersionService, DEFAULT_FETCH_TIMEOUT,
};
use crate::store::{CatalogStore, ObjectStore, Stores, DEFAULT_STORE_TIMEOUT};

/// External collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub notifier: Arc<dyn Notifier>,
    pub fetcher: Arc<dyn DefinitionFetcher>,
    pub keys: Arc<KeyRing>,
}

/// Tunables derived from configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub domain: String,
    pub email_topic: String,
    pub token_ttl: Duration,
    pub store_timeout: Duration,
    pub fetch_timeout: Duration,
    pub required_family: Option<KeyFamily>,
}

impl Settings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            domain: args.domain_name.clone(),
            email_topic: args.email_topic.clone(),
            token_ttl: args.token_ttl(),
            store_timeout: args.store_timeout(),
            fetch_timeout: args.fetch_timeout(),
            required_family: args.required_family(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            domain: "communitypatch.local".to_string(),
            email_topic: "communitypatch.email".to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            required_family: None,
        }
    }
}

pub struct AppState {
    pub settings: Settings,
    pub stores: Stores,
    pub codec: Arc<TokenCodec>,
    pub authorizer: Authorizer,
    pub titles: TitleService,
    pub versions: VersionService,
    pub sync: SubscriptionSync,
    pub reconciler: Reconciler,
    pub contributors: ContributorService,
}

impl AppState {
    pub fn new(collaborators: Collaborators, settings: Settings) -> Self {
        let stores = Stores::new(
            collaborators.catalog,
            collaborators.objects,
            settings.store_timeout,
        );
        let codec = Arc::new(TokenCodec::for_domain(collaborators.keys, &settings.domain));
        let authorizer = Authorizer::new(codec.clone(), stores.clone())
            .with_required_family(settings.required_family);
        let titles = TitleService::new(stores.clone());
        let sync = SubscriptionSync::new(
            stores.clone(),
            titles.clone(),
            collaborators.fetcher,
            settings.fetch_timeout,
        );
        let contributors = ContributorService::new(
            stores.clone(),
            codec.clone(),
            collaborators.notifier,
            ContributorSettings {
                domain: settings.domain.clone(),
                email_topic: settings.email_topic.clone(),
                token_ttl: settings.token_ttl,
            },
        );

        Self {
            versions: VersionService::new(stores.clone()),
            reconciler: Reconciler::new(stores.clone()),
            settings,
            stores,
            codec,
            authorizer,
            titles,
            sync,
            contributors,
        }
    }
}
