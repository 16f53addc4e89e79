//! Business operations over the injected stores
//!
//! - `versions`: version add/delete and the two-store commit
//! - `titles`: title lifecycle and the Jamf listing views
//! - `sync`: subscription mirroring of remote definitions
//! - `reconcile`: repairs summaries that diverged from their blobs
//! - `contributors`: registration, verification, token rotation
//! - `notify`: outbound email notifications

pub mod contributors;
pub mod notify;
pub mod reconcile;
pub mod sync;
pub mod titles;
pub mod versions;

#[cfg(test)]
pub(crate) mod testing;

pub use contributors::{
    contributor_id_for, ContributorService, ContributorSettings, RegisterRequest, TokenRequest,
    TokenResponse, VerifyRequest,
};
pub use notify::{MemoryNotifier, MessageType, NatsNotifier, NoopNotifier, Notification, Notifier};
pub use reconcile::{spawn_reconcile_task, ReconcileReport, Reconciler};
pub use sync::{
    spawn_sync_task, DefinitionFetcher, FetchError, HttpFetcher, SubscribeRequest, SubscriptionSync,
    SyncReport, DEFAULT_FETCH_TIMEOUT,
};
pub use titles::TitleService;
pub use versions::VersionService;
