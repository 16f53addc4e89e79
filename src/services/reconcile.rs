//! Reconciliation sweep: re-derive catalog summaries from their blobs

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::versions::summary_fields;
use crate::definitions::Definition;
use crate::store::records::fields;
use crate::store::{CatalogRecord, Condition, StoreError, StoreResult, Stores, TitleRecord};
use crate::types::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub repaired: usize,
    /// Records whose blob is missing or unreadable
    pub orphaned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    InSync,
    Repaired,
    Orphaned,
}

#[derive(Clone)]
pub struct Reconciler {
    stores: Stores,
}

impl Reconciler {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    async fn reconcile(&self, record: &TitleRecord) -> StoreResult<Outcome> {
        let object = match self.stores.get_object(&record.blob_key()).await {
            Ok(object) => object,
            Err(StoreError::NotFound(_)) => return Ok(Outcome::Orphaned),
            Err(e) => return Err(e),
        };
        let Ok(document) = Definition::from_slice(&object.bytes) else {
            return Ok(Outcome::Orphaned);
        };

        let summary = &record.summary;
        let in_sync = summary.current_version == document.current_version
            && summary.last_modified == document.last_modified
            && record.blob_etag.as_deref() == Some(object.etag.as_str());
        if in_sync {
            return Ok(Outcome::InSync);
        }

        let set = summary_fields(&document, &object.etag);
        let condition = Condition::equals(fields::BLOB_ETAG, record.etag_value());
        match self.stores.update_item(&record.key(), set, condition).await {
            Ok(_) => {}
            // Edited or deleted since the scan
            Err(StoreError::ConditionFailed) => return Ok(Outcome::InSync),
            Err(e) => return Err(e),
        }

        info!(
            contributor = %record.contributor_id,
            title = %record.title_id,
            was = %summary.current_version,
            now = %document.current_version,
            "Catalog summary repaired from definition blob"
        );
        Ok(Outcome::Repaired)
    }

    /// Walk every title record once
    pub async fn sweep(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for record in self.stores.all_titles().await? {
            report.checked += 1;
            match self.reconcile(&record).await {
                Ok(Outcome::InSync) => {}
                Ok(Outcome::Repaired) => report.repaired += 1,
                Ok(Outcome::Orphaned) => {
                    report.orphaned += 1;
                    warn!(
                        contributor = %record.contributor_id,
                        title = %record.title_id,
                        "Catalog record without a usable definition blob"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        contributor = %record.contributor_id,
                        title = %record.title_id,
                        error = %e,
                        "Reconciliation failed"
                    );
                }
            }
        }

        info!(
            checked = report.checked,
            repaired = report.repaired,
            orphaned = report.orphaned,
            failed = report.failed,
            "Reconciliation sweep finished"
        );
        Ok(report)
    }
}

/// Spawn the periodic reconciliation sweep
pub fn spawn_reconcile_task(reconciler: Reconciler, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.sweep().await {
                warn!(error = %e, "Reconciliation sweep aborted");
            }
        }
    })
}
