//! CommunityPatch worker
//!
//! Runs the subscription sync and reconciliation sweeps against the
//! configured stores until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use communitypatch::{
    config::Args,
    services::{
        spawn_reconcile_task, spawn_sync_task, HttpFetcher, NatsNotifier, NoopNotifier, Notifier,
    },
    state::{AppState, Collaborators, Settings},
    store::{CatalogStore, FsObjectStore, MemoryCatalogStore, MongoCatalogStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("communitypatch={},info", log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  CommunityPatch worker");
    info!("======================================");
    info!("Domain: {}", args.domain_name);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} ({}.{})", args.mongodb_uri, args.mongodb_db, args.mongodb_collection);
    info!("Blob root: {}", args.blob_root.display());
    info!("NATS: {}", args.nats.nats_url);
    info!("Sync interval: {}s", args.sync_interval_secs);
    info!("Reconcile interval: {}s", args.reconcile_interval_secs);
    info!("======================================");

    // Catalog (in-memory fallback in dev mode)
    let catalog: Arc<dyn CatalogStore> = match MongoCatalogStore::connect(
        &args.mongodb_uri,
        &args.mongodb_db,
        &args.mongodb_collection,
    )
    .await
    {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Arc::new(store)
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory catalog): {}", e);
                Arc::new(MemoryCatalogStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let objects = Arc::new(FsObjectStore::new(&args.blob_root).await?);

    // Notifications (dropped in dev mode without NATS)
    let notifier: Arc<dyn Notifier> =
        match NatsNotifier::connect(&args.nats, "communitypatch-worker").await {
            Ok(client) => {
                info!("NATS connected successfully");
                Arc::new(client)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("NATS connection failed (dev mode, continuing without): {}", e);
                    Arc::new(NoopNotifier)
                } else {
                    error!("NATS connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    let fetcher = Arc::new(HttpFetcher::new(args.fetch_timeout())?);
    let keys = Arc::new(args.key_ring()?);
    let state = AppState::new(
        Collaborators {
            catalog,
            objects,
            notifier,
            fetcher,
            keys,
        },
        Settings::from_args(&args),
    );

    let mut tasks = Vec::new();
    if args.sync_interval_secs > 0 {
        tasks.push(spawn_sync_task(
            state.sync.clone(),
            Duration::from_secs(args.sync_interval_secs),
        ));
        info!("Subscription sync sweep scheduled");
    }
    if args.reconcile_interval_secs > 0 {
        tasks.push(spawn_reconcile_task(
            state.reconciler.clone(),
            Duration::from_secs(args.reconcile_interval_secs),
        ));
        info!("Reconciliation sweep scheduled");
    }
    if tasks.is_empty() {
        warn!("All sweeps disabled; nothing to do");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    for task in tasks {
        task.abort();
    }

    Ok(())
}
