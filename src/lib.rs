//! CommunityPatch - hosting for community Jamf patch definitions
//!
//! Contributors register, receive API tokens, and publish versioned patch
//! definitions that Jamf Pro servers read back through a public API.
//!
//! ## Modules
//!
//! - **definitions**: the definition document and the pure version edit engine
//! - **store**: catalog and object store contracts with Mongo, filesystem and in-memory adapters
//! - **auth**: token codec, key ring and the per-request authorizer
//! - **services**: title lifecycle, version persistence, subscription sync, reconciliation, contributors
//! - **routes**: request dispatch over plain `ApiRequest`/`ApiResponse` records

pub mod auth;
pub mod config;
pub mod definitions;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod types;

pub use config::Args;
pub use routes::handle_request;
pub use state::{AppState, Collaborators, Settings};
pub use types::{ApiRequest, ApiResponse, PatchError, Result};
