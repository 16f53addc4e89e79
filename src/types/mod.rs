//! Shared types for CommunityPatch

pub mod api;
pub mod error;

pub use api::{ApiRequest, ApiResponse};
pub use error::{PatchError, Result};
