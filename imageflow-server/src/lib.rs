//! # ImageFlow Server
//!
//! Self-hosted image delivery service. Uploads are classified by
//! orientation, transcoded to WebP and AVIF through a bounded worker pool,
//! and persisted under a deterministic key layout; reads negotiate the
//! best variant per client and pick uniformly at random within optional
//! tag and orientation constraints.
//!
//! The server is built on Axum and uses:
//! - Redis for the metadata index and page cache
//! - A local filesystem or any S3-compatible endpoint for blob storage
//! - libwebp and rav1e (via `webp`/`ravif`) for variant encoding

/// Error types and handling
pub mod errors;

/// Request handlers
pub mod handlers;

/// Bearer authentication middleware
pub mod middleware;

/// Router assembly
pub mod routes;

/// Shared application state
pub mod state;

pub use routes::build_router;
pub use state::AppState;
