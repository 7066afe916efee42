//! # ImageFlow Core
//!
//! Library underpinning the ImageFlow image delivery service:
//!
//! - **Object storage**: byte-addressable blob store with interchangeable
//!   filesystem and S3-compatible backends
//! - **Metadata index**: Redis-backed record store with upload-time, tag,
//!   and expiry indexes plus a bounded page cache
//! - **Transcoding**: WebP/AVIF variant generation behind a bounded
//!   worker pool
//! - **Upload, selection, sweeping, reconciliation**: the service's write
//!   path, content-negotiated read path, and maintenance passes

/// Admin operations spanning the store and the index
pub mod admin;

/// Environment-driven configuration
pub mod config;

/// Error types and handling
pub mod error;

/// Metadata index trait and backends
pub mod index;

/// Domain model: records, key layout, id generation
pub mod model;

/// Orphan reconciliation between store and index
pub mod reconcile;

/// Content negotiation and random selection
pub mod select;

/// Blob storage trait and backends
pub mod storage;

/// Expired-image sweeping
pub mod sweep;

/// Format detection, variant encoding, worker pool
pub mod transcode;

/// Upload orchestration
pub mod upload;

pub use error::{ImageFlowError, Result};
