//! sourceintel: source intelligence for real-estate listing feeds
//!
//! Captures listing pages as content-addressed snapshots, resolves them into
//! observed listings through fingerprint matching, raises anomaly signals,
//! and tracks human review of those signals.

pub mod commands;
pub mod config;
pub mod crawl;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod meta;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod review;
pub mod snapshot;

pub use error::{Error, Result};
pub use pipeline::{CrawlItem, IngestStats, Pipeline};
