//! gwaripper core library
//!
//! Crawls audio-hosting sites and Reddit submissions, builds a tree of
//! downloadable assets and pulls them to a local library while keeping track
//! of what was already fetched.
//!
//! # Architecture
//!
//! - [`content`] - Content tree (`FileInfo`, `FileCollection`, `RedditInfo`)
//! - [`report`] - Per-URL outcome codes and the run report
//! - [`extractor`] - Site extractors, registry and the `extract` entry point
//! - [`download`] - Chunked HTTP and segmented HLS downloaders
//! - [`library`] - Persistence of downloaded files and collections
//! - [`ripper`] - The `GwaRipper` orchestrator

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod content;
pub mod db;
pub mod download;
pub mod extractor;
pub mod library;
pub mod report;
pub mod ripper;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, RipperConfig};
pub use content::{ContentTree, FileCollection, FileInfo, NodeId, RedditInfo, TreeError};
pub use db::Database;
pub use download::{DownloadError, HttpClient, RateLimiter};
pub use extractor::{
    AudioHost, BrokenExtractors, ExtractContext, ExtractorSettings, ExtractorType,
    RedditSubmission, SiteUrls, extract, find_extractor,
};
pub use report::{DownloadErrorCode, ExtractorErrorCode, ExtractorReport, ReportId, ReportTree};
pub use ripper::{GwaRipper, RipperError};
