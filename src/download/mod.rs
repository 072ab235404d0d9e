//! Low-level transfers: chunked HTTP and segmented HLS.
//!
//! # Features
//!
//! - Streaming downloads with an optional `indicatif` progress bar
//! - Content-too-short detection against the declared `Content-Length`
//! - Partial files removed on failure
//! - Per-domain request spacing shared by page fetches and transfers
//! - HLS segment retries with exponential backoff, joined by ffmpeg

mod client;
pub mod constants;
mod error;
pub mod hls;
pub mod rate_limiter;

pub use client::HttpClient;
pub use error::DownloadError;
pub use hls::{BackoffPolicy, SegmentSource, download_hls};
pub use rate_limiter::{RateLimiter, extract_domain};
