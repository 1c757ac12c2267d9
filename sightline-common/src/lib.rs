//! Common types and utilities shared across Sightline crates.
//!
//! This crate defines configuration sections, UI state snapshots and
//! observability helpers used throughout the Sightline workspace. It stays dependency-minimal so every crate (drivers, cache, agent, runner) can
//! depend on it without pulling in browser or HTTP stacks.
//!
//! # Overview
//!
//! - [`SightlineConfig`]: Top-level runtime configuration and its sections
//! - [`BrowserState`], [`Point`], [`Fingerprint`]: ephemeral UI observations
//! - [`observability`]: Centralised tracing/logging initialisation
//!
//! # Examples
//!
//! ```rust
//! use sightline_common::{Platform, SightlineConfig};
//!
//! let cfg = SightlineConfig::default();
//! assert_eq!(cfg.browser.platform, Platform::Web);
//! assert_eq!(cfg.retry.max_retries, 3);
//! assert!(cfg.cache.enabled);
//! ```
pub mod config;
pub mod observability;
pub mod state;

pub use config::{
    AiConfig, BrowserConfig, CacheConfig, GithubConfig, MailosaurConfig, Platform, RetryConfig,
    ScreenshotConfig, SightlineConfig,
};
pub use state::{
    BrowserState, CursorState, ElementDescriptor, Fingerprint, Point, Size, WindowState,
};

/// Milliseconds since the Unix epoch, the timestamp unit persisted in cache files.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
