//! k3s release management
//!
//! This module knows how k3s versions are spelled, where the release channels
//! and the list of published releases live, and how to turn what a user typed
//! (`stable`, `1.18`, `v1.18.10`, `v1.18.10+k3s1`) into one exact release.

pub mod catalog;
pub mod feed;
pub mod version;

pub use catalog::ReleaseCatalog;
pub use feed::{HttpReleaseFeed, ReleaseChannel, ReleaseFeed, UpstreamRelease};
pub use version::Release;

/// Build tag appended to explicit versions that omit one
pub const DEFAULT_BUILD_TAG: &str = "k3s1";

/// Oldest supported channel as (major, minor)
pub const MINIMUM_CHANNEL: (u32, u32) = (1, 16);
