//! Release catalog
//!
//! Channels and releases are fetched at most once per catalog and are
//! read-only afterwards, so resolving the same request twice within one run
//! always gives the same answer.

use super::feed::{ReleaseChannel, ReleaseFeed, UpstreamRelease};
use super::version::{parse_channel, Release};
use super::{DEFAULT_BUILD_TAG, MINIMUM_CHANNEL};
use crate::error::{Result, SkyhookError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Channels and published releases, keyed by channel name
pub struct ReleaseCatalog {
    feed: Arc<dyn ReleaseFeed>,
    channels: OnceCell<Vec<ReleaseChannel>>,
    /// Channel name -> final release names, newest first
    releases: OnceCell<BTreeMap<String, Vec<String>>>,
}

impl ReleaseCatalog {
    pub fn new(feed: Arc<dyn ReleaseFeed>) -> Self {
        Self {
            feed,
            channels: OnceCell::new(),
            releases: OnceCell::new(),
        }
    }

    /// Fetch release channels; no-op once loaded
    pub async fn load_channels(&self) -> Result<()> {
        self.channels
            .get_or_try_init(|| async {
                let channels = self.feed.fetch_channels().await?;
                tracing::debug!("loaded {} release channels", channels.len());
                Ok::<_, SkyhookError>(filter_channels(channels))
            })
            .await?;
        Ok(())
    }

    /// Fetch published releases; no-op once loaded
    pub async fn load_releases(&self) -> Result<()> {
        self.releases
            .get_or_try_init(|| async {
                let upstream = self.feed.fetch_releases().await?;
                tracing::debug!("loaded {} upstream releases", upstream.len());
                Ok::<_, SkyhookError>(bucket_releases(&upstream))
            })
            .await?;
        Ok(())
    }

    /// Loaded channels, empty until `load_channels` succeeds
    pub fn channels(&self) -> &[ReleaseChannel] {
        self.channels.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Final releases of a channel, newest first
    pub fn releases_for(&self, channel: &str) -> &[String] {
        self.releases
            .get()
            .and_then(|r| r.get(channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All loaded release buckets
    pub fn releases(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        self.releases.get()
    }

    /// Turn a user supplied version into one exact release name.
    ///
    /// Channel names (`stable`, `latest`, `v1.18`, `1.18`) map to the
    /// channel's latest release. Anything else must name a published final
    /// release; `+k3s1` is assumed when no build tag is given.
    pub async fn resolve(&self, requested: &str) -> Result<String> {
        self.load_channels().await?;

        let requested = requested.trim();
        let normalized = if requested.starts_with(|c: char| c.is_ascii_digit()) {
            format!("v{}", requested)
        } else {
            requested.to_string()
        };

        if let Some(channel) = self.channels().iter().find(|c| c.name == normalized) {
            return Ok(channel.latest_release.clone());
        }

        self.load_releases().await?;

        let explicit = if normalized.contains('+') {
            normalized
        } else {
            format!("{}+{}", normalized, DEFAULT_BUILD_TAG)
        };

        let release = Release::parse(&explicit)
            .map_err(|_| SkyhookError::InvalidReleaseFormat(requested.to_string()))?;

        if self
            .releases_for(&release.channel)
            .iter()
            .any(|name| *name == release.full_name)
        {
            Ok(release.full_name)
        } else {
            Err(SkyhookError::ReleaseNotFound(requested.to_string()))
        }
    }
}

fn is_supported(major: u32, minor: u32) -> bool {
    (major, minor) >= MINIMUM_CHANNEL
}

/// Drop numeric channels older than the supported floor
fn filter_channels(channels: Vec<ReleaseChannel>) -> Vec<ReleaseChannel> {
    channels
        .into_iter()
        .filter(|c| match parse_channel(&c.name) {
            Some((major, minor)) => is_supported(major, minor),
            None => true,
        })
        .collect()
}

/// Group final, supported releases by channel, newest first
fn bucket_releases(upstream: &[UpstreamRelease]) -> BTreeMap<String, Vec<String>> {
    let mut buckets: BTreeMap<String, Vec<Release>> = BTreeMap::new();

    for item in upstream.iter().filter(|r| !r.draft && !r.prerelease) {
        let release = match Release::parse(&item.tag_name) {
            Ok(release) => release,
            Err(_) => {
                tracing::debug!("skipping unparseable release tag {}", item.tag_name);
                continue;
            }
        };

        if !release.is_final() || !is_supported(release.major, release.minor) {
            continue;
        }

        buckets.entry(release.channel.clone()).or_default().push(release);
    }

    buckets
        .into_iter()
        .map(|(channel, mut releases)| {
            releases.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
            releases.dedup_by(|a, b| a.full_name == b.full_name);
            let names = releases.into_iter().map(|r| r.full_name).collect();
            (channel, names)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeFeed {
        channels: Vec<ReleaseChannel>,
        releases: Vec<UpstreamRelease>,
        channel_fetches: AtomicUsize,
        release_fetches: AtomicUsize,
    }

    fn channel(name: &str, latest: &str) -> ReleaseChannel {
        ReleaseChannel {
            name: name.to_string(),
            latest_release: latest.to_string(),
        }
    }

    fn upstream(tag: &str) -> UpstreamRelease {
        UpstreamRelease {
            tag_name: tag.to_string(),
            draft: false,
            prerelease: false,
        }
    }

    impl FakeFeed {
        fn new() -> Arc<Self> {
            let mut draft = upstream("v1.19.4+k3s1");
            draft.draft = true;
            let mut flagged = upstream("v1.19.3+k3s3");
            flagged.prerelease = true;

            Arc::new(Self {
                channels: vec![
                    channel("stable", "v1.18.10+k3s1"),
                    channel("latest", "v1.19.3+k3s2"),
                    channel("v1.18", "v1.18.10+k3s1"),
                    channel("v1.15", "v1.15.12+k3s1"),
                ],
                releases: vec![
                    upstream("v1.18.9+k3s1"),
                    upstream("v1.18.10+k3s1"),
                    upstream("v1.18.10-rc1+k3s1"),
                    upstream("v1.19.3+k3s2"),
                    upstream("v1.19.3+k3s1"),
                    upstream("v1.15.12+k3s1"),
                    upstream("v1.17.0"),
                    upstream("not-a-version"),
                    draft,
                    flagged,
                ],
                channel_fetches: AtomicUsize::new(0),
                release_fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReleaseFeed for FakeFeed {
        async fn fetch_channels(&self) -> Result<Vec<ReleaseChannel>> {
            self.channel_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.channels.clone())
        }

        async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
            self.release_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.releases.clone())
        }
    }

    struct OfflineFeed;

    #[async_trait]
    impl ReleaseFeed for OfflineFeed {
        async fn fetch_channels(&self) -> Result<Vec<ReleaseChannel>> {
            Err(SkyhookError::NetworkUnavailable("offline".to_string()))
        }

        async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
            Err(SkyhookError::NetworkUnavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_resolve_channel_names() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());

        assert_eq!(catalog.resolve("stable").await.unwrap(), "v1.18.10+k3s1");
        assert_eq!(catalog.resolve("latest").await.unwrap(), "v1.19.3+k3s2");
        assert_eq!(catalog.resolve("1.18").await.unwrap(), "v1.18.10+k3s1");
        assert_eq!(catalog.resolve("v1.18").await.unwrap(), "v1.18.10+k3s1");
    }

    #[tokio::test]
    async fn test_resolve_is_stable_and_fetches_once() {
        let feed = FakeFeed::new();
        let catalog = ReleaseCatalog::new(feed.clone());

        let first = catalog.resolve("stable").await.unwrap();
        let second = catalog.resolve("stable").await.unwrap();
        assert_eq!(first, second);

        catalog.resolve("1.18.10").await.unwrap();
        catalog.resolve("v1.18.9").await.unwrap();

        assert_eq!(feed.channel_fetches.load(Ordering::SeqCst), 1);
        assert_eq!(feed.release_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_explicit_releases() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());

        assert_eq!(catalog.resolve("1.18.10").await.unwrap(), "v1.18.10+k3s1");
        assert_eq!(catalog.resolve("v1.18.10+k3s1").await.unwrap(), "v1.18.10+k3s1");
        assert_eq!(catalog.resolve("v1.19.3+k3s1").await.unwrap(), "v1.19.3+k3s1");
    }

    #[tokio::test]
    async fn test_resolve_unknown_release() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());

        let err = catalog.resolve("v1.18.99").await.unwrap_err();
        assert!(matches!(err, SkyhookError::ReleaseNotFound(ref v) if v == "v1.18.99"));

        // pre-releases never make it into the catalog
        let err = catalog.resolve("v1.18.10-rc1+k3s1").await.unwrap_err();
        assert!(matches!(err, SkyhookError::ReleaseNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_garbage_is_invalid_format() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());

        for input in ["edge", "1.18.x", "v1"] {
            let err = catalog.resolve(input).await.unwrap_err();
            assert!(
                matches!(err, SkyhookError::InvalidReleaseFormat(ref v) if v == input),
                "{} should be rejected",
                input
            );
        }
    }

    #[tokio::test]
    async fn test_catalog_filtering() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());
        catalog.load_releases().await.unwrap();

        assert_eq!(catalog.releases_for("v1.18"), ["v1.18.10+k3s1", "v1.18.9+k3s1"]);
        assert_eq!(catalog.releases_for("v1.19"), ["v1.19.3+k3s2", "v1.19.3+k3s1"]);
        // below the floor, or without a build tag
        assert!(catalog.releases_for("v1.15").is_empty());
        assert!(catalog.releases_for("v1.17").is_empty());

        for names in catalog.releases().unwrap().values() {
            for name in names {
                let release = Release::parse(name).unwrap();
                assert!(release.is_final());
            }
        }
    }

    #[tokio::test]
    async fn test_old_channels_are_dropped() {
        let catalog = ReleaseCatalog::new(FakeFeed::new());
        catalog.load_channels().await.unwrap();

        let names: Vec<&str> = catalog.channels().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["stable", "latest", "v1.18"]);
    }

    #[tokio::test]
    async fn test_feed_failure_propagates() {
        let catalog = ReleaseCatalog::new(Arc::new(OfflineFeed));
        let err = catalog.resolve("stable").await.unwrap_err();
        assert!(matches!(err, SkyhookError::NetworkUnavailable(_)));
        assert!(catalog.channels().is_empty());
    }
}
