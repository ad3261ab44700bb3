//! Remote sources of release information

use crate::error::{Result, SkyhookError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// k3s channel server
pub const CHANNELS_URL: &str = "https://update.k3s.io/v1-release/channels";

/// First page of the k3s releases on GitHub
pub const RELEASES_URL: &str = "https://api.github.com/repos/k3s-io/k3s/releases?page=1&per_page=100";

/// Timeout applied to every feed request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A release channel and the release it currently points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChannel {
    pub name: String,
    #[serde(rename = "latest")]
    pub latest_release: String,
}

/// A release as published upstream
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamRelease {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

/// Where channel and release data comes from
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Fetch all release channels
    async fn fetch_channels(&self) -> Result<Vec<ReleaseChannel>>;

    /// Fetch every published release, following pagination
    async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>>;
}

/// Channel feed body; the channel server wraps the list in `data`
#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelsResponse {
    Wrapped { data: Vec<ReleaseChannel> },
    Bare(Vec<ReleaseChannel>),
}

/// Parse a channel feed body
pub fn parse_channels(body: &str) -> Result<Vec<ReleaseChannel>> {
    let response: ChannelsResponse = serde_json::from_str(body)?;
    Ok(match response {
        ChannelsResponse::Wrapped { data } => data,
        ChannelsResponse::Bare(channels) => channels,
    })
}

/// Extract the `rel="next"` URL from a `Link` header
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut fields = entry.split(';');
        let url = fields.next()?.trim();
        let is_next = fields.any(|f| f.trim() == "rel=\"next\"");
        if is_next {
            Some(url.trim_start_matches('<').trim_end_matches('>').to_string())
        } else {
            None
        }
    })
}

/// Feed backed by the k3s channel server and the GitHub releases API
pub struct HttpReleaseFeed {
    client: reqwest::Client,
    channels_url: String,
    releases_url: String,
}

impl HttpReleaseFeed {
    pub fn new() -> Result<Self> {
        Self::with_urls(CHANNELS_URL, RELEASES_URL)
    }

    pub fn with_urls(channels_url: &str, releases_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("skyhook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            channels_url: channels_url.to_string(),
            releases_url: releases_url.to_string(),
        })
    }
}

#[async_trait]
impl ReleaseFeed for HttpReleaseFeed {
    async fn fetch_channels(&self) -> Result<Vec<ReleaseChannel>> {
        let response = self
            .client
            .get(&self.channels_url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SkyhookError::NetworkUnavailable(format!(
                "channel feed returned {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        parse_channels(&body)
    }

    async fn fetch_releases(&self) -> Result<Vec<UpstreamRelease>> {
        let mut releases = Vec::new();
        let mut next = Some(self.releases_url.clone());

        while let Some(url) = next.take() {
            let response = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github.v3+json")
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(SkyhookError::NetworkUnavailable(format!(
                    "release feed returned {}",
                    response.status()
                )));
            }

            next = response
                .headers()
                .get("Link")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_next_link);

            let page: Vec<UpstreamRelease> = response.json().await?;
            tracing::debug!("fetched {} releases from {}", page.len(), url);
            releases.extend(page);
        }

        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response, StubServer};

    #[test]
    fn test_parse_next_link() {
        let header = r#"<https://api.github.com/repositories/1/releases?page=2&per_page=100>; rel="next", <https://api.github.com/repositories/1/releases?page=5&per_page=100>; rel="last""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/releases?page=2&per_page=100")
        );
    }

    #[test]
    fn test_last_page_has_no_next_link() {
        let header = r#"<https://api.github.com/repositories/1/releases?page=4&per_page=100>; rel="prev", <https://api.github.com/repositories/1/releases?page=1&per_page=100>; rel="first""#;
        assert_eq!(parse_next_link(header), None);
        assert_eq!(parse_next_link(""), None);
    }

    #[test]
    fn test_parse_wrapped_channels() {
        let body = r#"{
            "type": "collection",
            "data": [
                {"id": "stable", "name": "stable", "latest": "v1.18.10+k3s1", "type": "channel"},
                {"id": "latest", "name": "latest", "latest": "v1.19.3+k3s2", "type": "channel"}
            ]
        }"#;

        let channels = parse_channels(body).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "stable");
        assert_eq!(channels[0].latest_release, "v1.18.10+k3s1");
    }

    #[test]
    fn test_parse_bare_channels() {
        let body = r#"[{"name": "v1.18", "latest": "v1.18.10+k3s1"}]"#;
        let channels = parse_channels(body).unwrap();
        assert_eq!(channels[0].name, "v1.18");
    }

    #[test]
    fn test_upstream_release_defaults() {
        let releases: Vec<UpstreamRelease> =
            serde_json::from_str(r#"[{"tag_name": "v1.18.10+k3s1", "name": ""}]"#).unwrap();
        assert!(!releases[0].draft);
        assert!(!releases[0].prerelease);
    }

    #[tokio::test]
    async fn test_fetch_releases_follows_next_link() {
        let server = StubServer::start(|base| {
            let link = format!(
                "<{base}/releases?page=2>; rel=\"next\", <{base}/releases?page=2>; rel=\"last\""
            );
            vec![
                response("200 OK", &[("Link", &link)], r#"[{"tag_name": "v1.18.10+k3s1"}]"#),
                response("200 OK", &[], r#"[{"tag_name": "v1.18.9+k3s1", "draft": false}]"#),
            ]
        })
        .await;

        let feed = HttpReleaseFeed::with_urls(
            &format!("{}/channels", server.base_url),
            &format!("{}/releases?page=1", server.base_url),
        )
        .unwrap();
        let releases = feed.fetch_releases().await.unwrap();

        let tags: Vec<&str> = releases.iter().map(|r| r.tag_name.as_str()).collect();
        assert_eq!(tags, ["v1.18.10+k3s1", "v1.18.9+k3s1"]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /releases?page=1 "));
        assert!(requests[1].starts_with("GET /releases?page=2 "));
    }

    #[tokio::test]
    async fn test_fetch_releases_failure_is_network_error() {
        let server = StubServer::start(|_| {
            vec![response("403 Forbidden", &[], r#"{"message": "API rate limit exceeded"}"#)]
        })
        .await;

        let feed = HttpReleaseFeed::with_urls(
            &format!("{}/channels", server.base_url),
            &format!("{}/releases", server.base_url),
        )
        .unwrap();
        let err = feed.fetch_releases().await.unwrap_err();

        assert!(matches!(err, SkyhookError::NetworkUnavailable(ref m) if m.contains("403")));
    }
}
