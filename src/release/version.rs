//! k3s version strings

use crate::error::{Result, SkyhookError};
use std::fmt;

/// A parsed k3s release, e.g. `v1.19.2-rc1+k3s2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Full release name (`v1.19.2-rc1+k3s2`)
    pub full_name: String,
    /// Upstream Kubernetes version (`v1.19.2`)
    pub core_version: String,
    /// Channel the release belongs to (`v1.19`)
    pub channel: String,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (`rc1`), empty for final releases
    pub prerelease: String,
    /// Distribution build tag (`k3s2`)
    pub build: String,
}

impl Release {
    /// Parse `vMAJOR.MINOR.PATCH[-EXTRA][+BUILD]`; the leading `v` is optional
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = || SkyhookError::MalformedVersion(input.to_string());

        let trimmed = input.trim();
        let unprefixed = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (left, build) = match unprefixed.split_once('+') {
            Some((left, build)) if !build.is_empty() => (left, build),
            Some(_) => return Err(malformed()),
            None => (unprefixed, ""),
        };

        let (core, prerelease) = match left.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, pre),
            Some(_) => return Err(malformed()),
            None => (left, ""),
        };

        let numbers = core
            .split('.')
            .map(|part| part.parse::<u32>().map_err(|_| malformed()))
            .collect::<Result<Vec<u32>>>()?;

        let (major, minor, patch) = match numbers.as_slice() {
            [major, minor, patch] => (*major, *minor, *patch),
            _ => return Err(malformed()),
        };

        let mut release = Self {
            full_name: String::new(),
            core_version: format!("v{}.{}.{}", major, minor, patch),
            channel: channel_name(major, minor),
            major,
            minor,
            patch,
            prerelease: prerelease.to_string(),
            build: build.to_string(),
        };
        release.full_name = release.to_string();

        Ok(release)
    }

    /// A final release has a build tag and no pre-release tag
    pub fn is_final(&self) -> bool {
        self.prerelease.is_empty() && !self.build.is_empty()
    }

    /// Numeric suffix of the build tag (`k3s2` -> 2)
    pub fn build_number(&self) -> u32 {
        let digits: String = self
            .build
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().unwrap_or(0)
    }

    /// Key for ordering releases from oldest to newest
    pub fn sort_key(&self) -> (u32, u32, u32, u32) {
        (self.major, self.minor, self.patch, self.build_number())
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.core_version)?;
        if !self.prerelease.is_empty() {
            write!(f, "-{}", self.prerelease)?;
        }
        if !self.build.is_empty() {
            write!(f, "+{}", self.build)?;
        }
        Ok(())
    }
}

/// Channel name for a major/minor pair
pub fn channel_name(major: u32, minor: u32) -> String {
    format!("v{}.{}", major, minor)
}

/// Parse a channel name like `v1.18` back into its numbers
pub fn parse_channel(name: &str) -> Option<(u32, u32)> {
    let (major, minor) = name.strip_prefix('v')?.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_release() {
        let release = Release::parse("v1.19.2-rc1+k3s2").unwrap();
        assert_eq!(release.major, 1);
        assert_eq!(release.minor, 19);
        assert_eq!(release.patch, 2);
        assert_eq!(release.prerelease, "rc1");
        assert_eq!(release.build, "k3s2");
        assert_eq!(release.channel, "v1.19");
        assert_eq!(release.core_version, "v1.19.2");
        assert_eq!(release.full_name, "v1.19.2-rc1+k3s2");
        assert!(!release.is_final());
    }

    #[test]
    fn test_display_reconstructs_tags() {
        for tag in ["v1.19.2-rc1+k3s2", "v1.18.10+k3s1", "v1.17.4-alpha1+k3s1"] {
            let release = Release::parse(tag).unwrap();
            assert_eq!(release.to_string(), tag);
        }
    }

    #[test]
    fn test_bare_version_gets_prefix() {
        let release = Release::parse("1.18.3").unwrap();
        assert_eq!(release.full_name, "v1.18.3");
        assert!(release.build.is_empty());
        assert!(!release.is_final());
    }

    #[test]
    fn test_final_release() {
        let release = Release::parse("v1.18.10+k3s1").unwrap();
        assert!(release.is_final());
        assert_eq!(release.build_number(), 1);
    }

    #[test]
    fn test_malformed_versions() {
        for input in ["", "v1.18", "stable", "v1.x.3", "v1.18.3+", "v1.18.3-", "1.2.3.4"] {
            let err = Release::parse(input).unwrap_err();
            assert!(
                matches!(err, SkyhookError::MalformedVersion(_)),
                "{} should be malformed",
                input
            );
        }
    }

    #[test]
    fn test_parse_channel() {
        assert_eq!(parse_channel("v1.18"), Some((1, 18)));
        assert_eq!(parse_channel("stable"), None);
        assert_eq!(parse_channel("v1.18-testing"), None);
    }
}
