//! Local SSH key material

use crate::error::{Result, SkyhookError};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};

/// An OpenSSH public key and its MD5 fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKey {
    /// Key algorithm (`ssh-rsa`, `ssh-ed25519`, ...)
    pub key_type: String,
    /// Public key as it appears in `authorized_keys`
    pub public_key: String,
    /// Colon separated MD5 fingerprint of the key blob
    pub fingerprint: String,
    /// Where the public key was read from
    pub path: Option<PathBuf>,
}

impl SshKey {
    /// Read a public key file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SkyhookError::InvalidSshKey(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut key = Self::parse(&contents)?;
        key.path = Some(path.to_path_buf());
        Ok(key)
    }

    /// Parse a single `authorized_keys` style line
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let (key_type, encoded) = match (fields.next(), fields.next()) {
            (Some(t), Some(k)) => (t, k),
            _ => {
                return Err(SkyhookError::InvalidSshKey(
                    "expected '<type> <base64> [comment]'".to_string(),
                ))
            }
        };

        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| SkyhookError::InvalidSshKey(format!("bad key encoding: {}", e)))?;

        Ok(Self {
            key_type: key_type.to_string(),
            public_key: line.trim().to_string(),
            fingerprint: md5_fingerprint(&blob),
            path: None,
        })
    }

    /// Name used when uploading the key to a provider account.
    ///
    /// Accounts can be shared, so the first 8 hex characters of the
    /// fingerprint are appended to keep names unique.
    pub fn upload_name(&self, display_name: &str) -> String {
        let hex: String = self
            .fingerprint
            .chars()
            .filter(|c| *c != ':')
            .take(8)
            .collect();
        format!("{}-{}", display_name, hex)
    }

    /// Private key path next to the public key (`id_rsa.pub` -> `id_rsa`)
    pub fn private_key_path(&self) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        match path.extension() {
            Some(ext) if ext == "pub" => Some(path.with_extension("")),
            _ => None,
        }
    }

    /// Whether a provider-side public key is this key
    pub fn matches(&self, other_public_key: &str) -> bool {
        SshKey::parse(other_public_key)
            .map(|other| other.fingerprint == self.fingerprint)
            .unwrap_or(false)
    }
}

/// `~/.ssh/id_rsa.pub`
pub fn default_public_key_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("id_rsa.pub"))
}

fn md5_fingerprint(blob: &[u8]) -> String {
    Md5::digest(blob)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PUBLIC_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f dev@laptop";

    #[test]
    fn test_fingerprint() {
        let key = SshKey::parse(PUBLIC_KEY).unwrap();
        assert_eq!(key.key_type, "ssh-ed25519");
        assert_eq!(key.fingerprint, "0f:a2:0a:d7:38:3e:65:45:08:6b:63:84:1c:ff:dc:ba");
    }

    #[test]
    fn test_upload_name() {
        let key = SshKey::parse(PUBLIC_KEY).unwrap();
        assert_eq!(key.upload_name("dev"), "dev-0fa20ad7");
    }

    #[test]
    fn test_matches_ignores_comment() {
        let key = SshKey::parse(PUBLIC_KEY).unwrap();
        assert!(key.matches(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f"
        ));
        assert!(!key.matches("ssh-rsa AAAAB3NzaC1yc2EAAAADAQAB"));
        assert!(!key.matches("garbage"));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(SshKey::parse(""), Err(SkyhookError::InvalidSshKey(_))));
        assert!(matches!(
            SshKey::parse("ssh-rsa not*base64"),
            Err(SkyhookError::InvalidSshKey(_))
        ));
    }

    #[test]
    fn test_load_and_private_key_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id_ed25519.pub");
        std::fs::write(&path, format!("{}\n", PUBLIC_KEY)).unwrap();

        let key = SshKey::load(&path).unwrap();
        assert_eq!(key.public_key, PUBLIC_KEY);
        assert_eq!(key.private_key_path(), Some(dir.path().join("id_ed25519")));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = SshKey::load(&dir.path().join("nope.pub")).unwrap_err();
        assert!(matches!(err, SkyhookError::InvalidSshKey(_)));
    }
}
