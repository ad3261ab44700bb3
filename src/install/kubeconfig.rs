//! Cluster credential handling

use crate::error::{Result, SkyhookError};
use regex::{Captures, Regex};
use std::io::Write;
use std::path::Path;

/// Point a k3s generated kubeconfig at `public_ip` and rename its `default`
/// cluster, context and user to `cluster_name`
pub fn rewrite_kubeconfig(contents: &str, public_ip: &str, cluster_name: &str) -> Result<String> {
    let server = Regex::new(r"(?m)^(\s*server:\s*https?://)(?:127\.0\.0\.1|localhost)\b")
        .map_err(|e| SkyhookError::Internal(e.to_string()))?;
    let names = Regex::new(
        r"(?m)^(\s*(?:-\s+)?(?:name|cluster|user|current-context):[ \t]*)default[ \t]*$",
    )
    .map_err(|e| SkyhookError::Internal(e.to_string()))?;

    let rewritten = server.replace_all(contents, |caps: &Captures| {
        format!("{}{}", &caps[1], public_ip)
    });
    let rewritten = names.replace_all(&rewritten, |caps: &Captures| {
        format!("{}{}", &caps[1], cluster_name)
    });

    Ok(rewritten.into_owned())
}

/// Write credentials readable by the owner only, replacing any existing file
pub fn write_kubeconfig(path: &Path, contents: &str) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;

    // mode() only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const K3S_YAML: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t
    server: https://127.0.0.1:6443
  name: default
contexts:
- context:
    cluster: default
    user: default
  name: default
current-context: default
kind: Config
preferences: {}
users:
- name: default
  user:
    password: 5b2e3f0c
    username: admin
";

    #[test]
    fn test_rewrite_kubeconfig() {
        let rewritten = rewrite_kubeconfig(K3S_YAML, "203.0.113.5", "demo").unwrap();

        assert!(rewritten.contains("server: https://203.0.113.5:6443"));
        assert!(rewritten.contains("current-context: demo"));
        assert!(rewritten.contains("- name: demo"));
        assert!(rewritten.contains("    cluster: demo"));
        assert!(rewritten.contains("    user: demo"));
        assert!(!rewritten.contains("127.0.0.1"));
        assert!(!rewritten.contains("default"));
        // untouched lines
        assert!(rewritten.contains("username: admin"));
        assert!(rewritten.contains("kind: Config"));
    }

    #[test]
    fn test_rewrite_localhost_server() {
        let yaml = "clusters:\n- cluster:\n    server: https://localhost:6443\n  name: default\n";
        let rewritten = rewrite_kubeconfig(yaml, "198.51.100.9", "shop").unwrap();
        assert_eq!(
            rewritten,
            "clusters:\n- cluster:\n    server: https://198.51.100.9:6443\n  name: shop\n"
        );
    }

    #[test]
    fn test_write_kubeconfig_overwrites_with_private_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kubeconfig");
        std::fs::write(&path, "old contents that are longer than the new ones").unwrap();

        write_kubeconfig(&path, "new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
