//! Remote k3s installation
//!
//! A VM reported as running may not accept SSH connections yet, so dialing
//! is retried a bounded number of times. After the install script finishes
//! the generated kubeconfig is fetched, pointed at the VM's public address
//! and saved locally.

pub mod kubeconfig;
pub mod ssh;

pub use kubeconfig::{rewrite_kubeconfig, write_kubeconfig};
pub use ssh::Ssh2Connector;

use crate::error::{Result, SkyhookError};
use crate::retry::{retry, RetryConfig};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Remote login used for installation
pub const REMOTE_USER: &str = "root";

pub const SSH_PORT: u16 = 22;

/// Where k3s writes its kubeconfig on the server
pub const REMOTE_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

/// Local kubeconfig, relative to the project directory
pub const LOCAL_KUBECONFIG: &str = "kubeconfig";

pub const DIAL_ATTEMPTS: u32 = 6;
pub const DIAL_DELAY: Duration = Duration::from_secs(5);

/// Result of a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// An open connection that can run commands
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Opens authenticated sessions
#[async_trait]
pub trait SshConnector: Send + Sync {
    async fn connect(&self, host: &str, port: u16, user: &str) -> Result<Box<dyn RemoteSession>>;
}

/// Command that installs `version` of k3s
pub fn install_command(version: &str) -> String {
    format!(
        "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION={} sh -",
        shell_quote(version)
    )
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn check(output: CommandOutput) -> Result<CommandOutput> {
    if output.status == 0 {
        return Ok(output);
    }

    let message = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    Err(SkyhookError::RemoteCommandFailed {
        status: output.status,
        message,
    })
}

/// Installs k3s on a fresh VM and retrieves its credentials
pub struct RemoteInstaller {
    connector: Arc<dyn SshConnector>,
    dial_retry: RetryConfig,
    kubeconfig_path: PathBuf,
}

impl RemoteInstaller {
    pub fn new(connector: Arc<dyn SshConnector>, project_dir: &Path) -> Self {
        Self {
            connector,
            dial_retry: RetryConfig::fixed(DIAL_ATTEMPTS, DIAL_DELAY),
            kubeconfig_path: project_dir.join(LOCAL_KUBECONFIG),
        }
    }

    pub fn with_dial_retry(mut self, retry: RetryConfig) -> Self {
        self.dial_retry = retry;
        self
    }

    /// Install `version` on the VM at `public_ip`; returns the written kubeconfig path
    pub async fn install(&self, public_ip: &str, version: &str, cluster_name: &str) -> Result<PathBuf> {
        tracing::info!("connecting to {}", public_ip);
        let session = retry(&self.dial_retry, "ssh dial", || {
            self.connector.connect(public_ip, SSH_PORT, REMOTE_USER)
        })
        .await?;

        tracing::info!("installing k3s {}", version);
        let output = check(session.run(&install_command(version)).await?)?;
        tracing::debug!("install output: {}", output.stdout.trim());

        let output = check(session.run(&format!("cat {}", REMOTE_KUBECONFIG)).await?)?;
        let kubeconfig = rewrite_kubeconfig(&output.stdout, public_ip, cluster_name)?;

        write_kubeconfig(&self.kubeconfig_path, &kubeconfig)?;
        tracing::info!("kubeconfig written to {}", self.kubeconfig_path.display());

        Ok(self.kubeconfig_path.clone())
    }
}
