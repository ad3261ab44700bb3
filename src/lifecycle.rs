//! VM lifecycle driver
//!
//! Once a VM is requested the driver polls the provider until it reports
//! `Running`, then hands back the VM's public address. There is no attempt
//! limit here; callers wrap the wait in a timeout if they need one.

use crate::cloud::{CloudProvider, VmInfo, VmStatus};
use crate::error::{Result, SkyhookError};
use std::sync::Arc;
use std::time::Duration;

/// Delay between status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Where a VM is in its life, as seen by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Create call accepted, no status seen yet
    Requested,
    Provisioning,
    Running,
    Failed,
}

impl LifecyclePhase {
    fn after(status: &VmStatus) -> Self {
        match status {
            VmStatus::Running => LifecyclePhase::Running,
            VmStatus::Failed => LifecyclePhase::Failed,
            VmStatus::Provisioning | VmStatus::Unknown(_) => LifecyclePhase::Provisioning,
        }
    }
}

/// Polls a provider until a VM is usable
pub struct VmLifecycle {
    provider: Arc<dyn CloudProvider>,
    poll_interval: Duration,
}

impl VmLifecycle {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Wait for `vm` to run and return its latest info and public address
    pub async fn wait_until_running(&self, vm: &VmInfo) -> Result<(VmInfo, String)> {
        let mut phase = LifecyclePhase::Requested;
        let mut last_status: Option<VmStatus> = None;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let info = self.provider.get_vm_info(&vm.id).await?;

            if last_status.as_ref() != Some(&info.status) {
                tracing::info!("vm {} is {}", vm.id, info.status);
                last_status = Some(info.status.clone());
            }

            let next = LifecyclePhase::after(&info.status);
            if next != phase {
                tracing::debug!("vm {} phase {:?} -> {:?}", vm.id, phase, next);
                phase = next;
            }

            match phase {
                LifecyclePhase::Failed => {
                    return Err(SkyhookError::ProviderRejected(format!(
                        "vm {} failed to provision",
                        vm.id
                    )))
                }
                LifecyclePhase::Running => {
                    let ip = info
                        .public_ipv4()
                        .map(str::to_string)
                        .ok_or_else(|| SkyhookError::NoPublicAddress(vm.id.clone()))?;
                    return Ok((info, ip));
                }
                LifecyclePhase::Requested | LifecyclePhase::Provisioning => {}
            }
        }
    }
}
