//! Skyhook - k3s clusters on public clouds in one command
//!
//! Skyhook creates a VM on DigitalOcean, Linode or Vultr, installs k3s on it
//! and leaves a ready to use kubeconfig in the project directory.
//!
//! - Region selection by measured latency
//! - k3s release resolution from channels or explicit versions
//! - Provider independent VM lifecycle
//! - Installation over SSH with connection retry

pub mod cloud;
pub mod config;
pub mod error;
pub mod install;
pub mod lifecycle;
pub mod orchestrator;
pub mod probe;
pub mod release;
pub mod retry;
pub mod sshkey;

#[cfg(test)]
mod testing;

pub use error::{Result, SkyhookError};
