//! Latency probing
//!
//! Each cloud provider publishes a host per data center that answers pings.
//! The prober pings all of them at once and reports the id of the closest one.
//! Region selection is best effort: failed or filtered probes are ignored and,
//! if nothing answers, a fallback region is returned instead of an error.

pub mod icmp;

pub use icmp::IcmpPinger;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Number of echo requests sent to each target
pub const DEFAULT_PING_COUNT: u32 = 3;

/// Per-probe timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// A named endpoint used only to measure latency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Region identifier
    pub id: String,
    /// Host name or IP address to ping
    pub address: String,
}

impl ProbeTarget {
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
        }
    }
}

/// Outcome of probing a single target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub id: String,
    pub latency_millis: u64,
    pub ok: bool,
}

impl ProbeResult {
    fn unreachable(id: &str) -> Self {
        Self {
            id: id.to_string(),
            latency_millis: 0,
            ok: false,
        }
    }
}

/// Measures the average round trip time to an address
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn average_rtt(&self, address: &str, count: u32, timeout: Duration) -> Result<Duration>;
}

/// Prober settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests per target
    pub count: u32,
    /// Timeout for a single probe
    pub timeout: Duration,
    /// Region returned when no probe succeeds
    pub fallback: String,
}

impl ProbeConfig {
    pub fn with_fallback(fallback: &str) -> Self {
        Self {
            count: DEFAULT_PING_COUNT,
            timeout: DEFAULT_PROBE_TIMEOUT,
            fallback: fallback.to_string(),
        }
    }

    /// Wall-clock bound for a whole probing round
    pub fn deadline(&self) -> Duration {
        self.timeout + Duration::from_secs(1)
    }
}

/// Concurrent latency prober
pub struct LatencyProber {
    pinger: Arc<dyn Pinger>,
    config: ProbeConfig,
}

impl LatencyProber {
    pub fn new(pinger: Arc<dyn Pinger>, config: ProbeConfig) -> Self {
        Self { pinger, config }
    }

    /// Probe every target and return the id of the closest one
    pub async fn probe_all(&self, targets: &[ProbeTarget]) -> Result<String> {
        if targets.is_empty() {
            return Ok(self.config.fallback.clone());
        }

        let results = self.collect(targets).await;

        match closest(&results) {
            Some(id) => Ok(id.to_string()),
            None => {
                tracing::warn!(
                    "no region answered latency probes, using {}",
                    self.config.fallback
                );
                Ok(self.config.fallback.clone())
            }
        }
    }

    /// Run one probing round, returning results in arrival order
    async fn collect(&self, targets: &[ProbeTarget]) -> Vec<ProbeResult> {
        let (tx, mut rx) = mpsc::channel(targets.len());
        let mut tasks = JoinSet::new();

        for target in targets {
            let tx = tx.clone();
            let pinger = self.pinger.clone();
            let target = target.clone();
            let count = self.config.count;
            let timeout = self.config.timeout;

            tasks.spawn(async move {
                let result = match pinger.average_rtt(&target.address, count, timeout).await {
                    Ok(rtt) => {
                        tracing::debug!("{} ({}) {} ms", target.id, target.address, rtt.as_millis());
                        ProbeResult {
                            id: target.id.clone(),
                            latency_millis: rtt.as_millis() as u64,
                            ok: true,
                        }
                    }
                    Err(e) => {
                        tracing::debug!("probe of {} failed: {}", target.address, e);
                        ProbeResult::unreachable(&target.id)
                    }
                };
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(targets.len());
        let deadline = tokio::time::sleep(self.config.deadline());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(result) => results.push(result),
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::debug!(
                        "probe deadline reached with {}/{} results",
                        results.len(),
                        targets.len()
                    );
                    break;
                }
            }
        }

        tasks.abort_all();
        results
    }
}

/// Lowest-latency successful result; ties go to the first one seen
pub fn closest(results: &[ProbeResult]) -> Option<&str> {
    let mut best: Option<&ProbeResult> = None;
    for result in results.iter().filter(|r| r.ok) {
        match best {
            Some(current) if current.latency_millis <= result.latency_millis => {}
            _ => best = Some(result),
        }
    }
    best.map(|r| r.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkyhookError;
    use std::collections::HashMap;
    use std::time::Instant;

    enum Behaviour {
        Answer(u64),
        Fail,
        Hang,
    }

    struct FakePinger {
        hosts: HashMap<String, Behaviour>,
    }

    impl FakePinger {
        fn new(hosts: Vec<(&str, Behaviour)>) -> Arc<Self> {
            Arc::new(Self {
                hosts: hosts
                    .into_iter()
                    .map(|(h, b)| (h.to_string(), b))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl Pinger for FakePinger {
        async fn average_rtt(&self, address: &str, _count: u32, _timeout: Duration) -> Result<Duration> {
            match self.hosts.get(address) {
                Some(Behaviour::Answer(ms)) => Ok(Duration::from_millis(*ms)),
                Some(Behaviour::Hang) => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Duration::from_millis(1))
                }
                Some(Behaviour::Fail) | None => {
                    Err(SkyhookError::NetworkUnavailable("filtered".to_string()))
                }
            }
        }
    }

    fn quick_config() -> ProbeConfig {
        ProbeConfig {
            count: 3,
            timeout: Duration::from_millis(50),
            fallback: "fallback-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_picks_lowest_latency() {
        let pinger = FakePinger::new(vec![
            ("a.example", Behaviour::Answer(50)),
            ("b.example", Behaviour::Answer(20)),
            ("c.example", Behaviour::Fail),
        ]);
        let prober = LatencyProber::new(pinger, quick_config());
        let targets = vec![
            ProbeTarget::new("a", "a.example"),
            ProbeTarget::new("b", "b.example"),
            ProbeTarget::new("c", "c.example"),
        ];

        assert_eq!(prober.probe_all(&targets).await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_all_failures_use_fallback() {
        let pinger = FakePinger::new(vec![
            ("a.example", Behaviour::Fail),
            ("b.example", Behaviour::Fail),
        ]);
        let prober = LatencyProber::new(pinger, quick_config());
        let targets = vec![
            ProbeTarget::new("a", "a.example"),
            ProbeTarget::new("b", "b.example"),
        ];

        assert_eq!(prober.probe_all(&targets).await.unwrap(), "fallback-1");
    }

    #[tokio::test]
    async fn test_no_targets_use_fallback() {
        let prober = LatencyProber::new(FakePinger::new(vec![]), quick_config());
        assert_eq!(prober.probe_all(&[]).await.unwrap(), "fallback-1");
    }

    #[tokio::test]
    async fn test_hanging_probe_is_bounded_by_deadline() {
        let pinger = FakePinger::new(vec![
            ("slow.example", Behaviour::Hang),
            ("fast.example", Behaviour::Answer(80)),
        ]);
        let config = quick_config();
        let bound = config.deadline() + Duration::from_secs(2);
        let prober = LatencyProber::new(pinger, config);
        let targets = vec![
            ProbeTarget::new("slow", "slow.example"),
            ProbeTarget::new("fast", "fast.example"),
        ];

        let started = Instant::now();
        let closest = prober.probe_all(&targets).await.unwrap();

        assert_eq!(closest, "fast");
        assert!(started.elapsed() < bound);
    }

    #[test]
    fn test_ties_go_to_first_seen() {
        let results = vec![
            ProbeResult { id: "x".to_string(), latency_millis: 30, ok: true },
            ProbeResult { id: "y".to_string(), latency_millis: 30, ok: true },
            ProbeResult { id: "z".to_string(), latency_millis: 0, ok: false },
        ];
        assert_eq!(closest(&results), Some("x"));
    }
}
