//! ICMP echo based pinger

use super::Pinger;
use crate::error::{Result, SkyhookError};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

/// Payload carried by each echo request
const PAYLOAD: [u8; 56] = [0; 56];

/// Pinger using raw ICMP sockets.
///
/// Unprivileged processes and networks that filter ICMP make every probe fail,
/// which the prober treats as "unreachable".
#[derive(Debug, Default)]
pub struct IcmpPinger;

impl IcmpPinger {
    pub fn new() -> Self {
        Self
    }
}

async fn resolve(address: &str) -> Result<IpAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| SkyhookError::NetworkUnavailable(format!("resolve {}: {}", address, e)))?;

    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| SkyhookError::NetworkUnavailable(format!("no address for {}", address)))
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn average_rtt(&self, address: &str, count: u32, timeout: Duration) -> Result<Duration> {
        let ip = resolve(address).await?;

        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config)
            .map_err(|e| SkyhookError::NetworkUnavailable(format!("icmp socket: {}", e)))?;

        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        // the whole probe has to fit in `timeout`
        pinger.timeout(timeout / count.max(1));

        let mut total = Duration::ZERO;
        let mut replies = 0u32;
        for seq in 0..count {
            match pinger.ping(PingSequence(seq as u16), &PAYLOAD).await {
                Ok((_, rtt)) => {
                    total += rtt;
                    replies += 1;
                }
                Err(e) => tracing::debug!("echo {} to {} failed: {}", seq, address, e),
            }
        }

        if replies == 0 {
            return Err(SkyhookError::NetworkUnavailable(format!(
                "no echo replies from {}",
                address
            )));
        }

        Ok(total / replies)
    }
}
