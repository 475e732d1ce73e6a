use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const PING_COUNT: u32 = 3;
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PingResult {
    pub rtt: Duration,
    pub loss: f64,
}

impl PingResult {
    pub fn unreachable() -> Self {
        Self { rtt: Duration::ZERO, loss: 100.0 }
    }
}

/// Measures reachability latency to a remote endpoint. Failures are reported
/// as loss, never as errors.
#[async_trait]
pub trait LatencyProber: Send + Sync {
    async fn measure(&self, addr: IpAddr, port: u16) -> PingResult;
}

/// Latency from TCP handshake time. Needs no raw sockets, but only sees ports
/// that accept connections: UDP peers and filtered ports show up as full loss.
#[derive(Debug, Clone)]
pub struct TcpProber {
    attempts: u32,
    timeout: Duration,
}

impl Default for TcpProber {
    fn default() -> Self {
        Self {
            attempts: PING_COUNT,
            timeout: PING_TIMEOUT,
        }
    }
}

impl TcpProber {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the attempts against `target` with no address policy applied.
    pub(crate) async fn probe(&self, target: SocketAddr) -> PingResult {
        let mut successes = Vec::with_capacity(self.attempts as usize);

        for _ in 0..self.attempts {
            let start = Instant::now();
            match timeout(self.timeout, TcpStream::connect(target)).await {
                Ok(Ok(stream)) => {
                    successes.push(start.elapsed());
                    drop(stream);
                }
                Ok(Err(e)) => log::trace!("connect to {} failed: {}", target, e),
                Err(_) => log::trace!("connect to {} timed out", target),
            }
        }

        aggregate(self.attempts, &successes)
    }
}

/// Mean of the successful connect times, and the share of `attempts` that
/// failed as a percentage.
fn aggregate(attempts: u32, successes: &[Duration]) -> PingResult {
    if attempts == 0 || successes.is_empty() {
        return PingResult::unreachable();
    }

    let successful = successes.len() as u32;
    let total: Duration = successes.iter().sum();

    PingResult {
        rtt: total / successful,
        loss: attempts.saturating_sub(successful) as f64 / attempts as f64 * 100.0,
    }
}

#[async_trait]
impl LatencyProber for TcpProber {
    async fn measure(&self, addr: IpAddr, port: u16) -> PingResult {
        let addr = addr.to_canonical();
        if addr.is_unspecified() || addr.is_loopback() {
            return PingResult::default();
        }
        self.probe(SocketAddr::new(addr, port)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_refused_target_reports_full_loss() {
        let prober = TcpProber::new().with_timeout(Duration::from_millis(500));
        assert_eq!(prober.attempts, PING_COUNT);

        let result = prober.probe(closed_port().await).await;

        assert_eq!(result.loss, 100.0);
        assert_eq!(result.rtt, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_accepting_target_reports_no_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let prober = TcpProber::new();
        let result = prober.probe(addr).await;

        assert_eq!(result.loss, 0.0);
        assert!(result.rtt > Duration::ZERO);
        assert!(result.rtt < PING_TIMEOUT);
    }

    #[test]
    fn test_aggregate_averages_only_successes() {
        let result = aggregate(3, &[Duration::from_millis(10), Duration::from_millis(30)]);

        assert_eq!(result.rtt, Duration::from_millis(20));
        assert!((result.loss - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_all_or_nothing() {
        let all = [Duration::from_millis(4), Duration::from_millis(5), Duration::from_millis(6)];
        assert_eq!(
            aggregate(3, &all),
            PingResult { rtt: Duration::from_millis(5), loss: 0.0 }
        );
        assert_eq!(aggregate(3, &[]), PingResult::unreachable());
        assert_eq!(aggregate(3, &[]), PingResult { rtt: Duration::ZERO, loss: 100.0 });
    }

    #[tokio::test]
    async fn test_local_and_wildcard_targets_are_not_probed() {
        // A loopback port nobody listens on would be 100% loss if it were
        // actually attempted.
        let port = closed_port().await.port();
        let prober = TcpProber::new();

        for addr in [
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            "::1".parse().unwrap(),
            "::".parse().unwrap(),
            "::ffff:127.0.0.1".parse().unwrap(),
            "::ffff:0.0.0.0".parse().unwrap(),
        ] {
            assert_eq!(prober.measure(addr, port).await, PingResult::default());
        }
    }
}
