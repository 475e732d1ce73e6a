use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::connection::{Connection, ConnectionKey, RawConnection};
use super::discovery::ConnectionSource;
use super::filters::AppNameFilter;
use super::ping::{LatencyProber, PingResult};

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3);
pub const MAX_IN_FLIGHT_PROBES: usize = 20;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub ping_enabled: bool,
    pub max_in_flight_probes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCAN_INTERVAL,
            ping_enabled: true,
            max_in_flight_probes: MAX_IN_FLIGHT_PROBES,
        }
    }
}

type ConnectionMap = HashMap<ConnectionKey, Connection>;

/// State shared between the monitor handle, its scan loop and probe tasks.
struct Shared {
    connections: RwLock<ConnectionMap>,
    source: Arc<dyn ConnectionSource>,
    prober: Arc<dyn LatencyProber>,
    config: MonitorConfig,
}

/// Owns the live connection table and keeps it current.
///
/// Readers (`snapshot`, `search`) always get clones, so whatever they do with
/// the rows never races the next reconciliation.
pub struct ConnectionMonitor {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ConnectionMonitor {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn ConnectionSource>,
        prober: Arc<dyn LatencyProber>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connections: RwLock::new(HashMap::new()),
                source,
                prober,
                config,
            }),
            stop_tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    pub fn source_name(&self) -> &'static str {
        self.shared.source.name()
    }

    /// Scans once so the first snapshot is populated, then keeps scanning
    /// every `interval` on a background task until `stop` is called.
    pub async fn start(&self) {
        if self.stop_slot().is_some() {
            log::warn!("connection monitor already running");
            return;
        }

        self.shared.scan().await;

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop_slot() = Some(stop_tx);

        let shared = Arc::clone(&self.shared);
        let interval = shared.config.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => shared.scan().await,
                    _ = &mut stop_rx => break,
                }
            }
            log::debug!("scan loop stopped");
        });

        log::info!(
            "monitoring connections via {} every {:?} (ping {})",
            self.source_name(),
            interval,
            if self.shared.config.ping_enabled { "on" } else { "off" }
        );
    }

    /// Stops the scan loop after its current iteration. A probe pass already
    /// in flight runs to completion. Calling it again does nothing.
    pub fn stop(&self) {
        if let Some(stop_tx) = self.stop_slot().take() {
            let _ = stop_tx.send(());
        }
    }

    /// One discovery + reconciliation (+ probe pass) cycle.
    pub async fn scan(&self) {
        self.shared.scan().await;
    }

    pub fn snapshot(&self) -> Vec<Connection> {
        self.shared.read().values().cloned().collect()
    }

    pub fn search(&self, query: &str) -> Vec<Connection> {
        let filter = AppNameFilter::new(query);
        if filter.is_empty() {
            return self.snapshot();
        }

        self.shared
            .read()
            .values()
            .filter(|conn| filter.matches(conn))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stop_slot(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    // Every critical section leaves the map consistent, so a poisoned lock is
    // still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, ConnectionMap> {
        self.connections.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConnectionMap> {
        self.connections.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn scan(self: &Arc<Self>) {
        let source = Arc::clone(&self.source);
        let discovered = match tokio::task::spawn_blocking(move || source.discover()).await {
            Ok(Ok(discovered)) => discovered,
            Ok(Err(e)) => {
                log::debug!("{} discovery failed, keeping previous table: {}", self.source.name(), e);
                return;
            }
            Err(e) => {
                log::warn!("{} discovery task failed: {}", self.source.name(), e);
                return;
            }
        };

        self.reconcile(discovered, Instant::now());

        if self.config.ping_enabled {
            self.probe_all().await;
        }
    }

    /// Merges one discovery result into the live map: known keys are updated
    /// in place, new keys inserted, keys not rediscovered evicted. Runs as a
    /// single write-locked section.
    fn reconcile(&self, discovered: Vec<RawConnection>, now: Instant) {
        let mut connections = self.write();
        let mut seen = HashSet::with_capacity(discovered.len());

        for raw in discovered {
            let key = raw.key();
            seen.insert(key);

            match connections.entry(key) {
                Entry::Occupied(mut existing) => existing.get_mut().observe(&raw, now),
                Entry::Vacant(slot) => {
                    slot.insert(Connection::new(raw, now));
                }
            }
        }

        connections.retain(|key, _| seen.contains(key));
    }

    /// Probes every established connection with a real peer, at most
    /// `max_in_flight_probes` at a time, and waits for all of them.
    async fn probe_all(self: &Arc<Self>) {
        let targets: Vec<(ConnectionKey, IpAddr, u16)> = {
            let connections = self.read();
            connections
                .values()
                .filter(|conn| conn.is_probe_target())
                .map(|conn| (conn.key(), conn.remote_addr, conn.remote_port))
                .collect()
        };

        if targets.is_empty() {
            return;
        }
        log::trace!("probing {} connections", targets.len());

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight_probes.max(1)));
        let mut probes = JoinSet::new();

        for (key, addr, port) in targets {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let shared = Arc::clone(self);

            probes.spawn(async move {
                let result = shared.prober.measure(addr, port).await;
                shared.record_probe(&key, result);
                drop(permit);
            });
        }

        while let Some(joined) = probes.join_next().await {
            if let Err(e) = joined {
                log::warn!("probe task failed: {}", e);
            }
        }
    }

    fn record_probe(&self, key: &ConnectionKey, result: PingResult) {
        // The connection may have been evicted while the probe was running.
        if let Some(conn) = self.write().get_mut(key) {
            conn.record_probe(result.rtt, result.loss);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::tests::raw_tcp;
    use crate::core::connection::ConnState;
    use crate::core::discovery::DiscoveryError;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        rows: Mutex<Vec<RawConnection>>,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_rows(rows: Vec<RawConnection>) -> Arc<Self> {
            let source = Self::default();
            *source.rows.lock().unwrap() = rows;
            Arc::new(source)
        }

        fn set_rows(&self, rows: Vec<RawConnection>) {
            *self.rows.lock().unwrap() = rows;
        }
    }

    impl ConnectionSource for FakeSource {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn discover(&self) -> Result<Vec<RawConnection>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DiscoveryError::NoTables);
            }
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    struct FakeProber {
        result: PingResult,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeProber {
        fn new(result: PingResult, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result,
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LatencyProber for FakeProber {
        async fn measure(&self, _addr: IpAddr, _port: u16) -> PingResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.result
        }
    }

    fn peer(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    fn monitor_with(source: Arc<FakeSource>, prober: Arc<FakeProber>, ping_enabled: bool) -> ConnectionMonitor {
        let config = MonitorConfig {
            interval: Duration::from_millis(20),
            ping_enabled,
            ..MonitorConfig::default()
        };
        ConnectionMonitor::new(config, source, prober)
    }

    fn idle_monitor() -> ConnectionMonitor {
        monitor_with(
            FakeSource::with_rows(Vec::new()),
            FakeProber::new(PingResult::default(), Duration::ZERO),
            false,
        )
    }

    fn keys(monitor: &ConnectionMonitor) -> HashSet<ConnectionKey> {
        monitor.snapshot().iter().map(Connection::key).collect()
    }

    #[test]
    fn test_reconcile_inserts_every_discovered_key() {
        let monitor = idle_monitor();
        let rows = vec![
            raw_tcp("firefox", 50001, peer(1), ConnState::Established),
            raw_tcp("firefox", 50002, peer(2), ConnState::SynSent),
            raw_tcp("sshd", 22, IpAddr::V4(Ipv4Addr::UNSPECIFIED), ConnState::Listen),
        ];
        let expected: HashSet<_> = rows.iter().map(RawConnection::key).collect();

        monitor.shared.reconcile(rows, Instant::now());

        assert_eq!(keys(&monitor), expected);
    }

    #[test]
    fn test_reconcile_evicts_missing_keys() {
        let monitor = idle_monitor();
        let kept = raw_tcp("firefox", 50001, peer(1), ConnState::Established);
        let gone = raw_tcp("firefox", 50002, peer(2), ConnState::Established);
        let now = Instant::now();

        monitor.shared.reconcile(vec![kept.clone(), gone.clone()], now);
        monitor.shared.reconcile(vec![kept.clone()], now + Duration::from_secs(3));

        let after = keys(&monitor);
        assert!(after.contains(&kept.key()));
        assert!(!after.contains(&gone.key()));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_reconcile_updates_state_in_place() {
        let monitor = idle_monitor();
        let mut row = raw_tcp("curl", 50010, peer(9), ConnState::SynSent);
        let start = Instant::now();

        monitor.shared.reconcile(vec![row.clone()], start);
        row.state = ConnState::Established;
        monitor.shared.reconcile(vec![row.clone()], start + Duration::from_secs(3));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, ConnState::Established);
        assert_eq!(snapshot[0].age, Duration::from_secs(3));
    }

    #[test]
    fn test_first_observation_has_zero_rate() {
        let monitor = idle_monitor();
        let mut row = raw_tcp("rsync", 50020, peer(3), ConnState::Established);
        row.tx_bytes = Some(1_000_000);
        row.rx_bytes = Some(5_000_000);

        monitor.shared.reconcile(vec![row], Instant::now());

        let conn = &monitor.snapshot()[0];
        assert_eq!(conn.tx_rate, 0.0);
        assert_eq!(conn.rx_rate, 0.0);
        assert_eq!(conn.tx_bytes, 1_000_000);
    }

    #[test]
    fn test_identical_rediscovery_is_idempotent() {
        let monitor = idle_monitor();
        let mut row = raw_tcp("rsync", 50021, peer(4), ConnState::Established);
        let start = Instant::now();
        let later = start + Duration::from_secs(2);

        row.tx_bytes = Some(0);
        monitor.shared.reconcile(vec![row.clone()], start);
        row.tx_bytes = Some(1_000);
        monitor.shared.reconcile(vec![row.clone()], later);

        let key = row.key();
        let before = monitor.shared.read()[&key].clone();
        assert_eq!(before.tx_rate, 500.0);

        monitor.shared.reconcile(vec![row.clone()], later);

        let after = monitor.shared.read()[&key].clone();
        assert_eq!(after.tx_rate, before.tx_rate);
        assert_eq!(after.rx_rate, before.rx_rate);
        assert_eq!(after.book.first_seen, before.book.first_seen);
        assert_eq!(after.book.first_seen, start);
    }

    #[test]
    fn test_counter_decrease_keeps_previous_rate() {
        let monitor = idle_monitor();
        let mut row = raw_tcp("torrent", 50030, peer(5), ConnState::Established);
        let start = Instant::now();
        let key = row.key();

        row.tx_bytes = Some(0);
        monitor.shared.reconcile(vec![row.clone()], start);
        row.tx_bytes = Some(1_000);
        monitor.shared.reconcile(vec![row.clone()], start + Duration::from_secs(1));
        assert_eq!(monitor.shared.read()[&key].tx_rate, 1_000.0);

        row.tx_bytes = Some(500);
        monitor.shared.reconcile(vec![row.clone()], start + Duration::from_secs(2));
        let conn = monitor.shared.read()[&key].clone();
        assert_eq!(conn.tx_rate, 1_000.0);
        assert_eq!(conn.tx_bytes, 500);

        // The lowered counter becomes the new baseline.
        row.tx_bytes = Some(700);
        monitor.shared.reconcile(vec![row], start + Duration::from_secs(3));
        assert_eq!(monitor.shared.read()[&key].tx_rate, 200.0);
    }

    #[test]
    fn test_snapshot_returns_copies() {
        let monitor = idle_monitor();
        monitor
            .shared
            .reconcile(vec![raw_tcp("nginx", 443, peer(6), ConnState::Established)], Instant::now());

        let mut first = monitor.snapshot();
        first[0].app_name = "tampered".to_string();
        first[0].tx_rate = 9_999.0;

        let second = monitor.snapshot();
        assert_eq!(second[0].app_name, "nginx");
        assert_eq!(second[0].tx_rate, 0.0);
    }

    #[test]
    fn test_search_is_case_insensitive_on_app_name() {
        let monitor = idle_monitor();
        monitor.shared.reconcile(
            vec![
                raw_tcp("Chrome", 50040, peer(7), ConnState::Established),
                raw_tcp("slack", 50041, peer(8), ConnState::Established),
            ],
            Instant::now(),
        );

        for query in ["chrome", "CHR", "Chrome"] {
            let found = monitor.search(query);
            assert_eq!(found.len(), 1, "query {query:?}");
            assert_eq!(found[0].app_name, "Chrome");
        }

        assert!(monitor.search("203.0.113").is_empty());
        assert_eq!(monitor.search("").len(), 2);
    }

    #[tokio::test]
    async fn test_failed_discovery_keeps_previous_table() {
        let source = FakeSource::with_rows(vec![raw_tcp("postgres", 5432, peer(10), ConnState::Established)]);
        let monitor = monitor_with(
            source.clone(),
            FakeProber::new(PingResult::default(), Duration::ZERO),
            false,
        );

        monitor.scan().await;
        assert_eq!(monitor.len(), 1);

        source.fail.store(true, Ordering::SeqCst);
        source.set_rows(Vec::new());
        monitor.scan().await;

        assert_eq!(monitor.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_probe_pass_is_bounded() {
        let rows: Vec<_> = (0..50)
            .map(|i| raw_tcp("browser", 40000 + i, peer(i as u8 + 1), ConnState::Established))
            .collect();
        let prober = FakeProber::new(
            PingResult {
                rtt: Duration::from_millis(15),
                loss: 0.0,
            },
            Duration::from_millis(30),
        );
        let monitor = monitor_with(FakeSource::with_rows(rows), prober.clone(), true);

        monitor.scan().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 50);
        let max = prober.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= MAX_IN_FLIGHT_PROBES, "{max} probes in flight");
        assert!(max > 1, "probes should overlap");

        // The pass waits for every probe before returning.
        for conn in monitor.snapshot() {
            assert_eq!(conn.ping_count, 1);
            assert_eq!(conn.ping, Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_only_established_peers_are_probed() {
        let rows = vec![
            raw_tcp("app", 50050, peer(20), ConnState::Established),
            raw_tcp("app", 50051, peer(21), ConnState::TimeWait),
            raw_tcp("sshd", 22, IpAddr::V4(Ipv4Addr::UNSPECIFIED), ConnState::Listen),
            raw_tcp("dns", 53, IpAddr::V4(Ipv4Addr::UNSPECIFIED), ConnState::Established),
        ];
        let prober = FakeProber::new(PingResult::unreachable(), Duration::ZERO);
        let monitor = monitor_with(FakeSource::with_rows(rows), prober.clone(), true);

        monitor.scan().await;
        monitor.scan().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        let probed: Vec<_> = monitor
            .snapshot()
            .into_iter()
            .filter(|conn| conn.ping_count > 0)
            .collect();
        assert_eq!(probed.len(), 1);
        assert_eq!(probed[0].local_port, 50050);
        assert_eq!(probed[0].ping_count, 2);
        assert_eq!(probed[0].ping_failed, 2);
        assert_eq!(probed[0].loss, 100.0);
    }

    #[tokio::test]
    async fn test_ping_disabled_skips_probing() {
        let prober = FakeProber::new(PingResult::default(), Duration::ZERO);
        let monitor = monitor_with(
            FakeSource::with_rows(vec![raw_tcp("app", 50060, peer(30), ConnState::Established)]),
            prober.clone(),
            false,
        );

        monitor.scan().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.snapshot()[0].ping_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_scans_immediately_and_stop_halts_loop() {
        let source = FakeSource::with_rows(vec![raw_tcp("app", 50070, peer(40), ConnState::Established)]);
        let monitor = monitor_with(
            source.clone(),
            FakeProber::new(PingResult::default(), Duration::ZERO),
            false,
        );

        monitor.start().await;
        assert_eq!(monitor.len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(source.calls.load(Ordering::SeqCst) >= 2);

        monitor.stop();
        monitor.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = source.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), settled);
    }
}
