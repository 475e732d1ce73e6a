use std::fmt;
use std::net::IpAddr;
use std::time::{Duration, Instant};

pub const UNKNOWN_APP: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Tcp6,
    Udp,
    Udp6,
}

impl Protocol {
    pub fn tcp_for(addr: IpAddr) -> Self {
        if addr.is_ipv4() {
            Protocol::Tcp
        } else {
            Protocol::Tcp6
        }
    }

    pub fn udp_for(addr: IpAddr) -> Self {
        if addr.is_ipv4() {
            Protocol::Udp
        } else {
            Protocol::Udp6
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tcp6 => "tcp6",
            Protocol::Udp => "udp",
            Protocol::Udp6 => "udp6",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnState {
    Established,
    Listen,
    TimeWait,
    CloseWait,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    LastAck,
    Closing,
    Closed,
    Unknown,
}

impl ConnState {
    /// Maps a state name as spelled by the platform crates (`Established`,
    /// `SynReceived`, `SYN_RECV`, `Close`, ...) onto a `ConnState`.
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "established" => ConnState::Established,
            "listen" | "listening" => ConnState::Listen,
            "timewait" => ConnState::TimeWait,
            "closewait" => ConnState::CloseWait,
            "synsent" => ConnState::SynSent,
            "synrecv" | "synreceived" | "newsynrecv" => ConnState::SynRecv,
            "finwait1" => ConnState::FinWait1,
            "finwait2" => ConnState::FinWait2,
            "lastack" => ConnState::LastAck,
            "closing" => ConnState::Closing,
            "close" | "closed" | "deletetcb" => ConnState::Closed,
            _ => ConnState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnState::Established => "ESTABLISHED",
            ConnState::Listen => "LISTEN",
            ConnState::TimeWait => "TIME_WAIT",
            ConnState::CloseWait => "CLOSE_WAIT",
            ConnState::SynSent => "SYN_SENT",
            ConnState::SynRecv => "SYN_RECV",
            ConnState::FinWait1 => "FIN_WAIT1",
            ConnState::FinWait2 => "FIN_WAIT2",
            ConnState::LastAck => "LAST_ACK",
            ConnState::Closing => "CLOSING",
            ConnState::Closed => "CLOSED",
            ConnState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn classify(state: ConnState, remote_addr: IpAddr) -> Self {
        if state == ConnState::Listen || remote_addr.is_unspecified() {
            Direction::Inbound
        } else {
            Direction::Outbound
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "IN",
            Direction::Outbound => "OUT",
        }
    }
}

/// Identity of a connection across scan cycles. Reconciliation joins on this
/// and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub pid: u32,
    pub protocol: Protocol,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
}

/// One row as reported by a discovery source, before reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawConnection {
    pub protocol: Protocol,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub state: ConnState,
    /// 0 when the owner could not be resolved
    pub pid: u32,
    /// None when the owner could not be named
    pub app_name: Option<String>,
    /// None on platforms without counters
    pub tx_bytes: Option<u64>,
    pub rx_bytes: Option<u64>,
}

impl RawConnection {
    /// Rewrites IPv4-mapped IPv6 endpoints (`::ffff:a.b.c.d`, as dual-stack
    /// sockets report them) to plain IPv4 so loopback and wildcard checks see
    /// them for what they are.
    pub fn canonicalized(mut self) -> Self {
        self.local_addr = self.local_addr.to_canonical();
        self.remote_addr = self.remote_addr.to_canonical();
        self
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            pid: self.pid,
            protocol: self.protocol,
            local_addr: self.local_addr,
            local_port: self.local_port,
            remote_addr: self.remote_addr,
            remote_port: self.remote_port,
        }
    }
}

/// Rate-computation state. Never leaves the crate's engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bookkeeping {
    pub(crate) first_seen: Instant,
    pub(crate) last_updated: Instant,
    pub(crate) prev_tx_bytes: u64,
    pub(crate) prev_rx_bytes: u64,
    pub(crate) prev_sample: Instant,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub pid: u32,
    pub app_name: String,
    pub protocol: Protocol,
    pub direction: Direction,

    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,

    pub state: ConnState,

    /// Latest probe round-trip, zero until probed
    pub ping: Duration,
    /// Latest probe loss, 0-100
    pub loss: f64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    /// Bytes/sec
    pub tx_rate: f64,
    pub rx_rate: f64,
    pub age: Duration,
    pub ping_count: u32,
    pub ping_failed: u32,

    pub(crate) book: Bookkeeping,
}

impl Connection {
    pub fn new(raw: RawConnection, now: Instant) -> Self {
        let tx_bytes = raw.tx_bytes.unwrap_or(0);
        let rx_bytes = raw.rx_bytes.unwrap_or(0);

        Self {
            pid: raw.pid,
            app_name: raw
                .app_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNKNOWN_APP.to_string()),
            protocol: raw.protocol,
            direction: Direction::classify(raw.state, raw.remote_addr),
            local_addr: raw.local_addr,
            local_port: raw.local_port,
            remote_addr: raw.remote_addr,
            remote_port: raw.remote_port,
            state: raw.state,
            ping: Duration::ZERO,
            loss: 0.0,
            tx_bytes,
            rx_bytes,
            tx_rate: 0.0,
            rx_rate: 0.0,
            age: Duration::ZERO,
            ping_count: 0,
            ping_failed: 0,
            book: Bookkeeping {
                first_seen: now,
                last_updated: now,
                prev_tx_bytes: tx_bytes,
                prev_rx_bytes: rx_bytes,
                prev_sample: now,
            },
        }
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            pid: self.pid,
            protocol: self.protocol,
            local_addr: self.local_addr,
            local_port: self.local_port,
            remote_addr: self.remote_addr,
            remote_port: self.remote_port,
        }
    }

    /// Folds a re-observation of the same key into this record.
    ///
    /// A counter that went backwards (reset or wrap) leaves the previous rate
    /// in place instead of producing a negative one.
    pub fn observe(&mut self, raw: &RawConnection, now: Instant) {
        self.state = raw.state;
        self.direction = Direction::classify(raw.state, raw.remote_addr);
        self.book.last_updated = now;
        self.age = now.saturating_duration_since(self.book.first_seen);

        let tx_bytes = raw.tx_bytes.unwrap_or(0);
        let rx_bytes = raw.rx_bytes.unwrap_or(0);

        let dt = now.saturating_duration_since(self.book.prev_sample).as_secs_f64();
        if dt > 0.0 {
            if tx_bytes >= self.book.prev_tx_bytes {
                self.tx_rate = (tx_bytes - self.book.prev_tx_bytes) as f64 / dt;
            }
            if rx_bytes >= self.book.prev_rx_bytes {
                self.rx_rate = (rx_bytes - self.book.prev_rx_bytes) as f64 / dt;
            }
        }

        self.book.prev_tx_bytes = tx_bytes;
        self.book.prev_rx_bytes = rx_bytes;
        self.book.prev_sample = now;
        self.tx_bytes = tx_bytes;
        self.rx_bytes = rx_bytes;
    }

    pub fn record_probe(&mut self, rtt: Duration, loss: f64) {
        self.ping = rtt;
        self.loss = loss;
        self.ping_count += 1;
        if loss >= 100.0 {
            self.ping_failed += 1;
        }
    }

    /// Established with a concrete peer; listeners and wildcard peers are not
    /// worth probing.
    pub fn is_probe_target(&self) -> bool {
        self.state == ConnState::Established && !self.remote_addr.is_unspecified()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    pub(crate) fn raw_tcp(
        app: &str,
        local_port: u16,
        remote: IpAddr,
        state: ConnState,
    ) -> RawConnection {
        RawConnection {
            protocol: Protocol::tcp_for(remote),
            local_addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            local_port,
            remote_addr: remote,
            remote_port: 443,
            state,
            pid: 4242,
            app_name: Some(app.to_string()),
            tx_bytes: None,
            rx_bytes: None,
        }
    }

    #[test]
    fn test_state_names_from_platform_crates() {
        assert_eq!(ConnState::from_name("Established"), ConnState::Established);
        assert_eq!(ConnState::from_name("SynReceived"), ConnState::SynRecv);
        assert_eq!(ConnState::from_name("SYN_RECV"), ConnState::SynRecv);
        assert_eq!(ConnState::from_name("FinWait1"), ConnState::FinWait1);
        assert_eq!(ConnState::from_name("Close"), ConnState::Closed);
        assert_eq!(ConnState::from_name("DeleteTcb"), ConnState::Closed);
        assert_eq!(ConnState::from_name("Listen"), ConnState::Listen);
        assert_eq!(ConnState::from_name("bogus"), ConnState::Unknown);
    }

    #[test]
    fn test_direction_classification() {
        let peer = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(Direction::classify(ConnState::Established, peer), Direction::Outbound);
        assert_eq!(Direction::classify(ConnState::Listen, peer), Direction::Inbound);
        assert_eq!(
            Direction::classify(ConnState::Established, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Direction::Inbound
        );
        assert_eq!(
            Direction::classify(ConnState::Closed, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            Direction::Inbound
        );
    }

    #[test]
    fn test_mapped_addresses_become_plain_ipv4() {
        let wildcard: IpAddr = "::ffff:0.0.0.0".parse().unwrap();
        let mut raw = raw_tcp("java", 8080, wildcard, ConnState::Established);
        raw.local_addr = "::ffff:127.0.0.1".parse().unwrap();
        raw.protocol = Protocol::Tcp6;

        let raw = raw.canonicalized();
        assert_eq!(raw.local_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(raw.remote_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(raw.protocol, Protocol::Tcp6);

        let conn = Connection::new(raw, Instant::now());
        assert_eq!(conn.direction, Direction::Inbound);
        assert!(!conn.is_probe_target());

        let native: IpAddr = "2001:db8::1".parse().unwrap();
        let raw = raw_tcp("curl", 50000, native, ConnState::Established).canonicalized();
        assert_eq!(raw.remote_addr, native);
    }

    #[test]
    fn test_key_ignores_state_and_counters() {
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let a = raw_tcp("curl", 50000, peer, ConnState::SynSent);
        let mut b = raw_tcp("curl", 50000, peer, ConnState::Established);
        b.tx_bytes = Some(99);
        assert_eq!(a.key(), b.key());

        let c = raw_tcp("curl", 50001, peer, ConnState::Established);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_unresolved_owner_uses_sentinel() {
        let mut raw = raw_tcp("", 1, IpAddr::V4(Ipv4Addr::LOCALHOST), ConnState::Listen);
        raw.pid = 0;
        let conn = Connection::new(raw.clone(), Instant::now());
        assert_eq!(conn.app_name, UNKNOWN_APP);

        raw.app_name = None;
        let conn = Connection::new(raw, Instant::now());
        assert_eq!(conn.app_name, UNKNOWN_APP);
        assert_eq!(conn.pid, 0);
    }

    #[test]
    fn test_observe_computes_rates_over_elapsed_time() {
        let start = Instant::now();
        let peer = IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1));
        let mut raw = raw_tcp("wget", 40000, peer, ConnState::Established);
        raw.tx_bytes = Some(1_000);
        raw.rx_bytes = Some(4_000);
        let mut conn = Connection::new(raw.clone(), start);

        raw.tx_bytes = Some(3_000);
        raw.rx_bytes = Some(10_000);
        conn.observe(&raw, start + Duration::from_secs(2));

        assert_eq!(conn.tx_rate, 1_000.0);
        assert_eq!(conn.rx_rate, 3_000.0);
        assert_eq!(conn.age, Duration::from_secs(2));
        assert_eq!(conn.tx_bytes, 3_000);
    }

    #[test]
    fn test_record_probe_counts_total_loss_as_failure() {
        let raw = raw_tcp("ssh", 22, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), ConnState::Established);
        let mut conn = Connection::new(raw, Instant::now());

        conn.record_probe(Duration::from_millis(12), 33.3);
        assert_eq!((conn.ping_count, conn.ping_failed), (1, 0));

        conn.record_probe(Duration::ZERO, 100.0);
        assert_eq!((conn.ping_count, conn.ping_failed), (2, 1));
        assert_eq!(conn.ping, Duration::ZERO);
    }
}
