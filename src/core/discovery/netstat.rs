// netstat2-based connection source (Linux, macOS, Windows)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use netstat2::{get_sockets_info, AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, SocketInfo};

use super::{ConnectionSource, DiscoveryError};
use crate::core::connection::{ConnState, Protocol, RawConnection};
use crate::core::process::ProcessResolver;

/// Connection source backed by the netstat2 crate, with process names from
/// sysinfo. The platform tables carry no byte counters.
pub struct NetstatSource {
    processes: ProcessResolver,
}

impl NetstatSource {
    pub fn new() -> Self {
        Self {
            processes: ProcessResolver::new(),
        }
    }
}

impl Default for NetstatSource {
    fn default() -> Self {
        Self::new()
    }
}

fn unspecified_like(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Converts one socket row. UDP rows have no peer; they are reported against
/// the unspecified address as ESTABLISHED, like the Windows UDP table does.
/// Dual-stack sockets come back IPv4-mapped and are unmapped here.
fn to_raw(si: &SocketInfo, app_name: Option<String>) -> RawConnection {
    let pid = si.associated_pids.first().copied().unwrap_or(0);

    let raw = match &si.protocol_socket_info {
        ProtocolSocketInfo::Tcp(tcp_si) => RawConnection {
            protocol: Protocol::tcp_for(tcp_si.local_addr),
            local_addr: tcp_si.local_addr,
            local_port: tcp_si.local_port,
            remote_addr: tcp_si.remote_addr,
            remote_port: tcp_si.remote_port,
            state: ConnState::from_name(&format!("{:?}", tcp_si.state)),
            pid,
            app_name,
            tx_bytes: None,
            rx_bytes: None,
        },
        ProtocolSocketInfo::Udp(udp_si) => RawConnection {
            protocol: Protocol::udp_for(udp_si.local_addr),
            local_addr: udp_si.local_addr,
            local_port: udp_si.local_port,
            remote_addr: unspecified_like(udp_si.local_addr.to_canonical()),
            remote_port: 0,
            state: ConnState::Established,
            pid,
            app_name,
            tx_bytes: None,
            rx_bytes: None,
        },
    };
    raw.canonicalized()
}

impl ConnectionSource for NetstatSource {
    fn name(&self) -> &'static str {
        "netstat"
    }

    fn discover(&self) -> Result<Vec<RawConnection>, DiscoveryError> {
        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;
        let sockets_info = get_sockets_info(af_flags, proto_flags)
            .map_err(|e| DiscoveryError::Netstat(e.to_string()))?;

        let names = self.processes.resolve_all(
            sockets_info
                .iter()
                .filter_map(|si| si.associated_pids.first().copied()),
        );

        Ok(sockets_info
            .iter()
            .map(|si| {
                let name = si.associated_pids.first().and_then(|pid| names.get(pid)).cloned();
                to_raw(si, name)
            })
            .collect())
    }
}
