// Linux procfs-based connection source

use std::collections::HashMap;
use std::net::SocketAddr;

use procfs::process::{all_processes, FDTarget};

use super::{ConnectionSource, DiscoveryError};
use crate::core::connection::{ConnState, Protocol, RawConnection};

/// Connection source using the Linux /proc filesystem
///
/// Reads the socket tables from:
/// - /proc/net/tcp, /proc/net/tcp6
/// - /proc/net/udp, /proc/net/udp6
///
/// and attributes sockets to processes through the `socket:[inode]` links in
/// /proc/[pid]/fd/. The kernel's tx/rx queue sizes stand in for byte counters.
pub struct ProcfsSource;

/// One socket table row before owner resolution
struct TableEntry {
    protocol: Protocol,
    local: SocketAddr,
    remote: SocketAddr,
    state: String,
    inode: u64,
    tx_queue: u32,
    rx_queue: u32,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self
    }

    pub fn is_available() -> bool {
        std::path::Path::new("/proc/net/tcp").exists()
    }

    fn read_tables() -> Result<Vec<TableEntry>, DiscoveryError> {
        let mut entries = Vec::new();
        let mut tables_read = 0;
        let mut last_error = None;

        // A missing table (no IPv6, no UDP) is skipped, not fatal.
        let tcp_tables = [
            (Protocol::Tcp, procfs::net::tcp()),
            (Protocol::Tcp6, procfs::net::tcp6()),
        ];
        for (protocol, table) in tcp_tables {
            match table {
                Ok(rows) => {
                    tables_read += 1;
                    entries.extend(rows.into_iter().map(|row| TableEntry {
                        protocol,
                        local: row.local_address,
                        remote: row.remote_address,
                        state: format!("{:?}", row.state),
                        inode: row.inode,
                        tx_queue: row.tx_queue,
                        rx_queue: row.rx_queue,
                    }));
                }
                Err(e) => {
                    log::debug!("skipping {} table: {}", protocol, e);
                    last_error = Some(e);
                }
            }
        }

        let udp_tables = [
            (Protocol::Udp, procfs::net::udp()),
            (Protocol::Udp6, procfs::net::udp6()),
        ];
        for (protocol, table) in udp_tables {
            match table {
                Ok(rows) => {
                    tables_read += 1;
                    entries.extend(rows.into_iter().map(|row| TableEntry {
                        protocol,
                        local: row.local_address,
                        remote: row.remote_address,
                        state: format!("{:?}", row.state),
                        inode: row.inode,
                        tx_queue: row.tx_queue,
                        rx_queue: row.rx_queue,
                    }));
                }
                Err(e) => {
                    log::debug!("skipping {} table: {}", protocol, e);
                    last_error = Some(e);
                }
            }
        }

        if tables_read == 0 {
            return Err(last_error.map_or(DiscoveryError::NoTables, DiscoveryError::from));
        }
        Ok(entries)
    }

    /// Socket inode -> (pid, comm) for every process whose fds we can read.
    /// An unreadable process list leaves every socket unattributed.
    fn socket_owners() -> SocketOwners {
        let mut owners = HashMap::new();

        let processes = match all_processes() {
            Ok(processes) => processes,
            Err(e) => {
                log::debug!("cannot list processes, sockets stay unattributed: {}", e);
                return owners;
            }
        };

        for proc_result in processes {
            let Ok(process) = proc_result else {
                continue;
            };
            let Ok(fds) = process.fd() else {
                continue;
            };

            let pid = process.pid() as u32;
            let name = process.stat().map(|stat| stat.comm).ok();

            for fd_info in fds.flatten() {
                if let FDTarget::Socket(inode) = fd_info.target {
                    owners.insert(inode, (pid, name.clone().unwrap_or_default()));
                }
            }
        }

        owners
    }
}

type SocketOwners = HashMap<u64, (u32, String)>;

/// Joins table rows with their owners. Rows whose inode has no owner keep
/// pid 0 and no name.
fn attribute(entries: Vec<TableEntry>, owners: &SocketOwners) -> Vec<RawConnection> {
    entries
        .into_iter()
        .map(|entry| {
            let (pid, app_name) = match owners.get(&entry.inode) {
                Some((pid, name)) => (*pid, Some(name.clone())),
                None => (0, None),
            };

            RawConnection {
                protocol: entry.protocol,
                local_addr: entry.local.ip(),
                local_port: entry.local.port(),
                remote_addr: entry.remote.ip(),
                remote_port: entry.remote.port(),
                state: ConnState::from_name(&entry.state),
                pid,
                app_name,
                tx_bytes: Some(entry.tx_queue as u64),
                rx_bytes: Some(entry.rx_queue as u64),
            }
            .canonicalized()
        })
        .collect()
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionSource for ProcfsSource {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn discover(&self) -> Result<Vec<RawConnection>, DiscoveryError> {
        let entries = Self::read_tables()?;
        let owners = Self::socket_owners();

        Ok(attribute(entries, &owners))
    }
}
