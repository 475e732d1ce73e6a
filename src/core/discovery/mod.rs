// Connection discovery backends
//
// Each backend reads the host's socket tables its own way and reports the
// rows as RawConnection values. The engine only ever sees the trait.

use thiserror::Error;

use super::connection::RawConnection;

mod netstat;
#[cfg(target_os = "linux")]
mod procfs;

pub use netstat::NetstatSource;
#[cfg(target_os = "linux")]
pub use self::procfs::ProcfsSource;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[cfg(target_os = "linux")]
    #[error("procfs error: {0}")]
    Procfs(#[from] ::procfs::ProcError),

    #[error("netstat error: {0}")]
    Netstat(String),

    #[error("no connection table could be read")]
    NoTables,

    #[error("unknown connection source: {0}")]
    UnknownSource(String),

    #[error("connection source '{0}' is not available on this system")]
    Unavailable(&'static str),
}

/// Platform-specific provider of the current connection list.
///
/// `discover` may block on file or system-table reads and may return partial
/// rows (pid 0, no name, no counters); none of that is an error.
pub trait ConnectionSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn discover(&self) -> Result<Vec<RawConnection>, DiscoveryError>;
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub available: bool,
}

pub fn available_sources() -> Vec<SourceInfo> {
    let mut sources = Vec::new();

    #[cfg(target_os = "linux")]
    {
        sources.push(SourceInfo {
            name: "procfs",
            description: "/proc/net tables with queue byte counters",
            available: ProcfsSource::is_available(),
        });
    }

    sources.push(SourceInfo {
        name: "netstat",
        description: "netstat2 socket tables, no byte counters",
        available: true,
    });

    sources
}

/// Picks a source by name, or the best available one when no preference is
/// given (procfs, then netstat).
pub fn select_source(
    preference: Option<&str>,
) -> Result<Box<dyn ConnectionSource>, DiscoveryError> {
    match preference {
        #[cfg(target_os = "linux")]
        Some("procfs") => {
            if ProcfsSource::is_available() {
                Ok(Box::new(ProcfsSource::new()))
            } else {
                Err(DiscoveryError::Unavailable("procfs"))
            }
        }
        Some("netstat") => Ok(Box::new(NetstatSource::new())),
        Some(other) => Err(DiscoveryError::UnknownSource(other.to_string())),
        None => {
            #[cfg(target_os = "linux")]
            {
                if ProcfsSource::is_available() {
                    return Ok(Box::new(ProcfsSource::new()));
                }
            }
            Ok(Box::new(NetstatSource::new()))
        }
    }
}
