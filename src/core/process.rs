use std::collections::HashMap;
use std::sync::Mutex;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Resolves owning pids to process names using sysinfo's process table.
pub struct ProcessResolver {
    system_info: Mutex<System>,
}

impl ProcessResolver {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing().with_processes(ProcessRefreshKind::everything());
        let sys = System::new_with_specifics(refresh_kind);

        Self {
            system_info: Mutex::new(sys),
        }
    }

    /// Refreshes the process table once and names every pid in `pids`.
    /// Pids that have exited, or cannot be read, are left out.
    pub fn resolve_all<I>(&self, pids: I) -> HashMap<u32, String>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut names = HashMap::new();

        let mut sys = match self.system_info.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sys.refresh_processes(ProcessesToUpdate::All, true);

        for pid in pids {
            if pid == 0 || names.contains_key(&pid) {
                continue;
            }
            if let Some(proc) = sys.process(Pid::from(pid as usize)) {
                let name = proc.name().to_string_lossy().to_string();
                if !name.is_empty() {
                    names.insert(pid, name);
                }
            }
        }

        names
    }
}

impl Default for ProcessResolver {
    fn default() -> Self {
        Self::new()
    }
}
