//! Host port allocation.
//!
//! One lock guards the whole assignment table, so a port is probed and
//! recorded in a single critical section and no two live projects can be
//! handed the same port.

use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::PortsConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
struct PortTable {
    by_project: HashMap<String, u16>,
    by_port: HashMap<u16, String>,
}

impl PortTable {
    fn remove_project(&mut self, project_id: &str) -> Option<u16> {
        let port = self.by_project.remove(project_id)?;
        self.by_port.remove(&port);
        Some(port)
    }

    fn insert(&mut self, project_id: &str, port: u16) {
        self.by_project.insert(project_id.to_string(), port);
        self.by_port.insert(port, project_id.to_string());
    }
}

/// Tracks `project -> port` assignments.
#[derive(Debug)]
pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
    table: Mutex<PortTable>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(&PortsConfig::default())
    }
}

impl PortAllocator {
    pub fn new(config: &PortsConfig) -> Self {
        Self {
            range_start: config.range_start,
            range_end: config.range_end,
            table: Mutex::new(PortTable::default()),
        }
    }

    /// Assign the first free port at or above `preferred` to `project_id`.
    ///
    /// Any previous assignment of the project is replaced. A port counts as
    /// free when no other project holds it and the OS lets us bind it.
    pub fn acquire(&self, project_id: &str, preferred: u16) -> CoreResult<u16> {
        let mut table = self.table.lock();
        let previous = table.remove_project(project_id);

        let start = preferred.max(self.range_start);
        for port in start..=self.range_end {
            if table.by_port.contains_key(&port) || Some(port) == previous {
                continue;
            }
            if !is_bindable(port) {
                debug!(port, "Port busy at OS level");
                continue;
            }
            table.insert(project_id, port);
            info!(project_id, port, "Port allocated");
            return Ok(port);
        }

        // Reusing the previous port is better than failing outright.
        if let Some(port) = previous {
            if is_bindable(port) {
                table.insert(project_id, port);
                return Ok(port);
            }
        }

        Err(CoreError::NoFreePort {
            start,
            end: self.range_end,
        })
    }

    /// Drop the assignment of `project_id`. Returns the freed port.
    pub fn release(&self, project_id: &str) -> Option<u16> {
        let port = self.table.lock().remove_project(project_id);
        if let Some(port) = port {
            info!(project_id, port, "Port released");
        }
        port
    }

    /// Port currently assigned to `project_id`.
    pub fn assigned(&self, project_id: &str) -> Option<u16> {
        self.table.lock().by_project.get(project_id).copied()
    }

    /// Snapshot of all live assignments.
    pub fn assignments(&self) -> Vec<(String, u16)> {
        let table = self.table.lock();
        let mut all: Vec<_> = table
            .by_project
            .iter()
            .map(|(project, port)| (project.clone(), *port))
            .collect();
        all.sort_by_key(|(_, port)| *port);
        all
    }
}

/// Whether the OS lets us listen on `port` on all interfaces.
pub fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn allocator(start: u16, end: u16) -> PortAllocator {
        PortAllocator::new(&PortsConfig {
            range_start: start,
            range_end: end,
            max_conflict_retries: 3,
        })
    }

    #[test]
    fn test_skips_assigned_ports() {
        let ports = allocator(3000, 65000);
        let a = ports.acquire("a", 41000).unwrap();
        let b = ports.acquire("b", 41000).unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_skips_os_bound_ports() {
        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let busy = holder.local_addr().unwrap().port();

        let ports = allocator(1024, 65535);
        let port = ports.acquire("a", busy).unwrap();
        assert_ne!(port, busy);
        assert!(port > busy);
    }

    #[test]
    fn test_reacquire_moves_project() {
        let ports = allocator(3000, 65000);
        let first = ports.acquire("a", 42000).unwrap();
        let second = ports.acquire("a", first + 1).unwrap();
        assert!(second > first);
        assert_eq!(ports.assigned("a"), Some(second));
        assert_eq!(ports.assignments().len(), 1);
    }

    #[test]
    fn test_release_frees_port() {
        let ports = allocator(3000, 65000);
        let port = ports.acquire("a", 43000).unwrap();
        assert_eq!(ports.release("a"), Some(port));
        assert_eq!(ports.release("a"), None);
        assert_eq!(ports.acquire("b", port).unwrap(), port);
    }

    #[test]
    fn test_exhausted_range() {
        let ports = allocator(44000, 44001);
        ports.acquire("a", 44000).unwrap();
        ports.acquire("b", 44000).unwrap();
        assert!(matches!(
            ports.acquire("c", 44000),
            Err(CoreError::NoFreePort { .. })
        ));
    }

    #[test]
    fn test_concurrent_acquire_is_unique() {
        let ports = Arc::new(allocator(3000, 65000));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ports = ports.clone();
                std::thread::spawn(move || ports.acquire(&format!("p{}", i), 45000).unwrap())
            })
            .collect();

        let mut assigned: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assigned.sort();
        assigned.dedup();
        assert_eq!(assigned.len(), 16);
    }
}
