//! The kernel-wide table of live processes, keyed by [`ProcessId`].

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::Mutex;

use super::process::{Process, ProcessId};
use crate::error::{KernelError, Result};

#[derive(Default)]
pub struct ProcessRegistry {
    processes: Mutex<BTreeMap<u64, Arc<Process>>>,
}

impl ProcessRegistry {
    pub const fn new() -> Self {
        Self {
            processes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, process: Arc<Process>) {
        self.processes.lock().insert(process.id().as_u64(), process);
    }

    pub fn lookup(&self, id: ProcessId) -> Result<Arc<Process>> {
        self.processes
            .lock()
            .get(&id.as_u64())
            .cloned()
            .ok_or(KernelError::NoSuchResource {
                resource: "process",
                id: id.as_u64(),
            })
    }

    pub fn remove(&self, id: ProcessId) -> Option<Arc<Process>> {
        self.processes.lock().remove(&id.as_u64())
    }

    pub fn count(&self) -> usize {
        self.processes.lock().len()
    }
}

/// The single kernel-wide process table.
pub static PROCESSES: ProcessRegistry = ProcessRegistry::new();

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::mm::{AddressSpace, VirtualAddress};

    fn new_process() -> Arc<Process> {
        let space = AddressSpace::new_kernel(VirtualAddress::new(0x4000_0000), 0x1000)
            .expect("kernel space");
        Process::new(space, None)
    }

    #[test]
    fn insert_lookup_remove_round_trip() {
        let registry = ProcessRegistry::new();
        let process = new_process();
        let id = process.id();
        registry.insert(process);
        assert!(registry.lookup(id).is_ok());
        assert!(registry.remove(id).is_some());
        assert!(registry.lookup(id).is_err());
    }
}
