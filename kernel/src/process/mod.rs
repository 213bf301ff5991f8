//! Process management: the process control block, its descriptor table,
//! mapping registry, keyed table, and futex table, plus the global process
//! registry and the teardown protocol that unwinds all of them together.

#![allow(dead_code)]

pub mod descriptor;
pub mod futex;
pub mod keyed_table;
pub mod mapping_registry;
pub mod process;
pub mod registry;
pub mod tid;

pub use descriptor::{Did, DescriptorObject, DescriptorTable};
pub use futex::FutexTable;
pub use keyed_table::{Key, KeyedTable};
pub use mapping_registry::{MappingEntry, MappingRegistry};
pub use process::{Process, ProcessId};
pub use registry::PROCESSES;
pub use tid::ThreadId;

use alloc::sync::Arc;

use crate::error::Result;
use crate::mm::AddressSpace;

/// Create a new process with a fresh address space and register it
/// kernel-wide.
pub fn spawn(parent: Option<ProcessId>) -> Result<Arc<Process>> {
    let space = AddressSpace::new()?;
    let process = Process::new(space, parent);
    PROCESSES.insert(process.clone());
    Ok(process)
}

/// Run the process teardown protocol: wake whoever was waiting on this
/// process's death, release every resource it held, and drop its entry
/// from the global table.
///
/// Order matters: death-waiters are woken first so a parent blocked in
/// `wait_for_children` can observe the exit promptly, and the address
/// space is destroyed last since every other table may reference mappings
/// living inside it.
pub fn destroy_process(id: ProcessId) -> Result<()> {
    let process = PROCESSES.lookup(id)?;

    if let Some(parent_id) = process.parent() {
        if let Ok(parent) = PROCESSES.lookup(parent_id) {
            parent.wake_death_waiters();
        }
    }

    process.keyed_table().clear_all();
    // The futex table has no explicit teardown beyond dropping it: every
    // waiter here belongs to a thread of this process, and those threads
    // are gone by the time a caller reaches process destruction.
    let _ = process.futex_table();

    for _descriptor in process.descriptor_table().drain() {
        // Each descriptor's `Arc` drop runs its own release logic
        // (channel close, mapping release, ...) once this is the last
        // reference.
    }

    let _ = process.mapping_registry().drain();

    process.address_space().destroy();

    PROCESSES.remove(id);
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn spawn_registers_and_destroy_removes() {
        let process = spawn(None).expect("spawn");
        let id = process.id();
        assert!(PROCESSES.lookup(id).is_ok());
        drop(process);
        destroy_process(id).expect("destroy");
        assert!(PROCESSES.lookup(id).is_err());
    }

    #[test]
    fn destroy_wakes_parent_death_waiters() {
        let parent = spawn(None).expect("spawn parent");
        let parent_id = parent.id();
        let child = spawn(Some(parent_id)).expect("spawn child");
        let child_id = child.id();
        drop(child);
        destroy_process(child_id).expect("destroy child");
        assert!(PROCESSES.lookup(child_id).is_err());
        destroy_process(parent_id).expect("destroy parent");
    }
}
