//! The process control block: everything this crate tracks about one
//! process, short of the scheduler state a full kernel would also carry.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::descriptor::DescriptorTable;
use super::futex::FutexTable;
use super::keyed_table::KeyedTable;
use super::mapping_registry::MappingRegistry;
use super::tid::ThreadId;
use crate::mm::AddressSpace;
use crate::sync::WaitQueue;

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Process identifier, unique for the life of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u64);

impl ProcessId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One process: its address space, its threads, and the tables a thread
/// running inside it uses to reach kernel objects.
pub struct Process {
    id: ProcessId,
    refcount: AtomicU64,
    address_space: AddressSpace,
    threads: Mutex<Vec<ThreadId>>,
    descriptor_table: DescriptorTable,
    mapping_registry: MappingRegistry,
    keyed_table: KeyedTable,
    futex_table: FutexTable,
    parent: Option<ProcessId>,
    children_death_waiters: WaitQueue,
}

impl Process {
    /// Build a fresh process with its own address space and no threads
    /// yet; the caller adds the first thread separately.
    pub fn new(address_space: AddressSpace, parent: Option<ProcessId>) -> Arc<Self> {
        Arc::new(Self {
            id: ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed)),
            refcount: AtomicU64::new(1),
            address_space,
            threads: Mutex::new(Vec::new()),
            descriptor_table: DescriptorTable::new(),
            mapping_registry: MappingRegistry::new(),
            keyed_table: KeyedTable::new(),
            futex_table: FutexTable::new(),
            parent,
            children_death_waiters: WaitQueue::new(),
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn descriptor_table(&self) -> &DescriptorTable {
        &self.descriptor_table
    }

    pub fn mapping_registry(&self) -> &MappingRegistry {
        &self.mapping_registry
    }

    pub fn keyed_table(&self) -> &KeyedTable {
        &self.keyed_table
    }

    pub fn futex_table(&self) -> &FutexTable {
        &self.futex_table
    }

    pub fn add_thread(&self, thread: ThreadId) {
        self.threads.lock().push(thread);
    }

    pub fn remove_thread(&self, thread: ThreadId) {
        self.threads.lock().retain(|&t| t != thread);
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Bump the process refcount; callers doing this on behalf of a new
    /// handle should pair it with [`Process::release`].
    pub fn retain(self: &Arc<Self>) -> Arc<Self> {
        self.refcount.fetch_add(1, Ordering::Relaxed);
        self.clone()
    }

    /// Drop one reference; once it reaches zero the caller should run the
    /// teardown protocol in [`super::destroy_process`].
    pub fn release(&self) -> u64 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Block the caller until every child of this process has exited.
    /// Waking is driven by `wake_death_waiters` below.
    pub fn wait_for_children(&self, no_children_left: impl FnMut() -> bool) {
        self.children_death_waiters.wait_while(no_children_left);
    }

    pub fn wake_death_waiters(&self) {
        self.children_death_waiters.wake_all();
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn new_process_starts_with_refcount_one_and_no_threads() {
        let space = AddressSpace::new_kernel(crate::mm::VirtualAddress::new(0x4000_0000), 0x1000)
            .expect("kernel space");
        let process = Process::new(space, None);
        assert_eq!(process.thread_count(), 0);
        assert_eq!(process.release(), 0);
    }

    #[test]
    fn retain_and_release_balance() {
        let space = AddressSpace::new_kernel(crate::mm::VirtualAddress::new(0x4000_0000), 0x1000)
            .expect("kernel space");
        let process = Process::new(space, None);
        let _second = process.retain();
        assert_eq!(process.release(), 1);
    }

    #[test]
    fn thread_add_and_remove() {
        let space = AddressSpace::new_kernel(crate::mm::VirtualAddress::new(0x4000_0000), 0x1000)
            .expect("kernel space");
        let process = Process::new(space, None);
        process.add_thread(ThreadId::new(1));
        process.add_thread(ThreadId::new(2));
        assert_eq!(process.thread_count(), 2);
        process.remove_thread(ThreadId::new(1));
        assert_eq!(process.thread_count(), 1);
    }
}
