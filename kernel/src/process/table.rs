//! Global process table
//!
//! Maps PIDs to their `Process` control blocks. The table owns the
//! canonical `Arc<Process>`; every other holder (a thread's
//! `owning_process`, a parent's `children` list) clones the `Arc`.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use crate::sync::Mutex;

use super::{Process, ProcessId};

#[cfg(feature = "alloc")]
struct ProcessTable {
    processes: BTreeMap<ProcessId, Arc<Process>>,
}

#[cfg(feature = "alloc")]
impl ProcessTable {
    const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
        }
    }
}

#[cfg(feature = "alloc")]
static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// Initialize the process table. Currently a no-op placeholder kept for
/// symmetry with the rest of the subsystem's `init()` functions.
pub fn init() {}

/// Insert a process into the table.
#[cfg(feature = "alloc")]
pub fn add_process(process: Arc<Process>) {
    PROCESS_TABLE.lock().processes.insert(process.pid, process);
}

/// Look up a process by PID.
#[cfg(feature = "alloc")]
pub fn get_process(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().processes.get(&pid).cloned()
}

/// Remove a process from the table, returning it if present.
#[cfg(feature = "alloc")]
pub fn remove_process(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().processes.remove(&pid)
}

/// Collect the PIDs of all direct children of `parent`.
#[cfg(feature = "alloc")]
pub fn find_children(parent: ProcessId) -> Vec<ProcessId> {
    PROCESS_TABLE
        .lock()
        .processes
        .values()
        .filter(|p| p.parent == Some(parent))
        .map(|p| p.pid)
        .collect()
}

/// Run `f` for every process currently in the table.
#[cfg(feature = "alloc")]
pub fn for_each<F: FnMut(&Process)>(mut f: F) {
    for process in PROCESS_TABLE.lock().processes.values() {
        f(process);
    }
}

/// Total number of processes currently tracked.
#[cfg(feature = "alloc")]
pub fn process_count() -> usize {
    PROCESS_TABLE.lock().processes.len()
}
