//! Process Control Block (PCB) implementation
//!
//! The PCB is the core data structure representing a process in the kernel.
//! It contains all the information needed to manage a process.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::{collections::BTreeMap, string::String, sync::Arc, vec::Vec};

use crate::{
    error::KernelError,
    fs::FileTable,
    mm::VirtualAddressSpace,
    sync::{Mutex, Spinlock},
};

use super::{cwd::ProcessCwd, ProcessState};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is being created
    Creating = 0,
    /// Process is ready to run
    Ready = 1,
    /// Process is currently running
    Running = 2,
    /// Process is blocked waiting
    Blocked = 3,
    /// Process is sleeping
    Sleeping = 4,
    /// Process has exited but not yet reaped
    Zombie = 5,
    /// Process has been terminated
    Dead = 6,
}

/// Process priority
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcessPriority {
    /// Real-time priority (highest)
    RealTime = 0,
    /// System priority
    System = 1,
    /// Normal user priority
    Normal = 2,
    /// Low priority
    Low = 3,
    /// Idle priority (lowest)
    Idle = 4,
}

/// Process Control Block
pub struct Process {
    /// Process ID
    pub pid: ProcessId,

    /// Parent process ID (None for init)
    pub parent: Option<ProcessId>,

    /// Process name
    #[cfg(feature = "alloc")]
    pub name: String,

    /// Process state
    state: AtomicU32,

    /// Scheduling priority
    pub priority: Mutex<ProcessPriority>,

    /// Virtual address space. Swapped wholesale on exec(); otherwise shared
    /// read-only with the threads currently running in it.
    pub address_space: Spinlock<Arc<VirtualAddressSpace>>,

    /// Open file descriptor table
    #[cfg(feature = "alloc")]
    pub file_table: Mutex<FileTable>,

    /// Environment variables, as set by exec()/execve()
    #[cfg(feature = "alloc")]
    pub env_vars: Mutex<BTreeMap<String, String>>,

    /// Threads belonging to this process
    #[cfg(feature = "alloc")]
    pub threads: Mutex<Vec<crate::sched::ThreadHandle>>,

    /// Child processes
    #[cfg(feature = "alloc")]
    pub children: Mutex<Vec<ProcessId>>,

    /// Current working directory
    #[cfg(feature = "alloc")]
    pub cwd: Mutex<ProcessCwd>,

    /// Process group ID
    pub pgid: AtomicU64,

    /// Session ID
    pub sid: AtomicU64,

    /// Exit code (set when process exits)
    pub exit_code: AtomicU32,

    /// CPU time used (in microseconds)
    pub cpu_time: AtomicU64,

    /// Memory usage statistics
    pub memory_stats: MemoryStats,

    /// Creation timestamp
    pub created_at: u64,

    /// User ID
    pub uid: u32,

    /// Group ID
    pub gid: u32,
}

/// Memory usage statistics
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Virtual memory size (bytes)
    pub virtual_size: AtomicU64,
    /// Resident set size (bytes)
    pub resident_size: AtomicU64,
    /// Shared memory size (bytes)
    pub shared_size: AtomicU64,
}

impl Process {
    /// Create a new process with a freshly initialized address space.
    #[cfg(feature = "alloc")]
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
        priority: ProcessPriority,
    ) -> Result<Self, KernelError> {
        let mut vas = VirtualAddressSpace::new();
        vas.init()?;

        Ok(Self {
            pid,
            parent,
            name,
            state: AtomicU32::new(ProcessState::Creating as u32),
            priority: Mutex::new(priority),
            address_space: Spinlock::new(Arc::new(vas)),
            file_table: Mutex::new(FileTable::new()),
            env_vars: Mutex::new(BTreeMap::new()),
            threads: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            cwd: Mutex::new(ProcessCwd::new()),
            pgid: AtomicU64::new(pid.0),
            sid: AtomicU64::new(pid.0),
            exit_code: AtomicU32::new(0),
            cpu_time: AtomicU64::new(0),
            memory_stats: MemoryStats::default(),
            created_at: crate::arch::time::get_ticks(),
            uid: 0,
            gid: 0,
        })
    }

    /// Get process state
    pub fn get_state(&self) -> ProcessState {
        match self.state.load(Ordering::Acquire) {
            0 => ProcessState::Creating,
            1 => ProcessState::Ready,
            2 => ProcessState::Running,
            3 => ProcessState::Blocked,
            4 => ProcessState::Sleeping,
            5 => ProcessState::Zombie,
            6 => ProcessState::Dead,
            _ => ProcessState::Dead,
        }
    }

    /// Set process state
    pub fn set_state(&self, state: ProcessState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Add a thread to this process
    #[cfg(feature = "alloc")]
    pub fn add_thread(&self, thread: crate::sched::ThreadHandle) {
        self.threads.lock().push(thread);
    }

    /// Remove a thread from this process by tid
    #[cfg(feature = "alloc")]
    pub fn remove_thread(&self, tid: crate::sched::ThreadId) -> Option<crate::sched::ThreadHandle> {
        let mut threads = self.threads.lock();
        let idx = threads.iter().position(|t| t.tid() == tid)?;
        Some(threads.swap_remove(idx))
    }

    /// Get a thread handle by tid
    #[cfg(feature = "alloc")]
    pub fn get_thread(&self, tid: crate::sched::ThreadId) -> Option<crate::sched::ThreadHandle> {
        self.threads.lock().iter().find(|t| t.tid() == tid).cloned()
    }

    /// Get number of threads
    #[cfg(feature = "alloc")]
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// Check if process is alive
    pub fn is_alive(&self) -> bool {
        !matches!(self.get_state(), ProcessState::Dead | ProcessState::Zombie)
    }

    /// Update CPU time
    pub fn add_cpu_time(&self, microseconds: u64) {
        self.cpu_time.fetch_add(microseconds, Ordering::Relaxed);
    }

    /// Get total CPU time
    pub fn get_cpu_time(&self) -> u64 {
        self.cpu_time.load(Ordering::Relaxed)
    }

    /// Set exit code
    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code as u32, Ordering::Release);
    }

    /// Get exit code
    pub fn get_exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire) as i32
    }

    /// Replace the address space wholesale, as exec() does. The old space's
    /// frames are dropped once the last thread resuming into it has switched
    /// CR3 away.
    #[cfg(feature = "alloc")]
    pub fn replace_address_space(&self, vas: VirtualAddressSpace) {
        *self.address_space.lock() = Arc::new(vas);
    }

    /// Current address space, cheaply cloned.
    #[cfg(feature = "alloc")]
    pub fn address_space(&self) -> Arc<VirtualAddressSpace> {
        self.address_space.lock().clone()
    }

    /// Run `f` against the address space with unique access, if it is not
    /// currently shared out. Nothing but this slot holds the `Arc` for any
    /// length of time (callers only ever clone it for the duration of a
    /// single lookup), so this succeeds whenever called from process setup,
    /// exec, or exit.
    #[cfg(feature = "alloc")]
    pub fn with_address_space_mut<R>(&self, f: impl FnOnce(&mut VirtualAddressSpace) -> R) -> Option<R> {
        let mut slot = self.address_space.lock();
        Arc::get_mut(&mut slot).map(f)
    }

    /// Tear down the process's address space in place.
    #[cfg(feature = "alloc")]
    pub fn destroy_address_space(&self) {
        if self.with_address_space_mut(|vas| vas.destroy()).is_none() {
            crate::println!(
                "[PROCESS] process {} address space still shared at exit",
                self.pid.0
            );
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        println!("[PROCESS] Dropping process {}", self.pid.0);
    }
}

/// Process builder for convenient process creation
#[cfg(feature = "alloc")]
pub struct ProcessBuilder {
    name: String,
    parent: Option<ProcessId>,
    priority: ProcessPriority,
    uid: u32,
    gid: u32,
}

#[cfg(feature = "alloc")]
impl ProcessBuilder {
    /// Create a new process builder
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            priority: ProcessPriority::Normal,
            uid: 0,
            gid: 0,
        }
    }

    /// Set parent process
    pub fn parent(mut self, pid: ProcessId) -> Self {
        self.parent = Some(pid);
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: ProcessPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set user ID
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Set group ID
    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Build the process
    pub fn build(self) -> Result<Arc<Process>, KernelError> {
        let pid = super::alloc_pid();
        let mut process = Process::new(pid, self.parent, self.name, self.priority)?;
        process.uid = self.uid;
        process.gid = self.gid;
        Ok(Arc::new(process))
    }
}
