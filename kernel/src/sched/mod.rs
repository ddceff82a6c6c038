//! Per-CPU preemptive scheduler (spec §4.5).
//!
//! This build only brings up the boot CPU, so there is a single
//! [`PerCpu`] instance rather than one per `seq_id` (mirrors the single
//! queue in [`crate::timer`]). Threads never migrate, so "per-CPU" and
//! "global" coincide here; the free functions below are the seam a future
//! multi-CPU build would route through a `cpu_current()` lookup instead.

#![allow(dead_code)]

pub mod queue;

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use crate::arch::x86_64::context::{ArchThreadContext, FpuState, ThreadContext as _};
use crate::println;
use crate::sync::Spinlock;
use crate::timer::{self, EventId};
use queue::ReadyQueue;

/// Kernel stack allocated for every thread (idle, kernel, or user-mode).
/// 32 KiB matches the teacher's default and comfortably covers the syscall
/// dispatcher's stack usage without a guard page (not yet implemented).
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Default scheduling quantum (spec §4.5, Glossary).
pub const QUANTUM_NS: u64 = 5_000_000;

pub type ThreadId = u64;

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

pub fn alloc_tid() -> ThreadId {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}

/// Thread run state (spec §3, §4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    Blocked,
    Done,
}

/// What the thread's first context switch resumes into.
#[derive(Clone, Copy)]
enum Launch {
    /// Ring-0 entry point; used for the idle thread and other kernel-only
    /// threads. Returning from `entry` is a bug (kernel threads loop forever
    /// or call `exit_current`).
    Kernel { entry: fn() -> ! },
    /// Ring-3 entry point and user stack pointer, consumed by
    /// [`user_thread_trampoline`] on first dispatch.
    User { entry: u64, user_sp: u64 },
    /// A `fork()` child: the parent's captured register snapshot plus its
    /// stack pointer, consumed by [`fork_thread_trampoline`] on first
    /// dispatch. Unlike `User`, every preserved register resumes exactly
    /// where the parent's `fork()` call left off, with `rax` forced to 0.
    Fork {
        frame: crate::arch::x86_64::syscall::SyscallFrame,
        user_sp: u64,
    },
}

/// A heap-allocated kernel stack, freed when the owning [`Thread`] drops.
struct KernelStack {
    base: *mut u8,
    size: usize,
}

unsafe impl Send for KernelStack {}

impl KernelStack {
    fn new(size: usize) -> Self {
        use core::alloc::Layout;
        let layout = Layout::from_size_align(size, 16).expect("bad kernel stack layout");
        // SAFETY: layout has non-zero size and a valid alignment.
        let base = unsafe { alloc::alloc::alloc(layout) };
        assert!(!base.is_null(), "kernel stack allocation failed");
        Self { base, size }
    }

    fn top(&self) -> u64 {
        (self.base as u64) + self.size as u64
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        use core::alloc::Layout;
        let layout = Layout::from_size_align(self.size, 16).unwrap();
        // SAFETY: `base` was allocated with the same layout in `new`.
        unsafe { alloc::alloc::dealloc(self.base, layout) };
    }
}

/// A schedulable thread of execution (spec §3 "Thread").
///
/// `ready_node`/`wait_node`/`proc_node` from the spec's intrusive-list data
/// model are realised here as plain `Arc` clones held by whichever
/// container (ready queue, mutex wait queue, process thread list) currently
/// owns a reference, rather than embedded list links — idiomatic for a
/// refcounted design and equivalent to the spec's single-owner invariant
/// ("at most one scheduler holds a Thread via `ready_node`").
pub struct Thread {
    pub tid: ThreadId,
    pub name: String,
    /// Back-pointer to the owning process. `None` for the idle thread and
    /// other kernel-only threads, which belong to no process.
    owning_process: Spinlock<Option<Arc<crate::process::Process>>>,
    status: Spinlock<ThreadStatus>,
    context: UnsafeCell<ArchThreadContext>,
    kernel_stack: KernelStack,
    fpu_save_area: Box<UnsafeCell<FpuState>>,
    launch: Launch,
    /// FS base MSR value applied lazily on the next dispatch of this thread
    /// (spec §3 `fs_base`), written by `set_tcb` (syscall 2).
    pub fs_base: AtomicU64,
    /// Saved user-mode stack pointer at last syscall entry (spec §3
    /// `syscall_sp`); written by the syscall entry stub.
    pub syscall_sp: AtomicU64,
    /// Event armed by `sleep()`.
    sleep_event: Spinlock<Option<EventId>>,
}

unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    fn new(name: String, launch: Launch) -> Self {
        let kernel_stack = KernelStack::new(KERNEL_STACK_SIZE);
        let entry = match launch {
            Launch::Kernel { .. } => kernel_thread_trampoline as usize,
            Launch::User { .. } => user_thread_trampoline as usize,
            Launch::Fork { .. } => fork_thread_trampoline as usize,
        };
        let mut context = ArchThreadContext::new();
        context.init(entry, 0, kernel_stack.top() as usize);
        Self {
            tid: alloc_tid(),
            name,
            owning_process: Spinlock::new(None),
            status: Spinlock::new(ThreadStatus::Ready),
            context: UnsafeCell::new(context),
            kernel_stack,
            fpu_save_area: Box::new(UnsafeCell::new(FpuState {
                fxsave: [0; 512],
                xsave: [0; 2048],
            })),
            launch,
            fs_base: AtomicU64::new(0),
            syscall_sp: AtomicU64::new(0),
            sleep_event: Spinlock::new(None),
        }
    }

    /// Build a kernel-only thread (spec §4.11 `thread_kernel_create`):
    /// no FPU area use, no user transition, `entry` never returns.
    pub fn new_kernel(name: String, entry: fn() -> !) -> ThreadHandle {
        ThreadHandle(Arc::new(Self::new(name, Launch::Kernel { entry })))
    }

    /// Build a user-mode thread (spec §4.11 `thread_create_user`): on first
    /// dispatch, [`user_thread_trampoline`] IRETQs into `entry` at `user_sp`.
    /// The caller must still attach an owning process via
    /// [`ThreadHandle::bind_process`] before scheduling it, so the context's
    /// CR3 points at the right address space.
    pub fn new_user(name: String, entry: u64, user_sp: u64) -> ThreadHandle {
        ThreadHandle(Arc::new(Self::new(name, Launch::User { entry, user_sp })))
    }

    /// Build a `fork()` child thread (spec §4.11 `process_fork`): on first
    /// dispatch, [`fork_thread_trampoline`] resumes exactly where the
    /// parent's `fork()` call left off, with `rax` forced to `0`. The
    /// caller must still attach an owning process via
    /// [`ThreadHandle::bind_process`].
    pub fn new_fork(
        name: String,
        frame: crate::arch::x86_64::syscall::SyscallFrame,
        user_sp: u64,
    ) -> ThreadHandle {
        ThreadHandle(Arc::new(Self::new(name, Launch::Fork { frame, user_sp })))
    }

    fn set_status(&self, status: ThreadStatus) {
        *self.status.lock() = status;
    }

    fn address_space(&self) -> Option<Arc<crate::mm::VirtualAddressSpace>> {
        self.owning_process
            .lock()
            .as_ref()
            .map(|p| p.address_space())
    }
}

/// A cheaply-cloned, reference-counted handle to a [`Thread`].
///
/// Exactly the opaque type `sync::mutex`'s wait queues, [`queue::ReadyQueue`],
/// and `process::Process::threads` all need: none of those callers touch
/// `Thread`'s fields directly.
#[derive(Clone)]
pub struct ThreadHandle(Arc<Thread>);

impl ThreadHandle {
    pub fn tid(&self) -> ThreadId {
        self.0.tid
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn status(&self) -> ThreadStatus {
        *self.0.status.lock()
    }

    pub fn owning_process(&self) -> Option<Arc<crate::process::Process>> {
        self.0.owning_process.lock().clone()
    }

    /// Attach this thread to `proc` and point its saved context at the
    /// process's page tables, so the next dispatch runs with the right CR3.
    pub fn bind_process(&self, proc: Arc<crate::process::Process>) {
        let root = proc.address_space().get_page_table();
        *self.0.owning_process.lock() = Some(proc);
        // SAFETY: the thread has not yet run (it is either being built or
        // parked), so nothing else reads or writes its context concurrently.
        unsafe { (*self.0.context.get()).cr3 = root };
    }

    /// Arrange for the fork child to observe `0` as its `fork()` return
    /// value (spec §4.11).
    pub fn set_return_value(&self, value: usize) {
        // SAFETY: same as `bind_process`: only valid before the thread is
        // first dispatched.
        unsafe { (*self.0.context.get()).set_return_value(value) };
    }

    pub fn set_fs_base(&self, base: u64) {
        self.0.fs_base.store(base, Ordering::Relaxed);
    }

    pub fn syscall_sp(&self) -> u64 {
        self.0.syscall_sp.load(Ordering::Relaxed)
    }

    pub fn set_syscall_sp(&self, sp: u64) {
        self.0.syscall_sp.store(sp, Ordering::Relaxed);
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// First code a kernel thread's context resumes into.
extern "C" fn kernel_thread_trampoline() -> ! {
    let handle = current_thread_handle();
    let entry = match handle.0.launch {
        Launch::Kernel { entry } => entry,
        Launch::User { .. } => unreachable!("user thread dispatched through kernel trampoline"),
    };
    entry()
}

/// First code a user thread's context resumes into: promotes ring 0 -> ring
/// 3 via `iretq` (spec §4.5 "User threads start at a stub that IRETQs...").
extern "C" fn user_thread_trampoline() -> ! {
    let handle = current_thread_handle();
    let (entry, user_sp) = match handle.0.launch {
        Launch::User { entry, user_sp } => (entry, user_sp),
        Launch::Kernel { .. } => unreachable!("kernel thread dispatched through user trampoline"),
    };
    let fs_base = handle.0.fs_base.load(Ordering::Relaxed);
    if fs_base != 0 {
        const IA32_FS_BASE: u32 = 0xC000_0100;
        crate::arch::x86_64::msr::wrmsr(IA32_FS_BASE, fs_base);
    }
    let selectors = crate::arch::x86_64::gdt::selectors();
    // SAFETY: entry/user_sp were validated by the ELF loader / exec path
    // before this thread was scheduled; the selectors come from the live
    // GDT set up by `gdt::init()`.
    unsafe {
        crate::arch::x86_64::usermode::enter_usermode(
            entry,
            user_sp,
            selectors.user_code_selector.0 as u64,
            selectors.user_data_selector.0 as u64,
        )
    }
}

/// First code a `fork()` child resumes into: restores the parent's
/// captured registers (spec §4.11 "child resumes as if fork() returned 0").
extern "C" fn fork_thread_trampoline() -> ! {
    let handle = current_thread_handle();
    let (frame, user_sp) = match handle.0.launch {
        Launch::Fork { frame, user_sp } => (frame, user_sp),
        _ => unreachable!("non-fork thread dispatched through fork trampoline"),
    };
    let fs_base = handle.0.fs_base.load(Ordering::Relaxed);
    if fs_base != 0 {
        const IA32_FS_BASE: u32 = 0xC000_0100;
        crate::arch::x86_64::msr::wrmsr(IA32_FS_BASE, fs_base);
    }
    let selectors = crate::arch::x86_64::gdt::selectors();
    // SAFETY: frame was captured from the parent's own live syscall entry
    // and the child's page tables were installed by `bind_process` before
    // this thread was ever scheduled.
    unsafe {
        crate::arch::x86_64::usermode::enter_usermode_fork(
            &frame,
            user_sp,
            selectors.user_code_selector.0 as u64,
            selectors.user_data_selector.0 as u64,
        )
    }
}

/// Per-CPU scheduler state (spec §4.5). A single static instance stands in
/// for "the current CPU's record" since only the boot CPU is brought up.
struct PerCpu {
    ready_queue: ReadyQueue,
    idle_thread: Spinlock<Option<ThreadHandle>>,
    current_thread: Spinlock<Option<ThreadHandle>>,
    should_yield: AtomicBool,
    preemption_event: Spinlock<Option<EventId>>,
}

impl PerCpu {
    const fn new() -> Self {
        Self {
            ready_queue: ReadyQueue::new(),
            idle_thread: Spinlock::new(None),
            current_thread: Spinlock::new(None),
            should_yield: AtomicBool::new(false),
            preemption_event: Spinlock::new(None),
        }
    }
}

static CPU0: PerCpu = PerCpu::new();

fn this_cpu() -> &'static PerCpu {
    &CPU0
}

fn idle_entry() -> ! {
    loop {
        crate::arch::idle();
    }
}

/// Bring up the scheduler: create the idle thread and make it current so
/// the first `yield_now` has somewhere to save a context.
pub fn init() {
    println!("[SCHED] Initializing scheduler...");
    let idle = Thread::new_kernel(String::from("idle"), idle_entry);
    idle.0.set_status(ThreadStatus::Running);
    *this_cpu().idle_thread.lock() = Some(idle.clone());
    *this_cpu().current_thread.lock() = Some(idle);
    println!("[SCHED] Scheduler initialized");
}

/// Enter the scheduler loop. Never returns in the ordinary sense: once a
/// user thread is scheduled, this function's stack is only resumed again
/// when every other thread is blocked or done and the idle thread runs.
pub fn run() -> ! {
    println!("[SCHED] Entering scheduler main loop");
    preempt();
    loop {
        crate::arch::idle();
        if take_should_yield() {
            yield_now(ThreadStatus::Ready);
        }
    }
}

/// The calling CPU's currently running thread.
pub fn current_thread_handle() -> ThreadHandle {
    this_cpu()
        .current_thread
        .lock()
        .clone()
        .expect("current_thread_handle called before sched::init")
}

/// Mark `t` runnable and append it to this CPU's ready queue (spec §4.5
/// `schedule_thread`).
pub fn schedule_thread(t: ThreadHandle) {
    t.0.set_status(ThreadStatus::Ready);
    this_cpu().ready_queue.push_back(t);
}

/// Suspend the current thread with `target_status` and dispatch the next
/// ready thread, or the idle thread if none is ready (spec §4.5 `yield`).
pub fn yield_now(target_status: ThreadStatus) {
    let _guard = crate::arch::disable_interrupts();

    let cpu = this_cpu();
    let current = cpu
        .current_thread
        .lock()
        .clone()
        .expect("yield_now called before sched::init");
    let idle = cpu
        .idle_thread
        .lock()
        .clone()
        .expect("yield_now called before sched::init");

    let next = cpu.ready_queue.pop_front().unwrap_or_else(|| idle.clone());

    if next == current && target_status == ThreadStatus::Ready {
        // Nothing else runnable; stay on the current thread without a
        // context switch.
        return;
    }

    current.0.set_status(target_status);
    if target_status == ThreadStatus::Ready && current != idle {
        cpu.ready_queue.push_back(current.clone());
    }

    next.0.set_status(ThreadStatus::Running);
    *cpu.current_thread.lock() = Some(next.clone());
    crate::arch::x86_64::gdt::set_kernel_stack(next.0.kernel_stack.top());

    // SAFETY: `current`/`next` are distinct, live threads; their contexts
    // were either just populated by `Thread::new` or left by a prior
    // `context_switch` in a resumable state. Interrupts are masked for the
    // duration via `_guard`.
    unsafe {
        crate::arch::x86_64::context::save_fpu_state(&mut *current.0.fpu_save_area.get());
        crate::arch::x86_64::context::switch_context(
            &mut *current.0.context.get(),
            &*next.0.context.get(),
        );
        // Resumed later as `current` again; restore our own FPU state.
        crate::arch::x86_64::context::restore_fpu_state(&*current.0.fpu_save_area.get());
    }
}

/// Callback invoked from the timer interrupt when a sleeping thread's
/// deadline passes.
fn wake_sleeper(raw: usize) {
    // SAFETY: `raw` is an `Arc<Thread>` pointer leaked by `sleep` and
    // reconstructed exactly once here.
    let thread = unsafe { Arc::from_raw(raw as *const Thread) };
    schedule_thread(ThreadHandle(thread));
}

/// Block the current thread for at least `ns` nanoseconds (spec §4.5
/// `sleep`).
pub fn sleep(ns: u64) {
    let current = current_thread_handle();
    let deadline = timer::now_ns() + ns;
    let raw = Arc::into_raw(current.0.clone());
    let event = timer::event_add(deadline, wake_sleeper, raw as usize);
    *current.0.sleep_event.lock() = Some(event);
    yield_now(ThreadStatus::Blocked);
}

fn preemption_fired(_arg: usize) {
    this_cpu().should_yield.store(true, Ordering::Release);
}

/// (Re)arm the preemption event one quantum from now (spec §4.5 `preempt`).
pub fn preempt() {
    let event = timer::event_add(timer::now_ns() + QUANTUM_NS, preemption_fired, 0);
    if let Some(old) = this_cpu().preemption_event.lock().replace(event) {
        timer::event_cancel(old);
    }
}

/// Consume and clear the "preemption fired" flag; called by the timer
/// interrupt handler after `timer::on_tick()`.
pub fn take_should_yield() -> bool {
    this_cpu().should_yield.swap(false, Ordering::AcqRel)
}

/// Terminate the current thread (spec §4.12 syscall 0 `exit`). Reaping
/// `Done` threads (freeing the kernel stack, dropping the process's thread
/// list entry) is left to whoever still holds a reference once this call
/// never returns -- the process's thread list is the last owner, pruned by
/// `process::reap_done_threads` (Open Question (d), see DESIGN.md).
pub fn exit_current() -> ! {
    if let Some(event) = this_cpu().preemption_event.lock().take() {
        timer::event_cancel(event);
    }
    yield_now(ThreadStatus::Done);
    unreachable!("yield_now(Done) never returns to the exiting thread");
}
