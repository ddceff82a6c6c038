//! Multi-stage kernel initialization.
//!
//! The boot flow is broken into stages so each subsystem's `init()` only
//! depends on the subsystems that already ran, avoiding the circular
//! dependencies an all-at-once `init()` would create (e.g. the scheduler
//! needs frame allocation, the filesystem needs the scheduler's mutexes).

use crate::{fs, println};

/// Generates the 12 bootstrap stage print functions, parametrized by the
/// architecture's early-console print macro.
#[macro_export]
macro_rules! define_bootstrap_stages {
    ($print_fn:ident) => {
        pub fn stage1_start() {
            $print_fn!("[BOOTSTRAP] Starting multi-stage kernel initialization...");
            $print_fn!("[BOOTSTRAP] Stage 1: Architecture initialization");
        }
        pub fn stage1_complete() {
            $print_fn!("[BOOTSTRAP] Architecture initialized");
        }
        pub fn stage2_start() {
            $print_fn!("[BOOTSTRAP] Stage 2: Memory management");
        }
        pub fn stage2_complete() {
            $print_fn!("[BOOTSTRAP] Memory management initialized");
        }
        pub fn stage3_start() {
            $print_fn!("[BOOTSTRAP] Stage 3: Scheduler");
        }
        pub fn stage3_complete() {
            $print_fn!("[BOOTSTRAP] Scheduler initialized");
        }
        pub fn stage4_start() {
            $print_fn!("[BOOTSTRAP] Stage 4: Filesystem");
        }
        pub fn stage4_complete() {
            $print_fn!("[BOOTSTRAP] Filesystem initialized");
        }
        pub fn stage5_start() {
            $print_fn!("[BOOTSTRAP] Stage 5: Process management");
        }
        pub fn stage5_complete() {
            $print_fn!("[BOOTSTRAP] Process management initialized");
        }
        pub fn stage6_start() {
            $print_fn!("[BOOTSTRAP] Stage 6: Initrd / init process");
        }
        pub fn stage6_complete() {
            $print_fn!("[BOOTSTRAP] Boot sequence complete");
            $print_fn!("BOOTOK");
        }
    };
}

crate::define_bootstrap_stages!(println);

/// Unpack the `initrd` boot module (USTAR archive) into the root tmpfs and
/// spawn `/usr/bin/init` as the first user process, per spec §6.
pub fn load_initrd() {
    let Some((addr, len)) = crate::arch::x86_64::boot::initrd() else {
        println!("[BOOTSTRAP] no initrd module present");
        return;
    };

    let virt = crate::mm::phys_to_virt_addr(addr) as *const u8;
    // SAFETY: the boot shim reports `(addr, len)` as the physical extent of
    // a module it loaded; the direct map covers all physical memory.
    let archive = unsafe { core::slice::from_raw_parts(virt, len as usize) };

    match fs::tar::load_tar_to_vfs(archive) {
        Ok(count) => println!("[BOOTSTRAP] initrd unpacked: {} entries", count),
        Err(e) => println!("[BOOTSTRAP] initrd unpack failed: {:?}", e),
    }

    match crate::process::spawn_init("/usr/bin/init") {
        Ok(pid) => println!("[BOOTSTRAP] init process spawned, pid={}", pid.0),
        Err(e) => println!("[BOOTSTRAP] failed to spawn init: {:?}", e),
    }
}
