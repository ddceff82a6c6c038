//! Kernel entry binary. The real boot flow lives in the `ember_kernel`
//! library; this crate only wires the `bootloader_api` entry point to it.

#![no_std]
#![no_main]

use bootloader_api::{entry_point, BootInfo};
use ember_kernel::{arch, bootstrap, fs, mm, process, sched};

entry_point!(kernel_main);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    // SAFETY: called exactly once, before any other code touches BOOT_INFO.
    unsafe {
        arch::x86_64::boot::set_boot_info(boot_info);
    }

    bootstrap::stage1_start();
    arch::init();
    bootstrap::stage1_complete();

    bootstrap::stage2_start();
    mm::init();
    bootstrap::stage2_complete();

    bootstrap::stage3_start();
    sched::init();
    bootstrap::stage3_complete();

    bootstrap::stage4_start();
    fs::init();
    bootstrap::stage4_complete();

    bootstrap::stage5_start();
    process::init();
    bootstrap::stage5_complete();

    bootstrap::stage6_start();
    bootstrap::load_initrd();
    bootstrap::stage6_complete();

    sched::run();
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    ember_kernel::println!("[KERNEL PANIC] {}", info);
    arch::halt();
}
