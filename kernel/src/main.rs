#![no_std]
#![no_main]

use core::panic::PanicInfo;

use bootloader_api::config::Mapping;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};

/// Map all physical memory at a bootloader-chosen virtual offset so
/// `mm::phys_to_virt` (and the paging engine built on it) has a
/// dereferenceable alias for every physical frame.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    ferrokern::bootstrap::run(boot_info)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    ferrokern::println!("[KERNEL PANIC] {}", info);
    ferrokern::arch::halt();
}
