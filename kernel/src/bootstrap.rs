//! Kernel bootstrap (C1).
//!
//! Single-stage init for a single-architecture (x86_64) kernel: each
//! subsystem is brought up in the dependency order the rest of the crate
//! assumes (frame allocator and heap before anything that allocates, IDT/IRQs
//! before any driver that takes an interrupt, the tar file system before
//! `process::init` loads `/init` out of it), with a `println!` per stage so a
//! hang is easy to place from the serial/VGA log.

use bootloader_api::BootInfo;

use crate::drivers::framebuffer::FramebufferInfo;
use crate::{arch, drivers, fs, mm, process, sched};

/// Entry point handed to `bootloader_api::entry_point!` by `main.rs`. Never
/// returns: ends by handing off to the scheduler's dispatch loop.
pub fn run(boot_info: &'static mut BootInfo) -> ! {
    crate::println!("[BOOTSTRAP] Starting kernel initialization...");

    arch::init();
    crate::println!("[BOOTSTRAP] Architecture initialized");

    init_memory(boot_info);
    crate::println!("[BOOTSTRAP] Memory management initialized");

    arch::x86_64::rtc::init();
    drivers::keyboard::init();
    init_framebuffer(boot_info);
    drivers::init();
    crate::println!("[BOOTSTRAP] Drivers initialized");

    fs::init(ramdisk_bytes(boot_info));
    crate::println!("[BOOTSTRAP] File system initialized");

    process::init();
    sched::init();

    crate::println!("[BOOTSTRAP] Boot sequence complete, entering scheduler");
    sched::start();
}

/// Stage 2: record the bootloader's physical-memory offset, build the frame
/// bitmap from its memory map, and install the kernel heap.
fn init_memory(boot_info: &BootInfo) {
    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory (see BOOTLOADER_CONFIG in main.rs)");

    let (regions, count) = mm::bootloader::collect_usable_regions(&boot_info.memory_regions);

    // SAFETY: `phys_mem_offset` is the offset the bootloader itself just
    // reported for its own physical-memory mapping, and this is the first
    // and only call to `mm::init`.
    unsafe {
        mm::init(phys_mem_offset, &regions[..count]);
    }
}

/// Record the boot-time linear framebuffer, if the bootloader handed us one
/// (headless/serial-only boots don't). Its physical base isn't reported
/// directly by `bootloader_api`, so it's recovered by walking the current
/// (bootloader-built) page tables for the virtual address the buffer is
/// already mapped at.
fn init_framebuffer(boot_info: &mut BootInfo) {
    let Some(fb) = boot_info.framebuffer.as_mut() else {
        crate::println!("[BOOTSTRAP] No framebuffer provided by bootloader");
        return;
    };
    let info = fb.info();
    let va = fb.buffer_mut().as_mut_ptr() as u64;

    let mapper = crate::mm::page_table::PageMapper::current();
    let Some(frame) = mapper.get_pte(va).and_then(|e| e.frame()) else {
        crate::println!("[BOOTSTRAP] Framebuffer VA {:#x} has no backing frame, skipping", va);
        return;
    };

    drivers::framebuffer::init(FramebufferInfo {
        phys_addr: frame.as_addr(),
        width: info.width as u32,
        height: info.height as u32,
        bpp: (info.bytes_per_pixel * 8) as u32,
    });
    crate::println!(
        "[BOOTSTRAP] Framebuffer: {}x{} @ {} bpp, phys={:#x}",
        info.width, info.height, info.bytes_per_pixel * 8, frame.as_addr()
    );
}

/// The optional initial ramdisk the boot blob points at (C1 glossary:
/// "Boot handoff"), as the raw bytes the tar file system parses. Empty when
/// none was loaded, which `fs::init` treats as "no boot archive present".
fn ramdisk_bytes(boot_info: &BootInfo) -> &'static [u8] {
    let Some(addr) = boot_info.ramdisk_addr.into_option() else {
        return &[];
    };
    // SAFETY: `addr`/`ramdisk_len` come straight from the bootloader's own
    // boot-info block, which maps the ramdisk for the kernel's whole
    // lifetime starting at boot.
    unsafe { core::slice::from_raw_parts(addr as *const u8, boot_info.ramdisk_len as usize) }
}
