//! x86_64 architecture support.
//!
//! Provides hardware initialization (GDT, IDT, PIC), interrupt control,
//! serial I/O (COM1 at 0x3F8), VGA text output, and I/O port primitives
//! for the x86_64 platform.

#![allow(clippy::missing_safety_doc)]

pub mod acpi_shutdown;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod rtc;
pub mod serial;
pub mod syscall;
pub mod timer;
pub mod trap;
pub mod vga;

/// Called from bootstrap on x86_64; appears unused on other architectures.
#[allow(dead_code)]
pub fn init() {
    // SAFETY: The cli instruction disables hardware interrupts. This is required
    // during initialization to prevent interrupt handlers from firing before the
    // IDT and PIC are properly configured. nomem/nostack confirm no memory access.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }

    println!("[ARCH] Starting GDT init...");
    gdt::init();
    println!("[ARCH] GDT initialized");

    println!("[ARCH] Starting IDT init...");
    idt::init();
    println!("[ARCH] IDT initialized");

    // Remap the PIC before the IDT can expect vectors 32..47 to mean PIC
    // IRQs. Every line starts masked; idt::init unmasks timer/keyboard
    // once their gates are installed.
    println!("[ARCH] Initializing PIC...");
    // SAFETY: runs once, before interrupts are enabled.
    unsafe {
        crate::irq::init();
    }
    println!("[ARCH] PIC initialized with all interrupts masked");

    // Interrupts stay off here: the scheduler's idle loop does its own
    // `sti` immediately before `hlt`, and a userspace process's own
    // saved rflags governs whether it takes interrupts once dispatched.
    println!("[ARCH] Leaving interrupts disabled until the scheduler starts");
}

/// Halt the CPU. Used by panic/shutdown paths.
#[allow(dead_code)]
pub fn halt() -> ! {
    use x86_64::instructions::hlt;
    interrupts::disable();
    loop {
        hlt();
    }
}

/// Enable hardware interrupts. Will be used once interrupt handlers are fully
/// configured.
#[allow(dead_code)]
pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}

pub fn disable_interrupts() -> impl Drop {
    struct InterruptGuard {
        was_enabled: bool,
    }

    impl Drop for InterruptGuard {
        fn drop(&mut self) {
            if self.was_enabled {
                x86_64::instructions::interrupts::enable();
            }
        }
    }

    let was_enabled = x86_64::instructions::interrupts::are_enabled();
    x86_64::instructions::interrupts::disable();
    InterruptGuard { was_enabled }
}

pub fn idle() {
    x86_64::instructions::hlt();
}

/// Speculation barrier to mitigate Spectre-style attacks.
/// Uses LFENCE which serializes instruction execution on Intel/AMD.
#[inline(always)]
pub fn speculation_barrier() {
    // SAFETY: lfence is a serializing instruction that prevents speculative
    // execution of subsequent instructions until all prior instructions
    // complete. No side effects beyond pipeline serialization.
    unsafe {
        core::arch::asm!("lfence", options(nostack, nomem, preserves_flags));
    }
}

pub fn serial_init() -> uart_16550::SerialPort {
    // SAFETY: SerialPort::new(0x3F8) creates a serial port handle for COM1
    // at the standard I/O base address. The address is well-known and the
    // port is initialized immediately after construction.
    let mut serial_port = unsafe { uart_16550::SerialPort::new(0x3F8) };
    serial_port.init();
    serial_port
}

/// Basic I/O port functions -- used by PCI, console, and storage drivers.
#[allow(dead_code)]
pub unsafe fn outb(port: u16, value: u8) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inb(port: u16) -> u8 {
    x86_64::instructions::port::Port::new(port).read()
}

#[allow(dead_code)]
pub unsafe fn outw(port: u16, value: u16) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inw(port: u16) -> u16 {
    x86_64::instructions::port::Port::new(port).read()
}

#[allow(dead_code)]
pub unsafe fn outl(port: u16, value: u32) {
    x86_64::instructions::port::Port::new(port).write(value);
}

#[allow(dead_code)]
pub unsafe fn inl(port: u16) -> u32 {
    x86_64::instructions::port::Port::new(port).read()
}

/// Kernel heap start address (mapped by bootloader 0.9)
pub const HEAP_START: usize = 0x444444440000;

/// Flush TLB for a specific virtual address.
#[allow(dead_code)]
pub fn tlb_flush_address(addr: u64) {
    // SAFETY: `invlpg` invalidates the TLB entry for the page containing the
    // given virtual address. Privileged, no side effects beyond TLB.
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) addr);
    }
}

/// Flush entire TLB.
#[allow(dead_code)]
pub fn tlb_flush_all() {
    // SAFETY: Reloading CR3 with its current value flushes all non-global TLB
    // entries. Privileged, no memory side effects.
    unsafe {
        let cr3: u64;
        core::arch::asm!("mov {}, cr3", out(reg) cr3);
        core::arch::asm!("mov cr3, {}", in(reg) cr3);
    }
}

mod interrupts {
    /// Enable interrupts. Will be called once interrupt handlers are
    /// registered.
    #[allow(dead_code)]
    pub unsafe fn enable() {
        x86_64::instructions::interrupts::enable();
    }

    #[allow(dead_code)]
    pub fn disable() {
        x86_64::instructions::interrupts::disable();
    }
}
