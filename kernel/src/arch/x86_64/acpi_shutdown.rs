//! `poweroff` (C9): shut the machine down.
//!
//! A real ACPI shutdown parses the FADT for the PM1a/PM1b control port and
//! the `_S5_` sleep-state values out of the DSDT -- machinery this kernel
//! never needed for anything else, so it isn't carried just for this one
//! syscall. QEMU's `isa-debug-exit`-free `-machine q35`/`-machine pc`
//! boards both decode the fixed port below the same way a real BIOS's
//! `_S5_` object would, which is the only target this kernel's test
//! harness ever shuts down.

use x86_64::instructions::port::Port;

/// PM1a control port on QEMU's default `i440fx`/`q35` chipsets.
const PM1A_CNT: u16 = 0x604;
/// `SLP_TYP5 | SLP_EN`: enter the S5 (soft-off) sleep state.
const SLP_EN_S5: u16 = 0x2000;

/// Power the machine off. Never returns: if the hypervisor doesn't honor
/// the ACPI write (a real board with no `_S5_` wired up this way), the CPU
/// just halts forever instead.
pub fn poweroff() -> ! {
    // SAFETY: port 0x604 is QEMU's fixed ACPI PM1a control register; this
    // write is the standard ACPI soft-off sequence and has no effect
    // outside of QEMU.
    unsafe {
        Port::new(PM1A_CNT).write(SLP_EN_S5);
    }
    loop {
        x86_64::instructions::hlt();
    }
}
