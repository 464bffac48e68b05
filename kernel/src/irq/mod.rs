//! Remapped-PIC glue for the trap plane (C8).
//!
//! The 8259 pair is remapped from its architectural default (0x00/0x08,
//! which overlaps the CPU exception vectors) to 0x20/0x28 during
//! [`init`], then [`unmask`] turns on the specific lines C8's IDT wires
//! (timer, keyboard). Vector routing and the saved-register-bank handling
//! live in `idt`/`trap`, not here.

use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::instructions::port::Port;

/// First vector of the master PIC after remapping. The slave immediately
/// follows at `PIC_OFFSET + 8`.
pub const PIC_OFFSET: u8 = 32;

pub const TIMER_IRQ: u8 = 0;
pub const KEYBOARD_IRQ: u8 = 1;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_OFFSET, PIC_OFFSET + 8) });

/// Remap both PICs. Must run before `idt::init` loads a table that
/// expects vectors 32..47 to mean PIC IRQs rather than CPU exceptions.
/// Every line starts masked; callers unmask individually via [`unmask`]
/// once the corresponding IDT gate is installed.
///
/// # Safety
///
/// Must be called exactly once, and only before interrupts are enabled.
pub unsafe fn init() {
    // SAFETY: forwarded from this function's contract; `ChainedPics` owns
    // the 8259's command/data ports exclusively from here on.
    unsafe {
        PICS.lock().initialize();
        Port::<u8>::new(PIC1_DATA).write(0xFFu8);
        Port::<u8>::new(PIC2_DATA).write(0xFFu8);
    }
}

/// Unmask a single IRQ line (0-15, PIC-relative, not vector number).
pub fn unmask(irq_line: u8) {
    // SAFETY: direct reads/writes of the PIC's own interrupt-mask
    // register ports, which nothing else in the kernel touches once
    // `init` has run.
    unsafe {
        let (mut port, bit) = if irq_line < 8 {
            (Port::<u8>::new(PIC1_DATA), irq_line)
        } else {
            (Port::<u8>::new(PIC2_DATA), irq_line - 8)
        };
        let mask = port.read();
        port.write(mask & !(1 << bit));
    }
}

/// Send end-of-interrupt for `vector` (an IDT vector number, 32..47).
/// Must be called once the handler for that vector has finished.
pub fn notify_end_of_interrupt(vector: u8) {
    // SAFETY: `vector` comes from the trap stub's own IDT index, so it is
    // always a vector this PIC pair actually owns.
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}
