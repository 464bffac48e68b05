//! Device drivers module.
//!
//! Console/terminal (C12), keyboard/input (C11), and the PCI and ATA/IDE
//! storage drivers the tar-backed file system's boot archive is read from.

pub mod console;
pub mod framebuffer;
pub mod input;
pub mod keyboard;
pub mod pci;
pub mod storage;
pub mod terminal;

pub use console::{ConsoleDevice, ConsoleDriver, SerialConsole, VgaConsole};
pub use pci::{PciBus, PciDevice};
pub use storage::{AtaDriver, StorageDevice};

/// Initialize all drivers.
pub fn init() {
    crate::println!("[DRIVERS] Initializing device drivers...");

    // Initialize terminal state (before console, so read paths can query it)
    terminal::init();

    pci::init();
    console::init();
    storage::init();

    crate::println!("[DRIVERS] Device drivers initialized");
}
