//! Architecture-independent handle onto the saved register bank.
//!
//! This kernel targets x86_64 only, so this is a thin, uniformly-named
//! re-export of `arch::x86_64::context` for callers (the PCB, the
//! scheduler) that would otherwise have to spell out the architecture.

pub use crate::arch::x86_64::context::{enter_userspace, switch_registers, Registers};
