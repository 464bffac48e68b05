//! Timer tick accessor, kept as its own module so C7/C11 callers don't
//! reach into `arch::x86_64` directly.

/// Get current timer tick count (C11 tick counter).
pub fn get_ticks() -> u64 {
    crate::arch::x86_64::timer::get_ticks()
}
