//! `gettime` and `keypoll` (C11): the wall-clock and keyboard-input half
//! of the syscall surface. `ticks` is handled directly in
//! [`super::run`] -- it's a bare read of [`crate::arch::x86_64::timer`]
//! with nothing left to wrap.

use crate::drivers::keyboard;
use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation;
use crate::process::pcb::Pid;
use crate::process::table::PROCESS_TABLE;

/// `gettime()`: seconds since the Unix epoch, read from the RTC at boot
/// and advanced by the tick counter since (see
/// [`crate::arch::x86_64::rtc::current_epoch_secs`]).
pub fn gettime() -> u64 {
    crate::arch::x86_64::rtc::current_epoch_secs()
}

/// One polled key event: the decoded byte plus the modifier snapshot at
/// the moment it was read. 8 bytes, so it fits a single `u64` write
/// through the caller's pointer without needing a second field for
/// padding.
#[repr(C)]
struct KeyEvent {
    key: u8,
    modifiers: u8,
    _reserved: [u8; 6],
}

/// `keypoll(*event)`: non-blocking read of the next decoded key from the
/// keyboard buffer. Returns 1 and writes `event` if one was pending, 0
/// (leaving `event` untouched) otherwise.
pub fn keypoll(caller: Pid, event_ptr: u64) -> KernelResult<u64> {
    let Some(key) = keyboard::read_key() else {
        return Ok(0);
    };
    let event = KeyEvent { key, modifiers: keyboard::get_modifiers(), _reserved: [0; 6] };

    let mapper = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
        pcb.memory.as_ref().ok_or(KernelError::BadParameter)?.mapper
    };
    let dst = user_validation::translate(&mapper, event_ptr, core::mem::size_of::<KeyEvent>(), true)?;
    // SAFETY: `translate` verified `dst` is present, writable,
    // unprivileged memory in the caller's own address space, sized for a
    // whole `KeyEvent`.
    unsafe { core::ptr::write_unaligned(dst as *mut KeyEvent, event) };
    Ok(1)
}
