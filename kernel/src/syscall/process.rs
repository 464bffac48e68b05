//! `exit`/`fork`/`waitpid`/`kill` and the PCB-field accessors
//! (`getppid`/`getprio`/`setprio`), plus `sleep`. Most of the heavy lifting
//! already lives in [`crate::process::exit`] and [`crate::process::fork`];
//! this module is the syscall-ABI glue over them -- argument decoding,
//! user-pointer validation, and mapping their richer outcomes down to
//! [`super::Completion`].

use super::{err, ok, Completion};
use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation;
use crate::process::exit::{self, KillOutcome, WaitOutcome};
use crate::process::pcb::{Pid, Priority};
use crate::process::table::PROCESS_TABLE;

pub fn exit(caller: Pid, status: i32) -> KernelResult<()> {
    exit::exit(caller, status)
}

pub fn fork(caller: Pid) -> KernelResult<u64> {
    crate::process::fork::fork(caller).map(|pid| pid as u64)
}

/// `waitpid(pid, *status)`. The immediately-reaped case writes
/// `exit_status` through the caller's own status pointer here (the blocked
/// case has it written later, when a child actually exits, by
/// `process::exit`'s own bookkeeping).
pub fn waitpid(caller: Pid, pid_filter: Pid, status_ptr: u64) -> Completion {
    match exit::waitpid(caller, pid_filter) {
        Ok(WaitOutcome::Reaped { pid, exit_status }) => {
            if status_ptr != 0 {
                if let Err(e) = write_status(caller, status_ptr, exit_status) {
                    return err(e);
                }
            }
            ok(pid as u64)
        }
        Ok(WaitOutcome::Blocked) => Completion::Blocked,
        Err(e) => err(e),
    }
}

fn write_status(caller: Pid, status_ptr: u64, exit_status: i32) -> KernelResult<()> {
    let mapper = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).ok_or(KernelError::NotFound)?;
        pcb.memory.as_ref().ok_or(KernelError::BadParameter)?.mapper
    };
    let dst = user_validation::translate(&mapper, status_ptr, core::mem::size_of::<i32>(), true)?;
    // SAFETY: `translate` verified `dst` is a present, writable,
    // unprivileged page in the caller's own address space.
    unsafe { core::ptr::write_unaligned(dst as *mut i32, exit_status) };
    Ok(())
}

pub fn kill(caller: Pid, target: Pid) -> Completion {
    match exit::kill(caller, target) {
        Ok(KillOutcome::Done) => ok(0),
        Ok(KillOutcome::DispatchSelf) => Completion::Blocked,
        Err(e) => err(e),
    }
}

pub fn getppid(caller: Pid) -> KernelResult<u64> {
    let table = PROCESS_TABLE.lock();
    Ok(table.get(caller).ok_or(KernelError::NotFound)?.parent as u64)
}

pub fn getprio(caller: Pid) -> KernelResult<u64> {
    let table = PROCESS_TABLE.lock();
    Ok(table.get(caller).ok_or(KernelError::NotFound)?.priority as u64)
}

pub fn setprio(caller: Pid, raw: u64) -> KernelResult<u64> {
    let priority = match raw {
        0 => Priority::High,
        1 => Priority::Standard,
        2 => Priority::Low,
        3 => Priority::Deferred,
        _ => return Err(KernelError::BadParameter),
    };
    let mut table = PROCESS_TABLE.lock();
    let pcb = table.get_mut(caller).ok_or(KernelError::NotFound)?;
    let old = pcb.priority;
    pcb.priority = priority;
    Ok(old as u64)
}

/// `sleep(ms)`: `ms == 0` is a voluntary yield (re-schedule self,
/// dispatch); otherwise park on the sleep queue until `ticks >= now + ms`.
/// The tick rate is ~1 kHz, so ticks and milliseconds are the same unit
/// here.
pub fn sleep(caller: Pid, ms: u64) -> Completion {
    if ms == 0 {
        crate::sched::schedule(caller);
        return Completion::Blocked;
    }

    let now = crate::arch::x86_64::timer::get_ticks();
    crate::process::sleep_until(caller, now + ms);
    Completion::Blocked
}
