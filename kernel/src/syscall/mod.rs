//! System call layer (C9): the user-visible contract processes run
//! against. Every syscall is identified by a small integer carried in
//! `rax`; [`dispatch`] reads it (and up to four arguments from
//! `rdi, rsi, rdx, rcx`) out of the caller's saved register bank, routes it
//! to a per-call handler, and reports the result back through `rax`.
//!
//! Handlers live in per-category modules the way the categories are named
//! in the surface: [`process`] (exit/fork/wait/kill/priority), [`memory`]
//! (brk/sbrk/shared pages/framebuffer), [`time`] (clock/ticks/keyboard
//! input), [`filesystem`] (open/close/read/write/seek).

mod filesystem;
mod memory;
mod process;
mod time;

use crate::error::KernelError;
use crate::process::pcb::Pid;
use crate::process::table::PROCESS_TABLE;

/// What the trap stub should do once [`dispatch`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// The caller's return value is already sitting in its PCB's `rax`;
    /// resume it directly.
    Continue,
    /// The caller was blocked, killed, or otherwise taken off the CPU;
    /// the trap stub must call `sched::dispatch()` instead of resuming it.
    Dispatch,
}

/// Syscall numbers. Assigned in the order the surface is listed; there is
/// no ABI compatibility constraint to preserve (the sysroot this kernel's
/// programs are built against is versioned alongside the kernel itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
enum Syscall {
    Exit = 0,
    Fork = 1,
    Waitpid = 2,
    Kill = 3,
    Getpid = 4,
    Getppid = 5,
    Gettime = 6,
    Getprio = 7,
    Setprio = 8,
    Sleep = 9,
    Brk = 10,
    Sbrk = 11,
    Open = 12,
    Close = 13,
    Read = 14,
    Write = 15,
    Seek = 16,
    Poweroff = 17,
    Drm = 18,
    Ticks = 19,
    Allocshared = 20,
    Popsharedmem = 21,
    Keypoll = 22,
}

impl TryFrom<u64> for Syscall {
    type Error = ();

    fn try_from(value: u64) -> Result<Self, ()> {
        Ok(match value {
            0 => Self::Exit,
            1 => Self::Fork,
            2 => Self::Waitpid,
            3 => Self::Kill,
            4 => Self::Getpid,
            5 => Self::Getppid,
            6 => Self::Gettime,
            7 => Self::Getprio,
            8 => Self::Setprio,
            9 => Self::Sleep,
            10 => Self::Brk,
            11 => Self::Sbrk,
            12 => Self::Open,
            13 => Self::Close,
            14 => Self::Read,
            15 => Self::Write,
            16 => Self::Seek,
            17 => Self::Poweroff,
            18 => Self::Drm,
            19 => Self::Ticks,
            20 => Self::Allocshared,
            21 => Self::Popsharedmem,
            22 => Self::Keypoll,
            _ => return Err(()),
        })
    }
}

/// What a handler did with the caller, once its result (if any) has
/// already been folded into [`Completion`].
enum Completion {
    /// Write `value` into the caller's `rax` and resume it.
    Value(i64),
    /// The caller is already off the CPU (blocked or killed); the trap
    /// stub must dispatch.
    Blocked,
}

/// The four argument registers, read verbatim; each handler interprets as
/// many of them as its signature needs.
struct Args {
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
}

/// Route `caller`'s pending syscall (already mirrored into its PCB by the
/// trap stub) to a handler and report the outcome.
///
/// A null/out-of-range syscall number is a fatal fault for the caller: it
/// has no legitimate way to produce one, so this is scoped the same as an
/// unrecoverable CPU exception.
pub fn dispatch(caller: Pid) -> SyscallOutcome {
    let (number, args) = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(caller).expect("dispatch only runs for a live pid");
        (pcb.regs.rax, Args { a1: pcb.regs.rdi, a2: pcb.regs.rsi, a3: pcb.regs.rdx, a4: pcb.regs.rcx })
    };

    let Ok(call) = Syscall::try_from(number) else {
        log::warn!("pid {caller} made unknown syscall {number}");
        let _ = crate::process::exit::zombify(caller);
        return SyscallOutcome::Dispatch;
    };

    match run(caller, call, args) {
        Completion::Value(v) => {
            let mut table = PROCESS_TABLE.lock();
            table.get_mut(caller).expect("caller still live").regs.set_return_value(v as u64);
            SyscallOutcome::Continue
        }
        Completion::Blocked => SyscallOutcome::Dispatch,
    }
}

fn ok(value: u64) -> Completion {
    Completion::Value(value as i64)
}

fn err(e: KernelError) -> Completion {
    Completion::Value(e.to_syscall_errno())
}

fn from_result(result: Result<u64, KernelError>) -> Completion {
    match result {
        Ok(v) => ok(v),
        Err(e) => err(e),
    }
}

fn run(caller: Pid, call: Syscall, args: Args) -> Completion {
    match call {
        Syscall::Exit => {
            let _ = process::exit(caller, args.a1 as i32);
            Completion::Blocked
        }
        Syscall::Fork => from_result(process::fork(caller)),
        Syscall::Waitpid => process::waitpid(caller, args.a1 as Pid, args.a2),
        Syscall::Kill => process::kill(caller, args.a1 as Pid),
        Syscall::Getpid => ok(caller as u64),
        Syscall::Getppid => from_result(process::getppid(caller)),
        Syscall::Gettime => ok(time::gettime()),
        Syscall::Getprio => from_result(process::getprio(caller)),
        Syscall::Setprio => from_result(process::setprio(caller, args.a1)),
        Syscall::Sleep => process::sleep(caller, args.a1),
        Syscall::Brk => from_result(memory::brk(caller, args.a1)),
        Syscall::Sbrk => from_result(memory::sbrk(caller, args.a1 as i64)),
        Syscall::Open => from_result(filesystem::open(caller, args.a1, args.a2, args.a3)),
        Syscall::Close => from_result(filesystem::close(caller, args.a1)),
        Syscall::Read => from_result(filesystem::read(caller, args.a1, args.a2, args.a3)),
        Syscall::Write => from_result(filesystem::write(caller, args.a1, args.a2, args.a3)),
        Syscall::Seek => from_result(filesystem::seek(caller, args.a1, args.a2, args.a3)),
        Syscall::Poweroff => crate::arch::x86_64::acpi_shutdown::poweroff(),
        Syscall::Drm => from_result(memory::drm(caller, args.a1, args.a2, args.a3, args.a4)),
        Syscall::Ticks => ok(crate::arch::x86_64::timer::get_ticks()),
        Syscall::Allocshared => from_result(memory::allocshared(caller, args.a1 as usize, args.a2 as Pid)),
        Syscall::Popsharedmem => from_result(memory::popsharedmem(caller)),
        Syscall::Keypoll => from_result(time::keypoll(caller, args.a1)),
    }
}
