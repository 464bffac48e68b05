//! Hand-written trap entry stubs for the two vectors that can redirect
//! control to a process other than the one that was interrupted: the
//! timer (32) and the syscall gate (0x80, see [`super::syscall`]).
//!
//! Every other vector (breakpoint, page fault, general protection fault,
//! double fault) stays on the compiler-generated `extern "x86-interrupt"`
//! ABI in `idt.rs`: those either resume the exact context that faulted or
//! kill it outright, neither of which needs the interrupted general
//! registers to be readable from Rust. Resuming a *different* live
//! process does need that -- the PCB's saved register bank has to be
//! exactly as rich as what hardware captured -- so these two stubs save
//! every GPR by hand before any Rust prologue can touch them. Each stub
//! stashes a pointer to the saved bank in a kernel-global and, if the
//! interrupted context was userspace, mirrors those registers into the
//! current PCB's saved registers.
//!
//! Both gates run on [`super::gdt::TRAP_IST_INDEX`], so the CPU always
//! pushes a full (ss, rsp, rflags, cs, rip) frame here, even when the
//! interrupt fires from ring 0 -- this is what lets one stub shape serve
//! both "a process was running" and "the scheduler's idle `hlt` loop was
//! running" without branching on the source privilege level.

use core::arch::naked_asm;

use crate::arch::context::Registers;
use crate::process::pcb::Pid;
use crate::process::table::PROCESS_TABLE;

/// The 15 general-purpose registers pushed by hand, in ascending-address
/// order (i.e. the reverse of the order they're pushed in, since `push`
/// grows the stack downward).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapGprs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

/// The frame the CPU itself pushes, sitting immediately above
/// [`TrapGprs`] on the trap stack (lowest address first).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapHwFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// A pointer to the most recently captured trap frame. Written by every
/// naked trap entry before calling into Rust; read by the panic path to
/// print the last thing the CPU was doing. Only ever dereferenced while
/// interrupts are disabled, which the trap gates guarantee on entry.
static mut LAST_TRAP_GPRS: *mut TrapGprs = core::ptr::null_mut();

const USER_RPL_MASK: u64 = 0b11;

fn from_user(hw: &TrapHwFrame) -> bool {
    hw.cs & USER_RPL_MASK == 3
}

/// `(gprs, hw)` for the trap frame built directly above `gprs` on the
/// stack.
///
/// # Safety
///
/// `gprs` must point at a live `TrapGprs` built by one of this module's
/// naked stubs, with the hardware frame immediately following it.
unsafe fn split_frame<'a>(gprs: *mut TrapGprs) -> (&'a mut TrapGprs, &'a TrapHwFrame) {
    // SAFETY: forwarded from this function's contract.
    unsafe {
        let hw = (gprs as *mut TrapHwFrame).add(1);
        (&mut *gprs, &*hw)
    }
}

/// Copy a captured trap frame into `pid`'s saved registers. Called before
/// running any vector-specific logic so that, if that logic decides to
/// block or preempt the caller, the PCB already holds exactly where to
/// resume it later.
fn mirror_into_pcb(pid: Pid, gprs: &TrapGprs, hw: &TrapHwFrame) {
    let mut table = PROCESS_TABLE.lock();
    let Some(pcb) = table.get_mut(pid) else { return };
    let flat_segment = if from_user(hw) {
        crate::arch::context::USER_SS
    } else {
        crate::arch::context::KERNEL_SS
    };
    pcb.regs = Registers {
        r15: gprs.r15,
        r14: gprs.r14,
        r13: gprs.r13,
        r12: gprs.r12,
        r11: gprs.r11,
        r10: gprs.r10,
        r9: gprs.r9,
        r8: gprs.r8,
        rdi: gprs.rdi,
        rsi: gprs.rsi,
        rbp: gprs.rbp,
        rbx: gprs.rbx,
        rdx: gprs.rdx,
        rcx: gprs.rcx,
        rax: gprs.rax,
        rsp: hw.rsp,
        rip: hw.rip,
        rflags: hw.rflags,
        cs: hw.cs,
        ss: hw.ss,
        ds: flat_segment,
        es: flat_segment,
        cr3: pcb.regs.cr3,
    };
}

/// Write `pcb.regs.rax` back into the live trap frame, so a syscall
/// handler's return value reaches the process when the stub's epilogue
/// resumes it.
fn copy_return_value(pid: Pid, gprs: &mut TrapGprs) {
    if let Some(pcb) = PROCESS_TABLE.lock().get(pid) {
        gprs.rax = pcb.regs.rax;
    }
}

/// Timer vector (32) entry point. Installed directly by address in
/// `idt::IDT` (a naked stub has no typed `x86-interrupt` signature to
/// register via `set_handler_fn`).
#[unsafe(naked)]
pub unsafe extern "C" fn timer_entry() {
    naked_asm!(
        "push r15", "push r14", "push r13", "push r12",
        "push r11", "push r10", "push r9",  "push r8",
        "push rbp", "push rdi", "push rsi", "push rdx",
        "push rcx", "push rbx", "push rax",
        "mov rdi, rsp",
        "call {handler}",
        "pop rax", "pop rbx", "pop rcx", "pop rdx",
        "pop rsi", "pop rdi", "pop rbp",
        "pop r8", "pop r9", "pop r10", "pop r11",
        "pop r12", "pop r13", "pop r14", "pop r15",
        "iretq",
        handler = sym timer_trap_handler,
    );
}

/// Runs with interrupts disabled (trap gate default); never called
/// concurrently with itself or with `syscall_trap_handler` since the
/// kernel is non-preemptible.
extern "C" fn timer_trap_handler(gprs: *mut TrapGprs) {
    // SAFETY: `gprs` is this call's own argument from `timer_entry`,
    // which built it exactly as `split_frame` expects.
    let (gprs, hw) = unsafe { split_frame(gprs) };
    // SAFETY: interrupts are disabled for the whole handler body.
    unsafe {
        LAST_TRAP_GPRS = gprs as *mut TrapGprs;
    }

    crate::irq::notify_end_of_interrupt(32);

    let current = crate::process::current_pid();
    if from_user(hw) {
        if let Some(pid) = current {
            mirror_into_pcb(pid, gprs, hw);
        }
    }

    crate::sched::timer_tick_from_trap(current, from_user(hw));
    // `timer_tick_from_trap` only returns when the interrupted process
    // keeps running (quantum not yet expired); any reschedule diverges
    // through `sched::dispatch` and this function never gets here.
}

/// Syscall vector (0x80, DPL 3) entry point. See [`timer_entry`] for the
/// register-capture rationale; the only difference is the handler always
/// treats the interrupted context as userspace (only ring 3 can reach a
/// DPL-3 gate) and always mirrors into the PCB before dispatch, since a
/// syscall's whole point is to report a result back into `rax`.
#[unsafe(naked)]
pub unsafe extern "C" fn syscall_entry() {
    naked_asm!(
        "push r15", "push r14", "push r13", "push r12",
        "push r11", "push r10", "push r9",  "push r8",
        "push rbp", "push rdi", "push rsi", "push rdx",
        "push rcx", "push rbx", "push rax",
        "mov rdi, rsp",
        "call {handler}",
        "pop rax", "pop rbx", "pop rcx", "pop rdx",
        "pop rsi", "pop rdi", "pop rbp",
        "pop r8", "pop r9", "pop r10", "pop r11",
        "pop r12", "pop r13", "pop r14", "pop r15",
        "iretq",
        handler = sym syscall_trap_handler,
    );
}

extern "C" fn syscall_trap_handler(gprs: *mut TrapGprs) {
    // SAFETY: same contract as `timer_trap_handler`.
    let (gprs, hw) = unsafe { split_frame(gprs) };
    // SAFETY: interrupts are disabled for the whole handler body.
    unsafe {
        LAST_TRAP_GPRS = gprs as *mut TrapGprs;
    }

    let Some(pid) = crate::process::current_pid() else {
        panic!("syscall trap with no current process");
    };
    mirror_into_pcb(pid, gprs, hw);

    match crate::syscall::dispatch(pid) {
        crate::syscall::SyscallOutcome::Continue => copy_return_value(pid, gprs),
        crate::syscall::SyscallOutcome::Dispatch => crate::sched::dispatch(),
    }
}
