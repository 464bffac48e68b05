//! Scheduler and dispatcher (C7).
//!
//! There is no separate task/thread structure here: the unit of scheduling
//! is the PCB, and the named queues that hold it
//! ([`process::ready_queue`], `sleeping_queue`, ...) already live in
//! `process`. This module only adds the two operations layered on top of
//! those queues: `dispatch`, which actually puts a PCB on the CPU, and the
//! timer-tick hook that preempts the running one.

use crate::arch::context::enter_userspace;
use crate::process::pcb::{Pid, ProcessState, DEFAULT_QUANTUM};
use crate::process::table::PROCESS_TABLE;

pub fn init() {
    crate::println!("[SCHED] Scheduler ready ({} process table slots)", crate::process::pcb::MAX_PROCESSES);
}

/// `schedule(pcb)`: mark `pid` ready and insert it into the ready queue.
/// A thin name for `process::make_ready`, kept here because C7 is where the
/// specification names this operation.
pub fn schedule(pid: Pid) {
    crate::process::make_ready(pid);
}

/// Pop the ready queue, install the winner, and jump into it. Never
/// returns: either a process runs, or (queue empty) the CPU halts with
/// interrupts enabled until the next IRQ gives `dispatch` something to do.
pub fn dispatch() -> ! {
    loop {
        let idx = {
            let mut table = PROCESS_TABLE.lock();
            crate::process::ready_queue().lock().pop(&mut table)
        };
        match idx {
            Some(idx) => run(crate::process::table::ProcessTable::index_to_pid(idx)),
            None => {
                // SAFETY: re-enabling interrupts here is required for any
                // future timer/keyboard IRQ to ever call back into
                // `dispatch`; `hlt` just parks the CPU until one arrives.
                unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) };
            }
        }
    }
}

fn run(pid: Pid) -> ! {
    let regs = {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(pid).expect("dispatch popped a live pid");
        pcb.state = ProcessState::Running;
        pcb.remaining_quantum = DEFAULT_QUANTUM;
        pcb.memory
            .as_ref()
            .expect("a runnable process always has a memory context")
            .mapper
            .switch();
        pcb.regs
    };
    crate::process::set_current(Some(pid));
    // SAFETY: `regs` is the just-dispatched process's own saved register
    // bank, and its page-table root was installed by `mapper.switch()`
    // immediately above, under the same table lock.
    unsafe { enter_userspace(&regs) }
}

/// Timer-tick hook, called from `arch::x86_64::trap::timer_trap_handler`
/// after it has already mirrored the interrupted registers into `current`'s
/// PCB (when `current` was running in userspace). Wakes any sleepers whose
/// time has come, then charges the running process one tick of quantum. At
/// zero, it goes back to the ready queue and `dispatch` picks whatever runs
/// next (possibly the same process again, if it's still the only one
/// ready).
///
/// `current` is `None`, or `from_user` is `false`, exactly when the timer
/// fires on the scheduler's own idle loop (`dispatch`'s `hlt`) -- the only
/// kernel-mode context a timer interrupt can ever land in, since the kernel
/// is non-preemptible everywhere else. There's no quantum to charge there;
/// returning lets the naked stub's `iretq` resume the `hlt` loop, which
/// re-polls the ready queue on its own next iteration.
pub fn timer_tick_from_trap(current: Option<Pid>, from_user: bool) {
    crate::arch::x86_64::timer::tick();
    let now = crate::arch::x86_64::timer::get_ticks();
    crate::process::wake_due_sleepers(now);

    let Some(pid) = current else { return };
    if !from_user {
        return;
    }

    let quantum_expired = {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(pid).expect("current pid is always live");
        pcb.remaining_quantum = pcb.remaining_quantum.saturating_sub(1);
        pcb.remaining_quantum == 0
    };

    if quantum_expired {
        schedule(pid);
        dispatch();
    }
}

/// Hand control to the scheduler for the first time at boot. Unlike every
/// later dispatch, there is no interrupted context to fall back on if the
/// ready queue is empty, so this assumes `process::init` has already made
/// init runnable.
pub fn start() -> ! {
    crate::println!("[SCHED] Entering scheduler");
    dispatch()
}
