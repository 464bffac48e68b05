//! Process exit, `kill`, and `waitpid` (C6's `zombify` protocol, C9's
//! corresponding syscalls).

use super::pcb::{Pid, ProcessState, MAX_PROCESSES};
use super::table::{ProcessTable, PROCESS_TABLE};
use crate::error::{KernelError, KernelResult};
use crate::mm::user_validation;

/// What `waitpid` did with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A matching zombie child was reaped immediately.
    Reaped { pid: Pid, exit_status: i32 },
    /// No zombie child matched; the caller is now on the waiting queue in
    /// state `Waiting` and the syscall layer must call `dispatch()`.
    Blocked,
}

/// What `kill` did to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The target was zombified (or already a no-op zombie); the caller
    /// keeps running.
    Done,
    /// The caller killed itself while running; the syscall layer must call
    /// `dispatch()` and never return to the caller.
    DispatchSelf,
}

/// `exit(status)`: record the exit status and run the exit protocol. The
/// syscall layer calls `dispatch()` immediately after this returns; the
/// caller never runs again.
pub fn exit(caller: Pid, status: i32) -> KernelResult<()> {
    {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(caller).ok_or(KernelError::NotFound)?;
        pcb.exit_status = status;
    }
    zombify(caller)
}

/// The exit protocol: reparent the victim's children to `init`, then either
/// wake a parent already blocked in `waitpid` and reap the victim directly,
/// or mark it `ZOMBIE` for a future `waitpid` to collect.
pub fn zombify(victim: Pid) -> KernelResult<()> {
    reparent_children(victim);

    let (parent, exit_status) = {
        let table = PROCESS_TABLE.lock();
        let pcb = table.get(victim).ok_or(KernelError::NotFound)?;
        (pcb.parent, pcb.exit_status)
    };

    if try_wake_waiter(parent, victim, exit_status) {
        reap(victim);
        return Ok(());
    }

    let mut table = PROCESS_TABLE.lock();
    let idx = ProcessTable::pid_to_index(victim);
    if let Some(pcb) = table.get_mut(victim) {
        pcb.state = ProcessState::Zombie;
    }
    super::zombie_queue().lock().push(&mut table, idx);
    Ok(())
}

/// Reparent every live child of `victim` to `init`; any child that is
/// already a zombie and whose new parent (`init`) is waiting for it gets
/// woken and reaped on the spot.
fn reparent_children(victim: Pid) {
    let children: alloc::vec::Vec<Pid> = {
        let table = PROCESS_TABLE.lock();
        table
            .iter_live()
            .filter(|p| p.parent == victim)
            .map(|p| p.pid)
            .collect()
    };

    for child in children {
        let reparented = {
            let mut table = PROCESS_TABLE.lock();
            table.get_mut(child).map(|pcb| {
                pcb.parent = super::INIT_PID;
                (pcb.state, pcb.exit_status)
            })
        };
        let Some((state, exit_status)) = reparented else { continue };
        if state == ProcessState::Zombie && try_wake_waiter(super::INIT_PID, child, exit_status) {
            reap(child);
        }
    }
}

/// If `parent` is parked in `waitpid` and its filter matches `child`, pull
/// it off the waiting queue, hand it `child`'s pid as the syscall return
/// value, write `exit_status` through the status pointer it originally
/// passed (if any), and make it ready. Returns whether a waiter was woken.
fn try_wake_waiter(parent: Pid, child: Pid, exit_status: i32) -> bool {
    let (status_ptr, mapper) = {
        let mut table = PROCESS_TABLE.lock();
        let waiting_for = match table.get(parent) {
            Some(p) if p.state == ProcessState::Waiting => p.waiting_for,
            _ => return false,
        };
        if waiting_for != 0 && waiting_for != child {
            return false;
        }
        if !super::waiting_queue().lock().remove(&mut table, parent) {
            return false;
        }
        let pcb = table.get_mut(parent).expect("just matched above");
        pcb.regs.set_return_value(child as u64);
        (pcb.regs.rsi, pcb.memory.as_ref().map(|m| m.mapper))
    };

    if status_ptr != 0 {
        if let Some(mapper) = mapper {
            if let Ok(dst) =
                user_validation::translate(&mapper, status_ptr, core::mem::size_of::<i32>(), true)
            {
                // SAFETY: `translate` verified `dst` is a present, writable,
                // unprivileged page in the waiter's own address space.
                unsafe { core::ptr::write_unaligned(dst as *mut i32, exit_status) };
            }
        }
    }
    super::make_ready(parent);
    true
}

/// Pull a zombie off `ZOMBIE_QUEUE` (if it ever reached it) and return its
/// slot to the table's freelist.
fn reap(pid: Pid) {
    let mut table = PROCESS_TABLE.lock();
    super::zombie_queue().lock().remove(&mut table, pid);
    table.free(pid);
}

/// `waitpid(pid, *status)`: `pid == 0` means any child. A matching zombie
/// is reaped synchronously; a matching live child blocks the caller;
/// no matching child is a synchronous error.
pub fn waitpid(caller: Pid, pid_filter: Pid) -> KernelResult<WaitOutcome> {
    let mut table = PROCESS_TABLE.lock();

    let mut zombie_match = None;
    let mut any_match = false;
    for pcb in table.iter_live() {
        if pcb.parent != caller {
            continue;
        }
        if pid_filter != 0 && pcb.pid != pid_filter {
            continue;
        }
        any_match = true;
        if pcb.state == ProcessState::Zombie {
            zombie_match = Some((pcb.pid, pcb.exit_status));
            break;
        }
    }

    if let Some((pid, exit_status)) = zombie_match {
        drop(table);
        reap(pid);
        return Ok(WaitOutcome::Reaped { pid, exit_status });
    }

    if !any_match {
        return Err(KernelError::NotFound);
    }

    if let Some(pcb) = table.get_mut(caller) {
        pcb.state = ProcessState::Waiting;
        pcb.waiting_for = pid_filter;
    }
    let idx = ProcessTable::pid_to_index(caller);
    super::waiting_queue().lock().push(&mut table, idx);
    Ok(WaitOutcome::Blocked)
}

/// Walk `pid`'s ancestry to see whether `ancestor` appears in it.
fn is_descendant(ancestor: Pid, mut pid: Pid) -> bool {
    let table = PROCESS_TABLE.lock();
    for _ in 0..MAX_PROCESSES {
        let parent = match table.get(pid) {
            Some(p) => p.parent,
            None => return false,
        };
        if parent == ancestor {
            return true;
        }
        if parent == 0 {
            return false;
        }
        pid = parent;
    }
    false
}

fn remove_from_queue(table: &mut ProcessTable, pid: Pid, state: ProcessState) {
    match state {
        ProcessState::Ready => {
            super::ready_queue().lock().remove(table, pid);
        }
        ProcessState::Blocked => {
            super::blocked_queue().lock().remove(table, pid);
        }
        _ => {}
    }
}

/// `kill(pid)`: the caller may only target itself or a transitive
/// descendant. Dispatch on the target's state per C9's contract.
pub fn kill(caller: Pid, target: Pid) -> KernelResult<KillOutcome> {
    if target != caller && !is_descendant(caller, target) {
        return Err(KernelError::BadParameter);
    }

    let state = {
        let table = PROCESS_TABLE.lock();
        table.get(target).ok_or(KernelError::NotFound)?.state
    };

    match state {
        ProcessState::Zombie => Ok(KillOutcome::Done),
        ProcessState::Ready | ProcessState::Blocked => {
            {
                let mut table = PROCESS_TABLE.lock();
                remove_from_queue(&mut table, target, state);
                if let Some(pcb) = table.get_mut(target) {
                    pcb.exit_status = 1;
                }
            }
            zombify(target)?;
            Ok(KillOutcome::Done)
        }
        ProcessState::Running if target == caller => {
            {
                let mut table = PROCESS_TABLE.lock();
                if let Some(pcb) = table.get_mut(target) {
                    pcb.exit_status = 1;
                }
            }
            zombify(target)?;
            Ok(KillOutcome::DispatchSelf)
        }
        _ => Err(KernelError::BadParameter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::Priority;

    fn spawn_pair() -> (Pid, Pid) {
        let mut table = PROCESS_TABLE.lock();
        let parent = table.alloc(0, Priority::Standard).unwrap();
        let child = table.alloc(parent, Priority::Standard).unwrap();
        for pid in [parent, child] {
            table.get_mut(pid).unwrap().state = ProcessState::Running;
        }
        (parent, child)
    }

    #[test]
    fn waitpid_blocks_then_reaps_after_child_exits() {
        let (parent, child) = spawn_pair();
        assert_eq!(waitpid(parent, 0), Ok(WaitOutcome::Blocked));
        assert_eq!(
            PROCESS_TABLE.lock().get(parent).unwrap().state,
            ProcessState::Waiting
        );

        assert_eq!(exit(child, 7), Ok(()));
        assert_eq!(
            PROCESS_TABLE.lock().get(parent).unwrap().regs.rax,
            child as u64
        );
        assert!(PROCESS_TABLE.lock().get(child).is_none());
    }

    #[test]
    fn waitpid_reaps_existing_zombie_immediately() {
        let (parent, child) = spawn_pair();
        assert_eq!(exit(child, 3), Ok(()));
        assert_eq!(
            PROCESS_TABLE.lock().get(child).unwrap().state,
            ProcessState::Zombie
        );
        assert_eq!(
            waitpid(parent, 0),
            Ok(WaitOutcome::Reaped { pid: child, exit_status: 3 })
        );
        assert!(PROCESS_TABLE.lock().get(child).is_none());
    }

    #[test]
    fn waitpid_with_no_children_fails() {
        let mut table = PROCESS_TABLE.lock();
        let lonely = table.alloc(0, Priority::Standard).unwrap();
        drop(table);
        assert_eq!(waitpid(lonely, 0), Err(KernelError::NotFound));
    }

    #[test]
    fn kill_refuses_non_descendant() {
        let mut table = PROCESS_TABLE.lock();
        let a = table.alloc(0, Priority::Standard).unwrap();
        let b = table.alloc(0, Priority::Standard).unwrap();
        drop(table);
        assert_eq!(kill(a, b), Err(KernelError::BadParameter));
    }

    #[test]
    fn kill_self_while_running_requests_dispatch() {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc(0, Priority::Standard).unwrap();
        table.get_mut(pid).unwrap().state = ProcessState::Running;
        drop(table);
        assert_eq!(kill(pid, pid), Ok(KillOutcome::DispatchSelf));
        assert_eq!(
            PROCESS_TABLE.lock().get(pid).unwrap().state,
            ProcessState::Zombie
        );
    }

    #[test]
    fn kill_zombie_is_a_no_op() {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc(0, Priority::Standard).unwrap();
        table.get_mut(pid).unwrap().state = ProcessState::Zombie;
        drop(table);
        assert_eq!(kill(pid, pid), Ok(KillOutcome::Done));
    }
}
