//! `fork` (C9): clone the caller into a new child process.

use super::pcb::{Pid, ProcessState};
use super::table::PROCESS_TABLE;
use crate::error::{KernelError, KernelResult};

/// Clone `caller`'s memory context and register bank into a new child PCB,
/// parented to `caller`, scheduled ready to run. Returns the child's pid to
/// the parent; the child's own saved `rax` is zeroed so it observes `0`
/// when dispatched.
pub fn fork(caller: Pid) -> KernelResult<Pid> {
    let (child_ctx, mut regs, priority, files, loader) = {
        let mut table = PROCESS_TABLE.lock();
        let parent = table.get_mut(caller).ok_or(KernelError::NotFound)?;
        let memory = parent.memory.as_ref().ok_or(KernelError::BadParameter)?;
        let child_ctx = memory.clone_process()?;
        (
            child_ctx,
            parent.regs,
            parent.priority,
            parent.files.clone_for_fork(),
            parent.loader,
        )
    };
    regs.set_return_value(0);

    let child_pid = PROCESS_TABLE.lock().alloc(caller, priority)?;
    {
        let mut table = PROCESS_TABLE.lock();
        let child = table.get_mut(child_pid).expect("just allocated");
        child.regs = regs;
        child.regs.cr3 = child_ctx.mapper.l4_phys;
        child.memory = Some(child_ctx);
        child.files = files;
        child.loader = loader;
        child.state = ProcessState::Ready;
    }
    super::make_ready(child_pid);
    Ok(child_pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_unknown_parent_fails() {
        assert!(PROCESS_TABLE.lock().get(200).is_none());
        assert_eq!(fork(200), Err(KernelError::NotFound));
    }
}
