//! Fixed-size process table (C6): `MAX_PROCESSES` PCB slots, handed out
//! from a FIFO freelist threaded through the same `next` field the named
//! queues use once a slot is allocated.

use lazy_static::lazy_static;
use spin::Mutex;

use super::pcb::{Pcb, Pid, Priority, ProcessState, MAX_PROCESSES};
use crate::error::{KernelError, KernelResult};

pub struct ProcessTable {
    slots: [Pcb; MAX_PROCESSES],
    freelist_head: Option<usize>,
}

impl ProcessTable {
    fn new() -> Self {
        let slots = core::array::from_fn(|_| Pcb::unused());
        let mut table = Self {
            slots,
            freelist_head: None,
        };
        // Thread every slot onto the freelist in index order so allocation
        // is FIFO (lowest free index first).
        for i in (0..MAX_PROCESSES).rev() {
            table.slots[i].next = table.freelist_head;
            table.freelist_head = Some(i);
        }
        table
    }

    /// Slot index a PID refers to.
    fn index_of(pid: Pid) -> KernelResult<usize> {
        if pid == 0 {
            return Err(KernelError::NotFound);
        }
        Ok(pid as usize - 1)
    }

    /// Allocate a free slot and return its PID. The new slot is left in
    /// [`ProcessState::New`].
    pub fn alloc(&mut self, parent: Pid, priority: Priority) -> KernelResult<Pid> {
        let idx = self.freelist_head.ok_or(KernelError::OutOfProcesses)?;
        self.freelist_head = self.slots[idx].next;
        let pid = (idx + 1) as Pid;
        self.slots[idx].reset_for(pid, parent, priority);
        Ok(pid)
    }

    /// Return a slot to the freelist. Caller must have already moved the
    /// PCB out of every named queue.
    pub fn free(&mut self, pid: Pid) {
        if let Ok(idx) = Self::index_of(pid) {
            self.slots[idx] = Pcb::unused();
            self.slots[idx].next = self.freelist_head;
            self.freelist_head = Some(idx);
        }
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        let idx = Self::index_of(pid).ok()?;
        let pcb = &self.slots[idx];
        (pcb.state != ProcessState::Unused).then_some(pcb)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        let idx = Self::index_of(pid).ok()?;
        let pcb = &mut self.slots[idx];
        (pcb.state != ProcessState::Unused).then_some(pcb)
    }

    /// Index-based accessors, used by [`super::queue::PcbQueue`] which
    /// threads lists through slot indices rather than PIDs.
    pub(super) fn slot(&self, idx: usize) -> &Pcb {
        &self.slots[idx]
    }

    pub(super) fn slot_mut(&mut self, idx: usize) -> &mut Pcb {
        &mut self.slots[idx]
    }

    pub(super) fn pid_to_index(pid: Pid) -> usize {
        pid as usize - 1
    }

    pub(super) fn index_to_pid(idx: usize) -> Pid {
        (idx + 1) as Pid
    }

    /// Iterate over every live (non-`Unused`) PCB. Used by `zombify`'s
    /// child-reparenting step.
    pub fn iter_live(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter().filter(|p| p.state != ProcessState::Unused)
    }

    pub fn iter_live_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.slots
            .iter_mut()
            .filter(|p| p.state != ProcessState::Unused)
    }
}

lazy_static! {
    /// The global process table. `ProcessTable::new()` threads the freelist
    /// at runtime, so this can't be a `const fn` static.
    pub static ref PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_assigns_distinct_pids() {
        let mut table = ProcessTable::new();
        let a = table.alloc(0, Priority::Standard).unwrap();
        let b = table.alloc(a, Priority::High).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.get(b).unwrap().parent, a);
    }

    #[test]
    fn free_returns_slot_to_freelist() {
        let mut table = ProcessTable::new();
        let a = table.alloc(0, Priority::Standard).unwrap();
        table.free(a);
        assert!(table.get(a).is_none());
        let b = table.alloc(0, Priority::Standard).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn alloc_fails_when_table_full() {
        let mut table = ProcessTable::new();
        for _ in 0..MAX_PROCESSES {
            table.alloc(0, Priority::Standard).unwrap();
        }
        assert_eq!(table.alloc(0, Priority::Standard), Err(KernelError::OutOfProcesses));
    }
}
