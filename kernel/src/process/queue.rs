//! Generic intrusive PCB queue.
//!
//! Every named queue (`READY_QUEUE`, `SLEEPING_QUEUE`, ...) is one of these,
//! parameterized by an [`Order`]. Membership is threaded through
//! [`Pcb::next`](super::pcb::Pcb::next) by slot index, so queues cost no
//! allocation and a PCB can only ever be on one queue at a time.

use super::pcb::{Pid, ProcessState};
use super::table::ProcessTable;

/// How a queue orders its members. `Fifo` just appends; the rest keep the
/// list sorted ascending by the named key, inserting each new member at its
/// sorted position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Fifo,
    PriorityAscending,
    PidAscending,
    WakeupAscending,
}

pub struct PcbQueue {
    order: Order,
    head: Option<usize>,
    tail: Option<usize>,
}

impl PcbQueue {
    pub const fn new(order: Order) -> Self {
        Self {
            order,
            head: None,
            tail: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn key(&self, table: &ProcessTable, idx: usize) -> u64 {
        match self.order {
            Order::Fifo => 0,
            Order::PriorityAscending => table.slot(idx).priority as u64,
            Order::PidAscending => ProcessTable::index_to_pid(idx) as u64,
            Order::WakeupAscending => table.slot(idx).wakeup_tick,
        }
    }

    /// Insert `idx` into the queue. Sets the PCB's `state` appropriately is
    /// the caller's job; this only manages list membership.
    pub fn push(&mut self, table: &mut ProcessTable, idx: usize) {
        table.slot_mut(idx).next = None;

        if self.order == Order::Fifo {
            self.push_back(table, idx);
            return;
        }

        let new_key = self.key(table, idx);
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            if self.key(table, cur_idx) > new_key {
                break;
            }
            prev = cur;
            cur = table.slot(cur_idx).next;
        }

        table.slot_mut(idx).next = cur;
        match prev {
            Some(prev_idx) => table.slot_mut(prev_idx).next = Some(idx),
            None => self.head = Some(idx),
        }
        if cur.is_none() {
            self.tail = Some(idx);
        }
    }

    fn push_back(&mut self, table: &mut ProcessTable, idx: usize) {
        table.slot_mut(idx).next = None;
        match self.tail {
            Some(tail_idx) => table.slot_mut(tail_idx).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Inspect the head without removing it.
    pub fn peek(&self) -> Option<usize> {
        self.head
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self, table: &mut ProcessTable) -> Option<usize> {
        let idx = self.head?;
        self.head = table.slot(idx).next;
        if self.head.is_none() {
            self.tail = None;
        }
        table.slot_mut(idx).next = None;
        Some(idx)
    }

    /// Remove a specific PID from the middle of the queue, if present. Used
    /// by `kill` to pull a sleeping/blocked process out before it would
    /// naturally be dequeued.
    pub fn remove(&mut self, table: &mut ProcessTable, pid: Pid) -> bool {
        let target = ProcessTable::pid_to_index(pid);
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(cur_idx) = cur {
            let next = table.slot(cur_idx).next;
            if cur_idx == target {
                match prev {
                    Some(prev_idx) => table.slot_mut(prev_idx).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(cur_idx) {
                    self.tail = prev;
                }
                table.slot_mut(cur_idx).next = None;
                return true;
            }
            prev = cur;
            cur = next;
        }
        false
    }
}

/// Assert invariant: a PCB popped off any queue is never left `Unused`.
#[allow(dead_code)]
fn debug_assert_live(table: &ProcessTable, idx: usize) {
    debug_assert_ne!(table.slot(idx).state, ProcessState::Unused);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::Priority;
    use crate::process::table::ProcessTable as Table;

    fn alloc_n(table: &mut Table, n: usize) -> alloc::vec::Vec<usize> {
        (0..n)
            .map(|_| {
                let pid = table.alloc(0, Priority::Standard).unwrap();
                Table::pid_to_index(pid)
            })
            .collect()
    }

    #[test]
    fn fifo_preserves_insertion_order() {
        let mut table = Table::default();
        let idxs = alloc_n(&mut table, 3);
        let mut q = PcbQueue::new(Order::Fifo);
        for &i in &idxs {
            q.push(&mut table, i);
        }
        for &i in &idxs {
            assert_eq!(q.pop(&mut table), Some(i));
        }
        assert_eq!(q.pop(&mut table), None);
    }

    #[test]
    fn priority_ascending_sorts_high_first() {
        let mut table = Table::default();
        let idxs = alloc_n(&mut table, 3);
        table.slot_mut(idxs[0]).priority = Priority::Low;
        table.slot_mut(idxs[1]).priority = Priority::High;
        table.slot_mut(idxs[2]).priority = Priority::Standard;

        let mut q = PcbQueue::new(Order::PriorityAscending);
        for &i in &idxs {
            q.push(&mut table, i);
        }
        assert_eq!(q.pop(&mut table), Some(idxs[1]));
        assert_eq!(q.pop(&mut table), Some(idxs[2]));
        assert_eq!(q.pop(&mut table), Some(idxs[0]));
    }

    #[test]
    fn wakeup_ascending_sorts_by_tick() {
        let mut table = Table::default();
        let idxs = alloc_n(&mut table, 3);
        table.slot_mut(idxs[0]).wakeup_tick = 50;
        table.slot_mut(idxs[1]).wakeup_tick = 10;
        table.slot_mut(idxs[2]).wakeup_tick = 30;

        let mut q = PcbQueue::new(Order::WakeupAscending);
        for &i in &idxs {
            q.push(&mut table, i);
        }
        assert_eq!(q.pop(&mut table), Some(idxs[1]));
        assert_eq!(q.pop(&mut table), Some(idxs[2]));
        assert_eq!(q.pop(&mut table), Some(idxs[0]));
    }

    #[test]
    fn remove_pulls_from_middle() {
        let mut table = Table::default();
        let idxs = alloc_n(&mut table, 3);
        let mut q = PcbQueue::new(Order::Fifo);
        for &i in &idxs {
            q.push(&mut table, i);
        }
        let pid = Table::index_to_pid(idxs[1]);
        assert!(q.remove(&mut table, pid));
        assert_eq!(q.pop(&mut table), Some(idxs[0]));
        assert_eq!(q.pop(&mut table), Some(idxs[2]));
        assert_eq!(q.pop(&mut table), None);
    }
}
