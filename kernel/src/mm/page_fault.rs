//! Page-fault handling glue between the trap plane (C8) and the paging
//! engine (C3).
//!
//! A fault on a lazily-reserved leaf in the faulting process's own context
//! is the one recoverable case: back it with a frame and resume. Every
//! other fault is fatal — to the kernel if it happened in kernel mode, to
//! the offending process otherwise.

use super::page_table::{PageMapper, PageTableError};

/// What to do with the process that faulted, decided by [`handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The lazy mapping was backed; resume the faulting instruction.
    Resolved,
    /// No valid lazy mapping existed and the fault happened in user mode:
    /// the process is to be killed (zombified) by the caller.
    KillProcess,
}

/// Handle a page fault at `fault_addr` against `mapper`, the faulting
/// context's page tables.
///
/// `from_user` distinguishes a fault taken while executing user code
/// (recoverable lazy faults resolve the same way; unresolved faults kill
/// the process) from one taken in kernel mode (unresolved faults are an
/// unrecoverable kernel bug and the caller must panic).
///
/// # Panics
///
/// Panics if `from_user` is `false` and the fault does not correspond to a
/// valid lazy mapping — a page fault in kernel code is only ever
/// recoverable when the kernel itself set up a lazy mapping it now needs
/// to touch (e.g. a heap growth race), never a genuine invariant
/// violation.
pub fn handle(mapper: &PageMapper, fault_addr: u64, from_user: bool) -> FaultOutcome {
    let page_addr = fault_addr & !0xFFF;
    match mapper.load_page(page_addr) {
        Ok(()) => FaultOutcome::Resolved,
        Err(PageTableError::Conflict) => {
            if from_user {
                log::warn!("page fault: no valid mapping for user address {:#x}", fault_addr);
                FaultOutcome::KillProcess
            } else {
                panic!("page fault: no valid mapping for kernel address {:#x}", fault_addr);
            }
        }
        Err(PageTableError::OutOfMemory) => {
            if from_user {
                log::warn!("page fault: out of memory backing user address {:#x}", fault_addr);
                FaultOutcome::KillProcess
            } else {
                panic!("page fault: out of memory backing kernel address {:#x}", fault_addr);
            }
        }
        Err(PageTableError::Unaligned) => unreachable!("fault_addr is masked to a page boundary"),
    }
}

// Exercises real page tables and the frame allocator's global state, so
// this only runs under the bare-metal integration harness, not hosted.
#[cfg(all(test, target_os = "none"))]
mod tests {
    use super::*;
    use crate::mm::page_table::PageMapper;
    use crate::mm::PageFlags;

    #[test]
    fn resolves_a_lazy_user_mapping() {
        let mapper = PageMapper::new_empty().unwrap();
        let va = 0x5000_0000u64;
        mapper.map_page(va, None, PageFlags::WRITABLE | PageFlags::UNPRIVILEGED).unwrap();
        assert_eq!(handle(&mapper, va + 0x10, true), FaultOutcome::Resolved);
    }

    #[test]
    fn kills_process_on_unmapped_user_address() {
        let mapper = PageMapper::new_empty().unwrap();
        assert_eq!(handle(&mapper, 0x9000_0000, true), FaultOutcome::KillProcess);
    }
}
