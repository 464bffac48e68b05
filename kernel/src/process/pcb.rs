//! Process Control Block: the single schedulable unit this kernel knows
//! about. There is no separate thread abstraction — one PCB is one process
//! is one register bank.

use crate::arch::context::Registers;
use crate::fs::FileTable;
use crate::mm::MemoryContext;

/// Process ID. Slot index into [`super::table::ProcessTable`] plus one, so
/// PID 0 is never valid and can be used as a "no parent"/"no pid" sentinel.
pub type Pid = u32;

/// Lifecycle state of a process, per the transitions a PCB walks through
/// from table allocation to reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is on the table's freelist; every other field is meaningless.
    Unused,
    /// Allocated, not yet handed to the scheduler.
    New,
    Ready,
    Running,
    /// Asleep until `wakeup_tick` (the `sleep` syscall).
    Sleeping,
    /// Blocked on a specific syscall's condition (`current_syscall` names
    /// it) other than waiting for a child or a timer.
    Blocked,
    /// Blocked in `waitpid`, waiting for any child to exit.
    Waiting,
    /// Exited; reaped by a future `waitpid` from its parent.
    Zombie,
    /// Killed by another process but not yet zombified.
    Killed,
}

/// Scheduling priority. Smaller is more urgent: a priority-ascending queue
/// sorts `High` processes to the front. Purely advisory — a lower-priority
/// process still runs eventually, since there is no aging but also no
/// starvation-by-design within a class that keeps being re-enqueued FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Priority {
    High = 0,
    Standard = 1,
    Low = 2,
    Deferred = 3,
}

/// Default time slice, in timer ticks, granted on each dispatch.
pub const DEFAULT_QUANTUM: u32 = 5;

/// Number of process table slots. An educational kernel's process table is
/// sized for a handful of concurrent programs, not production load.
pub const MAX_PROCESSES: usize = 64;

/// A pending shared-memory delivery: `allocshared` on the sending side
/// leaves one of these in the receiver's inbox for `popsharedmem` to claim.
#[derive(Debug, Clone, Copy)]
pub struct SharedMemoryInbox {
    pub source_pid: Pid,
    pub base_va: u64,
    pub page_count: usize,
}

/// Everything the loader fills in once, at program-load time, and that
/// `brk`/`sbrk` mutate afterward.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderInfo {
    /// Highest address mapped by the loader's own segments; the heap range
    /// begins immediately above this, page-aligned.
    pub heap_start: u64,
    /// Current extent of the heap, `brk`-style (absolute address, not a
    /// length).
    pub heap_end: u64,
    pub argc: u32,
    pub argv_va: u64,
}

/// The process control block.
pub struct Pcb {
    pub pid: Pid,
    pub parent: Pid,
    pub state: ProcessState,
    pub priority: Priority,
    /// Exit status recorded by `zombify`, consumed by the reaping
    /// `waitpid`.
    pub exit_status: i32,
    /// Full saved register bank; this IS the context switched in and out
    /// on dispatch and on trap entry/exit.
    pub regs: Registers,
    pub memory: Option<MemoryContext>,
    pub remaining_quantum: u32,
    /// Valid only while `state == Sleeping`: the tick count at which this
    /// process becomes ready again.
    pub wakeup_tick: u64,
    /// Which syscall (if any) parked this process in the `Blocked` state.
    pub current_syscall: Option<u32>,
    /// Valid only while `state == Waiting`: the pid filter passed to
    /// `waitpid`, or `0` for "any child".
    pub waiting_for: Pid,
    pub loader: LoaderInfo,
    pub files: FileTable,
    pub inbox: Option<SharedMemoryInbox>,
    /// Intrusive link: the index of the next PCB in whichever queue
    /// currently holds this one. A PCB is a member of at most one named
    /// queue at a time.
    pub next: Option<usize>,
}

impl Pcb {
    /// A blank slot as it sits on the table's freelist.
    pub fn unused() -> Self {
        Self {
            pid: 0,
            parent: 0,
            state: ProcessState::Unused,
            priority: Priority::Standard,
            exit_status: 0,
            regs: Registers::default(),
            memory: None,
            remaining_quantum: 0,
            wakeup_tick: 0,
            current_syscall: None,
            waiting_for: 0,
            loader: LoaderInfo::default(),
            files: FileTable::new(),
            inbox: None,
            next: None,
        }
    }

    /// Reset a freshly allocated slot to `New`, ready for the loader to
    /// populate.
    pub fn reset_for(&mut self, pid: Pid, parent: Pid, priority: Priority) {
        self.pid = pid;
        self.parent = parent;
        self.state = ProcessState::New;
        self.priority = priority;
        self.exit_status = 0;
        self.regs = Registers::default();
        self.memory = None;
        self.remaining_quantum = DEFAULT_QUANTUM;
        self.wakeup_tick = 0;
        self.current_syscall = None;
        self.waiting_for = 0;
        self.loader = LoaderInfo::default();
        self.files = FileTable::new();
        self.inbox = None;
        self.next = None;
    }
}
