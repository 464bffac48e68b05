//! Process management.
//!
//! A process is exactly one PCB: there is no separate thread abstraction.
//! This module owns the global process table and the named queues that
//! move PCBs between scheduling states; `creation`/`fork`/`exit` implement
//! the operations that move a PCB between those queues, and `sched` is the
//! only other module allowed to touch [`CURRENT`].

use spin::Mutex;

use pcb::Pid;
use queue::{Order, PcbQueue};
use table::PROCESS_TABLE;

pub mod creation;
pub mod exit;
pub mod fork;
pub mod memory;
pub mod pcb;
pub mod queue;
pub mod table;

pub use pcb::{Pcb, Priority, ProcessState};
pub use table::ProcessTable;

/// PID reserved for the first process; `zombify` reparents orphaned
/// children here.
pub const INIT_PID: Pid = 1;

static READY_QUEUE: Mutex<PcbQueue> = Mutex::new(PcbQueue::new(Order::PriorityAscending));
static SLEEPING_QUEUE: Mutex<PcbQueue> = Mutex::new(PcbQueue::new(Order::WakeupAscending));
/// Processes parked in `waitpid` with no matching child yet exited.
static WAITING_QUEUE: Mutex<PcbQueue> = Mutex::new(PcbQueue::new(Order::PidAscending));
/// Exited processes not yet reaped by their parent's `waitpid`.
static ZOMBIE_QUEUE: Mutex<PcbQueue> = Mutex::new(PcbQueue::new(Order::PidAscending));
/// Processes blocked on a condition other than a timer or a child exit
/// (e.g. waiting for console input).
static BLOCKED_QUEUE: Mutex<PcbQueue> = Mutex::new(PcbQueue::new(Order::Fifo));

/// The slot index of the process the CPU is currently executing, if any.
/// Updated only by `sched::dispatch`.
static CURRENT: Mutex<Option<usize>> = Mutex::new(None);

pub fn ready_queue() -> &'static Mutex<PcbQueue> {
    &READY_QUEUE
}

pub fn sleeping_queue() -> &'static Mutex<PcbQueue> {
    &SLEEPING_QUEUE
}

pub fn waiting_queue() -> &'static Mutex<PcbQueue> {
    &WAITING_QUEUE
}

pub fn zombie_queue() -> &'static Mutex<PcbQueue> {
    &ZOMBIE_QUEUE
}

pub fn blocked_queue() -> &'static Mutex<PcbQueue> {
    &BLOCKED_QUEUE
}

/// PID of the process currently on the CPU, if any.
pub fn current_pid() -> Option<Pid> {
    CURRENT.lock().map(ProcessTable::index_to_pid)
}

/// Set which process is current. Called by `sched::dispatch` only.
pub fn set_current(pid: Option<Pid>) {
    *CURRENT.lock() = pid.map(ProcessTable::pid_to_index);
}

/// Mark `pid` ready to run and enqueue it on the ready queue.
pub fn make_ready(pid: Pid) {
    let idx = ProcessTable::pid_to_index(pid);
    let mut table = PROCESS_TABLE.lock();
    if let Some(pcb) = table.get_mut(pid) {
        pcb.state = ProcessState::Ready;
    }
    READY_QUEUE.lock().push(&mut table, idx);
}

/// Park `pid` on the sleeping queue until `wakeup_tick`. `wake_due_sleepers`
/// moves it back onto the ready queue once `ticks >= wakeup_tick`.
pub fn sleep_until(pid: Pid, wakeup_tick: u64) {
    let idx = ProcessTable::pid_to_index(pid);
    let mut table = PROCESS_TABLE.lock();
    if let Some(pcb) = table.get_mut(pid) {
        pcb.state = ProcessState::Sleeping;
        pcb.wakeup_tick = wakeup_tick;
    }
    SLEEPING_QUEUE.lock().push(&mut table, idx);
}

/// Move every sleeper whose `wakeup_tick <= now` onto the ready queue.
/// `SLEEPING_QUEUE` is sorted by wakeup tick ascending, so this only ever
/// looks at (and pops) its head. Called by the scheduler's timer-tick hook.
pub fn wake_due_sleepers(now: u64) {
    loop {
        let mut table = PROCESS_TABLE.lock();
        let due = match SLEEPING_QUEUE.lock().peek() {
            Some(idx) => table.slot(idx).wakeup_tick <= now,
            None => false,
        };
        if !due {
            return;
        }
        let idx = SLEEPING_QUEUE.lock().pop(&mut table).expect("just peeked");
        table.slot_mut(idx).state = ProcessState::Ready;
        READY_QUEUE.lock().push(&mut table, idx);
    }
}

/// Initialize process management: the table and queues are ready as soon
/// as their statics run, so this only creates the init process.
pub fn init() {
    crate::println!("[PROCESS] Initializing process management...");
    match creation::spawn_init() {
        Ok(pid) => crate::println!("[PROCESS] Created init process with PID {}", pid),
        Err(e) => panic!("[PROCESS] Failed to create init process: {:?}", e),
    }
    crate::println!("[PROCESS] Process management initialized");
}
