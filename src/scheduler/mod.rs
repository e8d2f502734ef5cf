/*
 * Round-Robin Scheduler Core
 *
 * One process-wide scheduler multiplexes every thread onto the OS thread
 * that called `init`. The pieces:
 *
 * 1. THREAD TABLE: id -> control block, owning each thread's stack
 * 2. READY QUEUE: FIFO of runnable thread ids
 * 3. ID ALLOCATOR: smallest-free ids in [1, MAX_THREADS)
 * 4. PREEMPTION TIMER: virtual-time SIGVTALRM once per quantum
 * 5. SWITCH PATHS: preempt_current / dispatch / thread_start
 *
 * Mutual exclusion between API calls and the signal handler is the signal
 * mask itself: every path that touches this state first blocks SIGVTALRM.
 * The state lives in a plain static cell rather than behind a lock
 * because a dispatch jumps off the current stack mid-critical-section; a
 * lock guard would never be released.
 *
 * A dispatch never returns. Control comes back either inside
 * `preempt_current` (for a thread that was saved there) or at the top of
 * `thread_start` (for a thread's first quantum); both resume points free
 * any stack retired by a self-terminated thread and then unmask the
 * preemption signal.
 */

use std::cell::UnsafeCell;
use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::process;
use std::time::Duration;

pub mod context;
pub mod ids;
pub mod signal;
pub mod thread;
pub mod timer;

pub use thread::{Thread, ThreadId, ThreadState};

use crate::error::ThreadError;
use context::Context;
use ids::IdAllocator;
use thread::ThreadStack;
use timer::PreemptionTimer;

/// Upper bound on simultaneously live threads, the main thread included.
pub const MAX_THREADS: usize = 100;

/// Stack size of each spawned thread, in bytes (64 KiB).
pub const THREAD_STACK_SIZE: usize = 64 * 1024;

/// Scheduler state shared between the API facade and the signal handler.
pub struct Scheduler {
    /// All live threads, keyed by id. Owns the control blocks and stacks.
    threads: BTreeMap<ThreadId, Thread>,

    /// Ids of threads waiting for the CPU, in strict FIFO order.
    ready_queue: VecDeque<ThreadId>,

    /// Free ids for `spawn`.
    ids: IdAllocator,

    /// The thread currently holding the CPU.
    pub(crate) current: ThreadId,

    /// Quanta elapsed since `init`, across all threads.
    pub(crate) total_quanta: u64,

    /// The quantum clock.
    pub(crate) timer: PreemptionTimer,

    /// Stack of a self-terminated thread, parked until the next resume
    /// point runs on a different stack and can free it.
    retired_stack: Option<ThreadStack>,
}

impl Scheduler {
    /// Fresh scheduler with the calling thread installed as thread 0,
    /// already running its first quantum.
    pub fn new(quantum: Duration) -> Self {
        let mut threads = BTreeMap::new();
        threads.insert(ThreadId::MAIN, Thread::main());
        Self {
            threads,
            // The queue never holds more than one entry per live thread;
            // reserving up front keeps the handler paths allocation-free.
            ready_queue: VecDeque::with_capacity(MAX_THREADS + 1),
            ids: IdAllocator::new(),
            current: ThreadId::MAIN,
            total_quanta: 1,
            timer: PreemptionTimer::new(quantum),
            retired_stack: None,
        }
    }

    pub fn is_live(&self, tid: ThreadId) -> bool {
        self.threads.contains_key(&tid)
    }

    pub fn quanta_of(&self, tid: ThreadId) -> Option<u64> {
        self.threads.get(&tid).map(|t| t.quanta_run)
    }

    /// Create a thread that will start at `entry`, give it the smallest
    /// free id and a fresh stack, and put it at the back of the queue.
    pub fn spawn_thread(&mut self, entry: fn()) -> Result<ThreadId, ThreadError> {
        if self.threads.len() >= MAX_THREADS {
            return Err(ThreadError::AtCapacity);
        }
        let id = self.ids.allocate().ok_or(ThreadError::AtCapacity)?;
        let stack = ThreadStack::new();
        let context = Context::for_entry(stack.initial_sp(), thread_start as usize as u64);
        self.threads.insert(id, Thread::spawned(id, stack, context, entry));
        self.ready_queue.push_back(id);
        Ok(id)
    }

    /// Move a thread to `Blocked` and take it out of the running. A
    /// second block of the same thread changes nothing.
    pub fn block_thread(&mut self, tid: ThreadId) {
        if let Some(t) = self.threads.get_mut(&tid) {
            t.state = ThreadState::Blocked;
        }
        self.ready_queue.retain(|&q| q != tid);
    }

    /// Make a blocked thread eligible again. A thread that is not blocked
    /// is left untouched; a thread still sleeping becomes `Ready` but is
    /// enqueued only when its sleep expires.
    pub fn wake_thread(&mut self, tid: ThreadId) {
        let enqueue = match self.threads.get_mut(&tid) {
            Some(t) if t.state == ThreadState::Blocked => {
                t.state = ThreadState::Ready;
                !t.sleeping
            }
            _ => false,
        };
        if enqueue {
            self.ready_queue.push_back(tid);
        }
    }

    /// Put the current thread into a timed sleep. It goes to `Ready` but
    /// stays out of the queue until the countdown reaches zero.
    pub fn begin_sleep(&mut self, quanta: u64) {
        if let Some(t) = self.threads.get_mut(&self.current) {
            t.sleeping = true;
            t.sleep_remaining = quanta;
            t.state = ThreadState::Ready;
        }
    }

    /// Remove a thread that is not the caller. Its stack is freed here;
    /// nothing can be executing on it.
    pub fn remove_thread(&mut self, tid: ThreadId) {
        self.ready_queue.retain(|&q| q != tid);
        if self.threads.remove(&tid).is_some() {
            self.ids.release(tid);
        }
    }

    /// Remove the current thread, parking its stack for the next resume
    /// point to free. The caller must dispatch immediately afterwards.
    pub fn retire_current(&mut self) {
        let tid = self.current;
        self.ready_queue.retain(|&q| q != tid);
        if let Some(mut t) = self.threads.remove(&tid) {
            self.retired_stack = t.stack.take();
            self.ids.release(tid);
        }
    }

    /// Free the stack of the last self-terminated thread, if one is
    /// still parked. Runs only on a stack that is not the parked one.
    pub fn reap_retired(&mut self) {
        self.retired_stack = None;
    }

    /// Next thread to hand the CPU to. Entries that stopped being
    /// runnable after they were enqueued are dropped on the way; with the
    /// queue drained, the outgoing thread keeps the CPU if it still can,
    /// and the main thread is the last resort.
    pub fn pick_next(&mut self) -> ThreadId {
        while let Some(tid) = self.ready_queue.pop_front() {
            if self.threads.get(&tid).is_some_and(|t| t.runnable()) {
                return tid;
            }
        }
        match self.threads.get(&self.current) {
            Some(t) if t.state == ThreadState::Running => self.current,
            _ => ThreadId::MAIN,
        }
    }

    /// One quantum of sleep bookkeeping. Runs once per dispatch, after
    /// the next thread is chosen: a `sleep(1)` issued this quantum misses
    /// the dispatch that is under way and becomes eligible for the next
    /// one. Wakes enqueue in id order.
    pub fn tick_sleepers(&mut self) {
        for (id, t) in self.threads.iter_mut() {
            if !t.sleeping {
                continue;
            }
            t.sleep_remaining = t.sleep_remaining.saturating_sub(1);
            if t.sleep_remaining == 0 {
                t.sleeping = false;
                if t.state == ThreadState::Ready {
                    self.ready_queue.push_back(*id);
                }
            }
        }
    }

    /// Drop every control block and stack. `keep_stack_of` names the
    /// thread whose stack the process is about to exit on; that one is
    /// leaked to the exiting process instead of freed under our feet.
    fn release_all(&mut self, keep_stack_of: Option<ThreadId>) {
        if let Some(tid) = keep_stack_of {
            if let Some(t) = self.threads.get_mut(&tid) {
                if let Some(stack) = t.stack.take() {
                    mem::forget(stack);
                }
            }
        }
        self.ready_queue.clear();
        self.threads.clear();
    }
}

// ============================================================================
// GLOBAL SCHEDULER CELL
// ============================================================================

struct SchedulerCell(UnsafeCell<Option<Scheduler>>);

// One OS thread plus a signal handler that only runs while the cell is
// not being accessed (the accessors require SIGVTALRM to be blocked).
unsafe impl Sync for SchedulerCell {}

static ACTIVE: SchedulerCell = SchedulerCell(UnsafeCell::new(None));

/// The live scheduler, if `init` has run. Callers must hold the
/// preemption signal blocked for the whole time they use the reference.
pub(crate) fn active() -> Option<&'static mut Scheduler> {
    unsafe { (*ACTIVE.0.get()).as_mut() }
}

/// Publish the scheduler built by `init`. Preemption starts once the
/// caller unmasks the signal.
pub(crate) fn install(sched: Scheduler) {
    unsafe { *ACTIVE.0.get() = Some(sched) }
}

fn clear() {
    unsafe { *ACTIVE.0.get() = None }
}

// ============================================================================
// SWITCH PATHS
// ============================================================================

/// Suspend the current thread and run the next one.
///
/// Entered with the preemption signal blocked, either from the signal
/// handler or from an API operation that arranged its own suspension
/// (sleep, self-block). Control returns here, on the suspended thread's
/// own stack, when that thread is dispatched again.
pub(crate) fn preempt_current() {
    let Some(sched) = active() else { return };
    let current = sched.current;

    let tag = match sched.threads.get_mut(&current) {
        Some(t) => {
            t.context.capture_mask();
            unsafe { context::save_registers(&mut t.context.regs) }
        }
        None => return,
    };
    if tag != context::SAVED {
        // Dispatched again. The frame saved above has just been resumed;
        // free any stack a self-terminated thread left behind, then open
        // the critical section that the save captured.
        if let Some(sched) = active() {
            sched.reap_retired();
        }
        signal::unblock_preemption();
        return;
    }

    // A thread that arranged its own suspension is no longer Running and
    // must not be re-enqueued here.
    let mut requeue = false;
    if let Some(t) = sched.threads.get_mut(&current) {
        if t.state == ThreadState::Running && !t.sleeping {
            t.state = ThreadState::Ready;
            requeue = true;
        }
    }
    if requeue {
        sched.ready_queue.push_back(current);
    }
    dispatch(sched)
}

/// Hand the CPU to the next runnable thread. Never returns.
///
/// Runs with the preemption signal blocked; the restored context carries
/// the mask that was saved with it, and the resume point unmasks.
pub(crate) fn dispatch(sched: &mut Scheduler) -> ! {
    let next = sched.pick_next();
    sched.current = next;
    if let Some(t) = sched.threads.get_mut(&next) {
        t.state = ThreadState::Running;
    }
    sched.total_quanta += 1;
    sched.tick_sleepers();
    if let Some(t) = sched.threads.get_mut(&next) {
        t.quanta_run += 1;
    }
    let ctx: *const Context = &sched
        .threads
        .get(&next)
        .expect("dispatch target vanished")
        .context;
    unsafe { context::restore(ctx) }
}

/// Remove the current thread and move on. Never returns; the thread's
/// stack is freed at the next resume point.
pub(crate) fn exit_current(sched: &mut Scheduler) -> ! {
    sched.retire_current();
    dispatch(sched)
}

/// First instruction of every spawned thread.
///
/// The dispatch that starts a thread jumps here with the preemption
/// signal still blocked. An entry function that returns retires its own
/// thread; spawned threads never fall off the end of this frame.
extern "C" fn thread_start() -> ! {
    let entry = {
        let sched = active().expect("a thread is running without a scheduler");
        sched.reap_retired();
        sched.threads.get(&sched.current).and_then(|t| t.entry)
    };
    signal::unblock_preemption();
    if let Some(entry) = entry {
        entry();
    }
    signal::block_preemption();
    let sched = active().expect("a thread is running without a scheduler");
    sched.timer.arm();
    exit_current(sched)
}

// ============================================================================
// TEARDOWN
// ============================================================================

/// Release every thread and end the process successfully. The calling
/// thread's own stack stays allocated while the process exits on it.
pub(crate) fn shutdown(sched: &mut Scheduler) -> ! {
    let caller = sched.current;
    sched.release_all(Some(caller));
    clear();
    process::exit(0)
}

/// A host facility the scheduler depends on failed. Report, release
/// everything, and exit unsuccessfully.
pub(crate) fn fatal_system_error(what: &str) -> ! {
    eprintln!("system error: {what}");
    if let Some(sched) = active() {
        let caller = sched.current;
        sched.release_all(Some(caller));
    }
    clear();
    process::exit(1)
}

// ============================================================================
// STATE-MACHINE TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() {}

    fn sched() -> Scheduler {
        Scheduler::new(Duration::from_millis(10))
    }

    fn assert_one_running(s: &Scheduler) {
        let running = s
            .threads
            .values()
            .filter(|t| t.state == ThreadState::Running)
            .count();
        assert_eq!(running, 1);
    }

    #[test]
    fn new_scheduler_runs_main_in_quantum_one() {
        let s = sched();
        assert_eq!(s.current, ThreadId::MAIN);
        assert_eq!(s.total_quanta, 1);
        assert_eq!(s.quanta_of(ThreadId::MAIN), Some(1));
        assert!(s.ready_queue.is_empty());
        assert_one_running(&s);
    }

    #[test]
    fn spawn_assigns_smallest_ids_and_enqueues_fifo() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        let b = s.spawn_thread(noop).unwrap();
        assert_eq!(a, ThreadId(1));
        assert_eq!(b, ThreadId(2));
        assert_eq!(s.ready_queue, [a, b]);
        assert!(s.threads[&a].runnable());
        assert_one_running(&s);
    }

    #[test]
    fn spawn_rejects_at_capacity_and_recovers_after_terminate() {
        let mut s = sched();
        for _ in 1..MAX_THREADS {
            s.spawn_thread(noop).unwrap();
        }
        assert_eq!(s.spawn_thread(noop), Err(ThreadError::AtCapacity));
        s.remove_thread(ThreadId(42));
        assert_eq!(s.spawn_thread(noop), Ok(ThreadId(42)));
        assert_eq!(s.spawn_thread(noop), Err(ThreadError::AtCapacity));
    }

    #[test]
    fn remove_thread_clears_queue_and_releases_id() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        let b = s.spawn_thread(noop).unwrap();
        s.remove_thread(a);
        assert!(!s.is_live(a));
        assert_eq!(s.ready_queue, [b]);
        // The freed id is the smallest again.
        assert_eq!(s.spawn_thread(noop), Ok(a));
    }

    #[test]
    fn block_dequeues_and_is_idempotent() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.block_thread(a);
        assert_eq!(s.threads[&a].state, ThreadState::Blocked);
        assert!(s.ready_queue.is_empty());
        s.block_thread(a);
        assert_eq!(s.threads[&a].state, ThreadState::Blocked);
        assert!(s.ready_queue.is_empty());
    }

    #[test]
    fn wake_restores_eligibility_once() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.block_thread(a);
        s.wake_thread(a);
        assert_eq!(s.threads[&a].state, ThreadState::Ready);
        assert_eq!(s.ready_queue, [a]);
        // Waking a thread that is not blocked changes nothing.
        s.wake_thread(a);
        assert_eq!(s.ready_queue, [a]);
    }

    #[test]
    fn wake_of_sleeping_thread_defers_to_sleep_expiry() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.current = a;
        s.threads.get_mut(&a).unwrap().state = ThreadState::Running;
        s.threads.get_mut(&ThreadId::MAIN).unwrap().state = ThreadState::Ready;
        s.ready_queue.clear();
        s.begin_sleep(2);
        s.block_thread(a);
        s.wake_thread(a);
        // Ready again, but still sleeping: not in the queue.
        assert_eq!(s.threads[&a].state, ThreadState::Ready);
        assert!(s.threads[&a].sleeping);
        assert!(s.ready_queue.is_empty());
        s.tick_sleepers();
        assert!(s.ready_queue.is_empty());
        s.tick_sleepers();
        assert!(!s.threads[&a].sleeping);
        assert_eq!(s.ready_queue, [a]);
    }

    #[test]
    fn sleeping_blocked_thread_wakes_without_enqueue() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.current = a;
        s.threads.get_mut(&a).unwrap().state = ThreadState::Running;
        s.threads.get_mut(&ThreadId::MAIN).unwrap().state = ThreadState::Ready;
        s.ready_queue.clear();
        s.begin_sleep(1);
        s.block_thread(a);
        s.tick_sleepers();
        // Sleep expired while blocked: stays off the queue until woken.
        assert!(!s.threads[&a].sleeping);
        assert_eq!(s.threads[&a].state, ThreadState::Blocked);
        assert!(s.ready_queue.is_empty());
        s.wake_thread(a);
        assert_eq!(s.ready_queue, [a]);
    }

    #[test]
    fn begin_sleep_demotes_without_enqueue() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.current = a;
        s.threads.get_mut(&a).unwrap().state = ThreadState::Running;
        s.threads.get_mut(&ThreadId::MAIN).unwrap().state = ThreadState::Ready;
        s.ready_queue.clear();
        s.begin_sleep(3);
        let t = &s.threads[&a];
        assert!(t.sleeping);
        assert_eq!(t.sleep_remaining, 3);
        assert_eq!(t.state, ThreadState::Ready);
        assert!(s.ready_queue.is_empty());
    }

    #[test]
    fn pick_next_skips_stale_entries() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        let b = s.spawn_thread(noop).unwrap();
        // `a` was blocked after being enqueued but the queue entry was
        // left behind on purpose, exercising the defensive filter.
        s.threads.get_mut(&a).unwrap().state = ThreadState::Blocked;
        assert_eq!(s.pick_next(), b);
        assert!(s.ready_queue.is_empty());
    }

    #[test]
    fn pick_next_keeps_running_current_when_queue_drains() {
        let mut s = sched();
        assert_eq!(s.pick_next(), ThreadId::MAIN);
    }

    #[test]
    fn pick_next_falls_back_to_main_when_current_cannot_continue() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.threads.get_mut(&ThreadId::MAIN).unwrap().state = ThreadState::Ready;
        s.current = a;
        s.threads.get_mut(&a).unwrap().state = ThreadState::Blocked;
        s.ready_queue.clear();
        assert_eq!(s.pick_next(), ThreadId::MAIN);
    }

    #[test]
    fn simultaneous_wakes_enqueue_in_id_order() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        let b = s.spawn_thread(noop).unwrap();
        let c = s.spawn_thread(noop).unwrap();
        s.ready_queue.clear();
        for &tid in &[c, a, b] {
            let t = s.threads.get_mut(&tid).unwrap();
            t.sleeping = true;
            t.sleep_remaining = 1;
        }
        s.tick_sleepers();
        assert_eq!(s.ready_queue, [a, b, c]);
    }

    #[test]
    fn retire_current_parks_the_stack() {
        let mut s = sched();
        let a = s.spawn_thread(noop).unwrap();
        s.current = a;
        s.retire_current();
        assert!(!s.is_live(a));
        assert!(s.retired_stack.is_some());
        s.reap_retired();
        assert!(s.retired_stack.is_none());
        // The id is reusable right away.
        assert_eq!(s.spawn_thread(noop), Ok(a));
    }
}
