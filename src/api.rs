/*
 * Public API Facade
 *
 * Every operation follows the same shape: mask the preemption signal for
 * the duration of the call, validate the input, mutate scheduler state,
 * and either return or switch away. Input rejections return the error and
 * print one line to stderr, prefixed `thread library error: `; they never
 * change state. Failures of the host signal/timer facilities print
 * `system error: ` and end the process (see `scheduler::fatal_system_error`).
 */

use std::time::Duration;

use crate::error::ThreadError;
use crate::scheduler::{self, Scheduler, ThreadId, signal::SignalGuard, timer};

/// Diagnose a rejected input on stderr and hand the error back.
fn reject(err: ThreadError) -> ThreadError {
    eprintln!("thread library error: {err}");
    err
}

fn active_or_reject() -> Result<&'static mut Scheduler, ThreadError> {
    scheduler::active().ok_or_else(|| reject(ThreadError::NotInitialized))
}

/// Turn the calling thread into thread 0 and start preemptive scheduling.
///
/// Must be called exactly once, before any other operation. The quantum
/// is virtual CPU time: the clock only advances while the process runs.
pub fn init(quantum: Duration) -> Result<(), ThreadError> {
    let _guard = SignalGuard::enter();
    if scheduler::active().is_some() {
        return Err(reject(ThreadError::AlreadyInitialized));
    }
    if quantum.is_zero() {
        return Err(reject(ThreadError::InvalidQuantum));
    }
    let sched = Scheduler::new(quantum);
    timer::install_preemption_handler();
    sched.timer.arm();
    scheduler::install(sched);
    log::debug!("scheduler initialized with a quantum of {quantum:?}");
    Ok(())
}

/// Create a thread that starts at `entry`, with the smallest free id and
/// a fresh stack, queued behind every thread already waiting.
pub fn spawn(entry: fn()) -> Result<ThreadId, ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    match sched.spawn_thread(entry) {
        Ok(id) => {
            log::debug!("spawned thread {id}");
            Ok(id)
        }
        Err(err) => Err(reject(err)),
    }
}

/// Destroy a thread.
///
/// Terminating thread 0 tears the whole library down and exits the
/// process with status 0, no matter which thread asks. Terminating the
/// calling thread frees its resources and never returns to it.
pub fn terminate(tid: ThreadId) -> Result<(), ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    if !sched.is_live(tid) {
        return Err(reject(ThreadError::NoSuchThread(tid)));
    }
    if tid == ThreadId::MAIN {
        scheduler::shutdown(sched)
    }
    if tid == sched.current {
        sched.timer.arm();
        scheduler::exit_current(sched)
    }
    sched.remove_thread(tid);
    log::debug!("terminated thread {tid}");
    Ok(())
}

/// Take a thread out of the running until `resume` puts it back.
///
/// Blocking the calling thread switches away immediately. Blocking an
/// already-blocked thread is a successful no-op. Thread 0 cannot be
/// blocked.
pub fn block(tid: ThreadId) -> Result<(), ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    if !sched.is_live(tid) {
        return Err(reject(ThreadError::NoSuchThread(tid)));
    }
    if tid == ThreadId::MAIN {
        return Err(reject(ThreadError::MainBlocked));
    }
    sched.block_thread(tid);
    log::trace!("blocked thread {tid}");
    if tid == sched.current {
        sched.timer.arm();
        scheduler::preempt_current();
    }
    Ok(())
}

/// Make a blocked thread eligible to run again. A thread that is not
/// blocked is left as it is; this is a successful no-op.
pub fn resume(tid: ThreadId) -> Result<(), ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    if !sched.is_live(tid) {
        return Err(reject(ThreadError::NoSuchThread(tid)));
    }
    sched.wake_thread(tid);
    log::trace!("resumed thread {tid}");
    Ok(())
}

/// Put the calling thread to sleep for `quanta` whole quanta.
///
/// The sleeping thread is not dispatched again until the countdown runs
/// out; a sleep issued during quantum Q ends no earlier than quantum
/// Q + quanta + 1. Thread 0 cannot sleep.
pub fn sleep(quanta: u64) -> Result<(), ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    if quanta == 0 {
        return Err(reject(ThreadError::InvalidSleep));
    }
    if sched.current == ThreadId::MAIN {
        return Err(reject(ThreadError::MainSleep));
    }
    sched.begin_sleep(quanta);
    sched.timer.arm();
    scheduler::preempt_current();
    Ok(())
}

/// Id of the thread that is running right now.
pub fn current() -> Result<ThreadId, ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    Ok(sched.current)
}

/// Quanta elapsed since `init`, across all threads. Starts at 1.
pub fn total_quanta() -> Result<u64, ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    Ok(sched.total_quanta)
}

/// Quanta during which the given thread has held the CPU.
pub fn quanta_of(tid: ThreadId) -> Result<u64, ThreadError> {
    let _guard = SignalGuard::enter();
    let sched = active_or_reject()?;
    sched
        .quanta_of(tid)
        .ok_or_else(|| reject(ThreadError::NoSuchThread(tid)))
}
