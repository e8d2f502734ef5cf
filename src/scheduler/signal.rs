/*
 * Preemption Signal Masking
 *
 * The scheduler's critical sections are protected by masking SIGVTALRM,
 * not by a lock: there is only one OS thread, so the timer handler is the
 * only other locus of control, and a blocked signal cannot be delivered
 * inside the region that blocked it. Every API operation holds a
 * `SignalGuard` for its whole body; the switch paths use the raw
 * block/unblock calls because a context restore jumps out of the guard's
 * scope and the matching unblock happens at the resume point instead.
 */

use std::mem::MaybeUninit;
use std::ptr;

use libc::c_int;

/// The signal that drives preemption. ITIMER_VIRTUAL delivers it.
pub const PREEMPT_SIGNAL: c_int = libc::SIGVTALRM;

/// A signal set containing nothing.
pub fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        if libc::sigemptyset(set.as_mut_ptr()) < 0 {
            super::fatal_system_error("failed to build an empty signal set");
        }
        set.assume_init()
    }
}

/// A signal set containing only the preemption signal.
pub fn preempt_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        if libc::sigemptyset(set.as_mut_ptr()) < 0
            || libc::sigaddset(set.as_mut_ptr(), PREEMPT_SIGNAL) < 0
        {
            super::fatal_system_error("failed to build the preemption signal set");
        }
        set.assume_init()
    }
}

/// Mask the preemption signal for the calling thread.
pub fn block_preemption() {
    let set = preempt_sigset();
    if unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, ptr::null_mut()) } < 0 {
        super::fatal_system_error("failed to block the preemption signal");
    }
}

/// Unmask the preemption signal for the calling thread.
pub fn unblock_preemption() {
    let set = preempt_sigset();
    if unsafe { libc::sigprocmask(libc::SIG_UNBLOCK, &set, ptr::null_mut()) } < 0 {
        super::fatal_system_error("failed to unblock the preemption signal");
    }
}

/// RAII critical section against the preemption handler.
///
/// Constructed at the top of every API operation, dropped on every return
/// path. Operations that switch away mid-section never run the drop; the
/// resume point unblocks explicitly, which makes the eventual drop a
/// no-op unblock of an already-unblocked signal.
pub struct SignalGuard(());

impl SignalGuard {
    pub fn enter() -> Self {
        block_preemption();
        SignalGuard(())
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        unblock_preemption();
    }
}
