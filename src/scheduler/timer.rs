/*
 * Virtual-Time Preemption Timer
 *
 * The quantum clock is an ITIMER_VIRTUAL interval timer: it counts only
 * CPU time the process actually consumes, and it delivers SIGVTALRM once
 * per quantum, forever, until the process exits. The signal handler is
 * the asynchronous half of the scheduler; it masks the signal and hands
 * control to the preemption entry point.
 *
 * The timer is also re-armed on every voluntary switch (sleep, self-block,
 * self-terminate), so the incoming thread always starts a whole quantum.
 */

use std::mem;
use std::ptr;
use std::time::Duration;

use libc::c_int;

use super::signal;

/// Interval timer configuration, armed and re-armed with `setitimer`.
pub struct PreemptionTimer {
    interval: libc::itimerval,
}

impl PreemptionTimer {
    /// Build a timer whose initial expiry and periodic interval are both
    /// one quantum.
    pub fn new(quantum: Duration) -> Self {
        let tv = libc::timeval {
            tv_sec: quantum.as_secs() as libc::time_t,
            tv_usec: quantum.subsec_micros() as libc::suseconds_t,
        };
        Self {
            interval: libc::itimerval {
                it_interval: tv,
                it_value: tv,
            },
        }
    }

    /// Start (or restart) the quantum clock from zero.
    pub fn arm(&self) {
        if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &self.interval, ptr::null_mut()) } < 0 {
            super::fatal_system_error("setitimer failed");
        }
    }
}

/// Install the SIGVTALRM handler. Called once, from `init`.
pub fn install_preemption_handler() {
    let mut sa: libc::sigaction = unsafe { mem::zeroed() };
    sa.sa_sigaction = on_preempt_signal as usize;
    sa.sa_flags = libc::SA_RESTART;
    unsafe {
        if libc::sigemptyset(&mut sa.sa_mask) < 0 {
            super::fatal_system_error("failed to build the handler signal mask");
        }
        if libc::sigaction(signal::PREEMPT_SIGNAL, &sa, ptr::null_mut()) < 0 {
            super::fatal_system_error("sigaction failed");
        }
    }
}

/// The quantum expired on the running thread.
///
/// Runs on the interrupted thread's stack. Must not allocate, lock, or
/// perform any I/O: the interrupted code may be anywhere, including inside
/// the allocator.
extern "C" fn on_preempt_signal(_signal: c_int) {
    signal::block_preemption();
    super::preempt_current();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_splits_into_seconds_and_microseconds() {
        let timer = PreemptionTimer::new(Duration::from_micros(2_500_000));
        assert_eq!(timer.interval.it_value.tv_sec, 2);
        assert_eq!(timer.interval.it_value.tv_usec, 500_000);
        assert_eq!(timer.interval.it_interval.tv_sec, 2);
        assert_eq!(timer.interval.it_interval.tv_usec, 500_000);
    }

    #[test]
    fn sub_second_quantum_has_no_seconds_part() {
        let timer = PreemptionTimer::new(Duration::from_micros(100_000));
        assert_eq!(timer.interval.it_value.tv_sec, 0);
        assert_eq!(timer.interval.it_value.tv_usec, 100_000);
    }
}
