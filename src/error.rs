/*
 * Library Error Type
 *
 * Every rejected input surfaces as one of these variants. Input errors
 * never change scheduler state; the facade additionally prints a single
 * diagnostic line per rejection. Host-facility failures (sigprocmask,
 * sigaction, setitimer) are not represented here because they are
 * unrecoverable: the scheduler tears down and the process exits.
 */

use thiserror::Error;

use crate::scheduler::ThreadId;

/// Reasons an API operation can reject its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ThreadError {
    /// `init` was called a second time.
    #[error("the scheduler is already initialized")]
    AlreadyInitialized,

    /// An operation other than `init` ran before `init`.
    #[error("the scheduler is not initialized")]
    NotInitialized,

    /// `init` was given a zero-length quantum.
    #[error("the quantum must be a positive duration")]
    InvalidQuantum,

    /// The named thread is not live.
    #[error("no thread with id {0} exists")]
    NoSuchThread(ThreadId),

    /// `spawn` was called with the maximum number of threads already live.
    #[error("the maximum number of threads is already live")]
    AtCapacity,

    /// `block` targeted the main thread.
    #[error("the main thread cannot be blocked")]
    MainBlocked,

    /// `sleep` was called from the main thread.
    #[error("the main thread cannot sleep")]
    MainSleep,

    /// `sleep` was asked for zero quanta.
    #[error("a sleep must last at least one quantum")]
    InvalidSleep,
}
