/*
 * vthread - User-Level Threads on One OS Thread
 *
 * This library gives application code the abstraction of many independent
 * threads of control, each with its own stack and program counter, all
 * multiplexed onto the single OS thread that called `init`. Scheduling is
 * round-robin over virtual CPU time: a SIGVTALRM interval timer preempts
 * the running thread once per quantum and the front of a FIFO ready queue
 * runs next.
 *
 * The public surface is the API facade in `api`:
 *
 * - `init(quantum)` turns the calling thread into thread 0 and starts the
 *   preemption timer
 * - `spawn(entry)` creates a new thread that starts at `entry`
 * - `terminate`, `block`, `resume`, `sleep` drive the thread state machine
 * - `current`, `total_quanta`, `quanta_of` observe it
 *
 * Everything below the facade lives in `scheduler`: the thread control
 * block and table, the smallest-free id allocator, the ready queue, the
 * context save/restore primitive, the interval timer and its signal
 * handler, and the signal-mask guard that makes API calls and the handler
 * mutually exclusive.
 */

mod api;
mod error;
mod scheduler;

pub use api::{block, current, init, quanta_of, resume, sleep, spawn, terminate, total_quanta};
pub use error::ThreadError;
pub use scheduler::{MAX_THREADS, THREAD_STACK_SIZE, ThreadId, ThreadState};
