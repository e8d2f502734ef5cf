/*
 * Thread Control Blocks
 *
 * This module defines the per-thread record the scheduler keeps: identity,
 * run state, the saved CPU context, the owned stack, and the quantum and
 * sleep accounting fields.
 */

use core::fmt;

use super::THREAD_STACK_SIZE;
use super::context::Context;

/// Thread identifier, stable for the lifetime of the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl ThreadId {
    /// The main thread, created by `init` on the host's own stack.
    pub const MAIN: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state of a thread.
///
/// Exactly one thread is `Running` at any point observable through the
/// API. The sleeping condition is a separate flag on the control block,
/// orthogonal to `Ready` and `Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
}

/// Stack buffer owned by a spawned thread.
///
/// The buffer is heap-allocated and fixed-size. The initial stack pointer
/// is the highest 16-byte-aligned address inside the buffer minus one
/// slot, so the entry trampoline sees the stack exactly as if it had been
/// reached by a `call`.
pub struct ThreadStack {
    buf: Box<[u8]>,
}

impl ThreadStack {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; THREAD_STACK_SIZE].into_boxed_slice(),
        }
    }

    /// Stack pointer value for the first dispatch of this thread.
    pub fn initial_sp(&self) -> u64 {
        let top = self.buf.as_ptr() as u64 + self.buf.len() as u64;
        (top & !0xf) - 8
    }
}

/// Thread control block.
///
/// The scheduler's thread table owns these. The main thread (id 0) has no
/// owned stack and no entry function: it runs on the stack the process
/// started with.
pub struct Thread {
    pub id: ThreadId,
    pub state: ThreadState,
    pub context: Context,
    pub stack: Option<ThreadStack>,
    pub entry: Option<fn()>,

    /// Number of quanta during which this thread has been running.
    pub quanta_run: u64,

    /// Thread is waiting out a timed sleep. Orthogonal to `state`.
    pub sleeping: bool,

    /// Quanta left until wake. Meaningful only while `sleeping`.
    pub sleep_remaining: u64,
}

impl Thread {
    /// Control block for the main thread, already running.
    pub fn main() -> Self {
        Self {
            id: ThreadId::MAIN,
            state: ThreadState::Running,
            context: Context::blank(),
            stack: None,
            entry: None,
            quanta_run: 1,
            sleeping: false,
            sleep_remaining: 0,
        }
    }

    /// Control block for a freshly spawned thread, ready to run.
    pub fn spawned(id: ThreadId, stack: ThreadStack, context: Context, entry: fn()) -> Self {
        Self {
            id,
            state: ThreadState::Ready,
            context,
            stack: Some(stack),
            entry: Some(entry),
            quanta_run: 0,
            sleeping: false,
            sleep_remaining: 0,
        }
    }

    /// A thread may be handed the CPU only in this condition.
    pub fn runnable(&self) -> bool {
        self.state == ThreadState::Ready && !self.sleeping
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("quanta_run", &self.quanta_run)
            .field("sleeping", &self.sleeping)
            .finish()
    }
}
