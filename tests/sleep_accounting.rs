// Sleep accounting: a thread that sleeps for three quanta is off the CPU
// for those three plus at least one more for the dispatch that brings it
// back, so the global clock advances by at least four.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use vthread::ThreadId;

static Q0: AtomicU64 = AtomicU64::new(0);
static Q1: AtomicU64 = AtomicU64::new(0);
static DONE: AtomicBool = AtomicBool::new(false);

fn sleeper() {
    Q0.store(vthread::total_quanta().unwrap(), Ordering::SeqCst);
    vthread::sleep(3).unwrap();
    Q1.store(vthread::total_quanta().unwrap(), Ordering::SeqCst);
    DONE.store(true, Ordering::SeqCst);
    loop {
        std::hint::spin_loop();
    }
}

fn main() {
    vthread::init(Duration::from_millis(10)).expect("init");
    vthread::spawn(sleeper).unwrap();

    while !DONE.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }

    let q0 = Q0.load(Ordering::SeqCst);
    let q1 = Q1.load(Ordering::SeqCst);
    assert!(
        q1 >= q0 + 4,
        "slept over too few quanta: before {q0}, after {q1}"
    );

    vthread::terminate(ThreadId::MAIN).unwrap();
    unreachable!("terminate(main) returned");
}
