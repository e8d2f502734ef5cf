// Terminating thread 0 ends the whole process with status 0 no matter
// how many threads are mid-flight; every spawned stack is released on
// the way out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use vthread::ThreadId;

static WORK: AtomicU64 = AtomicU64::new(0);

fn worker() {
    loop {
        WORK.fetch_add(1, Ordering::SeqCst);
    }
}

fn main() {
    vthread::init(Duration::from_millis(5)).expect("init");
    for _ in 0..10 {
        vthread::spawn(worker).unwrap();
    }

    while vthread::total_quanta().unwrap() < 25 {
        std::hint::spin_loop();
    }
    assert!(WORK.load(Ordering::SeqCst) > 0);

    vthread::terminate(ThreadId::MAIN).unwrap();
    unreachable!("terminate(main) returned");
}
