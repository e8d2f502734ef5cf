// Block and resume from the outside: main freezes a busy worker, shows
// that its counter stands still, thaws it, and shuts down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use vthread::ThreadId;

static TICKS: AtomicU64 = AtomicU64::new(0);

fn busy() {
    loop {
        TICKS.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_quanta(n: u64) {
    let until = vthread::total_quanta().unwrap() + n;
    while vthread::total_quanta().unwrap() < until {
        std::hint::spin_loop();
    }
}

fn main() {
    env_logger::init();

    vthread::init(Duration::from_millis(10)).expect("init");
    let worker = vthread::spawn(busy).unwrap();

    wait_quanta(4);
    println!("worker at {} ticks, blocking it", TICKS.load(Ordering::SeqCst));

    vthread::block(worker).unwrap();
    let frozen = TICKS.load(Ordering::SeqCst);
    wait_quanta(4);
    println!(
        "after four quanta blocked: {} ticks (was {frozen})",
        TICKS.load(Ordering::SeqCst)
    );

    vthread::resume(worker).unwrap();
    wait_quanta(4);
    println!("after resume: {} ticks", TICKS.load(Ordering::SeqCst));

    vthread::terminate(ThreadId::MAIN).unwrap();
}
