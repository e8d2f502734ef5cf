// Three workers share one OS thread. Each bumps its counter once per
// wake wave; the round-robin queue keeps them within one step of each
// other the whole run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use vthread::ThreadId;

static COUNTS: [AtomicU64; 3] = [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)];

fn worker<const SLOT: usize>() {
    loop {
        COUNTS[SLOT].fetch_add(1, Ordering::SeqCst);
        vthread::sleep(1).unwrap();
    }
}

fn main() {
    env_logger::init();

    vthread::init(Duration::from_millis(20)).expect("init");
    let a = vthread::spawn(worker::<0>).unwrap();
    let b = vthread::spawn(worker::<1>).unwrap();
    let c = vthread::spawn(worker::<2>).unwrap();
    log::info!("spawned workers {a}, {b}, {c}");

    let mut reported = 0;
    loop {
        let quanta = vthread::total_quanta().unwrap();
        if quanta >= 100 {
            break;
        }
        if quanta / 20 > reported {
            reported = quanta / 20;
            println!(
                "quantum {:>3}: counts {} {} {} | worker quanta {} {} {}",
                quanta,
                COUNTS[0].load(Ordering::SeqCst),
                COUNTS[1].load(Ordering::SeqCst),
                COUNTS[2].load(Ordering::SeqCst),
                vthread::quanta_of(a).unwrap(),
                vthread::quanta_of(b).unwrap(),
                vthread::quanta_of(c).unwrap(),
            );
        }
        std::hint::spin_loop();
    }

    println!("done after {} quanta", vthread::total_quanta().unwrap());
    vthread::terminate(ThreadId::MAIN).unwrap();
}
