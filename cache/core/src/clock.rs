//! Coarse virtual clock for TTL stamping.
//!
//! Reading wall time on every cache operation is measurable at high request
//! rates, so expiry stamps come from a process-wide atomic that one
//! background thread maintains: realigned to wall time each second and
//! advanced in 100 ms steps in between. TTL precision is therefore roughly
//! one step, which is the documented trade of the two-level store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const STEP: Duration = Duration::from_millis(100);
const STEPS_PER_REALIGN: u32 = 9;

/// Nanoseconds since the Unix epoch according to the coarse clock.
///
/// The first call spawns the updater thread; it runs for the life of the
/// process.
pub fn coarse_now() -> u64 {
    handle().load(Ordering::Relaxed)
}

fn handle() -> &'static Arc<AtomicU64> {
    static CLOCK: OnceLock<Arc<AtomicU64>> = OnceLock::new();
    CLOCK.get_or_init(|| {
        let clock = Arc::new(AtomicU64::new(wall_nanos()));
        let shared = clock.clone();
        thread::Builder::new()
            .name("ember-clock".into())
            .spawn(move || {
                loop {
                    shared.store(wall_nanos(), Ordering::Relaxed);
                    for _ in 0..STEPS_PER_REALIGN {
                        thread::sleep(STEP);
                        shared.fetch_add(STEP.as_nanos() as u64, Ordering::Relaxed);
                    }
                    thread::sleep(STEP);
                }
            })
            .expect("failed to spawn clock thread");
        clock
    })
}

fn wall_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
