//! Tick driver: the periodic thread that turns accumulated motion into
//! shaped wheel ticks (spec §4.2 `tick()`/`drain_wheel()`, driven on a
//! fixed cadence per §5's three-thread model).
//!
//! Grounded on `beam-agent`'s capture-thread frame pacing: track an
//! absolute deadline and sleep the remainder rather than a flat
//! `sleep(interval)`, so drift doesn't accumulate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::output::VirtualOutput;
use crate::router::Shared;

pub fn run(
    refresh_interval_ms: u64,
    shared: &Mutex<Shared>,
    output: &Mutex<VirtualOutput>,
    running: &AtomicBool,
) {
    let interval = Duration::from_millis(refresh_interval_ms.max(1));
    let mut deadline = Instant::now() + interval;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now < deadline {
            std::thread::sleep(deadline - now);
        }
        deadline += interval;

        let (vertical, horizontal) = {
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            if !guard.engine.is_active() {
                continue;
            }
            let (sx, sy) = guard.engine.tick();
            (sy, sx)
        };

        if vertical == 0 && horizontal == 0 {
            continue;
        }

        trace!(vertical, horizontal, "emitting wheel tick");
        let out = output.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = out.emit_wheel(vertical, horizontal) {
            tracing::warn!(error = %e, "failed to emit wheel tick");
        }
    }
}
