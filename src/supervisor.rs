//! Supervisor (C5, spec §4.5): pick a target device, run the grab
//! loop, and restart on failure with backoff.
//!
//! Grounded on `beam-agent::main.rs`'s capture-thread retry wrapper
//! (spawn, run until error, log, sleep, respawn) applied to the router
//! loop instead of a network capture loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::devinfo::{self, DeviceInfo};
use crate::output::VirtualOutput;
use crate::router::{self, Shared};
use crate::tick;

const VIRTUAL_DEVICE_NAME: &str = "Smooth Scroll Virtual Device";
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// §4.5 step 1: pick the first enumerated device advertising relative
/// X/Y that isn't our own virtual output.
///
/// Open Question resolution (see DESIGN.md): the spec names "devices
/// matching a configured substring" but the documented config file in
/// §6 has no such key, so selection here is capability-only.
fn select_pointing_device(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| d.has_relative_xy() && d.name != VIRTUAL_DEVICE_NAME)
}

fn select_keyboard_device(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| d.has_handler_containing("kbd") && !d.has_relative_xy())
}

/// Run the mouse grab loop + keyboard reader once, end to end: enumerate,
/// select, open, grab, build the virtual device, route events until
/// failure or shutdown.
fn run_once(config: &Config, shared: &Mutex<Shared>, running: &AtomicBool) -> anyhow::Result<()> {
    let devices = devinfo::enumerate()?;

    let pointing = select_pointing_device(&devices)
        .ok_or_else(|| anyhow::anyhow!("no pointing device with relative X/Y found"))?;
    let pointing_path: PathBuf = pointing
        .event_path()
        .ok_or_else(|| anyhow::anyhow!("pointing device {} has no event node", pointing.name))?;
    info!(device = %pointing.name, path = %pointing_path.display(), "selected pointing device");

    let keyboard_path = select_keyboard_device(&devices).and_then(|d| d.event_path());
    if let Some(path) = &keyboard_path {
        info!(path = %path.display(), "selected keyboard device");
    } else {
        warn!("no dedicated keyboard device found; keyboard hotkeys will be unavailable");
    }

    let output = VirtualOutput::new(pointing)?;
    let output = Mutex::new(output);

    // Scoped to this attempt: dropped to false as soon as the mouse
    // loop exits (error or shutdown), tearing down the keyboard reader
    // and tick driver together so a retry starts from a clean slate.
    let attempt_active = AtomicBool::new(true);

    std::thread::scope(|scope| -> anyhow::Result<()> {
        let keyboard_handle = keyboard_path.as_ref().map(|path| {
            scope.spawn(|| router::run_keyboard_loop(path, config, shared, &output, &attempt_active))
        });
        let tick_handle = scope.spawn(|| {
            tick::run(config.refresh_interval_ms, shared, &output, &attempt_active);
        });

        let mouse_result = router::run_mouse_loop(&pointing_path, config, shared, &output, running);

        attempt_active.store(false, Ordering::SeqCst);
        if let Some(handle) = keyboard_handle {
            if let Ok(Err(e)) = handle.join() {
                warn!(error = %e, "keyboard reader exited with an error");
            }
        }
        let _ = tick_handle.join();
        mouse_result
    })
}

/// §4.5 step 5: on any failure, reset all engine/FSM latched state and
/// retry after a fixed delay, for as long as `running` stays set.
pub fn supervise(config: &Config, shared: &Mutex<Shared>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match run_once(config, shared, running) {
            Ok(()) => {
                info!("router loop exited cleanly");
            }
            Err(e) => {
                error!(error = %e, "router loop failed, resetting and retrying");
            }
        }

        {
            let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
            guard.engine.deactivate();
            guard.fsm.reset();
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
        std::thread::sleep(RETRY_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, rel_xy: bool, handlers: Vec<&str>) -> DeviceInfo {
        let blob = format!(
            "N: Name=\"{name}\"\nH: Handlers={}\nB: EV=3\nB: REL={}\n",
            handlers.join(" "),
            if rel_xy { "3" } else { "0" },
        );
        devinfo::enumerate_blob_for_test(&blob).remove(0)
    }

    #[test]
    fn selects_first_relative_xy_device_skipping_virtual_output() {
        let devices = vec![
            device(VIRTUAL_DEVICE_NAME, true, vec!["event9"]),
            device("Real Mouse", true, vec!["event3"]),
        ];
        let chosen = select_pointing_device(&devices).unwrap();
        assert_eq!(chosen.name, "Real Mouse");
    }

    #[test]
    fn no_relative_device_found_returns_none() {
        let devices = vec![device("Power Button", false, vec!["event2"])];
        assert!(select_pointing_device(&devices).is_none());
    }
}
