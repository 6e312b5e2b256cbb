//! Event Router (C4, spec §4.4) and the shared state it drives.
//!
//! The grab loop proper: classify each raw event read off a physical
//! device and decide whether to replay it, swallow it, feed the
//! engine, or drive the activation FSM. Grounded on the "read loop
//! over a grabbed device, accumulate, emit" shape in
//! `examples/other_examples/...RyanSpaker-TrackpadEvdevConverter__src-mouse.rs.rs`,
//! using `input_linux::EvdevHandle` as the read/grab counterpart to
//! the `UInputHandle` already used by `output.rs`.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use input_linux::sys::input_event;
use input_linux::EvdevHandle;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, trace, warn};

use crate::activation::{Action, Fsm, HotkeyId};
use crate::config::Config;
use crate::engine::Engine;
use crate::output::VirtualOutput;

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_REL: u16 = 0x02;

const REL_X: u16 = 0x00;
const REL_Y: u16 = 0x01;
const REL_WHEEL: u16 = 0x08;

/// Engine + FSM bundled behind one mutex: spec §5 requires that "no
/// observable interleaving of a tick with a motion update" happen, and
/// the FSM's activation calls mutate the engine directly, so the two
/// share a lock rather than risking the lock-ordering hazard of two
/// separate ones.
pub struct Shared {
    pub engine: Engine,
    pub fsm: Fsm,
}

impl Shared {
    pub fn new(config: &Config) -> Self {
        let hk1_is_mouse = crate::keys::is_mouse_button(config.hotkey1);
        Self {
            engine: Engine::new(config),
            fsm: Fsm::new(config, hk1_is_mouse),
        }
    }
}

/// Poll the device fd with a short timeout so the read loop can
/// observe `running` between blocking reads (spec §5: "cooperative via
/// `running` flag checked each loop iteration").
fn wait_readable(raw_fd: i32, timeout_ms: u16) -> anyhow::Result<bool> {
    let fd = unsafe { BorrowedFd::borrow_raw(raw_fd) };
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    let n = poll(&mut fds, PollTimeout::from(timeout_ms)).context("poll on input device")?;
    Ok(n > 0)
}

fn hotkey_id_for(config: &Config, code: u16) -> Option<HotkeyId> {
    if code == config.hotkey1.code() {
        return Some(HotkeyId::Hk1);
    }
    if let Some(hk2) = config.hotkey2 {
        if code == hk2.code() {
            return Some(HotkeyId::Hk2);
        }
    }
    if let Some(panic) = config.panic_button {
        if code == panic.code() {
            return Some(HotkeyId::Panic);
        }
    }
    None
}

/// Dispatch one keyboard/button press-or-release to the FSM, and carry
/// out whatever `Action` it returns (tap fall-through synthesizes a
/// click; panic requests shutdown).
fn dispatch_hotkey(
    id: HotkeyId,
    pressed: bool,
    shared: &Mutex<Shared>,
    output: &Mutex<VirtualOutput>,
    hotkey1: input_linux::Key,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let now = Instant::now();
    let action = {
        let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
        let Shared { engine, fsm } = &mut *guard;
        if pressed {
            fsm.on_press(id, engine, now)
        } else {
            fsm.on_release(id, engine, now)
        }
    };
    match action {
        Action::None => {}
        Action::SynthesizeClick => {
            debug!("tap fall-through: synthesizing click");
            let out = output.lock().unwrap_or_else(|e| e.into_inner());
            out.emit_button(hotkey1, true)?;
            out.emit_button(hotkey1, false)?;
        }
        Action::Shutdown => {
            warn!("panic button pressed, shutting down");
            running.store(false, Ordering::SeqCst);
        }
    }
    Ok(())
}

/// Pure §4.4 step 2 decision: does this motion get fed into the engine
/// (already engaged, or just crossing the drag-intent threshold), or
/// does it need to be replayed verbatim? Mutates `engine`/`fsm` but
/// performs no I/O, so it is directly testable without a real device.
fn classify_motion(engine: &mut Engine, fsm: &mut Fsm, dx: i32, dy: i32) -> bool {
    if engine.is_active() {
        engine.add_motion(dx as f64, dy as f64);
        return true;
    }

    if fsm.is_holding() && (dx != 0 || dy != 0) {
        fsm.on_motion_while_holding(engine);
        if engine.is_active() {
            engine.add_motion(dx as f64, dy as f64);
            return true;
        }
    }

    false
}

fn dispatch_motion(
    dx: i32,
    dy: i32,
    shared: &Mutex<Shared>,
    output: &Mutex<VirtualOutput>,
) -> anyhow::Result<()> {
    let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
    let Shared { engine, fsm } = &mut *guard;
    let fed = classify_motion(engine, fsm, dx, dy);
    drop(guard);

    if fed {
        return Ok(());
    }
    let out = output.lock().unwrap_or_else(|e| e.into_inner());
    out.emit_motion(dx, dy)
}

/// The grab loop over the real pointing device (§4.4).
pub fn run_mouse_loop(
    device_path: &Path,
    config: &Config,
    shared: &Mutex<Shared>,
    output: &Mutex<VirtualOutput>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(device_path)
        .with_context(|| format!("failed to open {}", device_path.display()))?;
    let raw_fd = file.as_raw_fd();
    let handle = EvdevHandle::new(file);
    handle.grab(true).context("failed to grab input device")?;
    debug!(path = %device_path.display(), "grabbed pointing device");

    let mut buf: [input_event; 32] = unsafe { std::mem::zeroed() };

    while running.load(Ordering::SeqCst) {
        if !wait_readable(raw_fd, 200)? {
            // No event within the timeout; still run the cheap hold
            // deadline check (§4.4 step 3).
            check_hold_deadline(shared);
            continue;
        }

        let n = match handle.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                let _ = handle.grab(false);
                return Err(e).context("error reading from grabbed pointing device");
            }
        };

        for raw in &buf[..n] {
            check_hold_deadline(shared);

            match raw.type_ {
                EV_KEY => {
                    if let Some(id) = hotkey_id_for(config, raw.code) {
                        if id == HotkeyId::Hk1 && !crate::keys::is_mouse_button(config.hotkey1) {
                            // HK1 configured as a keyboard key: the keyboard
                            // reader owns it, not this (mouse) device.
                        } else {
                            dispatch_hotkey(id, raw.value != 0, shared, output, config.hotkey1, running)?;
                            continue;
                        }
                    }
                    replay(output, *raw)?;
                }
                EV_REL if raw.code == REL_X => dispatch_motion(raw.value, 0, shared, output)?,
                EV_REL if raw.code == REL_Y => dispatch_motion(0, raw.value, shared, output)?,
                // Wheel (and any other relative axis) replays verbatim
                // unconditionally, per §4.4 step 4 -- it is not one of
                // the active/inactive-gated branches like motion.
                EV_SYN => {
                    // SYN_REPORT boundaries are implicit in our
                    // per-event emission; nothing to replay standalone.
                }
                _ => replay(output, *raw)?,
            }
        }
    }

    let _ = handle.grab(false);
    debug!("mouse router loop exiting");
    Ok(())
}

/// Parallel keyboard reader (§4.4 last paragraph): not grabbed, shares
/// the same FSM via the same mutex.
pub fn run_keyboard_loop(
    device_path: &Path,
    config: &Config,
    shared: &Mutex<Shared>,
    output: &Mutex<VirtualOutput>,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(device_path)
        .with_context(|| format!("failed to open {}", device_path.display()))?;
    let raw_fd = file.as_raw_fd();
    let handle = EvdevHandle::new(file);

    let mut buf: [input_event; 32] = unsafe { std::mem::zeroed() };

    while running.load(Ordering::SeqCst) {
        if !wait_readable(raw_fd, 200)? {
            check_hold_deadline(shared);
            continue;
        }
        let n = match handle.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e).context("error reading from keyboard device"),
        };
        for raw in &buf[..n] {
            if raw.type_ != EV_KEY {
                continue;
            }
            if let Some(id) = hotkey_id_for(config, raw.code) {
                dispatch_hotkey(id, raw.value != 0, shared, output, config.hotkey1, running)?;
            } else {
                trace!(code = raw.code, "non-hotkey keyboard event ignored (device not grabbed)");
            }
        }
    }

    debug!("keyboard router loop exiting");
    Ok(())
}

fn check_hold_deadline(shared: &Mutex<Shared>) {
    let now = Instant::now();
    let mut guard = shared.lock().unwrap_or_else(|e| e.into_inner());
    let Shared { engine, fsm } = &mut *guard;
    fsm.check_hold_deadline(engine, now);
}

fn replay(output: &Mutex<VirtualOutput>, raw: input_event) -> anyhow::Result<()> {
    let out = output.lock().unwrap_or_else(|e| e.into_inner());
    out.emit_raw(raw)
}

/// Convenience used by tests in this module only: how long `poll`
/// should wait before re-checking `running`.
#[allow(dead_code)]
const POLL_TIMEOUT: Duration = Duration::from_millis(200);
