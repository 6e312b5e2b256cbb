//! Activation finite-state machine (C3, spec §4.3).
//!
//! Consumes symbolic hotkey/panic events from both the mouse and
//! keyboard readers and decides engine activation, unifying what
//! `daemon.py` (the original source) did as two near-identical
//! per-device dispatchers (spec §9's "duplicated hotkey dispatch"
//! pattern note).

use std::time::Instant;

use crate::config::{Config, Mode};
use crate::engine::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyId {
    Hk1,
    Hk2,
    Panic,
}

/// What the router should do in response to a press/release/motion
/// event, decided by the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing externally observable changed.
    None,
    /// Synthesize a click (press immediately followed by release) of
    /// the mouse-button hotkey on the virtual device -- the tap
    /// fall-through.
    SynthesizeClick,
    /// The panic button fired; the whole daemon should shut down.
    Shutdown,
}

pub struct Fsm {
    mode: Mode,
    hold_duration_ms: u64,
    hk1_is_mouse_button: bool,

    /// ONE_KEY_TOGGLE/MOMENTARY latch preventing key-repeat from
    /// re-triggering a rising edge.
    hk1_pressed: bool,
    hk2_pressed: bool,

    is_holding: bool,
    press_instant: Option<Instant>,
}

impl Fsm {
    pub fn new(config: &Config, hk1_is_mouse_button: bool) -> Self {
        Self {
            mode: config.mode,
            hold_duration_ms: config.hold_duration_ms,
            hk1_is_mouse_button,
            hk1_pressed: false,
            hk2_pressed: false,
            is_holding: false,
            press_instant: None,
        }
    }

    pub fn is_holding(&self) -> bool {
        self.is_holding
    }

    /// Clear all latched state (§4.5 step 5: "clear isHolding") -- used
    /// by the supervisor when a router attempt ends, so a fresh attempt
    /// never inherits a stale hold/press latch from a device that
    /// disconnected mid-gesture.
    pub fn reset(&mut self) {
        self.hk1_pressed = false;
        self.hk2_pressed = false;
        self.is_holding = false;
        self.press_instant = None;
    }

    /// §4.4 step 3: cheap per-event deadline check. Returns true if the
    /// hold-duration elapsed and the engine was just activated.
    pub fn check_hold_deadline(&mut self, engine: &mut Engine, now: Instant) -> bool {
        if self.is_holding && !engine.is_active() {
            if let Some(pressed_at) = self.press_instant {
                if now.duration_since(pressed_at).as_millis() >= self.hold_duration_ms as u128 {
                    engine.activate();
                    return true;
                }
            }
        }
        false
    }

    /// §4.4 step 2, second bullet: drag intent -- any motion while
    /// holding and not yet active activates immediately.
    pub fn on_motion_while_holding(&mut self, engine: &mut Engine) {
        if self.is_holding && !engine.is_active() {
            engine.activate();
        }
    }

    pub fn on_press(&mut self, id: HotkeyId, engine: &mut Engine, now: Instant) -> Action {
        match id {
            HotkeyId::Panic => return Action::Shutdown,
            HotkeyId::Hk1 => self.on_hk1_press(engine, now),
            HotkeyId::Hk2 => self.on_hk2_press(engine),
        }
        Action::None
    }

    pub fn on_release(&mut self, id: HotkeyId, engine: &mut Engine, now: Instant) -> Action {
        match id {
            HotkeyId::Panic => Action::None,
            HotkeyId::Hk1 => self.on_hk1_release(engine, now),
            HotkeyId::Hk2 => Action::None,
        }
    }

    fn on_hk1_press(&mut self, engine: &mut Engine, now: Instant) {
        if self.hk1_is_mouse_button {
            self.is_holding = true;
            self.press_instant = Some(now);
            return;
        }

        if self.hk1_pressed {
            return; // key-repeat, ignore
        }
        self.hk1_pressed = true;

        match self.mode {
            Mode::OneKeyToggle => {
                if engine.is_active() {
                    engine.deactivate();
                } else {
                    engine.activate();
                }
            }
            Mode::OneKeyMomentary => engine.activate(),
            Mode::OnOff => engine.activate(),
        }
    }

    fn on_hk1_release(&mut self, engine: &mut Engine, now: Instant) -> Action {
        if !self.hk1_is_mouse_button {
            self.hk1_pressed = false;
            if self.mode == Mode::OneKeyMomentary {
                engine.deactivate();
            }
            return Action::None;
        }

        self.is_holding = false;
        if engine.is_active() {
            if self.mode == Mode::OneKeyMomentary {
                engine.deactivate();
            }
            Action::None
        } else {
            let tapped = self
                .press_instant
                .map(|p| now.duration_since(p).as_millis() < self.hold_duration_ms as u128)
                .unwrap_or(false);
            self.press_instant = None;
            if tapped {
                Action::SynthesizeClick
            } else {
                Action::None
            }
        }
    }

    fn on_hk2_press(&mut self, engine: &mut Engine) {
        if self.hk2_pressed {
            return;
        }
        self.hk2_pressed = true;
        if self.mode == Mode::OnOff {
            engine.deactivate();
        }
    }

    /// HK2 release only clears the repeat latch; ON_OFF mode has no
    /// release behavior for HK2.
    pub fn on_hk2_release(&mut self) {
        self.hk2_pressed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn cfg(mode: Mode, hold_ms: u64) -> Config {
        Config {
            hotkey1: input_linux::Key::ButtonMiddle,
            hotkey2: Some(input_linux::Key::F1),
            panic_button: None,
            mode,
            hold_duration_ms: hold_ms,
            sensitivity: 1.0,
            refresh_interval_ms: 10,
            smoothing_window_max_size: 1,
            snap_on_by_default: false,
            snap_ratio: 0.5,
            snap_threshold: 10.0,
            acceleration_on: false,
            acceleration_blend: 1.0,
            acceleration_scale: 1.0,
            add_shift: false,
            add_ctrl: false,
            add_alt: false,
        }
    }

    // P4: tap latch -- press+release within hold duration, no motion,
    // never activates, exactly one synthesized click.
    #[test]
    fn tap_never_activates_and_emits_one_click() {
        let c = cfg(Mode::OneKeyMomentary, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, true);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
        let action = fsm.on_release(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
        assert_eq!(action, Action::SynthesizeClick);
    }

    // P5: hold past the threshold activates even with zero motion.
    #[test]
    fn hold_past_threshold_activates() {
        let c = cfg(Mode::OneKeyMomentary, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, true);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
        let later = t0 + std::time::Duration::from_millis(250);
        let activated = fsm.check_hold_deadline(&mut engine, later);
        assert!(activated);
        assert!(engine.is_active());
    }

    // P6: motion during the hold window activates immediately.
    #[test]
    fn motion_during_hold_activates_immediately() {
        let c = cfg(Mode::OneKeyMomentary, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, true);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
        fsm.on_motion_while_holding(&mut engine);
        assert!(engine.is_active());
    }

    #[test]
    fn momentary_release_while_active_deactivates() {
        let c = cfg(Mode::OneKeyMomentary, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, true);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        fsm.on_motion_while_holding(&mut engine);
        assert!(engine.is_active());
        let action = fsm.on_release(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
        assert_eq!(action, Action::None);
    }

    #[test]
    fn one_key_toggle_flips_on_rising_edge_with_keyboard_hotkey() {
        let c = cfg(Mode::OneKeyToggle, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, false);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(engine.is_active());
        // key-repeat press (auto-repeat) must not re-toggle.
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(engine.is_active());
        fsm.on_release(HotkeyId::Hk1, &mut engine, t0);
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(!engine.is_active());
    }

    #[test]
    fn on_off_mode_uses_distinct_keys() {
        let c = cfg(Mode::OnOff, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, false);
        let t0 = Instant::now();
        fsm.on_press(HotkeyId::Hk1, &mut engine, t0);
        assert!(engine.is_active());
        fsm.on_press(HotkeyId::Hk2, &mut engine, t0);
        assert!(!engine.is_active());
    }

    #[test]
    fn reset_clears_hold_and_press_latches() {
        let c = cfg(Mode::OneKeyMomentary, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, true);
        fsm.on_press(HotkeyId::Hk1, &mut engine, Instant::now());
        assert!(fsm.is_holding());
        fsm.reset();
        assert!(!fsm.is_holding());
        // A fresh attempt's first motion event must not spuriously
        // activate the engine now that the hold latch is cleared.
        fsm.on_motion_while_holding(&mut engine);
        assert!(!engine.is_active());
    }

    #[test]
    fn panic_requests_shutdown() {
        let c = cfg(Mode::OnOff, 200);
        let mut engine = Engine::new(&c);
        let mut fsm = Fsm::new(&c, false);
        let action = fsm.on_press(HotkeyId::Panic, &mut engine, Instant::now());
        assert_eq!(action, Action::Shutdown);
    }
}
