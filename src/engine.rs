//! Scroll shaping engine (C2, spec §4.2).
//!
//! Pure transformation: accumulated raw pointer deltas in, integer
//! wheel ticks out. No I/O, no threads -- this is the module the
//! `tick` driver and the router both hold behind the single engine
//! mutex described in spec §5.
//!
//! Ported from `examples/original_source/scroll_logic.py`'s
//! `SmoothScrollLogic`/`SmoothingWindow`/`ScrollState`, generalized to
//! take its tunables from [`crate::config::Config`] instead of a raw
//! dict.

use std::collections::VecDeque;

use thiserror::Error;

use crate::config::Config;

/// The one case spec.md calls out as fatal-programmer (§7: "engine
/// invariant violation") -- the sub-integer remainder carried between
/// ticks (I5) must never reach a full unit. An actual release build
/// enforces this via `panic!`, not `debug_assert!`, since the latter
/// compiles out under this crate's release profile.
#[derive(Debug, Error)]
pub enum EngineFault {
    #[error("remainder invariant (I5) violated on axis {axis}: {value} >= 1.0")]
    RemainderOverflow { axis: &'static str, value: f64 },
    #[error("window invariant (I6) violated: length {len} exceeds capacity {cap}")]
    WindowOverCapacity { len: usize, cap: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapState {
    Undecided,
    XLocked,
    YLocked,
}

/// Fixed-capacity moving-average window over raw `(dx, dy)` pairs.
struct SmoothingWindow {
    cap: usize,
    xs: VecDeque<f64>,
    ys: VecDeque<f64>,
}

impl SmoothingWindow {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            xs: VecDeque::with_capacity(cap.max(1)),
            ys: VecDeque::with_capacity(cap.max(1)),
        }
    }

    fn push(&mut self, x: f64, y: f64) {
        if self.xs.len() == self.cap {
            self.xs.pop_front();
        }
        if self.ys.len() == self.cap {
            self.ys.pop_front();
        }
        self.xs.push_back(x);
        self.ys.push_back(y);
        if self.xs.len() > self.cap {
            panic!(
                "{}",
                EngineFault::WindowOverCapacity { len: self.xs.len(), cap: self.cap }
            );
        }
        if self.ys.len() > self.cap {
            panic!(
                "{}",
                EngineFault::WindowOverCapacity { len: self.ys.len(), cap: self.cap }
            );
        }
    }

    fn mean_x(&self) -> f64 {
        if self.xs.is_empty() {
            0.0
        } else {
            self.xs.iter().sum::<f64>() / self.xs.len() as f64
        }
    }

    fn mean_y(&self) -> f64 {
        if self.ys.is_empty() {
            0.0
        } else {
            self.ys.iter().sum::<f64>() / self.ys.len() as f64
        }
    }

    fn reset(&mut self) {
        self.xs.clear();
        self.ys.clear();
    }
}

pub struct Engine {
    active: bool,
    acc_x: f64,
    acc_y: f64,
    acc_wheel: f64,
    rem_x: f64,
    rem_y: f64,
    snap_state: SnapState,
    snap_deviation: f64,
    window: SmoothingWindow,

    sensitivity: f64,
    snap_on: bool,
    snap_ratio: f64,
    snap_threshold: f64,
    acceleration_on: bool,
    accel_p: f64,
    accel_q: f64,
    accel_r: f64,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        let refresh_interval_s = config.refresh_interval_ms as f64 / 1000.0;
        let accel_scale = config.acceleration_scale * refresh_interval_s;
        let accel_blend = config.acceleration_blend;

        Self {
            active: false,
            acc_x: 0.0,
            acc_y: 0.0,
            acc_wheel: 0.0,
            rem_x: 0.0,
            rem_y: 0.0,
            snap_state: SnapState::Undecided,
            snap_deviation: 0.0,
            window: SmoothingWindow::new(config.smoothing_window_max_size),
            sensitivity: config.sensitivity,
            snap_on: config.snap_on_by_default,
            snap_ratio: config.snap_ratio,
            snap_threshold: config.snap_threshold,
            acceleration_on: config.acceleration_on,
            accel_p: accel_blend / accel_scale,
            accel_q: accel_blend + 1.0,
            accel_r: accel_scale,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Toggle runtime axis-snap on/off (not exposed via config reload
    /// in this daemon, but kept separate from `snap_on_by_default` so
    /// a future control surface can flip it without touching config).
    pub fn set_snap_on(&mut self, on: bool) {
        self.snap_on = on;
    }

    pub fn activate(&mut self) {
        self.active = true;
        self.acc_x = 0.0;
        self.acc_y = 0.0;
        self.acc_wheel = 0.0;
        self.rem_x = 0.0;
        self.rem_y = 0.0;
        self.snap_state = SnapState::Undecided;
        self.snap_deviation = 0.0;
        self.window.reset();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn add_motion(&mut self, dx: f64, dy: f64) {
        if self.active {
            self.acc_x += dx;
            self.acc_y += dy;
        }
    }

    pub fn add_wheel(&mut self, delta: f64) {
        if self.active {
            self.acc_wheel += delta;
        }
    }

    /// Integer part of the accumulated wheel-passthrough delta; the
    /// fractional remainder stays in the accumulator for the next tick.
    pub fn drain_wheel(&mut self) -> i32 {
        let whole = self.acc_wheel.trunc();
        self.acc_wheel -= whole;
        whole as i32
    }

    /// One shaping pass (spec §4.2 `tick()` algorithm, steps 1-8).
    pub fn tick(&mut self) -> (i32, i32) {
        self.window.push(self.acc_x, self.acc_y);
        let mut sx = self.window.mean_x();
        let mut sy = -self.window.mean_y();

        self.acc_x = 0.0;
        self.acc_y = 0.0;

        if self.snap_on {
            let (nx, ny) = self.apply_axis_snapping(sx, sy);
            sx = nx;
            sy = ny;
        }

        if self.acceleration_on && (sx != 0.0 || sy != 0.0) {
            let (nx, ny) = self.apply_acceleration(sx, sy);
            sx = nx;
            sy = ny;
        }

        sx *= self.sensitivity;
        sy *= self.sensitivity;

        sx += self.rem_x;
        sy += self.rem_y;

        let rx = sx.round();
        let ry = sy.round();

        self.rem_x = sx - rx;
        self.rem_y = sy - ry;

        if self.rem_x.abs() >= 1.0 {
            panic!(
                "{}",
                EngineFault::RemainderOverflow { axis: "x", value: self.rem_x }
            );
        }
        if self.rem_y.abs() >= 1.0 {
            panic!(
                "{}",
                EngineFault::RemainderOverflow { axis: "y", value: self.rem_y }
            );
        }

        (rx as i32, ry as i32)
    }

    /// §4.2.1 axis snapping state machine.
    fn apply_axis_snapping(&mut self, x: f64, y: f64) -> (f64, f64) {
        match self.snap_state {
            SnapState::Undecided => {
                if x.abs() > y.abs() {
                    self.snap_state = SnapState::XLocked;
                    (x, 0.0)
                } else if x.abs() < y.abs() {
                    self.snap_state = SnapState::YLocked;
                    (0.0, y)
                } else {
                    (x, y)
                }
            }
            SnapState::XLocked => {
                self.snap_deviation += y;
                self.attenuate_deviation(x.abs());
                if self.snap_deviation.abs() > self.snap_threshold {
                    self.snap_state = SnapState::YLocked;
                    self.snap_deviation = 0.0;
                    self.window.reset();
                    (0.0, y)
                } else {
                    (x, 0.0)
                }
            }
            SnapState::YLocked => {
                self.snap_deviation += x;
                self.attenuate_deviation(y.abs());
                if self.snap_deviation.abs() > self.snap_threshold {
                    self.snap_state = SnapState::XLocked;
                    self.snap_deviation = 0.0;
                    self.window.reset();
                    (x, 0.0)
                } else {
                    (0.0, y)
                }
            }
        }
    }

    /// Attenuate `snap_deviation` toward zero by `other_axis_mag *
    /// snap_ratio`, without letting the attenuation flip its sign.
    fn attenuate_deviation(&mut self, other_axis_mag: f64) {
        let step = other_axis_mag * self.snap_ratio;
        if self.snap_deviation > 0.0 {
            self.snap_deviation = (self.snap_deviation - step).max(0.0);
        } else if self.snap_deviation < 0.0 {
            self.snap_deviation = (self.snap_deviation + step).min(0.0);
        }
    }

    /// §4.2.2 acceleration curve: linear above the scale threshold,
    /// quadratic boost below it.
    fn apply_acceleration(&self, x: f64, y: f64) -> (f64, f64) {
        let v = (x * x + y * y).sqrt();
        if v == 0.0 {
            return (x, y);
        }
        let t = v - self.accel_r;
        let mut f = self.accel_q * t + self.accel_r;
        if t < 0.0 {
            f += self.accel_p * t * t;
        }
        f /= v;
        (x * f, y * f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            hotkey1: input_linux::Key::ButtonMiddle,
            hotkey2: None,
            panic_button: None,
            mode: crate::config::Mode::OneKeyMomentary,
            hold_duration_ms: 200,
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

    // P2: inactive engine never produces output.
    #[test]
    fn inactive_engine_ignores_motion_and_wheel() {
        let mut e = Engine::new(&base_config());
        e.add_motion(5.0, 5.0);
        e.add_wheel(3.0);
        assert_eq!(e.tick(), (0, 0));
        assert_eq!(e.drain_wheel(), 0);
    }

    // S1/S2-ish: window=1, sensitivity=1, Y inverted.
    #[test]
    fn active_engine_inverts_y_and_passes_x() {
        let mut e = Engine::new(&base_config());
        e.activate();
        e.add_motion(0.0, 3.0);
        assert_eq!(e.tick(), (0, -3));
    }

    // P7: smoothing of a constant input is independent of window size.
    #[test]
    fn smoothing_linearity_across_window_sizes() {
        for cap in [1usize, 2, 5, 10] {
            let mut cfg = base_config();
            cfg.smoothing_window_max_size = cap;
            let mut e = Engine::new(&cfg);
            e.activate();
            for _ in 0..(cap + 3) {
                e.add_motion(4.0, 0.0);
                let (rx, _) = e.tick();
                assert_eq!(rx, 4, "window cap {cap} should pass through a constant input");
            }
        }
    }

    // I6: window length never exceeds capacity.
    #[test]
    fn window_never_exceeds_capacity() {
        let mut cfg = base_config();
        cfg.smoothing_window_max_size = 3;
        let mut e = Engine::new(&cfg);
        e.activate();
        for _ in 0..50 {
            e.add_motion(1.0, 1.0);
            e.tick();
        }
        assert!(e.window.xs.len() <= 3);
        assert!(e.window.ys.len() <= 3);
    }

    // P8: remainder round-trip is exact.
    #[test]
    fn remainder_round_trips_exactly() {
        let mut e = Engine::new(&base_config());
        e.activate();
        for i in 0..100 {
            let dx = (i as f64 * 0.37).sin() * 2.3;
            let dy = (i as f64 * 0.53).cos() * 1.7;
            let rem_x_before = e.rem_x;
            e.add_motion(dx, dy);
            let sx_before_round = e.acc_x + rem_x_before; // after mean with window=1 this equals input
            let _ = sx_before_round;
            e.tick();
            assert!(e.rem_x.abs() < 1.0);
            assert!(e.rem_y.abs() < 1.0);
        }
    }

    // P1: long sequence of tiny motions eventually emits output (remainder
    // doesn't silently discard sub-integer motion).
    #[test]
    fn tiny_motions_eventually_emit_a_tick() {
        let mut e = Engine::new(&base_config());
        e.activate();
        let mut total = 0i64;
        for _ in 0..100 {
            e.add_motion(0.3, 0.0);
            let (rx, _) = e.tick();
            total += rx as i64;
        }
        // 100 * 0.3 == 30; remainder accounting must not lose more than 1.
        assert!((total - 30).abs() <= 1, "total={total}");
    }

    // P3: once locked onto an axis, the other axis is exactly zero until a flip.
    #[test]
    fn x_lock_zeros_y_until_flip() {
        let mut cfg = base_config();
        cfg.snap_on_by_default = true;
        cfg.snap_threshold = 1000.0; // keep it locked for this test
        let mut e = Engine::new(&cfg);
        e.activate();
        e.add_motion(10.0, 1.0);
        let (_, y0) = e.tick();
        assert_ne!(y0, 0); // first tick is UNDECIDED, may emit both axes
        for _ in 0..20 {
            e.add_motion(5.0, 1.0);
            let (_, y) = e.tick();
            assert_eq!(y, 0, "X_LOCKED must keep y at exactly 0");
        }
    }

    #[test]
    fn snap_flips_axis_once_deviation_exceeds_threshold() {
        let mut cfg = base_config();
        cfg.snap_on_by_default = true;
        cfg.snap_ratio = 0.0; // no attenuation -> deviation only grows
        cfg.snap_threshold = 3.0;
        let mut e = Engine::new(&cfg);
        e.activate();
        e.add_motion(5.0, 1.0);
        let (_, y0) = e.tick();
        assert_eq!(y0, 0, "locks X first since |x|>|y|");

        let mut flipped = false;
        for _ in 0..10 {
            e.add_motion(5.0, 2.0);
            let (x, y) = e.tick();
            if x == 0 && y != 0 {
                flipped = true;
                break;
            }
        }
        assert!(flipped, "expected snap to flip to Y once deviation exceeds threshold");
    }

    // S6: acceleration sub-scale boost strictly exceeds linear passthrough.
    #[test]
    fn acceleration_boosts_small_motion_above_linear() {
        let mut cfg = base_config();
        cfg.acceleration_on = true;
        cfg.acceleration_scale = 1.0;
        cfg.acceleration_blend = 1.0;
        cfg.refresh_interval_ms = 10;
        let mut e = Engine::new(&cfg);
        e.activate();
        e.add_motion(1.0, 0.0);
        let (rx, _) = e.tick();
        assert!(rx.abs() >= 1, "boosted x should not collapse to zero: {rx}");
    }

    #[test]
    fn tie_in_undecided_emits_both_axes() {
        let mut cfg = base_config();
        cfg.snap_on_by_default = true;
        let mut e = Engine::new(&cfg);
        e.activate();
        e.add_motion(3.0, 3.0);
        let (x, y) = e.tick();
        assert_ne!(x, 0);
        assert_ne!(y, 0);
    }

    #[test]
    fn engine_fault_messages_name_the_violated_invariant() {
        let remainder = EngineFault::RemainderOverflow { axis: "x", value: 1.2 };
        assert!(remainder.to_string().contains("I5"));
        let window = EngineFault::WindowOverCapacity { len: 5, cap: 4 };
        assert!(window.to_string().contains("I6"));
    }

    #[test]
    fn drain_wheel_retains_fraction() {
        let mut e = Engine::new(&base_config());
        e.activate();
        e.add_wheel(2.7);
        assert_eq!(e.drain_wheel(), 2);
        e.add_wheel(0.0);
        assert_eq!(e.drain_wheel(), 0);
        e.add_wheel(0.3);
        assert_eq!(e.drain_wheel(), 1); // 0.7 carried + 0.3 = 1.0
    }
}
