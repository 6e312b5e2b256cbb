//! Virtual Output (C1, spec §4.1).
//!
//! Owns the synthesized pointing device. Grounded directly on
//! `crates/agent/src/input.rs`'s `InputInjector`: build a
//! `UInputHandle<File>`, declare capability bits, `.create(...)`, then
//! write small batches of raw events followed by a trailing sync.

use std::fs::{File, OpenOptions};

use anyhow::Context;
use input_linux::sys::input_event;
use input_linux::{
    AbsoluteAxis, EventKind, EventTime, InputId, Key, KeyEvent, KeyState, RelativeAxis,
    RelativeEvent, SynchronizeEvent, UInputHandle,
};
use tracing::debug;

use crate::devinfo::DeviceInfo;

/// Cap on how many of the real device's key codes get copied onto the
/// virtual device (§4.1: "implementation-defined small bound").
const MAX_COPIED_KEYS: usize = 20;

pub struct VirtualOutput {
    handle: UInputHandle<File>,
}

impl VirtualOutput {
    /// Build the virtual device, copying `source`'s relative-axis and
    /// key capabilities and augmenting with the mandatory superset:
    /// horizontal/vertical wheel, X/Y, and the three standard buttons.
    pub fn new(source: &DeviceInfo) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open("/dev/uinput")
            .context("failed to open /dev/uinput (check permissions)")?;
        let handle = UInputHandle::new(file);

        handle.set_evbit(EventKind::Key).context("set_evbit(Key)")?;
        handle.set_evbit(EventKind::Relative).context("set_evbit(Relative)")?;
        handle.set_evbit(EventKind::Synchronize).context("set_evbit(Synchronize)")?;

        for axis in source.relative_axes() {
            handle.set_relbit(axis).context("set_relbit from source device")?;
        }
        for mandatory in [
            RelativeAxis::X,
            RelativeAxis::Y,
            RelativeAxis::Wheel,
            RelativeAxis::HorizontalWheel,
        ] {
            handle.set_relbit(mandatory).context("set_relbit mandatory")?;
        }

        for key in source.key_codes(MAX_COPIED_KEYS) {
            handle.set_keybit(key).context("set_keybit from source device")?;
        }
        for mandatory in [Key::ButtonLeft, Key::ButtonRight, Key::ButtonMiddle] {
            handle.set_keybit(mandatory).context("set_keybit mandatory")?;
        }

        let id = InputId {
            bustype: 0x03, // BUS_USB
            vendor: 0x0001,
            product: 0x0001,
            version: 1,
        };
        handle
            .create(&id, b"Smooth Scroll Virtual Device\0", 0, &[])
            .context("failed to create virtual device")?;
        debug!("virtual output device created");

        Ok(Self { handle })
    }

    pub fn emit_button(&self, key: Key, down: bool) -> anyhow::Result<()> {
        let time = EventTime::default();
        let events = [
            KeyEvent::new(time, key, KeyState::pressed(down)).into_event().into_raw(),
            SynchronizeEvent::report(time).into_event().into_raw(),
        ];
        self.handle.write(&events).context("emit_button")?;
        Ok(())
    }

    /// Forward raw relative motion verbatim (used when disengaged, or
    /// for axes the engine does not own).
    pub fn emit_motion(&self, dx: i32, dy: i32) -> anyhow::Result<()> {
        let time = EventTime::default();
        let mut events: Vec<input_event> = Vec::with_capacity(3);
        if dx != 0 {
            events.push(RelativeEvent::new(time, RelativeAxis::X, dx).into_event().into_raw());
        }
        if dy != 0 {
            events.push(RelativeEvent::new(time, RelativeAxis::Y, dy).into_event().into_raw());
        }
        if events.is_empty() {
            return Ok(());
        }
        events.push(SynchronizeEvent::report(time).into_event().into_raw());
        self.handle.write(&events).context("emit_motion")?;
        Ok(())
    }

    /// Emit shaped wheel ticks: horizontal first, then vertical, then
    /// sync (§4.1 `emit_wheel`).
    pub fn emit_wheel(&self, vertical_ticks: i32, horizontal_ticks: i32) -> anyhow::Result<()> {
        let time = EventTime::default();
        let mut events: Vec<input_event> = Vec::with_capacity(3);
        if horizontal_ticks != 0 {
            events.push(
                RelativeEvent::new(time, RelativeAxis::HorizontalWheel, horizontal_ticks)
                    .into_event()
                    .into_raw(),
            );
        }
        if vertical_ticks != 0 {
            events.push(
                RelativeEvent::new(time, RelativeAxis::Wheel, vertical_ticks)
                    .into_event()
                    .into_raw(),
            );
        }
        if events.is_empty() {
            return Ok(());
        }
        events.push(SynchronizeEvent::report(time).into_event().into_raw());
        self.handle.write(&events).context("emit_wheel")?;
        Ok(())
    }

    /// Replay an arbitrary raw event verbatim, followed by a sync
    /// (§4.1 `emit_raw`; used by the router for non-hotkey passthrough).
    pub fn emit_raw(&self, raw: input_event) -> anyhow::Result<()> {
        let time = EventTime::default();
        let events = [raw, SynchronizeEvent::report(time).into_event().into_raw()];
        self.handle.write(&events).context("emit_raw")?;
        Ok(())
    }

    pub fn close(&self) {
        debug!("virtual output device closed");
        // UInputHandle tears the device down via UI_DEV_DESTROY when
        // its File is dropped; nothing else to release here.
    }
}

impl Drop for VirtualOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mandatory_keys_include_all_three_buttons() {
        let mandatory = [Key::ButtonLeft, Key::ButtonRight, Key::ButtonMiddle];
        assert_eq!(mandatory.len(), 3);
    }

    #[test]
    fn max_copied_keys_is_small() {
        assert!(MAX_COPIED_KEYS <= 32);
    }
}
