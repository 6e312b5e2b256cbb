//! Device enumeration and capability introspection (part of C5,
//! spec §4.5 step 1 and the capability-copy half of C1's construction,
//! spec §4.1).
//!
//! Reads `/proc/bus/input/devices`, the standard text-format dump of
//! every registered evdev device's capability bitmasks -- the same
//! convention tools like `evtest`/`libinput list-devices` rely on.
//! This sidesteps depending on `input-linux`'s capability-bit-query
//! ioctls directly (grab/read on a chosen device are still done
//! through `input_linux::EvdevHandle`; see `router.rs`).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use input_linux::{Key, RelativeAxis};

const REL_X: u32 = 0x00;
const REL_Y: u32 = 0x01;
const REL_HWHEEL: u32 = 0x06;
const REL_WHEEL: u32 = 0x08;
const REL_HWHEEL_HI_RES: u32 = 0x0c;
const REL_WHEEL_HI_RES: u32 = 0x0b;

/// One entry from `/proc/bus/input/devices`.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub handlers: Vec<String>,
    rel_bits: u64,
    key_bits: Vec<u64>,
}

impl DeviceInfo {
    /// Path of the `eventN` node this device exposes, if any.
    pub fn event_path(&self) -> Option<PathBuf> {
        self.handlers
            .iter()
            .find(|h| h.starts_with("event"))
            .map(|h| PathBuf::from("/dev/input").join(h))
    }

    pub fn has_handler_containing(&self, needle: &str) -> bool {
        self.handlers.iter().any(|h| h.contains(needle))
    }

    fn rel_bit(&self, bit: u32) -> bool {
        (self.rel_bits >> bit) & 1 == 1
    }

    /// §4.5 step 1: "advertises relative X/Y".
    pub fn has_relative_xy(&self) -> bool {
        self.rel_bit(REL_X) && self.rel_bit(REL_Y)
    }

    fn key_bit(&self, code: u16) -> bool {
        let word = code as usize / 64;
        let bit = code as usize % 64;
        self.key_bits.get(word).map(|w| (w >> bit) & 1 == 1).unwrap_or(false)
    }

    /// Relative axes this device advertises, restricted to the ones
    /// the virtual output cares about replaying (§4.1 construction:
    /// "copies the real device's capability set for relative axes").
    pub fn relative_axes(&self) -> Vec<RelativeAxis> {
        let candidates = [
            (REL_X, RelativeAxis::X),
            (REL_Y, RelativeAxis::Y),
            (REL_WHEEL, RelativeAxis::Wheel),
            (REL_HWHEEL, RelativeAxis::HorizontalWheel),
            (REL_WHEEL_HI_RES, RelativeAxis::WheelHiRes),
            (REL_HWHEEL_HI_RES, RelativeAxis::HorizontalWheelHiRes),
        ];
        candidates
            .into_iter()
            .filter(|(bit, _)| self.rel_bit(*bit))
            .map(|(_, axis)| axis)
            .collect()
    }

    /// Key codes this device advertises, decoded from the `KEY=`
    /// bitmask and capped at `max` entries (§4.1: "capped... to avoid
    /// oversaturation").
    pub fn key_codes(&self, max: usize) -> Vec<Key> {
        let mut out = Vec::with_capacity(max);
        for code in 1u16..=767 {
            if out.len() >= max {
                break;
            }
            if self.key_bit(code) {
                if let Ok(key) = Key::from_code(code) {
                    out.push(key);
                }
            }
        }
        out
    }
}

/// Parse a `B: NAME=<hex words>` bitmask line into a little-word-first
/// `u64` vector (`words[0]` holds bits 0-63).
fn parse_bitmask(value: &str) -> Vec<u64> {
    let mut words: Vec<u64> = value
        .split_whitespace()
        .map(|w| u64::from_str_radix(w, 16).unwrap_or(0))
        .collect();
    words.reverse();
    words
}

fn parse_devices_blob(blob: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    let mut name = String::new();
    let mut handlers: Vec<String> = Vec::new();
    let mut bits: HashMap<&'static str, Vec<u64>> = HashMap::new();

    let flush = |name: &mut String,
                 handlers: &mut Vec<String>,
                 bits: &mut HashMap<&'static str, Vec<u64>>,
                 devices: &mut Vec<DeviceInfo>| {
        if name.is_empty() && handlers.is_empty() {
            return;
        }
        let rel_bits = bits.get("REL").and_then(|w| w.first()).copied().unwrap_or(0);
        let key_bits = bits.remove("KEY").unwrap_or_default();
        devices.push(DeviceInfo {
            name: std::mem::take(name),
            handlers: std::mem::take(handlers),
            rel_bits,
            key_bits,
        });
        bits.clear();
    };

    for line in blob.lines() {
        if line.is_empty() {
            flush(&mut name, &mut handlers, &mut bits, &mut devices);
            continue;
        }
        if let Some(rest) = line.strip_prefix("N: Name=") {
            name = rest.trim_matches('"').to_string();
        } else if let Some(rest) = line.strip_prefix("H: Handlers=") {
            handlers = rest.split_whitespace().map(|s| s.to_string()).collect();
        } else if let Some(rest) = line.strip_prefix("B: ") {
            if let Some((key, value)) = rest.split_once('=') {
                let key: &'static str = match key {
                    "REL" => "REL",
                    "KEY" => "KEY",
                    _ => continue,
                };
                bits.insert(key, parse_bitmask(value));
            }
        }
    }
    flush(&mut name, &mut handlers, &mut bits, &mut devices);
    devices
}

pub fn enumerate() -> anyhow::Result<Vec<DeviceInfo>> {
    let blob = fs::read_to_string("/proc/bus/input/devices")?;
    Ok(parse_devices_blob(&blob))
}

/// Exposed so other modules' tests can build a `DeviceInfo` without a
/// real `/proc/bus/input/devices` to read from.
#[cfg(test)]
pub(crate) fn enumerate_blob_for_test(blob: &str) -> Vec<DeviceInfo> {
    parse_devices_blob(blob)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
I: Bus=0003 Vendor=046d Product=c52b Version=0111
N: Name=\"Logitech USB Mouse\"
P: Phys=usb-0000:00:14.0-2/input2
S: Sysfs=/devices/pci0000:00/input10
U: Uniq=
H: Handlers=sysrq kbd mouse0 event5
B: PROP=0
B: EV=17
B: KEY=70000 0 0 0 0 0 0 0 0 0 0 0 0 0 0ff800000000 0 0
B: REL=143
B: MSC=10

I: Bus=0019 Vendor=0000 Product=0005 Version=0000
N: Name=\"Power Button\"
P: Phys=PNP0C0C/button/input0
S: Sysfs=/devices/LNXSYSTM/input5
U: Uniq=
H: Handlers=kbd event2
B: PROP=0
B: EV=3
B: KEY=100000 0 0 0
";

    #[test]
    fn parses_multiple_devices() {
        let devices = parse_devices_blob(SAMPLE);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Logitech USB Mouse");
        assert_eq!(devices[1].name, "Power Button");
    }

    #[test]
    fn mouse_device_reports_relative_xy() {
        let devices = parse_devices_blob(SAMPLE);
        assert!(devices[0].has_relative_xy());
        assert!(!devices[1].has_relative_xy());
    }

    #[test]
    fn event_path_extracted_from_handlers() {
        let devices = parse_devices_blob(SAMPLE);
        assert_eq!(devices[0].event_path(), Some(PathBuf::from("/dev/input/event5")));
    }

    #[test]
    fn key_codes_respect_cap() {
        let devices = parse_devices_blob(SAMPLE);
        let codes = devices[0].key_codes(3);
        assert!(codes.len() <= 3);
    }
}
