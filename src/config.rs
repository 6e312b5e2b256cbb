//! Configuration loading (§6 "Configuration file").
//!
//! Resolves `/etc/smooth_scroll/config.ini`, falling back to
//! `./config.ini`, and converts the raw `[Section] key=value` map into
//! a typed [`Config`]. Every optional key has a documented default,
//! assembled the way `beam-protocol::config` assembles its TOML
//! defaults -- one `default_*()` free function per key -- except the
//! source format here is `.ini`, read with the `ini` crate instead of
//! `serde`/`toml`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use ini::Ini;
use input_linux::Key;
use thiserror::Error;
use tracing::warn;

use crate::keys;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key: [{section}] {key}")]
    MissingKey { section: &'static str, key: &'static str },
    #[error("invalid value for [{section}] {key}: {value:?}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
    #[error("no config file found at /etc/smooth_scroll/config.ini or ./config.ini")]
    NotFound,
}

/// Engagement mode (§3 Configuration, `mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    OneKeyToggle,
    OneKeyMomentary,
    OnOff,
}

impl Mode {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ONE_KEY_TOGGLE" => Mode::OneKeyToggle,
            "ONE_KEY_MOMENTARY" => Mode::OneKeyMomentary,
            "ON_OFF" => Mode::OnOff,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub hotkey1: Key,
    pub hotkey2: Option<Key>,
    pub panic_button: Option<Key>,
    pub mode: Mode,
    pub hold_duration_ms: u64,

    pub sensitivity: f64,
    pub refresh_interval_ms: u64,
    pub smoothing_window_max_size: usize,

    pub snap_on_by_default: bool,
    pub snap_ratio: f64,
    pub snap_threshold: f64,

    pub acceleration_on: bool,
    pub acceleration_blend: f64,
    pub acceleration_scale: f64,

    /// Reserved for future use -- parsed but never acted upon (spec.md
    /// Open Questions).
    pub add_shift: bool,
    pub add_ctrl: bool,
    pub add_alt: bool,
}

fn default_sensitivity() -> f64 {
    1.0
}
fn default_refresh_interval_ms() -> u64 {
    15
}
fn default_smoothing_window_max_size() -> usize {
    4
}
fn default_snap_on_by_default() -> bool {
    false
}
fn default_snap_ratio() -> f64 {
    0.2
}
fn default_snap_threshold() -> f64 {
    10.0
}
fn default_acceleration_on() -> bool {
    false
}
fn default_acceleration_blend() -> f64 {
    1.0
}
fn default_acceleration_scale() -> f64 {
    1.0
}

/// Resolve the config file path, trying the system path before the
/// current-directory fallback, per §6.
pub fn resolve_path() -> Option<PathBuf> {
    let system = Path::new("/etc/smooth_scroll/config.ini");
    if system.is_file() {
        return Some(system.to_path_buf());
    }
    let local = Path::new("./config.ini");
    if local.is_file() {
        return Some(local.to_path_buf());
    }
    None
}

pub fn load() -> anyhow::Result<Config> {
    let path = resolve_path().ok_or(ConfigError::NotFound)?;
    load_from(&path).with_context(|| format!("failed to load config from {}", path.display()))
}

pub fn load_from(path: &Path) -> anyhow::Result<Config> {
    let ini = Ini::load_from_file(path)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    parse(&ini)
}

fn get<'a>(ini: &'a Ini, section: &str, key: &str) -> Option<&'a str> {
    ini.section(Some(section)).and_then(|s| s.get(key))
}

fn required<'a>(
    ini: &'a Ini,
    section: &'static str,
    key: &'static str,
) -> Result<&'a str, ConfigError> {
    get(ini, section, key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingKey { section, key })
}

fn parse_bool(
    ini: &Ini,
    section: &'static str,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(ini, section, key) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                section,
                key,
                value: v.to_string(),
            }),
        },
    }
}

fn parse_num<T: std::str::FromStr>(
    ini: &Ini,
    section: &'static str,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(ini, section, key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            section,
            key,
            value: v.to_string(),
        }),
    }
}

fn parse_required_num<T: std::str::FromStr>(
    ini: &Ini,
    section: &'static str,
    key: &'static str,
) -> Result<T, ConfigError> {
    let raw = required(ini, section, key)?;
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: raw.to_string(),
    })
}

/// Resolve an optional symbolic key name; unknown names are a warning,
/// not a failure (§6: "Unknown names produce no match (hotkey disabled
/// with warning)").
fn resolve_optional_key(ini: &Ini, section: &str, key: &str) -> Option<Key> {
    let raw = get(ini, section, key)?;
    if raw.is_empty() {
        return None;
    }
    match keys::lookup(raw) {
        Some(k) => Some(k),
        None => {
            warn!(section, key, name = raw, "unknown symbolic key name, hotkey disabled");
            None
        }
    }
}

fn parse(ini: &Ini) -> anyhow::Result<Config> {
    let hotkey1_raw = required(ini, "Hotkeys", "hotkey1")?;
    let hotkey1 = keys::lookup(hotkey1_raw).ok_or_else(|| ConfigError::InvalidValue {
        section: "Hotkeys",
        key: "hotkey1",
        value: hotkey1_raw.to_string(),
    })?;

    let mode_raw = required(ini, "Hotkeys", "mode")?;
    let mode = Mode::parse(mode_raw).ok_or_else(|| ConfigError::InvalidValue {
        section: "Hotkeys",
        key: "mode",
        value: mode_raw.to_string(),
    })?;

    let hold_duration_ms: u64 = parse_required_num(ini, "Hotkeys", "holdDuration")?;

    let hotkey2 = resolve_optional_key(ini, "Hotkeys", "hotkey2");
    let panic_button = resolve_optional_key(ini, "Hotkeys", "panicButton");

    let sensitivity = parse_num(ini, "Texture", "sensitivity", default_sensitivity())?;
    let refresh_interval_ms = parse_num(
        ini,
        "Texture",
        "refreshInterval",
        default_refresh_interval_ms(),
    )?;
    let smoothing_window_max_size = parse_num(
        ini,
        "Texture",
        "smoothingWindowMaxSize",
        default_smoothing_window_max_size(),
    )?;

    let snap_on_by_default = parse_bool(
        ini,
        "Axis Snapping",
        "snapOnByDefault",
        default_snap_on_by_default(),
    )?;
    let snap_ratio = parse_num(ini, "Axis Snapping", "snapRatio", default_snap_ratio())?;
    let snap_threshold = parse_num(
        ini,
        "Axis Snapping",
        "snapThreshold",
        default_snap_threshold(),
    )?;

    let acceleration_on = parse_bool(
        ini,
        "Acceleration",
        "accelerationOn",
        default_acceleration_on(),
    )?;
    let acceleration_blend = parse_num(
        ini,
        "Acceleration",
        "accelerationBlend",
        default_acceleration_blend(),
    )?;
    let acceleration_scale = parse_num(
        ini,
        "Acceleration",
        "accelerationScale",
        default_acceleration_scale(),
    )?;

    let add_shift = parse_bool(ini, "Modifier Emulation", "addShift", false)?;
    let add_ctrl = parse_bool(ini, "Modifier Emulation", "addCtrl", false)?;
    let add_alt = parse_bool(ini, "Modifier Emulation", "addAlt", false)?;

    if smoothing_window_max_size == 0 {
        anyhow::bail!(ConfigError::InvalidValue {
            section: "Texture",
            key: "smoothingWindowMaxSize",
            value: "0".to_string(),
        });
    }

    Ok(Config {
        hotkey1,
        hotkey2,
        panic_button,
        mode,
        hold_duration_ms,
        sensitivity,
        refresh_interval_ms,
        smoothing_window_max_size,
        snap_on_by_default,
        snap_ratio,
        snap_threshold,
        acceleration_on,
        acceleration_blend,
        acceleration_scale,
        add_shift,
        add_ctrl,
        add_alt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_sample(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.ini");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const MINIMAL: &str = "\
[Hotkeys]
hotkey1 = MButton
mode = ONE_KEY_MOMENTARY
holdDuration = 200
";

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = std::env::temp_dir();
        let path = write_sample(&dir, MINIMAL);
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.hotkey1, Key::ButtonMiddle);
        assert_eq!(cfg.mode, Mode::OneKeyMomentary);
        assert_eq!(cfg.hold_duration_ms, 200);
        assert_eq!(cfg.sensitivity, default_sensitivity());
        assert_eq!(cfg.smoothing_window_max_size, default_smoothing_window_max_size());
        assert!(!cfg.snap_on_by_default);
        assert!(!cfg.acceleration_on);
        assert_eq!(cfg.hotkey2, None);
        assert_eq!(cfg.panic_button, None);
    }

    #[test]
    fn missing_required_key_is_fatal() {
        let dir = std::env::temp_dir();
        let path = write_sample(&dir, "[Hotkeys]\nhotkey1 = MButton\n");
        let err = load_from(&path).unwrap_err();
        assert!(err.to_string().contains("mode") || format!("{err:#}").contains("mode"));
    }

    #[test]
    fn unknown_hotkey1_is_fatal() {
        let dir = std::env::temp_dir();
        let path = write_sample(
            &dir,
            "[Hotkeys]\nhotkey1 = NotAKey\nmode = ON_OFF\nholdDuration = 0\n",
        );
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn unknown_optional_hotkey_is_disabled_not_fatal() {
        let dir = std::env::temp_dir();
        let path = write_sample(
            &dir,
            "[Hotkeys]\nhotkey1 = MButton\nhotkey2 = NotAKey\nmode = ON_OFF\nholdDuration = 0\n",
        );
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.hotkey2, None);
    }

    #[test]
    fn full_config_parses_every_section() {
        let dir = std::env::temp_dir();
        let path = write_sample(
            &dir,
            "\
[Hotkeys]
hotkey1 = MButton
hotkey2 = F1
panicButton = esc
mode = ON_OFF
holdDuration = 300

[Texture]
sensitivity = 1.5
refreshInterval = 10
smoothingWindowMaxSize = 6

[Axis Snapping]
snapOnByDefault = true
snapRatio = 0.5
snapThreshold = 12.0

[Acceleration]
accelerationOn = true
accelerationBlend = 2.0
accelerationScale = 3.0

[Modifier Emulation]
addShift = true
addCtrl = false
addAlt = true
",
        );
        let cfg = load_from(&path).unwrap();
        assert_eq!(cfg.hotkey2, Some(Key::F1));
        assert_eq!(cfg.panic_button, Some(Key::Esc));
        assert_eq!(cfg.mode, Mode::OnOff);
        assert_eq!(cfg.sensitivity, 1.5);
        assert_eq!(cfg.refresh_interval_ms, 10);
        assert_eq!(cfg.smoothing_window_max_size, 6);
        assert!(cfg.snap_on_by_default);
        assert_eq!(cfg.snap_ratio, 0.5);
        assert_eq!(cfg.snap_threshold, 12.0);
        assert!(cfg.acceleration_on);
        assert!(cfg.add_shift);
        assert!(!cfg.add_ctrl);
        assert!(cfg.add_alt);
    }
}
