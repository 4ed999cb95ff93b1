//! TOML settings file: the watering configuration plus controller wiring.
//! Loaded and validated at startup, written back when the watering
//! configuration is changed through the web API.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use waterer_engine::WateringConfig;

// ---------------------------------------------------------------------------
// Settings file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub watering: WateringConfig,
    #[serde(default)]
    pub controller: ControllerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Control-loop period.
    pub tick_ms: i64,
    /// Minimum hold for a button press to start watering.
    pub long_press_sec: i64,
    pub relay_pin: i64,
    pub button_pin: i64,
    /// Many relay boards are active-low; the default wiring is active-high.
    pub relay_active_low: bool,
    /// MCP3008 input the moisture sensor is wired to.
    pub adc_channel: i64,
    /// Fixed offset from UTC for the schedule, applied all year. When unset
    /// the system time zone is followed, daylight saving included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset_min: Option<i64>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tick_ms: 750,
            long_press_sec: 3,
            relay_pin: 18,
            button_pin: 23,
            relay_active_low: false,
            adc_channel: 0,
            utc_offset_min: None,
        }
    }
}

impl ControllerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1) as u64)
    }

    pub fn long_press(&self) -> Duration {
        Duration::from_secs(self.long_press_sec.max(0) as u64)
    }
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// MCP3008 has eight single-ended inputs.
const MCP3008_MAX_CHANNEL: i64 = 7;

/// Largest offset accepted for `utc_offset_min` (18 hours).
const MAX_UTC_OFFSET_MIN: i64 = 18 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Settings {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = self
            .watering
            .problems()
            .into_iter()
            .map(|e| format!("watering: {e}"))
            .collect();

        self.validate_controller(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "settings validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;

        if c.tick_ms <= 0 {
            errors.push(format!("controller: tick_ms must be positive, got {}", c.tick_ms));
        }
        if c.long_press_sec <= 0 {
            errors.push(format!(
                "controller: long_press_sec must be positive, got {}",
                c.long_press_sec
            ));
        }

        for (name, pin) in [("relay_pin", c.relay_pin), ("button_pin", c.button_pin)] {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "controller: {name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            }
        }
        if c.relay_pin == c.button_pin {
            errors.push(format!(
                "controller: relay_pin and button_pin are both {}",
                c.relay_pin
            ));
        }

        if !(0..=MCP3008_MAX_CHANNEL).contains(&c.adc_channel) {
            errors.push(format!(
                "controller: adc_channel {} out of MCP3008 range [0, {MCP3008_MAX_CHANNEL}]",
                c.adc_channel
            ));
        }

        if let Some(off) = c.utc_offset_min {
            if off.abs() > MAX_UTC_OFFSET_MIN {
                errors.push(format!(
                    "controller: utc_offset_min {off} exceeds ±{MAX_UTC_OFFSET_MIN}"
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + save
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML settings file.
pub fn load(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings: {}", path.display()))?;
    let settings: Settings = toml::from_str(&contents)
        .with_context(|| format!("failed to parse settings: {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings: {}", path.display()))?;
    Ok(settings)
}

/// Write the settings back, replacing the file in one rename so a crash
/// mid-write never leaves a truncated file behind.
pub fn save(path: impl AsRef<Path>, settings: &Settings) -> Result<()> {
    let path = path.as_ref();
    let contents = toml::to_string_pretty(settings).context("failed to serialize settings")?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write settings: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace settings: {}", path.display()))?;

    tracing::info!(path = %path.display(), "settings saved");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
