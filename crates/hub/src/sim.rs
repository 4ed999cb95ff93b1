//! Stateful soil moisture simulator for running the controller without
//! hardware.
//!
//! Readings use the 16-bit scale of the real sensor, where a higher value is
//! wetter soil. The model gives:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading ADC electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Diurnal (day/night) cycle
//! - Closed-loop watering response (moisture rises while the valve is open)

use std::fmt;
use waterer_engine::ADC_MAX;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and drifts toward dry, so the sensor trigger fires
    /// after a while.
    Drying,
    /// Hovers near the centre with little noise.
    Stable,
    /// Heavy noise and frequent spikes.
    Flaky,
    /// Starts near the wet end and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SoilMoistureSim {
    /// Current "true" soil moisture in ADC units. Evolves each sample.
    base: f64,

    // Calibration endpoints: bone-dry and saturated soil
    raw_dry: f64,
    raw_wet: f64,

    // Random walk parameters (ADC units per sample)
    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    center: f64,
    noise_sigma: f64,

    // Spike parameters
    spike_prob: f32,
    spike_sigma: f64,

    // Diurnal cycle
    diurnal_amplitude: f64,
    diurnal_period_s: f64,

    // Watering response
    watering: bool,
    wet_rate: f64,
}

impl SoilMoistureSim {
    /// `diurnal_period_s` controls the day/night cycle length. Use 600
    /// (10 min) for fast dev iteration or 86400 for real-time.
    pub fn new(scenario: Scenario, raw_dry: f64, raw_wet: f64, diurnal_period_s: f64) -> Self {
        let range = raw_wet - raw_dry;
        let center = (raw_dry + raw_wet) / 2.0;

        // All magnitudes as fractions of the calibrated range.
        let (drift, walk, mean_rev, noise, spike_prob, spike, start_frac) = match scenario {
            // start_frac: 0.0 = at raw_dry, 1.0 = at raw_wet
            Scenario::Drying => (0.001, 0.010, 0.02, 0.006, 0.03_f32, 0.14, 0.5),
            Scenario::Stable => (0.000_15, 0.004, 0.05, 0.003, 0.005, 0.07, 0.5),
            Scenario::Flaky => (0.000_7, 0.018, 0.02, 0.014, 0.10, 0.21, 0.5),
            Scenario::Wet => (0.000_2, 0.006, 0.02, 0.004, 0.02, 0.10, 0.8),
        };

        let start = raw_dry + start_frac * range + gaussian(0.0, range * 0.03);

        Self {
            base: start.clamp(raw_dry, raw_wet),
            raw_dry,
            raw_wet,
            drift_per_sample: -drift * range,
            walk_sigma: walk * range,
            mean_reversion: mean_rev,
            center,
            noise_sigma: noise * range,
            spike_prob,
            spike_sigma: spike * range,
            diurnal_amplitude: range * 0.06,
            diurnal_period_s,
            watering: false,
            wet_rate: range * 0.02,
        }
    }

    /// Inform the simulator whether the valve is currently open.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    /// Produce the next 16-bit reading. The underlying soil state evolves
    /// with each call.
    pub fn sample(&mut self) -> i64 {
        // -- Evolve the base value ----------------------------------------

        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        let wet = if self.watering { self.wet_rate } else { 0.0 };

        self.base = (self.base + self.drift_per_sample + pull + walk + wet)
            .clamp(self.raw_dry - 1500.0, self.raw_wet + 1500.0);

        // -- Build the instantaneous reading ------------------------------

        // Diurnal offset: sinusoidal, driest in the "afternoon".
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let phase = 2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s;
        let diurnal = -self.diurnal_amplitude * phase.sin();

        let noise = gaussian(0.0, self.noise_sigma);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let reading = self.base + diurnal + noise + spike;
        reading.round().clamp(0.0, ADC_MAX as f64) as i64
    }
}

// ===========================================================================
// Tests
// ===========================================================================
