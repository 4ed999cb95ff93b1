//! Soil moisture source. With the `gpio` feature the sensor is read through an
//! MCP3008 10-bit ADC over SPI; otherwise the soil simulator stands in.
//! Either way readings come out on the 16-bit scale the engine expects.

use anyhow::Result;
use tracing::info;

use crate::settings::ControllerSettings;

#[cfg(feature = "gpio")]
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

#[cfg(not(feature = "gpio"))]
use crate::sim::{Scenario, SoilMoistureSim};

// ── MCP3008 framing ─────────────────────────────────────────────────────────
//
// One transfer of three bytes:
//   tx: [start bit] [SGL=1, D2..D0 = channel, pad] [don't care]
//   rx: [ignored]   [.. B9 B8]                     [B7..B0]

/// SPI clock for the MCP3008 at 3.3 V.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
const SPI_CLOCK_HZ: u32 = 1_000_000;

#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
fn mcp3008_request(channel: u8) -> [u8; 3] {
    [0x01, 0x80 | ((channel & 0x07) << 4), 0x00]
}

/// Pull the 10-bit sample out of the response and widen it to 16 bits.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
fn mcp3008_decode(rx: [u8; 3]) -> i64 {
    let raw10 = (u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]);
    i64::from(raw10) << 6
}

// ---------------------------------------------------------------------------
// Real sensor (MCP3008 on SPI0 / CE0)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct MoistureSensor {
    spi: Spi,
    channel: u8,
}

#[cfg(feature = "gpio")]
impl MoistureSensor {
    pub(crate) fn open(controller: &ControllerSettings) -> Result<Self> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, SPI_CLOCK_HZ, Mode::Mode0)?;
        let channel = controller.adc_channel as u8;
        info!(channel, "mcp3008 initialised");
        Ok(Self { spi, channel })
    }

    pub(crate) fn read(&mut self) -> Result<i64> {
        let tx = mcp3008_request(self.channel);
        let mut rx = [0u8; 3];
        self.spi.transfer(&mut rx, &tx)?;
        Ok(mcp3008_decode(rx))
    }

    /// The real soil needs no hint.
    pub(crate) fn set_watering(&mut self, _active: bool) {}
}

// ---------------------------------------------------------------------------
// Simulated sensor (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct MoistureSensor {
    sim: SoilMoistureSim,
}

#[cfg(not(feature = "gpio"))]
impl MoistureSensor {
    pub(crate) fn open(controller: &ControllerSettings) -> Result<Self> {
        let scenario = Scenario::from_str_lossy(&std::env::var("SIM_SCENARIO").unwrap_or_default());
        info!(
            %scenario,
            channel = controller.adc_channel,
            "[mock-gpio] simulated moisture sensor"
        );
        Ok(Self {
            sim: SoilMoistureSim::new(scenario, 12000.0, 52000.0, 600.0),
        })
    }

    pub(crate) fn read(&mut self) -> Result<i64> {
        Ok(self.sim.sample())
    }

    pub(crate) fn set_watering(&mut self, active: bool) {
        self.sim.set_watering(active);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
