//! Solenoid valve relay. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation only tracks and logs the state.

use anyhow::Result;
use tracing::info;
use waterer_engine::ValveCommand;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Real GPIO relay (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct Valve {
    pin: OutputPin,
    active_low: bool, // many relay boards are active-low
    open: bool,
}

#[cfg(feature = "gpio")]
impl Valve {
    pub(crate) fn new(gpio_pin: u8, active_low: bool) -> Result<Self> {
        let pin = Gpio::new()?.get(gpio_pin)?.into_output();
        let mut valve = Self {
            pin,
            active_low,
            open: true,
        };
        // Fail-safe: ensure closed at startup
        valve.apply(ValveCommand::Close);
        info!(gpio = gpio_pin, active_low, "valve relay initialised");
        Ok(valve)
    }

    pub(crate) fn apply(&mut self, cmd: ValveCommand) {
        let open = cmd == ValveCommand::Open;
        // active-low relay: LOW = open; active-high relay: HIGH = open
        if open != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        if open != self.open {
            info!(open, "valve set");
        }
        self.open = open;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}

// ---------------------------------------------------------------------------
// Mock relay (development, no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct Valve {
    open: bool,
}

#[cfg(not(feature = "gpio"))]
impl Valve {
    pub(crate) fn new(gpio_pin: u8, _active_low: bool) -> Result<Self> {
        info!(gpio = gpio_pin, "[mock-gpio] valve relay initialised (no hardware)");
        Ok(Self { open: false })
    }

    pub(crate) fn apply(&mut self, cmd: ValveCommand) {
        let open = cmd == ValveCommand::Open;
        if open != self.open {
            info!(open, "[mock-gpio] valve set");
        }
        self.open = open;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }
}

// ===========================================================================
// Tests
// ===========================================================================
