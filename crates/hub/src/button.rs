//! Manual pushbutton. Only the raw level is read here; press timing lives in
//! the engine's arbiter.

use anyhow::Result;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, InputPin};

#[cfg(feature = "gpio")]
pub(crate) struct Button {
    pin: InputPin,
}

#[cfg(feature = "gpio")]
impl Button {
    /// Button wired between the pin and 3V3, so the internal pull-down
    /// keeps it low when released.
    pub(crate) fn new(gpio_pin: u8) -> Result<Self> {
        let pin = Gpio::new()?.get(gpio_pin)?.into_input_pulldown();
        info!(gpio = gpio_pin, "button initialised");
        Ok(Self { pin })
    }

    pub(crate) fn is_down(&self) -> bool {
        self.pin.is_high()
    }
}

#[cfg(not(feature = "gpio"))]
pub(crate) struct Button {
    down: bool,
}

#[cfg(not(feature = "gpio"))]
impl Button {
    pub(crate) fn new(gpio_pin: u8) -> Result<Self> {
        info!(gpio = gpio_pin, "[mock-gpio] button initialised (never pressed)");
        Ok(Self { down: false })
    }

    pub(crate) fn is_down(&self) -> bool {
        self.down
    }

    #[cfg(test)]
    pub(crate) fn set_down(&mut self, down: bool) {
        self.down = down;
    }
}
