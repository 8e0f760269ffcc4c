//! ESP32 hardware drivers.
//!
//! The liquid sensor has an open-collector output, so its input pin is
//! pulled up and reads high when wet. The red/green warning LEDs take PWM
//! duty via LEDC; full brightness is deliberately never used.

use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_hal::ledc::{LedcDriver, LedcTimerDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_sys::EspError;

use super::{Indicator, LevelSensor};

/// Wet/dry sensor on a pulled-up GPIO input.
pub struct GpioLevelSensor<'d> {
    pin: PinDriver<'d, AnyIOPin, Input>,
}

impl<'d> GpioLevelSensor<'d> {
    pub fn new(pin: AnyIOPin) -> Result<Self, EspError> {
        let mut pin = PinDriver::input(pin)?;
        pin.set_pull(Pull::Up)?;
        Ok(Self { pin })
    }
}

impl LevelSensor for GpioLevelSensor<'_> {
    fn sample(&mut self) -> bool {
        self.pin.is_high()
    }
}

/// Status LEDs: PWM red and green channels plus the on/off link LED.
pub struct LedcIndicator<'d> {
    red: LedcDriver<'d>,
    green: LedcDriver<'d>,
    link: PinDriver<'d, AnyOutputPin, Output>,
}

impl<'d> LedcIndicator<'d> {
    pub fn new(
        timer: &LedcTimerDriver<'d>,
        red_channel: impl Peripheral<P = impl esp_idf_hal::ledc::LedcChannel> + 'd,
        red_pin: AnyOutputPin,
        green_channel: impl Peripheral<P = impl esp_idf_hal::ledc::LedcChannel> + 'd,
        green_pin: AnyOutputPin,
        link_pin: AnyOutputPin,
    ) -> Result<Self, EspError> {
        let red = LedcDriver::new(red_channel, timer, red_pin)?;
        let green = LedcDriver::new(green_channel, timer, green_pin)?;
        let link = PinDriver::output(link_pin)?;
        Ok(Self { red, green, link })
    }

    fn scale(driver: &LedcDriver<'_>, level: u8) -> u32 {
        driver.get_max_duty() * u32::from(level) / 255
    }
}

impl Indicator for LedcIndicator<'_> {
    fn set_levels(&mut self, red: u8, green: u8) {
        let red_duty = Self::scale(&self.red, red);
        let green_duty = Self::scale(&self.green, green);
        let _ = self.red.set_duty(red_duty);
        let _ = self.green.set_duty(green_duty);
    }

    fn set_link(&mut self, on: bool) {
        let result = if on {
            self.link.set_high()
        } else {
            self.link.set_low()
        };
        let _ = result;
    }
}

/// Restart the device. There is no graceful shutdown path.
pub fn restart() -> ! {
    esp_idf_hal::reset::restart()
}
