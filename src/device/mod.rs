//! Hardware seams.
//!
//! The run loop talks to the board through these traits only; none of them
//! perform domain logic. ESP32 implementations live in [`esp`], and the
//! console works on any std platform.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::warn;

#[cfg(feature = "esp32")]
pub mod esp;

#[cfg(feature = "esp32")]
pub use esp::{restart, GpioLevelSensor, LedcIndicator};

/// The binary wet/dry sensor.
pub trait LevelSensor {
    /// Take a reading; `true` means liquid present.
    fn sample(&mut self) -> bool;
}

/// The status LEDs.
///
/// Brightness is 0-255 duty; the link LED is plain on/off.
pub trait Indicator {
    fn set_levels(&mut self, red: u8, green: u8);
    fn set_link(&mut self, on: bool);
}

/// Line-buffered serial console.
pub trait Console {
    /// A complete input line, without its terminator, if one has arrived.
    fn poll_line(&mut self) -> Option<String>;

    fn print_line(&mut self, line: &str);
}

/// Over-the-air update hook, polled while the WiFi link is up.
pub trait FirmwareUpdate {
    fn poll(&mut self);
}

/// No firmware update mechanism.
pub struct NullFirmwareUpdate;

impl FirmwareUpdate for NullFirmwareUpdate {
    fn poll(&mut self) {}
}

/// Console over stdin/stdout.
///
/// On ESP-IDF the standard streams are routed to the UART console, so the
/// same implementation serves device and host. A helper thread blocks on
/// stdin and hands complete lines over a channel, keeping `poll_line`
/// non-blocking for the run loop.
pub struct StdConsole {
    lines: Receiver<String>,
}

impl StdConsole {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("console-rx".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            warn!("Console reader unavailable: {}", e);
        }
        Self { lines: rx }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StdConsole {
    fn poll_line(&mut self) -> Option<String> {
        match self.lines.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    fn print_line(&mut self, line: &str) {
        println!("{}", line);
    }
}
