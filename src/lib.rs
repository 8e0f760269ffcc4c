//! Tank reporter ESP32 firmware library.
//!
//! Firmware for a WiFi-connected liquid-level sensor node: it samples a
//! binary wet/dry sensor, drives status LEDs, keeps its configuration in
//! non-volatile storage, maintains a WiFi/MQTT link, and answers a small
//! remote-command protocol over MQTT and the serial console.
//!
//! The core is platform-independent and tested on the host; everything
//! that touches ESP-IDF sits behind the `esp32` feature.

pub mod app;
pub mod command;
pub mod device;
pub mod net;
pub mod report;
pub mod settings;

/// Firmware version reported by the `version` command.
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used items
pub use app::{App, TickOutcome};
pub use net::{InboundMessage, LinkState, MqttSession, NetworkMonitor, WifiLink};
pub use settings::{Settings, SettingsStore};
