//! Persisted device settings.
//!
//! The settings record holds everything the reporter needs to reach its WiFi
//! network and MQTT broker, plus the report period and debug flag. It lives
//! in non-volatile storage as a single byte block and carries a sentinel
//! validity marker that is checked on every power-up.
//!
//! # Components
//!
//! - [`record`] - the settings record, its validity invariant and renderings
//! - [`store`] - load/save/reset over a byte-block storage abstraction
//! - [`nvs`] - NVS-backed storage (ESP32 only)

mod record;
mod store;

#[cfg(feature = "esp32")]
pub mod nvs;

pub use record::{
    RecordError, Settings, MAX_ADDRESS_LEN, MAX_CREDENTIAL_LEN, MAX_SSID_LEN, MAX_TOPIC_ROOT_LEN,
    VALID_SETTINGS_MARKER,
};
pub use store::{ConfigStorage, MemoryStorage, SettingsStore, StorageError, MAX_RECORD_BYTES};
