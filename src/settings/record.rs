//! The persisted settings record.
//!
//! All fields are stored together in one byte block, in declaration order,
//! preceded by the validity marker. The marker is the only thing consulted
//! when deciding whether a loaded record is usable; completeness is never
//! re-derived at load time.

use std::fmt;

use rand_core::{OsRng, RngCore};
use serde::Serialize;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sentinel written to storage when the record is complete.
pub const VALID_SETTINGS_MARKER: u16 = 0xDAB0;

/// Root of the generated MQTT client id; a random hex suffix is appended
/// once and then persisted so the id stays stable across reboots.
pub const CLIENT_ID_ROOT: &str = "tankReporter";

/// Default MQTT broker port.
const DEFAULT_BROKER_PORT: u16 = 1883;

// Per-field value ceilings, enforced by the command interpreter. They keep
// a complete record well inside the storage read buffer, so a record saved
// as valid always loads back as valid.
pub const MAX_SSID_LEN: usize = 100;
pub const MAX_CREDENTIAL_LEN: usize = 50;
pub const MAX_ADDRESS_LEN: usize = 30;
pub const MAX_TOPIC_ROOT_LEN: usize = 150;

/// Device settings persisted in non-volatile storage.
///
/// Credentials are zeroed on drop.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Settings {
    pub ssid: String,
    pub wifi_password: String,
    pub broker_address: String,
    pub broker_port: u16,
    pub mqtt_username: String,
    pub mqtt_password: String,
    topic_root: String,
    pub client_id: String,
    pub debug: bool,
    pub report_period_secs: u32,
    pub static_address: String,
    pub netmask: String,
    pub gateway: String,
    pub dns: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            wifi_password: String::new(),
            broker_address: String::new(),
            broker_port: DEFAULT_BROKER_PORT,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            topic_root: String::new(),
            client_id: String::new(),
            debug: false,
            report_period_secs: 0,
            static_address: String::new(),
            netmask: String::new(),
            gateway: String::new(),
            dns: String::new(),
        }
    }
}

impl Settings {
    /// Factory-default settings with a freshly generated client id.
    pub fn factory_defaults() -> Self {
        // ZeroizeOnDrop implements Drop, which rules out functional update
        // over default().
        let mut settings = Self::default();
        settings.client_id = generate_client_id();
        settings
    }

    /// True when every required field is populated.
    ///
    /// If a static address is set, netmask and gateway must be set too;
    /// DNS stays optional.
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty()
            && !self.wifi_password.is_empty()
            && !self.broker_address.is_empty()
            && self.broker_port != 0
            && !self.topic_root.is_empty()
            && !self.client_id.is_empty()
            && self.report_period_secs > 0
            && (self.static_address.is_empty()
                || (!self.netmask.is_empty() && !self.gateway.is_empty()))
    }

    /// The MQTT topic prefix under which all device topics live.
    ///
    /// Always ends in `/` once set.
    pub fn topic_root(&self) -> &str {
        &self.topic_root
    }

    /// Set the topic root, normalizing it to end in a `/`.
    pub fn set_topic_root(&mut self, root: &str) {
        self.topic_root = normalize_topic_root(root);
    }

    /// Build a full topic from the topic root and a suffix.
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.topic_root, suffix)
    }

    /// The topic this device listens on for inbound commands.
    pub fn command_topic(&self) -> String {
        self.topic(crate::net::TOPIC_COMMAND)
    }

    /// Human-readable listing of every settable field with its current value.
    ///
    /// Printed on the serial console whenever a command fails to parse, so
    /// it doubles as the help text.
    pub fn listing(&self, valid: bool) -> String {
        let mut out = String::new();
        let mut line = |name: &str, hint: &str, current: &str| {
            out.push_str(&format!("{}=<{}> ({})\n", name, hint, current));
        };
        line("broker", "MQTT broker host name or address", &self.broker_address);
        line("port", "port number", &self.broker_port.to_string());
        line("topicroot", "topic root", &self.topic_root);
        line("user", "mqtt user", &self.mqtt_username);
        line("pass", "mqtt password", &self.mqtt_password);
        line("ssid", "wifi ssid", &self.ssid);
        line("wifipass", "wifi password", &self.wifi_password);
        line("debug", "1|0", if self.debug { "1" } else { "0" });
        line(
            "reportperiod",
            "seconds between reports",
            &self.report_period_secs.to_string(),
        );
        line("staticaddress", "IP address", &self.static_address);
        line("netmask", "network IP mask", &self.netmask);
        line("gateway", "gateway IP address", &self.gateway);
        line("dns", "DNS IP address", &self.dns);
        out.push_str(&format!("MQTT Client ID is {}\n", self.client_id));
        out.push_str(&format!(
            "Settings are{} valid.\n",
            if valid { "" } else { " not" }
        ));
        out.push_str("\n*** Use \"factorydefaults=yes\" to reset all settings ***\n");
        out
    }

    /// Render the settings as the single-line JSON object served in reply
    /// to the `settings` command.
    ///
    /// Key order is fixed by the view struct below; `localIP` reflects the
    /// current network address and is not part of the persisted record.
    pub fn json_view(&self, local_ip: &str) -> serde_json::Result<String> {
        serde_json::to_string(&SettingsView {
            broker: &self.broker_address,
            port: self.broker_port,
            topicroot: &self.topic_root,
            user: &self.mqtt_username,
            pass: &self.mqtt_password,
            ssid: &self.ssid,
            wifipass: &self.wifi_password,
            mqtt_client_id: &self.client_id,
            report_period: self.report_period_secs.to_string(),
            staticaddress: &self.static_address,
            netmask: &self.netmask,
            gateway: &self.gateway,
            dns: &self.dns,
            debug: if self.debug { "true" } else { "false" },
            local_ip,
        })
    }

    /// Serialize to the storage byte block.
    ///
    /// Layout: `[marker:2]` then each field in declaration order, strings
    /// length-prefixed (u16 LE), port as u16 LE, debug as one byte, report
    /// period as u32 LE.
    pub fn to_bytes(&self, valid: bool) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        let marker = if valid { VALID_SETTINGS_MARKER } else { 0 };
        bytes.extend_from_slice(&marker.to_le_bytes());
        put_str(&mut bytes, &self.ssid);
        put_str(&mut bytes, &self.wifi_password);
        put_str(&mut bytes, &self.broker_address);
        bytes.extend_from_slice(&self.broker_port.to_le_bytes());
        put_str(&mut bytes, &self.mqtt_username);
        put_str(&mut bytes, &self.mqtt_password);
        put_str(&mut bytes, &self.topic_root);
        put_str(&mut bytes, &self.client_id);
        bytes.push(self.debug as u8);
        bytes.extend_from_slice(&self.report_period_secs.to_le_bytes());
        put_str(&mut bytes, &self.static_address);
        put_str(&mut bytes, &self.netmask);
        put_str(&mut bytes, &self.gateway);
        put_str(&mut bytes, &self.dns);
        bytes
    }

    /// Deserialize a storage byte block.
    ///
    /// Returns the record and whether the validity marker matched the
    /// sentinel. Garbage data yields an error the caller treats as
    /// "unconfigured", never as fatal.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, bool), RecordError> {
        let mut r = Reader { bytes, pos: 0 };
        let marker = r.u16()?;
        let settings = Settings {
            ssid: r.string()?,
            wifi_password: r.string()?,
            broker_address: r.string()?,
            broker_port: r.u16()?,
            mqtt_username: r.string()?,
            mqtt_password: r.string()?,
            topic_root: r.string()?,
            client_id: r.string()?,
            debug: r.u8()? != 0,
            report_period_secs: r.u32()?,
            static_address: r.string()?,
            netmask: r.string()?,
            gateway: r.string()?,
            dns: r.string()?,
        };
        Ok((settings, marker == VALID_SETTINGS_MARKER))
    }
}

/// JSON view over [`Settings`]; field order here is the wire order.
#[derive(Serialize)]
struct SettingsView<'a> {
    broker: &'a str,
    port: u16,
    topicroot: &'a str,
    user: &'a str,
    pass: &'a str,
    ssid: &'a str,
    wifipass: &'a str,
    #[serde(rename = "mqttClientId")]
    mqtt_client_id: &'a str,
    #[serde(rename = "reportPeriod")]
    report_period: String,
    staticaddress: &'a str,
    netmask: &'a str,
    gateway: &'a str,
    dns: &'a str,
    debug: &'a str,
    #[serde(rename = "localIP")]
    local_ip: &'a str,
}

/// Normalize a topic root so it always ends in a path separator.
///
/// Idempotent: an already-normalized root passes through unchanged.
pub fn normalize_topic_root(root: &str) -> String {
    if root.is_empty() || root.ends_with('/') {
        root.to_string()
    } else {
        format!("{}/", root)
    }
}

/// Generate a new MQTT client id: fixed root plus a random hex suffix.
///
/// Uses `OsRng`, which on ESP32 is backed by the hardware RNG.
pub fn generate_client_id() -> String {
    let mut suffix = [0u8; 2];
    OsRng.fill_bytes(&mut suffix);
    format!("{}{:04x}", CLIENT_ID_ROOT, u16::from_be_bytes(suffix))
}

fn put_str(bytes: &mut Vec<u8>, s: &str) {
    let len = s.len().min(u16::MAX as usize) as u16;
    bytes.extend_from_slice(&len.to_le_bytes());
    bytes.extend_from_slice(&s.as_bytes()[..len as usize]);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], RecordError> {
        if self.pos + n > self.bytes.len() {
            return Err(RecordError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, RecordError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, RecordError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, RecordError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, RecordError> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| RecordError::InvalidUtf8)
    }
}

/// Errors decoding a stored settings record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The byte block ends before the record does.
    Truncated,
    /// A string field holds invalid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "stored record is truncated"),
            Self::InvalidUtf8 => write!(f, "stored record holds invalid UTF-8"),
        }
    }
}

impl std::error::Error for RecordError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_settings() -> Settings {
        let mut s = Settings::default();
        s.ssid = "Net".into();
        s.wifi_password = "pw".into();
        s.broker_address = "10.0.0.5".into();
        s.broker_port = 1883;
        s.client_id = "tankReporter1a2b".into();
        s.report_period_secs = 60;
        s.set_topic_root("tank/");
        s
    }

    #[test]
    fn test_complete_settings_are_complete() {
        assert!(complete_settings().is_complete());
    }

    #[test]
    fn test_each_required_field_gates_completeness() {
        let cases: &[fn(&mut Settings)] = &[
            |s| s.ssid.clear(),
            |s| s.wifi_password.clear(),
            |s| s.broker_address.clear(),
            |s| s.broker_port = 0,
            |s| s.set_topic_root(""),
            |s| s.client_id.clear(),
            |s| s.report_period_secs = 0,
        ];
        for clear in cases {
            let mut s = complete_settings();
            clear(&mut s);
            assert!(!s.is_complete());
        }
    }

    #[test]
    fn test_static_address_requires_netmask_and_gateway() {
        let mut s = complete_settings();
        s.static_address = "192.168.1.50".into();
        assert!(!s.is_complete());

        s.netmask = "255.255.255.0".into();
        assert!(!s.is_complete());

        s.gateway = "192.168.1.1".into();
        assert!(s.is_complete(), "DNS must stay optional");
    }

    #[test]
    fn test_topic_root_normalization_appends_separator() {
        assert_eq!(normalize_topic_root("tank"), "tank/");
        assert_eq!(normalize_topic_root("tank/"), "tank/");
    }

    #[test]
    fn test_topic_root_normalization_is_idempotent() {
        let once = normalize_topic_root("home/tank");
        let twice = normalize_topic_root(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_command_topic() {
        let s = complete_settings();
        assert_eq!(s.command_topic(), "tank/command");
    }

    #[test]
    fn test_factory_defaults_carry_a_client_id() {
        let s = Settings::factory_defaults();
        assert!(s.client_id.starts_with(CLIENT_ID_ROOT));
        assert!(!s.is_complete());
    }

    #[test]
    fn test_client_id_root_and_uniqueness() {
        let id = generate_client_id();
        assert!(id.starts_with(CLIENT_ID_ROOT));
        assert_eq!(id.len(), CLIENT_ID_ROOT.len() + 4);
        // Two generations colliding is possible but vanishingly unlikely to
        // happen repeatedly.
        let distinct = (0..8).any(|_| generate_client_id() != id);
        assert!(distinct);
    }

    #[test]
    fn test_bytes_roundtrip_preserves_record_and_verdict() {
        let s = complete_settings();
        for valid in [true, false] {
            let (restored, restored_valid) = Settings::from_bytes(&s.to_bytes(valid)).unwrap();
            assert_eq!(restored, s);
            assert_eq!(restored_valid, valid);
        }
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert_eq!(Settings::from_bytes(&[]), Err(RecordError::Truncated));
        assert_eq!(
            Settings::from_bytes(&[0xB0, 0xDA, 0xFF, 0xFF, 1, 2]),
            Err(RecordError::Truncated)
        );
    }

    #[test]
    fn test_json_view_fixed_key_order() {
        let s = complete_settings();
        let json = s.json_view("192.168.1.77").unwrap();
        assert_eq!(
            json,
            "{\"broker\":\"10.0.0.5\",\"port\":1883,\"topicroot\":\"tank/\",\
             \"user\":\"\",\"pass\":\"\",\"ssid\":\"Net\",\"wifipass\":\"pw\",\
             \"mqttClientId\":\"tankReporter1a2b\",\"reportPeriod\":\"60\",\
             \"staticaddress\":\"\",\"netmask\":\"\",\"gateway\":\"\",\"dns\":\"\",\
             \"debug\":\"false\",\"localIP\":\"192.168.1.77\"}"
        );
    }

    #[test]
    fn test_listing_shows_values_and_validity() {
        let s = complete_settings();
        let listing = s.listing(true);
        assert!(listing.contains("broker=<MQTT broker host name or address> (10.0.0.5)"));
        assert!(listing.contains("reportperiod=<seconds between reports> (60)"));
        assert!(listing.contains("Settings are valid."));
        assert!(s.listing(false).contains("Settings are not valid."));
        assert!(listing.contains("factorydefaults=yes"));
    }
}
