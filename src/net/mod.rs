//! WiFi association and MQTT session management.
//!
//! The link is driven as an explicit five-state machine. WiFi association
//! gates the MQTT session, and the session gates publish/subscribe; the
//! underlying drivers sit behind the [`WifiLink`] and [`MqttSession`] traits
//! so the machine is testable on the host.
//!
//! Two scheduling contracts matter to callers:
//!
//! - [`NetworkMonitor::tick`] runs one reconnection step and is invoked on
//!   the reporting schedule.
//! - [`NetworkMonitor::poll_session`] must run every loop iteration while a
//!   session exists, or inbound deliveries are silently missed.

use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::settings::Settings;

#[cfg(feature = "esp32")]
pub mod mqtt;
#[cfg(feature = "esp32")]
pub mod wifi;

#[cfg(feature = "esp32")]
pub use mqtt::EspMqttSession;
#[cfg(feature = "esp32")]
pub use wifi::EspWifiLink;

/// Retained sub-topic carrying the raw reading as `0`/`1`.
pub const TOPIC_READING: &str = "value";
/// Retained sub-topic carrying the derived level label.
pub const TOPIC_LEVEL: &str = "level";
/// Sub-topic the device subscribes to for inbound commands.
pub const TOPIC_COMMAND: &str = "command";

/// Level label published when liquid is present.
pub const PAYLOAD_WET: &str = "wet";
/// Level label published when the sensor runs dry.
pub const PAYLOAD_DRY: &str = "dry";

/// Association attempts before the current try is abandoned and the cached
/// SSID-availability verdict is discarded.
pub const MAX_ASSOCIATION_ATTEMPTS: u32 = 100;

/// Pacing delay between ticks spent associating. Bounds the worst-case
/// stall at `MAX_ASSOCIATION_ATTEMPTS` times this delay.
pub const ASSOCIATION_ATTEMPT_DELAY: Duration = Duration::from_millis(500);

/// MQTT message buffer size; must exceed the largest JSON settings response.
pub const MQTT_BUFFER_SIZE: usize = 512;

/// An inbound MQTT message drained from the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// WiFi link driver seam.
///
/// The link layer is the source of truth for "associated"; the state
/// machine never caches that verdict across ticks.
pub trait WifiLink {
    fn is_associated(&self) -> bool;

    /// Scan once and report whether `ssid` is currently visible.
    fn scan_for(&mut self, ssid: &str) -> Result<bool, NetError>;

    /// Start associating with the configured network. Static addressing
    /// from the settings is applied before association when present.
    /// Returns without waiting for the association to complete.
    fn begin_association(&mut self, settings: &Settings) -> Result<(), NetError>;

    /// Current local address, when associated.
    fn local_ip(&self) -> Option<String>;
}

/// MQTT session driver seam.
pub trait MqttSession {
    /// Open a session using the broker address, port, and credentials from
    /// the settings. A previously failed session is replaced.
    fn connect(&mut self, settings: &Settings) -> Result<(), NetError>;

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), NetError>;

    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), NetError>;

    /// Service the session and drain any inbound deliveries.
    fn service(&mut self) -> Vec<InboundMessage>;
}

/// Link machine states, from no WiFi through a live MQTT session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No WiFi association and no attempt underway.
    Disassociated,
    /// Checking whether the target SSID is visible.
    Scanning,
    /// Association started, waiting for confirmation.
    Associating,
    /// WiFi is up but no MQTT session exists yet.
    AssociatedNoSession,
    /// MQTT session open; publish and subscribe are live.
    SessionReady,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disassociated => "disassociated",
            Self::Scanning => "scanning",
            Self::Associating => "associating",
            Self::AssociatedNoSession => "associated, no session",
            Self::SessionReady => "session ready",
        };
        write!(f, "{}", name)
    }
}

/// Drives WiFi association and the MQTT session on top of it.
///
/// All state here is transient and resets with the process; nothing is
/// persisted.
pub struct NetworkMonitor {
    state: LinkState,
    /// Sticky once a scan has seen the target SSID, so repeated ticks do
    /// not rescan. Cleared when an association attempt is abandoned.
    ssid_available: bool,
    attempts: u32,
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disassociated,
            ssid_available: false,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn ssid_available(&self) -> bool {
        self.ssid_available
    }

    /// Run one reconnection step.
    ///
    /// Does nothing while the configuration is invalid. MQTT connect
    /// failures are logged and retried on the next tick indefinitely;
    /// only association attempts carry a ceiling.
    pub fn tick<W: WifiLink, M: MqttSession>(
        &mut self,
        wifi: &mut W,
        mqtt: &mut M,
        settings: &Settings,
        settings_valid: bool,
    ) {
        if !settings_valid {
            self.state = LinkState::Disassociated;
            return;
        }

        if !wifi.is_associated() {
            self.tick_association(wifi, settings);
            return;
        }

        if matches!(
            self.state,
            LinkState::Disassociated | LinkState::Scanning | LinkState::Associating
        ) {
            info!(
                "WiFi associated{}",
                wifi.local_ip()
                    .map(|ip| format!(" with address {}", ip))
                    .unwrap_or_default()
            );
            self.attempts = 0;
            self.state = LinkState::AssociatedNoSession;
        }

        match self.state {
            LinkState::AssociatedNoSession => self.open_session(mqtt, settings),
            LinkState::SessionReady => {
                if !mqtt.is_connected() {
                    warn!("MQTT session lost");
                    self.state = LinkState::AssociatedNoSession;
                }
            }
            _ => {}
        }
    }

    /// Service the session and drain inbound messages.
    ///
    /// Must run every loop iteration; a session that reports disconnected
    /// falls back so the next tick reconnects.
    pub fn poll_session<M: MqttSession>(&mut self, mqtt: &mut M) -> Vec<InboundMessage> {
        if self.state != LinkState::SessionReady {
            return Vec::new();
        }
        let inbound = mqtt.service();
        if !mqtt.is_connected() {
            warn!("MQTT session lost");
            self.state = LinkState::AssociatedNoSession;
        }
        inbound
    }

    fn tick_association<W: WifiLink>(&mut self, wifi: &mut W, settings: &Settings) {
        match self.state {
            LinkState::AssociatedNoSession | LinkState::SessionReady => {
                warn!("WiFi association lost");
                self.state = LinkState::Disassociated;
            }
            LinkState::Disassociated | LinkState::Scanning => {
                self.state = LinkState::Scanning;
                if self.target_visible(wifi, settings) {
                    self.begin(wifi, settings);
                } else {
                    self.state = LinkState::Disassociated;
                }
            }
            LinkState::Associating => {
                self.attempts += 1;
                if self.attempts >= MAX_ASSOCIATION_ATTEMPTS {
                    warn!(
                        "Timeout trying to associate with \"{}\" after {} attempts",
                        settings.ssid, self.attempts
                    );
                    self.attempts = 0;
                    // Force a fresh scan on the next try.
                    self.ssid_available = false;
                    self.state = LinkState::Disassociated;
                } else if settings.debug {
                    debug!("Still associating, attempt {}", self.attempts);
                }
            }
        }
    }

    fn target_visible<W: WifiLink>(&mut self, wifi: &mut W, settings: &Settings) -> bool {
        if self.ssid_available {
            return true;
        }
        match wifi.scan_for(&settings.ssid) {
            Ok(found) => {
                if found {
                    debug!("Found target SSID \"{}\"", settings.ssid);
                } else {
                    debug!("Target SSID \"{}\" not visible", settings.ssid);
                }
                self.ssid_available = found;
                found
            }
            Err(e) => {
                warn!("WiFi scan failed: {}", e);
                false
            }
        }
    }

    fn begin<W: WifiLink>(&mut self, wifi: &mut W, settings: &Settings) {
        info!(
            "Attempting to associate with \"{}\" using {}",
            settings.ssid,
            if settings.static_address.is_empty() {
                "DHCP"
            } else {
                settings.static_address.as_str()
            }
        );
        match wifi.begin_association(settings) {
            Ok(()) => {
                self.attempts = 0;
                self.state = LinkState::Associating;
            }
            Err(e) => {
                warn!("Failed to start association: {}", e);
                self.state = LinkState::Disassociated;
            }
        }
    }

    fn open_session<M: MqttSession>(&mut self, mqtt: &mut M, settings: &Settings) {
        if settings.debug {
            debug!("Attempting MQTT connection...");
        }
        match mqtt.connect(settings) {
            Ok(()) => {
                if settings.debug {
                    debug!("Connected to MQTT broker");
                }
                let topic = settings.command_topic();
                match mqtt.subscribe(&topic) {
                    // A failed subscription impairs inbound commands only;
                    // publishing still works, so the session stays usable.
                    Err(e) => error!("Unable to subscribe to {}: {}", topic, e),
                    Ok(()) => debug!("Subscribed to {}", topic),
                }
                self.state = LinkState::SessionReady;
            }
            Err(e) => {
                error!("MQTT connect failed: {}", e);
            }
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from the link and session drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// Scanning or association could not start or failed.
    Association(String),
    /// The broker rejected or never answered the session open.
    Connect(String),
    /// The broker refused the subscription.
    Subscribe(String),
    /// A publish was not accepted by the session.
    Publish(String),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Association(msg) => write!(f, "association failed: {}", msg),
            Self::Connect(msg) => write!(f, "connect failed: {}", msg),
            Self::Subscribe(msg) => write!(f, "subscribe failed: {}", msg),
            Self::Publish(msg) => write!(f, "publish failed: {}", msg),
        }
    }
}

impl std::error::Error for NetError {}


#[cfg(test)]
mod tests {
    use super::testutil::{MockMqtt, MockWifi};
    use super::*;

    fn settings() -> Settings {
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
    fn test_invalid_settings_take_no_action() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            ssid_visible: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();

        net.tick(&mut wifi, &mut mqtt, &settings(), false);

        assert_eq!(net.state(), LinkState::Disassociated);
        assert_eq!(wifi.scan_count, 0);
        assert_eq!(mqtt.connect_calls, 0);
    }

    #[test]
    fn test_ssid_not_visible_stays_disassociated() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi::default();
        let mut mqtt = MockMqtt::default();

        net.tick(&mut wifi, &mut mqtt, &settings(), true);

        assert_eq!(net.state(), LinkState::Disassociated);
        assert_eq!(wifi.scan_count, 1);
        assert_eq!(wifi.association_begins, 0);
    }

    #[test]
    fn test_visible_ssid_starts_association_and_caches_scan() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            ssid_visible: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::Associating);
        assert_eq!(wifi.association_begins, 1);
        assert!(net.ssid_available());

        // Further ticks while associating never rescan.
        net.tick(&mut wifi, &mut mqtt, &s, true);
        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(wifi.scan_count, 1);
    }

    #[test]
    fn test_no_mqtt_attempt_before_association() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            ssid_visible: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        for _ in 0..10 {
            net.tick(&mut wifi, &mut mqtt, &s, true);
        }
        assert_eq!(mqtt.connect_calls, 0);
    }

    #[test]
    fn test_association_ceiling_abandons_and_clears_cache() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            ssid_visible: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::Associating);

        // 99 failed ticks keep trying; the 100th abandons the attempt.
        for _ in 0..99 {
            net.tick(&mut wifi, &mut mqtt, &s, true);
            assert_eq!(net.state(), LinkState::Associating);
        }
        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::Disassociated);
        assert!(!net.ssid_available());

        // The next attempt scans afresh.
        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(wifi.scan_count, 2);
    }

    #[test]
    fn test_confirmed_association_opens_session_and_subscribes() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            ssid_visible: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        wifi.associated = true;
        net.tick(&mut wifi, &mut mqtt, &s, true);

        assert_eq!(net.state(), LinkState::SessionReady);
        assert_eq!(mqtt.connect_calls, 1);
        assert_eq!(mqtt.subscriptions, vec!["tank/command".to_string()]);
    }

    #[test]
    fn test_already_associated_link_skips_scan_and_association() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();

        net.tick(&mut wifi, &mut mqtt, &settings(), true);

        assert_eq!(net.state(), LinkState::SessionReady);
        assert_eq!(wifi.scan_count, 0);
        assert_eq!(wifi.association_begins, 0);
    }

    #[test]
    fn test_connect_failure_stays_and_retries_every_tick() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt {
            connect_fails: true,
            ..MockMqtt::default()
        };
        let s = settings();

        for expected in 1..=5 {
            net.tick(&mut wifi, &mut mqtt, &s, true);
            assert_eq!(net.state(), LinkState::AssociatedNoSession);
            assert_eq!(mqtt.connect_calls, expected);
        }
    }

    #[test]
    fn test_subscribe_failure_still_reaches_session_ready() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt {
            subscribe_fails: true,
            ..MockMqtt::default()
        };

        net.tick(&mut wifi, &mut mqtt, &settings(), true);
        assert_eq!(net.state(), LinkState::SessionReady);
        assert!(mqtt.subscriptions.is_empty());
    }

    #[test]
    fn test_session_drop_falls_back_one_level() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::SessionReady);

        mqtt.connected = false;
        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::AssociatedNoSession);
    }

    #[test]
    fn test_association_drop_falls_back_to_disassociated() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::SessionReady);

        wifi.associated = false;
        net.tick(&mut wifi, &mut mqtt, &s, true);
        assert_eq!(net.state(), LinkState::Disassociated);
    }

    #[test]
    fn test_poll_session_drains_inbound_and_detects_drop() {
        let mut net = NetworkMonitor::new();
        let mut wifi = MockWifi {
            associated: true,
            ..MockWifi::default()
        };
        let mut mqtt = MockMqtt::default();
        let s = settings();

        net.tick(&mut wifi, &mut mqtt, &s, true);
        mqtt.inbound.push_back(InboundMessage {
            topic: "tank/command".into(),
            payload: "version".into(),
        });

        let drained = net.poll_session(&mut mqtt);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload, "version");

        mqtt.connected = false;
        assert!(net.poll_session(&mut mqtt).is_empty());
        assert_eq!(net.state(), LinkState::AssociatedNoSession);
    }

    #[test]
    fn test_poll_session_is_noop_without_session() {
        let mut net = NetworkMonitor::new();
        let mut mqtt = MockMqtt::default();
        assert!(net.poll_session(&mut mqtt).is_empty());
        assert_eq!(mqtt.service_calls, 0);
    }
}
