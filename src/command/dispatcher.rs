//! MQTT command dispatch.
//!
//! Inbound messages on the device's command topic carry a bare keyword or a
//! `name=value` line. The response goes out, not retained, on the topic
//! root plus the original payload - the command itself becomes the response
//! sub-topic. A reboot request only restarts the device after its response
//! has been published.

use std::time::Duration;

use log::{debug, error};

use super::interpreter::{process_command, CommandAction};
use crate::net::{InboundMessage, MqttSession};
use crate::report;
use crate::settings::{ConfigStorage, SettingsStore};

/// Render the full JSON configuration.
pub const CMD_SETTINGS: &str = "settings";
/// Report the firmware version.
pub const CMD_VERSION: &str = "version";
/// Force a report publish on demand.
pub const CMD_STATUS: &str = "status";
/// Reserved keyword; recognized but performs nothing on this device.
pub const CMD_RESET_PULSE: &str = "resetPulseCounter";
/// Restart the device after responding.
pub const CMD_REBOOT: &str = "reboot";

pub const RESPONSE_REBOOT: &str = "REBOOTING";
pub const RESPONSE_STATUS: &str = "Status report complete";
pub const RESPONSE_OK: &str = "OK";
/// Placeholder response when a delegated command fails.
pub const RESPONSE_EMPTY: &str = "(empty)";

/// Pause after a dispatched response so the publish flushes before further
/// session servicing (and before a requested restart).
pub const PUBLISH_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// What the run loop must do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchOutcome {
    /// A response was published; apply the settle delay.
    pub handled: bool,
    /// Restart the device, now that the response is out.
    pub reboot: bool,
    /// The payload did not parse; print the settings listing on the
    /// console, as a failed serial command would.
    pub show_settings: bool,
}

/// Handle one inbound MQTT message.
///
/// Messages on any topic other than the device's command topic are ignored.
pub fn dispatch<S: ConfigStorage, M: MqttSession>(
    store: &mut SettingsStore<S>,
    mqtt: &mut M,
    local_ip: &str,
    last_wet: bool,
    msg: &InboundMessage,
) -> DispatchOutcome {
    if msg.topic != store.settings().command_topic() {
        return DispatchOutcome::default();
    }
    if store.settings().debug {
        debug!("Received command \"{}\" on {}", msg.payload, msg.topic);
    }

    // The incoming command becomes the response sub-topic. Captured before
    // dispatch so a factory reset cannot pull the topic root out from under
    // its own response.
    let response_topic = store.settings().topic(&msg.payload);

    let mut reboot = false;
    let mut show_settings = false;
    let response = match msg.payload.as_str() {
        CMD_SETTINGS => match store.settings().json_view(local_ip) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed rendering settings: {}", e);
                RESPONSE_EMPTY.to_string()
            }
        },
        CMD_VERSION => crate::FIRMWARE_VERSION.to_string(),
        CMD_STATUS => {
            report::publish_report(mqtt, store.settings(), last_wet);
            RESPONSE_STATUS.to_string()
        }
        CMD_RESET_PULSE => {
            // Reserved for counter-bearing variants of this firmware.
            debug!("Ignoring reserved command \"{}\"", CMD_RESET_PULSE);
            RESPONSE_OK.to_string()
        }
        CMD_REBOOT => {
            reboot = true;
            RESPONSE_REBOOT.to_string()
        }
        line => match process_command(store, line) {
            CommandAction::Updated => RESPONSE_OK.to_string(),
            CommandAction::ShowSettings => {
                show_settings = true;
                RESPONSE_EMPTY.to_string()
            }
            CommandAction::FactoryReset => {
                reboot = true;
                RESPONSE_OK.to_string()
            }
        },
    };

    report::publish(mqtt, &response_topic, &response, false);

    DispatchOutcome {
        handled: true,
        reboot,
        show_settings,
    }
}
