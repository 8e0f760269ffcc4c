//! Command handling.
//!
//! The same `name=value` command language arrives over two transports: the
//! serial console and the device's MQTT command topic. The [`interpreter`]
//! parses and applies individual commands; the [`dispatcher`] maps inbound
//! MQTT payloads to actions and publishes responses.

mod dispatcher;
mod interpreter;

pub use dispatcher::{
    dispatch, DispatchOutcome, CMD_REBOOT, CMD_RESET_PULSE, CMD_SETTINGS, CMD_STATUS, CMD_VERSION,
    PUBLISH_SETTLE_DELAY, RESPONSE_EMPTY, RESPONSE_OK, RESPONSE_REBOOT, RESPONSE_STATUS,
};
pub use interpreter::{process_command, CommandAction};
