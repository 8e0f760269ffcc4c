//! The `name=value` command interpreter.
//!
//! Each recognized name maps to one settings field, and every successful
//! mutation is persisted immediately. Anything that fails to parse, and any
//! unrecognized name, asks the caller to display the settings listing - the
//! listing doubles as the help text, so "bad command" and "show help" are
//! deliberately the same outcome.

use log::{info, warn};

use crate::settings::{
    ConfigStorage, SettingsStore, MAX_ADDRESS_LEN, MAX_CREDENTIAL_LEN, MAX_SSID_LEN,
    MAX_TOPIC_ROOT_LEN,
};

/// What the caller should do after a command line was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// A field was updated and persisted.
    Updated,
    /// The line did not parse or named an unknown setting; show the
    /// settings listing. This is the failure outcome.
    ShowSettings,
    /// Factory defaults were restored and persisted; restart the device
    /// after the settle delay.
    FactoryReset,
}

/// Parse and apply one command line.
pub fn process_command<S: ConfigStorage>(
    store: &mut SettingsStore<S>,
    line: &str,
) -> CommandAction {
    let Some((name, value)) = line.split_once('=') else {
        return CommandAction::ShowSettings;
    };

    // Serial lines may arrive CRLF-terminated.
    let value = value.strip_suffix('\r').unwrap_or(value);

    if name.is_empty() || value.is_empty() {
        return CommandAction::ShowSettings;
    }

    // The literal "null" clears a field.
    let value = if value == "null" { "" } else { value };

    if value.len() > field_limit(name) {
        warn!(
            "Value for {} exceeds {} bytes, ignoring",
            name,
            field_limit(name)
        );
        return CommandAction::ShowSettings;
    }

    match name {
        "broker" => store.settings_mut().broker_address = value.to_string(),
        "port" => store.settings_mut().broker_port = value.parse().unwrap_or(0),
        "topicroot" => store.settings_mut().set_topic_root(value),
        "user" => store.settings_mut().mqtt_username = value.to_string(),
        "pass" => store.settings_mut().mqtt_password = value.to_string(),
        "ssid" => store.settings_mut().ssid = value.to_string(),
        "wifipass" => store.settings_mut().wifi_password = value.to_string(),
        "debug" => store.settings_mut().debug = value.parse::<u32>().unwrap_or(0) == 1,
        "reportperiod" => store.settings_mut().report_period_secs = value.parse().unwrap_or(0),
        "staticaddress" => store.settings_mut().static_address = value.to_string(),
        "netmask" => store.settings_mut().netmask = value.to_string(),
        "gateway" => store.settings_mut().gateway = value.to_string(),
        "dns" => store.settings_mut().dns = value.to_string(),
        "factorydefaults" if value == "yes" => {
            info!("Resetting all stored settings");
            store.reset();
            persist(store);
            return CommandAction::FactoryReset;
        }
        _ => return CommandAction::ShowSettings,
    }

    persist(store);
    CommandAction::Updated
}

/// Value ceiling for each settable field. Keeps every saved record inside
/// the fixed storage read buffer.
fn field_limit(name: &str) -> usize {
    match name {
        "ssid" => MAX_SSID_LEN,
        "user" | "pass" | "wifipass" => MAX_CREDENTIAL_LEN,
        "broker" | "staticaddress" | "netmask" | "gateway" | "dns" => MAX_ADDRESS_LEN,
        "topicroot" => MAX_TOPIC_ROOT_LEN,
        _ => usize::MAX,
    }
}

/// Persist after a mutation. A commit failure costs durability for the next
/// power cycle, not the running configuration, so it is logged and ignored.
fn persist<S: ConfigStorage>(store: &mut SettingsStore<S>) {
    if let Err(e) = store.save() {
        warn!("Settings not persisted: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemoryStorage;

    fn configured_store() -> SettingsStore<MemoryStorage> {
        let mut store = SettingsStore::new(MemoryStorage::new());
        for cmd in [
            "ssid=Net",
            "wifipass=pw",
            "broker=10.0.0.5",
            "port=1883",
            "topicroot=tank",
            "reportperiod=60",
        ] {
            assert_eq!(process_command(&mut store, cmd), CommandAction::Updated);
        }
        store
    }

    #[test]
    fn test_field_commands_update_and_persist() {
        let store = configured_store();
        assert_eq!(store.settings().ssid, "Net");
        assert_eq!(store.settings().broker_port, 1883);
        assert_eq!(store.settings().report_period_secs, 60);
        assert!(store.is_valid());
    }

    #[test]
    fn test_topic_root_gains_trailing_separator() {
        let store = configured_store();
        assert_eq!(store.settings().topic_root(), "tank/");
    }

    #[test]
    fn test_null_clears_field_and_invalidates() {
        let mut store = configured_store();
        assert!(store.is_valid());

        assert_eq!(
            process_command(&mut store, "ssid=null"),
            CommandAction::Updated
        );
        assert!(store.settings().ssid.is_empty());
        assert!(!store.is_valid());
    }

    #[test]
    fn test_null_clears_optional_field_without_invalidating() {
        let mut store = configured_store();
        process_command(&mut store, "user=fred");
        process_command(&mut store, "user=null");
        assert!(store.settings().mqtt_username.is_empty());
        assert!(store.is_valid());
    }

    #[test]
    fn test_missing_value_shows_settings() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "ssid="),
            CommandAction::ShowSettings
        );
        assert_eq!(store.settings().ssid, "Net");
    }

    #[test]
    fn test_missing_name_shows_settings() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "=value"),
            CommandAction::ShowSettings
        );
    }

    #[test]
    fn test_line_without_separator_shows_settings() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "help"),
            CommandAction::ShowSettings
        );
    }

    #[test]
    fn test_unknown_name_shows_settings() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "frobnicate=1"),
            CommandAction::ShowSettings
        );
    }

    #[test]
    fn test_trailing_carriage_return_is_trimmed() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "ssid=Other\r"),
            CommandAction::Updated
        );
        assert_eq!(store.settings().ssid, "Other");
    }

    #[test]
    fn test_debug_flag_parses_one_and_zero() {
        let mut store = configured_store();
        process_command(&mut store, "debug=1");
        assert!(store.settings().debug);
        process_command(&mut store, "debug=0");
        assert!(!store.settings().debug);
        process_command(&mut store, "debug=junk");
        assert!(!store.settings().debug);
    }

    #[test]
    fn test_unparseable_port_becomes_zero_and_invalidates() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "port=junk"),
            CommandAction::Updated
        );
        assert_eq!(store.settings().broker_port, 0);
        assert!(!store.is_valid());
    }

    #[test]
    fn test_oversized_value_is_rejected() {
        let mut store = configured_store();
        let long = format!("ssid={}", "x".repeat(MAX_SSID_LEN + 1));
        assert_eq!(
            process_command(&mut store, &long),
            CommandAction::ShowSettings
        );
        assert_eq!(store.settings().ssid, "Net");
        assert!(store.is_valid());

        // Exactly at the ceiling still goes through.
        let max = format!("ssid={}", "x".repeat(MAX_SSID_LEN));
        assert_eq!(process_command(&mut store, &max), CommandAction::Updated);
        assert_eq!(store.settings().ssid.len(), MAX_SSID_LEN);
    }

    #[test]
    fn test_factory_defaults_requires_yes() {
        let mut store = configured_store();
        assert_eq!(
            process_command(&mut store, "factorydefaults=no"),
            CommandAction::ShowSettings
        );
        assert_eq!(store.settings().ssid, "Net");
    }

    #[test]
    fn test_factory_defaults_resets_persists_and_requests_restart() {
        let mut store = configured_store();
        let old_id = store.settings().client_id.clone();

        assert_eq!(
            process_command(&mut store, "factorydefaults=yes"),
            CommandAction::FactoryReset
        );
        assert!(store.settings().ssid.is_empty());
        assert!(!store.is_valid());
        assert_ne!(store.settings().client_id, old_id);

        // The reset record is what survives the restart.
        let mut reloaded = SettingsStore::new(MemoryStorage::with_block(
            store.settings().to_bytes(false),
        ));
        reloaded.load();
        assert!(!reloaded.is_valid());
    }

    #[test]
    fn test_static_network_commands() {
        let mut store = configured_store();
        process_command(&mut store, "staticaddress=192.168.1.50");
        assert!(!store.is_valid(), "netmask and gateway still missing");
        process_command(&mut store, "netmask=255.255.255.0");
        process_command(&mut store, "gateway=192.168.1.1");
        assert!(store.is_valid());
        process_command(&mut store, "dns=8.8.8.8");
        assert_eq!(store.settings().dns, "8.8.8.8");
    }
}
