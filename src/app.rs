//! The application run loop state.
//!
//! One cooperative loop owns everything: serial command handling, the
//! sensor and its indicator, the network machine, scheduled reporting, and
//! MQTT command dispatch. Each [`App::tick`] runs every component to
//! completion, so all shared state is single-writer and lock-free. The
//! tick never sleeps or restarts by itself; it hands the required delay and
//! any restart request back to the caller.

use std::time::{Duration, Instant};

use log::info;

use crate::command::{self, dispatch, process_command, CommandAction};
use crate::device::{Console, FirmwareUpdate, Indicator, LevelSensor};
use crate::net::{LinkState, MqttSession, NetworkMonitor, WifiLink, ASSOCIATION_ATTEMPT_DELAY};
use crate::report::{self, ReportSchedule};
use crate::settings::{ConfigStorage, SettingsStore};

/// Idle pause between loop iterations.
pub const LOOP_DELAY: Duration = Duration::from_millis(100);

/// Pause before a user-triggered restart, so console output and the final
/// publish can drain.
pub const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Warning flash half-period while the sensor is dry.
const WARNING_FLASH_PERIOD: Duration = Duration::from_secs(1);

// Indicator duty levels. Full-on is too bright for an enclosure LED.
const DRY_RED_BRIGHTNESS: u8 = 48;
const DRY_GREEN_BRIGHTNESS: u8 = 128;
const WET_GREEN_BRIGHTNESS: u8 = 200;

/// What the run loop must do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// How long to pause before the next iteration.
    pub delay: Duration,
    /// Restart the device after the pause.
    pub restart: bool,
}

/// Application state owned by the run loop.
pub struct App<S: ConfigStorage> {
    store: SettingsStore<S>,
    net: NetworkMonitor,
    schedule: ReportSchedule,
    last_wet: bool,
    warning_lit: bool,
    next_flash: Option<Instant>,
}

impl<S: ConfigStorage> App<S> {
    /// Build the application around an already-loaded settings store.
    pub fn new(store: SettingsStore<S>) -> Self {
        Self {
            store,
            net: NetworkMonitor::new(),
            schedule: ReportSchedule::new(),
            last_wet: false,
            warning_lit: false,
            next_flash: None,
        }
    }

    pub fn store(&self) -> &SettingsStore<S> {
        &self.store
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.net
    }

    /// Run one loop iteration.
    #[allow(clippy::too_many_arguments)]
    pub fn tick<W, M, N, I, C, F>(
        &mut self,
        now: Instant,
        wifi: &mut W,
        mqtt: &mut M,
        sensor: &mut N,
        indicator: &mut I,
        console: &mut C,
        updater: &mut F,
    ) -> TickOutcome
    where
        W: WifiLink,
        M: MqttSession,
        N: LevelSensor,
        I: Indicator,
        C: Console,
        F: FirmwareUpdate,
    {
        // Local commands first, so a misconfigured device can always be
        // fixed over serial even while the network flails.
        if let Some(line) = console.poll_line() {
            console.print_line(&line);
            let period_before = self.store.settings().report_period_secs;
            match process_command(&mut self.store, &line) {
                CommandAction::Updated => self.rearm_if_period_changed(now, period_before),
                CommandAction::ShowSettings => console.print_line(&self.store.listing()),
                CommandAction::FactoryReset => {
                    info!("Factory defaults restored, restarting");
                    return TickOutcome {
                        delay: RESTART_SETTLE_DELAY,
                        restart: true,
                    };
                }
            }
        }

        self.last_wet = sensor.sample();
        self.drive_indicator(now, indicator);

        let associated = wifi.is_associated();
        indicator.set_link(associated);
        if associated {
            updater.poll();
        }

        if self.store.is_valid() && self.schedule.due(now) {
            self.net.tick(wifi, mqtt, self.store.settings(), true);
            report::publish_report(mqtt, self.store.settings(), self.last_wet);
            let period = self.store.settings().report_period_secs;
            self.schedule.advance(now, period);
        }

        // The session is drained every iteration, reporting cycle or not,
        // so inbound deliveries are never missed.
        let mut handled = false;
        let mut reboot = false;
        let period_before = self.store.settings().report_period_secs;
        for msg in self.net.poll_session(mqtt) {
            let local_ip = wifi.local_ip().unwrap_or_default();
            let outcome = dispatch(&mut self.store, mqtt, &local_ip, self.last_wet, &msg);
            handled |= outcome.handled;
            reboot |= outcome.reboot;
            if outcome.show_settings {
                console.print_line(&self.store.listing());
            }
        }
        self.rearm_if_period_changed(now, period_before);

        let delay = if handled || reboot {
            command::PUBLISH_SETTLE_DELAY
        } else if self.net.state() == LinkState::Associating {
            ASSOCIATION_ATTEMPT_DELAY
        } else {
            LOOP_DELAY
        };

        TickOutcome {
            delay,
            restart: reboot,
        }
    }

    /// A changed report period takes effect now, not after the previously
    /// armed deadline expires.
    fn rearm_if_period_changed(&mut self, now: Instant, previous: u32) {
        let period = self.store.settings().report_period_secs;
        if period != previous {
            self.schedule.advance(now, period);
        }
    }

    /// Steady green when wet; a slow red+green "yellow" flash when dry.
    fn drive_indicator<I: Indicator>(&mut self, now: Instant, indicator: &mut I) {
        if self.last_wet {
            indicator.set_levels(0, WET_GREEN_BRIGHTNESS);
            self.warning_lit = false;
            return;
        }
        let due = match self.next_flash {
            None => true,
            Some(at) => now >= at,
        };
        if !due {
            return;
        }
        if self.warning_lit {
            indicator.set_levels(0, 0);
        } else {
            indicator.set_levels(DRY_RED_BRIGHTNESS, DRY_GREEN_BRIGHTNESS);
        }
        self.warning_lit = !self.warning_lit;
        self.next_flash = Some(now + WARNING_FLASH_PERIOD);
    }
}
