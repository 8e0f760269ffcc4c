//! Periodic sensor reporting.
//!
//! On each scheduled cycle the latest reading is published twice under the
//! topic root: the raw `0`/`1` value and the derived `wet`/`dry` label,
//! both retained. Reporting is best-effort: without a live session every
//! publish is a logged no-op success, and a failed publish is dropped
//! rather than retried within the cycle.

use std::time::{Duration, Instant};

use log::{error, info};

use crate::net::{MqttSession, PAYLOAD_DRY, PAYLOAD_WET, TOPIC_LEVEL, TOPIC_READING};
use crate::settings::Settings;

/// Report timer.
///
/// Each period is armed from the time the previous cycle ran, not from an
/// absolute grid, so drift accumulates but missed periods never pile up
/// into catch-up bursts.
pub struct ReportSchedule {
    next_due: Option<Instant>,
}

impl ReportSchedule {
    /// A fresh schedule is immediately due, so the first loop pass reports.
    pub fn new() -> Self {
        Self { next_due: None }
    }

    pub fn due(&self, now: Instant) -> bool {
        match self.next_due {
            None => true,
            Some(at) => now >= at,
        }
    }

    /// Arm the next cycle relative to `now`.
    pub fn advance(&mut self, now: Instant, period_secs: u32) {
        self.next_due = Some(now + Duration::from_secs(u64::from(period_secs)));
    }
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish the reading and its level label, both retained.
pub fn publish_report<M: MqttSession>(mqtt: &mut M, settings: &Settings, wet: bool) {
    let reading = if wet { "1" } else { "0" };
    publish(mqtt, &settings.topic(TOPIC_READING), reading, true);

    let level = if wet { PAYLOAD_WET } else { PAYLOAD_DRY };
    publish(mqtt, &settings.topic(TOPIC_LEVEL), level, true);
}

/// Publish one message, logging it to the console either way.
///
/// Returns success when no session exists; an offline reading is dropped,
/// not surfaced as an error.
pub fn publish<M: MqttSession>(mqtt: &mut M, topic: &str, payload: &str, retain: bool) -> bool {
    info!("{} {}", topic, payload);
    if !mqtt.is_connected() {
        return true;
    }
    match mqtt.publish(topic, payload, retain) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed publishing {}: {}", topic, e);
            false
        }
    }
}
