//! # Control Message Module
//!
//! Parsing and validation of the small JSON messages that arrive from the
//! bus: per-LED colour commands for the strip controller, and power
//! requests for the radio-switched outlets.
//!
//! Malformed messages are reported as [`ControlError::InvalidMessage`];
//! [`ControlRouter::handle_lines`] logs and skips them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::BufRead;
use tracing::{debug, warn};

use crate::config::Config;
use crate::emit::{LedMessage, POWER_TOPIC_ID};
use crate::{ControlError, Rgb};

/// Requested outlet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

/// `{"id": <outlet id>, "val": "on" | "off"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerRequest {
    pub id: String,
    pub val: PowerState,
}

#[derive(Deserialize)]
struct RawPowerRequest {
    id: Option<String>,
    val: Option<String>,
}

/// Parses and validates a power request.
pub fn parse_power_request(json: &str) -> Result<PowerRequest, ControlError> {
    power_request_from(serde_json::from_str(json)?)
}

fn power_request_from(payload: Value) -> Result<PowerRequest, ControlError> {
    let raw: RawPowerRequest = serde_json::from_value(payload)?;
    let id = raw.id.ok_or_else(|| {
        ControlError::InvalidMessage("power request has no \"id\"".into())
    })?;
    let val = match raw.val.as_deref() {
        Some("on") => PowerState::On,
        Some("off") => PowerState::Off,
        Some(other) => {
            return Err(ControlError::InvalidMessage(format!(
                "\"val\" does not equal \"on\" or \"off\": {other}"
            )));
        }
        None => {
            return Err(ControlError::InvalidMessage(
                "missing \"val\" field in power request".into(),
            ));
        }
    };
    Ok(PowerRequest { id, val })
}

#[derive(Deserialize)]
struct RawLedCommand {
    id: Option<usize>,
    rgb: Option<Vec<f32>>,
}

/// Parses a single-LED colour command and checks it against the strip.
pub fn parse_led_command(json: &str, led_count: usize) -> Result<LedMessage, ControlError> {
    led_command_from(serde_json::from_str(json)?, led_count)
}

fn led_command_from(payload: Value, led_count: usize) -> Result<LedMessage, ControlError> {
    let json = payload.to_string();
    let raw: RawLedCommand = serde_json::from_value(payload)?;
    let id = raw
        .id
        .ok_or_else(|| ControlError::InvalidMessage(format!("LED \"id\" not found in {json}")))?;
    if id >= led_count {
        return Err(ControlError::InvalidMessage(format!(
            "LED id {id} out of range for {led_count} LEDs"
        )));
    }
    let rgb = match raw.rgb.as_deref() {
        Some(&[r, g, b]) => Rgb(r, g, b),
        _ => {
            return Err(ControlError::InvalidMessage(format!(
                "No valid LED \"rgb\" found in {json}"
            )));
        }
    };
    if !rgb.is_valid() {
        return Err(ControlError::InvalidMessage(format!(
            "LED colour {rgb:?} outside [0, 1]"
        )));
    }
    Ok(LedMessage { id, rgb })
}

/// On/off codes of one radio outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioCode {
    pub on: u32,
    pub off: u32,
}

/// Outlet id -> outlet number -> radio code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutletTable {
    #[serde(default)]
    pub outlets: BTreeMap<String, String>,
    #[serde(default)]
    pub radio_codes: BTreeMap<String, RadioCode>,
}

impl OutletTable {
    /// Radio code that switches the requested outlet.
    pub fn resolve(&self, request: &PowerRequest) -> Result<u32, ControlError> {
        let number = self
            .outlets
            .get(&request.id)
            .ok_or_else(|| ControlError::UnknownOutlet(request.id.clone()))?;
        let code = self.radio_codes.get(number).ok_or_else(|| {
            ControlError::UnknownOutlet(format!("{} (outlet number {number})", request.id))
        })?;
        Ok(match request.val {
            PowerState::On => code.on,
            PowerState::Off => code.off,
        })
    }
}

/// A validated inbound message and what it resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Led(LedMessage),
    Power { request: PowerRequest, code: u32 },
}

/// Counters reported by [`ControlRouter::handle_lines`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub handled: usize,
    pub ignored: usize,
}

#[derive(Deserialize)]
struct RawEnvelope {
    topic: String,
    payload: Value,
}

/// Dispatches `{"topic": ..., "payload": ...}` messages to the LED and
/// power handlers by topic.
#[derive(Debug, Clone)]
pub struct ControlRouter {
    led_topic: String,
    power_topic: String,
    led_count: usize,
    outlets: OutletTable,
}

impl ControlRouter {
    /// # Errors
    /// * `Topic` if the LED or power topic id is missing from `[topics]`
    pub fn from_config(config: &Config) -> Result<Self, ControlError> {
        Ok(Self {
            led_topic: config.topics.resolve(&config.output.topic)?.to_string(),
            power_topic: config.topics.resolve(POWER_TOPIC_ID)?.to_string(),
            led_count: config.output.led_count,
            outlets: config.power.clone(),
        })
    }

    /// Validates one message line and resolves it to an action.
    pub fn route(&self, line: &str) -> Result<ControlAction, ControlError> {
        let envelope: RawEnvelope = serde_json::from_str(line)?;
        if envelope.topic == self.led_topic {
            led_command_from(envelope.payload, self.led_count).map(ControlAction::Led)
        } else if envelope.topic == self.power_topic {
            let request = power_request_from(envelope.payload)?;
            let code = self.outlets.resolve(&request)?;
            Ok(ControlAction::Power { request, code })
        } else {
            Err(ControlError::InvalidMessage(format!(
                "no handler for topic {}",
                envelope.topic
            )))
        }
    }

    /// Routes every non-empty line of `reader` and hands valid actions to
    /// `apply`. Invalid messages are logged and skipped.
    ///
    /// # Errors
    /// * Read failures of `reader`
    pub fn handle_lines<R, F>(&self, reader: R, mut apply: F) -> std::io::Result<ControlStats>
    where
        R: BufRead,
        F: FnMut(ControlAction),
    {
        let mut stats = ControlStats::default();
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.route(line) {
                Ok(action) => {
                    debug!(?action, "Control message");
                    stats.handled += 1;
                    apply(action);
                }
                Err(e) => {
                    stats.ignored += 1;
                    warn!("Ignoring control message: {}", e);
                }
            }
        }
        Ok(stats)
    }
}
