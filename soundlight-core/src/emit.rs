//! # Output Module
//!
//! Delivers LED colours to the transport. Delivery is fire-and-forget: a
//! sink never waits for an acknowledgement and never retries.
//!
//! The wire message is the one the LED controller subscribes to: one
//! `{"id": <led index>, "rgb": [r, g, b]}` object per LED, published on the
//! topic configured under the `rgb_values` topic id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;

use crossbeam_channel::{Sender, TrySendError};

use crate::{EmitError, Rgb};

/// Topic id under which LED colours are published.
pub const RGB_TOPIC_ID: &str = "rgb_values";

/// Topic id under which power requests arrive.
pub const POWER_TOPIC_ID: &str = "power_request";

/// Colour of a single LED, as sent to the strip controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedMessage {
    pub id: usize,
    pub rgb: Rgb,
}

/// One message on a topic.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<'a, T> {
    pub topic: &'a str,
    pub payload: T,
}

/// Maps short topic ids to full topic strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topics(BTreeMap<String, String>);

impl Topics {
    /// Looks up the topic string for `topic_id`.
    pub fn resolve(&self, topic_id: &str) -> Result<&str, EmitError> {
        self.0
            .get(topic_id)
            .map(String::as_str)
            .ok_or_else(|| EmitError::UnknownTopic(topic_id.to_string()))
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self(BTreeMap::from([
            (RGB_TOPIC_ID.to_string(), "lights/rgb_values".to_string()),
            (POWER_TOPIC_ID.to_string(), "lights/power_request".to_string()),
        ]))
    }
}

/// Anything that can take a strip's worth of colours.
pub trait ColorSink {
    fn emit(&mut self, colours: &[Rgb]) -> Result<(), EmitError>;
}

/// Writes one JSON envelope per LED and line to `writer`.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
    topic: String,
}

impl<W: Write> JsonLinesSink<W> {
    /// # Errors
    /// * `UnknownTopic` if `topic_id` is not in `topics`
    pub fn new(writer: W, topics: &Topics, topic_id: &str) -> Result<Self, EmitError> {
        let topic = topics.resolve(topic_id)?.to_string();
        Ok(Self { writer, topic })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ColorSink for JsonLinesSink<W> {
    fn emit(&mut self, colours: &[Rgb]) -> Result<(), EmitError> {
        for (id, &rgb) in colours.iter().enumerate() {
            let envelope = Envelope {
                topic: &self.topic,
                payload: LedMessage { id, rgb },
            };
            serde_json::to_writer(&mut self.writer, &envelope)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Hands whole strips to another thread over a crossbeam channel.
///
/// A full channel drops the strip; a closed one is an error.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<Vec<Rgb>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Vec<Rgb>>) -> Self {
        Self { sender }
    }
}

impl ColorSink for ChannelSink {
    fn emit(&mut self, colours: &[Rgb]) -> Result<(), EmitError> {
        match self.sender.try_send(colours.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Output channel full, dropping frame");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(EmitError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_one_message_per_led() {
        let mut sink = JsonLinesSink::new(Vec::new(), &Topics::default(), RGB_TOPIC_ID).unwrap();
        sink.emit(&[Rgb(0.0, 0.0, 1.0), Rgb(1.0, 0.0, 0.0)]).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["topic"], "lights/rgb_values");
        assert_eq!(first["payload"]["id"], 0);
        assert_eq!(first["payload"]["rgb"], serde_json::json!([0.0, 0.0, 1.0]));

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["payload"]["id"], 1);
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let err = JsonLinesSink::new(Vec::new(), &Topics::default(), "nope").unwrap_err();
        assert!(matches!(err, EmitError::UnknownTopic(t) if t == "nope"));
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = ChannelSink::new(tx);
        sink.emit(&[Rgb::BLACK]).unwrap();
        sink.emit(&[Rgb(1.0, 1.0, 1.0)]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![Rgb::BLACK]);
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            sink.emit(&[Rgb::BLACK]),
            Err(EmitError::Disconnected)
        ));
    }
}
