//! # Audio Capture Module
//!
//! This module is the boundary between the analysis pipeline and whatever
//! delivers audio samples. The pipeline only sees [`CaptureSource`]; two
//! implementations live here:
//!
//! - [`CpalCapture`]: live capture from an input device through CPAL
//!   (Cross-Platform Audio Library)
//! - [`WavCapture`]: offline capture from a WAV file through hound
//!
//! ## Features
//! - Default or name-matched input device selection
//! - f32, i16 and u16 device formats, converted to f32 in `[-1, 1]`
//! - Best-effort streaming: when the analysis falls behind, audio is
//!   dropped instead of failing the stream

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{error, info};

use crate::CaptureError;

/// Preferred device sample rate.
pub const TARGET_SAMPLE_RATE: u32 = 44_100;

/// Number of callback chunks buffered between the device and the reader.
const CHANNEL_CAPACITY: usize = 64;

/// How long a blocking read waits for the device before giving up.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A source of interleaved audio samples.
pub trait CaptureSource {
    /// Number of interleaved channels in every block.
    fn channels(&self) -> u16;

    /// Samples per second per channel.
    fn sample_rate(&self) -> u32;

    /// Blocks until `block_size` frames (`block_size * channels` samples)
    /// are available and returns them interleaved.
    fn read_block(&mut self, block_size: usize) -> Result<Vec<f32>, CaptureError>;
}

/// Picks channel `channel` out of an interleaved block.
///
/// Out-of-range channel indices fall back to channel 0.
pub fn select_channel(samples: &[f32], channels: u16, channel: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    let offset = if usize::from(channel) < channels {
        usize::from(channel)
    } else {
        0
    };
    samples
        .iter()
        .skip(offset)
        .step_by(channels)
        .copied()
        .collect()
}

/// Live capture from an audio input device.
pub struct CpalCapture {
    // Dropping the stream stops the device callback.
    _stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl CpalCapture {
    /// Opens an input device and starts streaming.
    ///
    /// With `device_name` the first input device whose name contains it is
    /// used, otherwise the host's default input device.
    pub fn open(device_name: Option<&str>) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().is_ok_and(|n| n.contains(wanted)))
                .ok_or_else(|| anyhow!("No input device matching '{wanted}'"))?,
            None => host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?,
        };

        info!("Using audio input device: {}", device.name()?);

        let configs = device.supported_input_configs()?.collect::<Vec<_>>();
        let supported = match find_supported_config(configs, TARGET_SAMPLE_RATE) {
            Some(range) => {
                let rate = TARGET_SAMPLE_RATE
                    .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
                range.with_sample_rate(cpal::SampleRate(rate))
            }
            None => device
                .default_input_config()
                .context("No supported input format found")?,
        };

        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;

        info!(
            "Selected {} Hz, {} channel(s), {:?}",
            sample_rate, channels, sample_format
        );

        let (sender, receiver) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let stream = match sample_format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sender)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sender)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sender)?,
            other => return Err(anyhow!("Unsupported sample format {other:?}")),
        };

        stream.play()?;

        Ok(Self {
            _stream: stream,
            receiver,
            pending: Vec::new(),
            channels,
            sample_rate,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block_size: usize) -> Result<Vec<f32>, CaptureError> {
        let needed = block_size * usize::from(self.channels);
        while self.pending.len() < needed {
            match self.receiver.recv_timeout(STALL_TIMEOUT) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(CaptureError::Device(format!(
                        "no audio received for {} s",
                        STALL_TIMEOUT.as_secs()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Disconnected),
            }
        }
        Ok(self.pending.drain(..needed).collect())
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sender: Sender<Vec<f32>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk = data.iter().map(|&s| s.to_sample::<f32>()).collect();
            // Ignore a full channel: the reader is behind, so drop this chunk.
            let _ = sender.try_send(chunk);
        },
        |err| error!("An error occurred on the audio stream: {}", err),
        None,
    )
}

/// Finds the best supported configuration for the target sample rate.
///
/// f32 formats are preferred over integer ones; among equals, the range
/// closest to `target_rate` wins.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| {
            matches!(
                c.sample_format(),
                cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16
            )
        })
        .min_by_key(|c| {
            let in_range = (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate);
            let min_diff = c.min_sample_rate().0.abs_diff(target_rate);
            let max_diff = c.max_sample_rate().0.abs_diff(target_rate);
            (
                c.sample_format() != cpal::SampleFormat::F32,
                if in_range { 0 } else { min_diff.min(max_diff) },
            )
        })
}

/// Offline capture that replays a WAV file block by block.
#[derive(Debug, Clone)]
pub struct WavCapture {
    samples: Vec<f32>,
    position: usize,
    channels: u16,
    sample_rate: u32,
}

impl WavCapture {
    /// Decodes the whole file up front. Integer formats are scaled to
    /// `[-1, 1]`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        info!(
            "Opened WAV file {}: {} Hz, {} channel(s), {} samples",
            path.as_ref().display(),
            spec.sample_rate,
            spec.channels,
            samples.len()
        );
        Ok(Self {
            samples,
            position: 0,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        })
    }

    /// Samples not yet handed out.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.position
    }
}

impl CaptureSource for WavCapture {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// A trailing partial block is discarded and reported as end of stream.
    fn read_block(&mut self, block_size: usize) -> Result<Vec<f32>, CaptureError> {
        let needed = block_size * usize::from(self.channels);
        if needed == 0 || self.remaining() < needed {
            return Err(CaptureError::EndOfStream);
        }
        let block = self.samples[self.position..self.position + needed].to_vec();
        self.position += needed;
        Ok(block)
    }
}
