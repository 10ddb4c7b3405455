//! # Spectrum Pipeline Module
//!
//! Runs the whole path from a captured audio block to one colour per LED:
//!
//! 1. Read one block from the capture source and keep a single channel
//! 2. Hann window, FFT, dB conversion ([`SpectrumAnalyzer`])
//! 3. Moving average over the last few spectra ([`MovingAverage`])
//! 4. Subtract the microphone noise baseline ([`NoiseBaseline`])
//! 5. Shift the spectrum so its minimum is 0
//! 6. Band energies from the filter bank ([`FilterBank`])
//! 7. Normalise to a unit-sum colour vector and spread it over the strip
//!
//! Everything runs on the caller's thread, one cycle at a time; the only
//! blocking point is the capture read. Stop signals are checked at the top
//! of each loop iteration, never mid-cycle.

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::capture::{select_channel, CaptureSource};
use crate::colour;
use crate::config::Config;
use crate::emit::ColorSink;
use crate::fft::SpectrumAnalyzer;
use crate::filter::FilterBank;
use crate::noise::NoiseBaseline;
use crate::smoothing::MovingAverage;
use crate::{AnalysisError, CaptureError, CycleOutput, Frame, Result, Rgb};

/// The two lifecycle modes of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Learning the resting spectrum of the room
    Calibrating,
    /// Steady-state analysis and output
    Running,
}

/// Numeric settings of one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub block_size: usize,
    pub smoothing_window: usize,
    pub reference: f32,
    pub channel: u16,
    pub led_count: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            block_size: config.audio.block_size,
            smoothing_window: config.audio.smoothing_window,
            reference: config.audio.reference,
            channel: config.audio.channel,
            led_count: config.output.led_count,
        }
    }
}

/// Counters reported when a loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Cycles that produced output (or a baseline update)
    pub completed: usize,
    /// Cycles dropped because of a per-cycle error
    pub skipped: usize,
    /// Successful cycles whose output the sink failed to take
    pub emit_failures: usize,
}

/// One independent capture-to-colour pipeline.
///
/// The pipeline owns its filter bank, smoothing history and noise
/// baseline; nothing is shared between instances.
#[derive(Debug)]
pub struct SpectrumPipeline {
    settings: PipelineSettings,
    mode: Mode,
    analyzer: SpectrumAnalyzer,
    history: MovingAverage,
    baseline: NoiseBaseline,
    bank: FilterBank,
    colours: Vec<Rgb>,
}

impl SpectrumPipeline {
    /// Builds a pipeline from a validated config for a stream at
    /// `sample_rate`.
    ///
    /// # Errors
    /// * `InvalidParameter` for a bad filter, sample rate or reference
    pub fn new(config: &Config, sample_rate: u32) -> Result<Self> {
        let bank = FilterBank::new(config.filters.iter().cloned())?;
        Self::with_bank(PipelineSettings::from(config), bank, sample_rate)
    }

    pub fn with_bank(settings: PipelineSettings, bank: FilterBank, sample_rate: u32) -> Result<Self> {
        if settings.block_size < 2 {
            return Err(AnalysisError::InvalidParameter(format!(
                "block size must be at least 2, got {}",
                settings.block_size
            )));
        }
        let analyzer = SpectrumAnalyzer::new(sample_rate, settings.reference)?;
        let history = MovingAverage::new(settings.smoothing_window);
        let colours = bank.colours();
        Ok(Self {
            settings,
            mode: Mode::Running,
            analyzer,
            history,
            baseline: NoiseBaseline::new(),
            bank,
            colours,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Mode of the loop currently (or last) executing.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn baseline(&self) -> &NoiseBaseline {
        &self.baseline
    }

    pub fn bank(&self) -> &FilterBank {
        &self.bank
    }

    /// Number of spectra currently in the smoothing history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Reads one block and turns it into a smoothed dB spectrum.
    ///
    /// # Errors
    /// * `InvalidParameter` if the configured channel does not exist on
    ///   `capture`
    pub fn collect_frame(&mut self, capture: &mut dyn CaptureSource) -> Result<Frame> {
        if self.settings.channel >= capture.channels() {
            return Err(AnalysisError::InvalidParameter(format!(
                "channel {} out of range for a {}-channel capture",
                self.settings.channel,
                capture.channels()
            )));
        }
        let raw = capture.read_block(self.settings.block_size)?;
        let mono = select_channel(&raw, capture.channels(), self.settings.channel);
        let frame = self.analyzer.analyze(&mono)?;
        let smoothed = self.history.push(frame.amplitudes().to_vec());
        Frame::new(smoothed, frame.frequencies().clone())
    }

    /// Folds one captured spectrum into the noise baseline.
    pub fn calibrate_once(&mut self, capture: &mut dyn CaptureSource) -> Result<()> {
        let frame = self.collect_frame(capture)?;
        self.baseline.accumulate(&frame)
    }

    /// Turns a smoothed spectrum into a colour vector and LED colours.
    ///
    /// Only the filter bank's weight cache may change, and not at all when
    /// the frame is rejected.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<CycleOutput> {
        let cleaned = self.baseline.subtract(frame)?.shift_to_floor();
        let energies = self.bank.evaluate(&cleaned)?;
        let colour_vector = colour::normalize(&energies)?;
        let colours = colour::expand(&colour_vector, &self.colours, self.settings.led_count)?;
        Ok(CycleOutput {
            colour_vector,
            colours,
        })
    }

    /// One full running cycle, without emitting.
    pub fn run_cycle(&mut self, capture: &mut dyn CaptureSource) -> Result<CycleOutput> {
        let frame = self.collect_frame(capture)?;
        self.process_frame(&frame)
    }

    /// Learns the noise baseline until `cancel` fires (or its sender goes
    /// away) or the capture runs dry.
    ///
    /// # Errors
    /// * `Capture` for capture failures other than end of stream
    pub fn run_calibration<T>(
        &mut self,
        capture: &mut dyn CaptureSource,
        cancel: &Receiver<T>,
    ) -> Result<RunStats> {
        self.mode = Mode::Calibrating;
        info!("Start collecting microphone noise. There should be no sound playing during this.");
        let mut stats = RunStats::default();

        while !signalled(cancel) {
            match self.calibrate_once(capture) {
                Ok(()) => stats.completed += 1,
                Err(AnalysisError::Capture(CaptureError::EndOfStream)) => {
                    info!("Capture ended during calibration");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    stats.skipped += 1;
                    warn!("Skipping calibration frame: {}", e);
                }
                Err(e) => {
                    error!("Calibration stopped: {}", e);
                    return Err(e);
                }
            }
        }

        info!(
            "Stopped collecting microphone noise after {} frames",
            self.baseline.sample_count()
        );
        Ok(stats)
    }

    /// Steady-state loop: capture, analyse, emit, until `shutdown` fires
    /// or the capture runs dry.
    ///
    /// Per-cycle failures skip the cycle; emit failures are logged and
    /// otherwise ignored.
    ///
    /// # Errors
    /// * `Capture` for capture failures other than end of stream
    pub fn run<T>(
        &mut self,
        capture: &mut dyn CaptureSource,
        sink: &mut dyn ColorSink,
        shutdown: &Receiver<T>,
    ) -> Result<RunStats> {
        self.mode = Mode::Running;
        info!(
            "Running: {} filters over {} LEDs",
            self.bank.len(),
            self.settings.led_count
        );
        let mut stats = RunStats::default();

        while !signalled(shutdown) {
            match self.run_cycle(capture) {
                Ok(output) => {
                    stats.completed += 1;
                    debug!(colour_vector = ?output.colour_vector, "Cycle complete");
                    if let Err(e) = sink.emit(&output.colours) {
                        stats.emit_failures += 1;
                        warn!("Failed to emit colours: {}", e);
                    }
                }
                Err(AnalysisError::Capture(CaptureError::EndOfStream)) => {
                    info!("Capture ended");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    stats.skipped += 1;
                    warn!("Skipping cycle: {}", e);
                }
                Err(e) => {
                    error!("Pipeline stopped: {}", e);
                    return Err(e);
                }
            }
        }

        info!(
            "Pipeline finished: {} cycles, {} skipped",
            stats.completed, stats.skipped
        );
        Ok(stats)
    }
}

/// True once a message arrived or every sender is gone.
fn signalled<T>(receiver: &Receiver<T>) -> bool {
    !matches!(receiver.try_recv(), Err(TryRecvError::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use std::sync::Arc;

    const BLUE: Rgb = Rgb(0.0, 0.0, 1.0);
    const RED: Rgb = Rgb(1.0, 0.0, 0.0);

    fn two_band_pipeline(led_count: usize) -> SpectrumPipeline {
        let bank = FilterBank::new([
            FilterSpec::uniform(50.0, 50.0, BLUE),
            FilterSpec::uniform(150.0, 50.0, RED),
        ])
        .unwrap();
        let settings = PipelineSettings {
            led_count,
            ..PipelineSettings::default()
        };
        SpectrumPipeline::with_bank(settings, bank, 44_100).unwrap()
    }

    fn frame(amplitudes: Vec<f32>, axis: &[f32]) -> Frame {
        Frame::new(amplitudes, Arc::from(axis)).unwrap()
    }

    #[test]
    fn uniform_bands_with_unequal_energy() {
        let mut pipeline = two_band_pipeline(10);
        let axis: Vec<f32> = (0..20).map(|i| i as f32 * 10.0 + 5.0).collect();
        // Low band sits 30 dB above the floor, half of the high band 20 dB.
        let mut levels = vec![-60.0; 20];
        for (i, level) in levels.iter_mut().enumerate() {
            if i < 10 {
                *level = -30.0;
            } else if i >= 15 {
                *level = -40.0;
            }
        }
        let output = pipeline.process_frame(&frame(levels, &axis)).unwrap();
        assert!((output.colour_vector[0] - 0.75).abs() < 1e-5);
        assert!((output.colour_vector[1] - 0.25).abs() < 1e-5);
        let mut expected = vec![BLUE; 8];
        expected.extend([RED, RED]);
        assert_eq!(output.colours, expected);
    }

    #[test]
    fn flat_spectrum_after_floor_shift_is_degenerate() {
        let mut pipeline = two_band_pipeline(4);
        let axis: Vec<f32> = (0..20).map(|i| i as f32 * 10.0 + 5.0).collect();
        let err = pipeline.process_frame(&frame(vec![-42.0; 20], &axis)).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateSpectrum { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn construction_rejects_bad_settings() {
        let bank = FilterBank::new([FilterSpec::uniform(50.0, 50.0, BLUE)]).unwrap();
        let settings = PipelineSettings {
            block_size: 1,
            ..PipelineSettings::default()
        };
        assert!(matches!(
            SpectrumPipeline::with_bank(settings, bank, 44_100),
            Err(AnalysisError::InvalidParameter(_))
        ));

        let mut config = Config::default();
        config.filters[0].width = -1.0;
        assert!(SpectrumPipeline::new(&config, 44_100).is_err());
    }

    #[test]
    fn default_pipeline_from_config() {
        let pipeline = SpectrumPipeline::new(&Config::default(), 44_100).unwrap();
        assert_eq!(pipeline.bank().len(), 4);
        assert_eq!(pipeline.settings().led_count, 100);
        assert_eq!(pipeline.mode(), Mode::Running);
        assert!(!pipeline.baseline().is_calibrated());
    }
}
