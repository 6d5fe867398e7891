//! Voice activity sensor: a loudness level for visual feedback
//!
//! Each frame takes the most recent microphone window, computes a
//! frequency-domain magnitude view of it and reduces that to one scalar:
//! mean bin magnitude divided by a fixed reference.

use std::f32::consts::PI;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SensorConfig;

use super::microphone::MicTap;

/// Decibel range mapped onto byte magnitudes 0..=255
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Weight of the previous frame when smoothing magnitudes over time
const SMOOTHING: f32 = 0.8;

/// Capability: a sampling loop that can be started and stopped
pub trait LevelSensor {
    /// Begin sampling; restarts the loop when already running
    fn start(&mut self);

    /// Stop sampling; no further levels are produced
    fn stop(&mut self);
}

/// Frequency analyser producing byte-scaled magnitudes per bin
#[derive(Debug, Clone)]
pub struct SpectrumAnalyser {
    size: usize,
    window: Vec<f32>,
    cos: Vec<f32>,
    sin: Vec<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    /// Create an analyser over windows of `size` samples (yields `size / 2` bins)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(size: usize) -> Self {
        let n = size as f32;
        // Blackman window
        let window = (0..size)
            .map(|i| {
                let x = i as f32 / n;
                0.08f32.mul_add(
                    (4.0 * PI * x).cos(),
                    0.5f32.mul_add(-(2.0 * PI * x).cos(), 0.42),
                )
            })
            .collect();
        let cos = (0..size).map(|i| (2.0 * PI * i as f32 / n).cos()).collect();
        let sin = (0..size).map(|i| (2.0 * PI * i as f32 / n).sin()).collect();

        Self {
            size,
            window,
            cos,
            sin,
            smoothed: vec![0.0; size / 2],
        }
    }

    /// Number of frequency bins
    #[must_use]
    pub const fn bins(&self) -> usize {
        self.size / 2
    }

    /// Analyse one window and return byte magnitudes per bin
    ///
    /// `samples` shorter than the window are treated as silence at the front.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn byte_frequency_data(&mut self, samples: &[f32]) -> Vec<u8> {
        let size = self.size;
        let offset = size.saturating_sub(samples.len());
        let start = samples.len().saturating_sub(size);
        let windowed: Vec<f32> = (0..size)
            .map(|i| {
                let sample = if i < offset {
                    0.0
                } else {
                    samples[start + i - offset]
                };
                sample * self.window[i]
            })
            .collect();

        let scale = 1.0 / size as f32;
        let mut bytes = Vec::with_capacity(self.bins());
        for k in 0..self.bins() {
            let (mut re, mut im) = (0.0f32, 0.0f32);
            for (n, x) in windowed.iter().enumerate() {
                let idx = (k * n) % size;
                re += x * self.cos[idx];
                im -= x * self.sin[idx];
            }
            let magnitude = re.hypot(im) * scale;
            let smoothed = SMOOTHING.mul_add(self.smoothed[k], (1.0 - SMOOTHING) * magnitude);
            self.smoothed[k] = smoothed;

            let db = if smoothed > 0.0 {
                20.0 * smoothed.log10()
            } else {
                MIN_DECIBELS
            };
            let scaled = 255.0 * (db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS);
            bytes.push(scaled.clamp(0.0, 255.0) as u8);
        }
        bytes
    }
}

/// Reduce byte magnitudes to a level: mean magnitude over `reference`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn level_from_bins(bins: &[u8], reference: f32) -> f32 {
    if bins.is_empty() || reference <= 0.0 {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| u32::from(b)).sum();
    sum as f32 / bins.len() as f32 / reference
}

/// Level sensor reading the shared microphone tap on a fixed cadence
pub struct LevelMeter {
    tap: MicTap,
    config: SensorConfig,
    levels: mpsc::UnboundedSender<f32>,
    task: Option<JoinHandle<()>>,
}

impl LevelMeter {
    /// Create a sensor delivering levels on `levels`
    #[must_use]
    pub const fn new(tap: MicTap, config: SensorConfig, levels: mpsc::UnboundedSender<f32>) -> Self {
        Self {
            tap,
            config,
            levels,
            task: None,
        }
    }

    /// Whether the sampling loop is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl LevelSensor for LevelMeter {
    fn start(&mut self) {
        self.stop();

        let tap = self.tap.clone();
        let levels = self.levels.clone();
        let size = self.config.fft_size;
        let reference = self.config.reference;
        let mut ticker = tokio::time::interval(self.config.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.task = Some(tokio::spawn(async move {
            let mut analyser = SpectrumAnalyser::new(size);
            loop {
                ticker.tick().await;
                let bins = analyser.byte_frequency_data(&tap.latest(size));
                if levels.send(level_from_bins(&bins, reference)).is_err() {
                    break;
                }
            }
        }));
        tracing::trace!("level sensor started");
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::trace!("level sensor stopped");
        }
    }
}

impl Drop for LevelMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.8 * (2.0 * PI * freq * i as f32 / 16000.0).sin())
            .collect()
    }

    #[test]
    fn silence_reads_zero() {
        let mut analyser = SpectrumAnalyser::new(256);
        let bins = analyser.byte_frequency_data(&[0.0; 256]);
        assert_eq!(bins.len(), 128);
        assert!(bins.iter().all(|&b| b == 0));
        assert!(level_from_bins(&bins, 128.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tone_raises_level() {
        let mut analyser = SpectrumAnalyser::new(256);
        let tone = sine(1000.0, 256);
        let mut level = 0.0;
        for _ in 0..10 {
            level = level_from_bins(&analyser.byte_frequency_data(&tone), 128.0);
        }
        assert!(level > 0.03, "level {level}");

        // 1 kHz lands on bin 16 at 62.5 Hz per bin
        let bins = analyser.byte_frequency_data(&tone);
        assert_eq!(bins[16], 255);
        assert!(bins[100] < bins[16]);
    }

    #[test]
    fn level_is_mean_over_reference() {
        assert!((level_from_bins(&[128, 128], 128.0) - 1.0).abs() < f32::EPSILON);
        assert!((level_from_bins(&[0, 64], 128.0) - 0.25).abs() < f32::EPSILON);
        assert!(level_from_bins(&[], 128.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_sampling() {
        let tap = MicTap::default();
        tap.push(&sine(440.0, 2048));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut meter = LevelMeter::new(tap, SensorConfig::default(), tx);

        meter.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(meter.is_running());
        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert!(seen >= 5, "only {seen} frames");

        meter.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(!meter.is_running());
    }
}
