//! Microphone stream shared by speech capture and the level sensor
//!
//! The stream is opened once per session and reused across listen cycles.
//! Samples land in a [`MicTap`]: a drainable queue for recognition plus a
//! rolling window for level analysis.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Longest backlog kept for recognition (30 seconds)
const MAX_PENDING_SAMPLES: usize = SAMPLE_RATE as usize * 30;

/// Rolling window kept for level analysis
const DEFAULT_WINDOW: usize = 2048;

/// Capability: a microphone that can be opened once and released once
pub trait Microphone {
    /// Acquire the input stream; a no-op when already open
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or access is refused
    fn open(&mut self) -> Result<()>;

    /// Release the input stream
    fn close(&mut self);

    /// Whether the stream is currently held
    fn is_open(&self) -> bool;
}

#[derive(Debug)]
struct TapBuffers {
    pending: Vec<f32>,
    window: VecDeque<f32>,
    window_capacity: usize,
}

/// Shared sample buffers fed by the microphone callback
#[derive(Debug, Clone)]
pub struct MicTap {
    inner: Arc<Mutex<TapBuffers>>,
}

impl Default for MicTap {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl MicTap {
    /// Create a tap keeping `window_capacity` recent samples for analysis
    #[must_use]
    pub fn new(window_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TapBuffers {
                pending: Vec::new(),
                window: VecDeque::with_capacity(window_capacity),
                window_capacity,
            })),
        }
    }

    /// Append freshly captured samples
    pub fn push(&self, samples: &[f32]) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.pending.extend_from_slice(samples);
            if buf.pending.len() > MAX_PENDING_SAMPLES {
                let excess = buf.pending.len() - MAX_PENDING_SAMPLES;
                buf.pending.drain(..excess);
            }

            let capacity = buf.window_capacity;
            buf.window.extend(samples.iter().copied());
            while buf.window.len() > capacity {
                buf.window.pop_front();
            }
        }
    }

    /// Take the samples queued for recognition and clear the queue
    #[must_use]
    pub fn take_pending(&self) -> Vec<f32> {
        self.inner
            .lock()
            .map(|mut buf| std::mem::take(&mut buf.pending))
            .unwrap_or_default()
    }

    /// Drop anything queued for recognition
    pub fn clear_pending(&self) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.pending.clear();
        }
    }

    /// The most recent `n` samples, zero-padded at the front when fewer exist
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<f32> {
        self.inner
            .lock()
            .map(|buf| {
                let available = buf.window.len().min(n);
                let mut out = vec![0.0; n - available];
                out.extend(buf.window.iter().skip(buf.window.len() - available));
                out
            })
            .unwrap_or_else(|_| vec![0.0; n])
    }

    /// Drop all buffered audio
    pub fn clear(&self) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.pending.clear();
            buf.window.clear();
        }
    }
}

/// Captures audio from the default input device into a [`MicTap`]
pub struct AudioCapture {
    config: StreamConfig,
    tap: MicTap,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// The device is only probed here; the stream is acquired by [`Microphone::open`].
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new(tap: MicTap) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Microphone("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Microphone(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Microphone("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            tap,
            stream: None,
        })
    }

    /// Handle to the shared sample buffers
    #[must_use]
    pub fn tap(&self) -> MicTap {
        self.tap.clone()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

impl Microphone for AudioCapture {
    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let tap = self.tap.clone();
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Microphone("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    tap.push(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Microphone(e.to_string()))?;

        stream.play().map_err(|e| Error::Microphone(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("microphone opened");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            self.tap.clear();
            tracing::debug!("microphone released");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_drained_once() {
        let tap = MicTap::new(8);
        tap.push(&[0.1, 0.2, 0.3]);
        assert_eq!(tap.take_pending(), vec![0.1, 0.2, 0.3]);
        assert!(tap.take_pending().is_empty());
    }

    #[test]
    fn window_keeps_most_recent_samples() {
        let tap = MicTap::new(4);
        tap.push(&[1.0, 2.0, 3.0]);
        tap.push(&[4.0, 5.0, 6.0]);
        assert_eq!(tap.latest(4), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(tap.latest(2), vec![5.0, 6.0]);
    }

    #[test]
    fn latest_pads_short_window_with_silence() {
        let tap = MicTap::new(16);
        tap.push(&[0.5]);
        assert_eq!(tap.latest(3), vec![0.0, 0.0, 0.5]);
    }

    #[test]
    fn clear_pending_keeps_window() {
        let tap = MicTap::new(4);
        tap.push(&[0.25, 0.5]);
        tap.clear_pending();
        assert!(tap.take_pending().is_empty());
        assert_eq!(tap.latest(2), vec![0.25, 0.5]);
    }

    #[test]
    fn wav_header_and_length() {
        let samples = vec![0.0f32; 160];
        let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 160);
    }
}
