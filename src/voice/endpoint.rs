//! Utterance endpointing
//!
//! Decides where a spoken utterance starts and ends using local energy
//! detection, so each recognition attempt yields one finalized utterance.

use std::time::Duration;

use crate::config::CaptureConfig;

use super::microphone::SAMPLE_RATE;

/// State of the endpoint detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Waiting for speech
    Waiting,
    /// Speech detected, accumulating the utterance
    Speaking,
}

/// What a processed chunk means for the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Nothing decisive happened
    Pending,
    /// Speech just started
    SpeechStarted,
    /// Enough speech followed by enough silence
    Complete,
    /// No speech started before the timeout
    NoSpeech,
}

/// Detects utterance boundaries in a stream of audio chunks
#[derive(Debug)]
pub struct EndpointDetector {
    energy_threshold: f32,
    min_speech_samples: usize,
    end_silence_samples: usize,
    no_speech_samples: usize,
    max_utterance_samples: usize,
    state: EndpointState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    waiting_counter: usize,
}

#[allow(clippy::cast_possible_truncation)]
const fn samples_for(duration: Duration) -> usize {
    (duration.as_millis() as usize) * (SAMPLE_RATE as usize) / 1000
}

impl EndpointDetector {
    /// Create a detector from capture configuration
    #[must_use]
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            min_speech_samples: samples_for(config.min_speech),
            end_silence_samples: samples_for(config.end_silence),
            no_speech_samples: samples_for(config.no_speech_timeout),
            max_utterance_samples: samples_for(config.max_utterance),
            state: EndpointState::Waiting,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            waiting_counter: 0,
        }
    }

    /// Process audio samples and report utterance boundaries
    pub fn process(&mut self, samples: &[f32]) -> Endpoint {
        if samples.is_empty() {
            return Endpoint::Pending;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > self.energy_threshold;

        match self.state {
            EndpointState::Waiting => {
                if is_speech {
                    self.state = EndpointState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                    return Endpoint::SpeechStarted;
                }

                self.waiting_counter += samples.len();
                if self.waiting_counter >= self.no_speech_samples {
                    tracing::trace!("no speech before timeout");
                    return Endpoint::NoSpeech;
                }
            }
            EndpointState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                tracing::trace!(
                    buffer_len = self.speech_buffer.len(),
                    silence = self.silence_counter,
                    is_speech,
                    energy,
                    "speaking"
                );

                if self.silence_counter >= self.end_silence_samples
                    && self.voiced_samples() >= self.min_speech_samples
                {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                    return Endpoint::Complete;
                }

                if self.speech_buffer.len() >= self.max_utterance_samples {
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance hit max length");
                    return Endpoint::Complete;
                }

                // A blip too short to be speech followed by silence: start over
                if self.silence_counter >= self.end_silence_samples * 2 {
                    tracing::trace!("too short, resetting");
                    self.state = EndpointState::Waiting;
                    self.speech_buffer.clear();
                    self.silence_counter = 0;
                }
            }
        }

        Endpoint::Pending
    }

    fn voiced_samples(&self) -> usize {
        self.speech_buffer.len().saturating_sub(self.silence_counter)
    }

    /// Whether enough speech has been heard to be worth transcribing
    #[must_use]
    pub fn has_speech(&self) -> bool {
        self.state == EndpointState::Speaking && self.voiced_samples() >= self.min_speech_samples
    }

    /// Get the accumulated speech buffer
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Take the speech buffer, clearing it
    pub fn take_speech_buffer(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Reset detector to waiting state
    pub fn reset(&mut self) {
        self.state = EndpointState::Waiting;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.waiting_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(ms: usize) -> Vec<f32> {
        vec![0.3; ms * SAMPLE_RATE as usize / 1000]
    }

    fn silence(ms: usize) -> Vec<f32> {
        vec![0.0; ms * SAMPLE_RATE as usize / 1000]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&silence(10)) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn speech_then_silence_completes() {
        let mut detector = EndpointDetector::new(&CaptureConfig::default());
        assert_eq!(detector.process(&tone(100)), Endpoint::SpeechStarted);
        assert_eq!(detector.process(&tone(400)), Endpoint::Pending);
        assert!(detector.has_speech());
        assert_eq!(detector.process(&silence(900)), Endpoint::Complete);
        assert_eq!(detector.take_speech_buffer().len(), tone(1400).len());
    }

    #[test]
    fn silence_times_out_without_speech() {
        let config = CaptureConfig {
            no_speech_timeout: Duration::from_millis(500),
            ..CaptureConfig::default()
        };
        let mut detector = EndpointDetector::new(&config);
        assert_eq!(detector.process(&silence(300)), Endpoint::Pending);
        assert_eq!(detector.process(&silence(300)), Endpoint::NoSpeech);
    }

    #[test]
    fn short_blip_resets_to_waiting() {
        let mut detector = EndpointDetector::new(&CaptureConfig::default());
        detector.process(&tone(50));
        assert_eq!(detector.process(&silence(1700)), Endpoint::Pending);
        assert_eq!(detector.state(), EndpointState::Waiting);
        assert!(detector.speech_buffer().is_empty());
    }

    #[test]
    fn long_utterance_is_cut() {
        let config = CaptureConfig {
            max_utterance: Duration::from_millis(1000),
            ..CaptureConfig::default()
        };
        let mut detector = EndpointDetector::new(&config);
        detector.process(&tone(500));
        assert_eq!(detector.process(&tone(600)), Endpoint::Complete);
    }
}
