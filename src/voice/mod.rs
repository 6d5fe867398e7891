//! Voice processing module
//!
//! Microphone, speech capture, speech output and the level sensor. Each
//! concern is a small capability trait with one concrete implementation, so
//! the session can be driven by scripted fakes in tests.

mod capture;
mod endpoint;
mod microphone;
mod output;
mod playback;
mod recognizer;
mod sensor;
mod synth;
mod voices;

pub use capture::{CaptureErrorKind, CaptureEvent, RecognizerCapture, SpeechCapture};
pub use endpoint::{Endpoint, EndpointDetector, EndpointState, calculate_energy};
pub use microphone::{AudioCapture, MicTap, Microphone, SAMPLE_RATE, samples_to_wav};
pub use output::{OutputErrorKind, OutputEvent, SpeechOutput, SynthesizedOutput};
pub use playback::{AudioPlayback, AudioSink};
pub use recognizer::{Recognizer, SpeechToText};
pub use sensor::{LevelMeter, LevelSensor, SpectrumAnalyser, level_from_bins};
pub use synth::{SYNTH_SAMPLE_RATE, SpeechEngine, TextToSpeech, decode_mp3};
pub use voices::{DesignatedVoice, Voice, VoiceMatcher, VoicePolicy, VoiceRule};
