//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::io::Cursor;
use std::time::Duration;

use apex_voice::config::file::ApexConfigFile;
use apex_voice::config::{CaptureConfig, SensorConfig};
use apex_voice::voice::{
    Endpoint, EndpointDetector, EndpointState, LevelMeter, LevelSensor, MicTap, SAMPLE_RATE,
    SpectrumAnalyser, Voice, calculate_energy, level_from_bins, samples_to_wav,
};
use apex_voice::Config;
use tokio::sync::mpsc;

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn generate_silence(duration_secs: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    vec![0.0; num_samples]
}

/// Feed audio in 100ms chunks the way the capture loop does, stopping at the
/// first decisive endpoint
fn feed(detector: &mut EndpointDetector, samples: &[f32]) -> Vec<Endpoint> {
    let mut events = Vec::new();
    for chunk in samples.chunks(SAMPLE_RATE as usize / 10) {
        match detector.process(chunk) {
            Endpoint::Pending => {}
            Endpoint::SpeechStarted => events.push(Endpoint::SpeechStarted),
            done => {
                events.push(done);
                break;
            }
        }
    }
    events
}

#[test]
fn test_spoken_sentence_is_one_utterance() {
    let mut detector = EndpointDetector::new(&CaptureConfig::default());

    let mut audio = generate_silence(0.5);
    audio.extend(generate_sine_samples(220.0, 1.2, 0.4));
    audio.extend(generate_silence(1.0));

    let events = feed(&mut detector, &audio);
    assert_eq!(events, vec![Endpoint::SpeechStarted, Endpoint::Complete]);
    assert!(detector.has_speech());

    let speech = detector.take_speech_buffer();
    assert!(speech.len() >= SAMPLE_RATE as usize);
    assert!(calculate_energy(&speech) > 0.1);
}

#[test]
fn test_short_pause_does_not_split_utterance() {
    let mut detector = EndpointDetector::new(&CaptureConfig::default());

    let mut audio = generate_sine_samples(200.0, 0.6, 0.4);
    audio.extend(generate_silence(0.3));
    audio.extend(generate_sine_samples(300.0, 0.6, 0.4));

    let events = feed(&mut detector, &audio);
    assert_eq!(events, vec![Endpoint::SpeechStarted]);
    assert_eq!(detector.state(), EndpointState::Speaking);
}

#[test]
fn test_quiet_room_times_out() {
    let config = CaptureConfig {
        no_speech_timeout: Duration::from_secs(2),
        ..CaptureConfig::default()
    };
    let mut detector = EndpointDetector::new(&config);

    // Background hiss well under the threshold
    let events = feed(&mut detector, &generate_sine_samples(50.0, 2.5, 0.01));
    assert_eq!(events, vec![Endpoint::NoSpeech]);
    assert!(!detector.has_speech());
}

#[test]
fn test_utterance_encodes_as_wav() {
    let samples = generate_sine_samples(440.0, 0.25, 0.5);
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(reader.len() as usize, samples.len());
}

#[test]
fn test_spectrum_of_speech_band_tone() {
    let mut analyser = SpectrumAnalyser::new(256);
    let tone = generate_sine_samples(1000.0, 0.1, 0.5);

    // Smoothing needs a few frames to settle
    let mut bins = Vec::new();
    for _ in 0..20 {
        bins = analyser.byte_frequency_data(&tone[..256]);
    }

    assert_eq!(bins.len(), 128);
    let peak = bins
        .iter()
        .enumerate()
        .max_by_key(|(_, b)| **b)
        .map(|(i, _)| i)
        .unwrap();
    // 1 kHz at 16 kHz / 256 points lands in bin 16
    assert!((15..=17).contains(&peak), "peak at bin {peak}");
    assert!(level_from_bins(&bins, 128.0) > 0.0);

    let silent = analyser.byte_frequency_data(&[0.0; 256]);
    assert!(silent.iter().all(|b| *b <= bins[peak]));
}

#[tokio::test(start_paused = true)]
async fn test_level_meter_reports_until_stopped() {
    let tap = MicTap::new(2048);
    let (tx, mut levels) = mpsc::unbounded_channel();
    let mut meter = LevelMeter::new(tap.clone(), SensorConfig::default(), tx);

    meter.start();
    assert!(meter.is_running());

    tap.push(&generate_sine_samples(800.0, 0.1, 0.6));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut readings = Vec::new();
    while let Ok(level) = levels.try_recv() {
        readings.push(level);
    }
    assert!(readings.len() >= 5);
    assert!(readings.iter().all(|l| *l >= 0.0));
    assert!(readings.last().copied().unwrap_or_default() > 0.0);

    meter.stop();
    assert!(!meter.is_running());
    tokio::time::sleep(Duration::from_millis(100)).await;
    while levels.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(levels.try_recv().is_err());
}

#[test]
fn test_default_policy_prefers_designated_voice() {
    let config = Config::default();
    let policy = config.output.voice_policy();
    let voices = vec![
        Voice::new("Samantha", "en-US"),
        Voice::new("Microsoft Swara Online (Natural)", "hi-IN"),
        Voice::new("Google हिन्दी", "hi-IN"),
    ];

    let (voice, rule) = policy.select(&voices, Some("EN")).unwrap();
    assert_eq!(voice.name, "Google हिन्दी");
    assert_eq!(rule, "designated");

    let (voice, rule) = policy.select(&voices, None).unwrap();
    assert_eq!(voice.name, "Microsoft Swara Online (Natural)");
    assert_eq!(rule, "natural");

    assert!(policy.select(&[], Some("HI")).is_none());
}

#[test]
fn test_config_file_overlays_defaults() {
    let file: ApexConfigFile = toml::from_str(
        r#"
[session]
restart_delay_ms = 120

[capture]
interim_interval_ms = 0
end_silence_ms = 600

[output]
voice_poll_attempts = 10
voices = [
    { name = "Google हिन्दी", lang = "hi-IN", id = "hi-IN-Standard-A" },
]

[sensor]
fft_size = 512
"#,
    )
    .unwrap();

    let config = Config::from_file(file).unwrap();
    let defaults = Config::default();

    assert_eq!(config.session.restart_delay, Duration::from_millis(120));
    assert_eq!(config.capture.interim_interval, None);
    assert_eq!(config.capture.end_silence, Duration::from_millis(600));
    assert_eq!(config.capture.min_speech, defaults.capture.min_speech);
    assert_eq!(config.output.voice_poll_attempts, 10);
    assert_eq!(config.output.voices.len(), 1);
    assert_eq!(config.output.voices[0].provider_id(), "hi-IN-Standard-A");
    assert_eq!(config.sensor.fft_size, 512);
}
