//! Speech output: speak one reply at a time with a chosen voice
//!
//! A new `speak` cancels the utterance in progress; replies are never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::OutputConfig;

use super::playback::AudioSink;
use super::synth::SpeechEngine;
use super::voices::{Voice, VoicePolicy};

/// Why an utterance could not be spoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputErrorKind {
    /// The voice list never became available
    NoVoice,
    /// The engine failed to render the text
    Synthesis,
    /// The output device failed
    Playback,
}

/// Events emitted by a speech output adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// Audio started playing
    Started,
    /// Audio finished playing
    Ended,
    /// The utterance failed
    Error(OutputErrorKind),
}

/// Capability: local text-to-speech
pub trait SpeechOutput {
    /// Speak `text`, cancelling anything already in progress
    ///
    /// `language` is the label detected by the assistant service, used for
    /// voice selection.
    fn speak(&mut self, text: &str, language: Option<&str>);

    /// Silence the utterance in progress without emitting further events
    fn cancel(&mut self);
}

struct InFlight {
    task: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Speech output built on a [`SpeechEngine`] and an [`AudioSink`]
pub struct SynthesizedOutput {
    engine: Arc<dyn SpeechEngine>,
    sink: Arc<dyn AudioSink>,
    policy: Arc<VoicePolicy>,
    config: OutputConfig,
    events: mpsc::UnboundedSender<OutputEvent>,
    generation: Arc<AtomicU64>,
    in_flight: Option<InFlight>,
}

impl SynthesizedOutput {
    /// Create an output adapter delivering events on `events`
    #[must_use]
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        sink: Arc<dyn AudioSink>,
        config: OutputConfig,
        events: mpsc::UnboundedSender<OutputEvent>,
    ) -> Self {
        let policy = Arc::new(config.voice_policy());
        Self {
            engine,
            sink,
            policy,
            config,
            events,
            generation: Arc::new(AtomicU64::new(0)),
            in_flight: None,
        }
    }

    /// Whether an utterance is being prepared or played
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|f| !f.task.is_finished())
    }
}

impl SpeechOutput for SynthesizedOutput {
    fn speak(&mut self, text: &str, language: Option<&str>) {
        self.cancel();

        let generation = self.generation.load(Ordering::SeqCst);
        let stop = Arc::new(AtomicBool::new(false));
        let utterance = Utterance {
            text: text.to_string(),
            language: language.map(str::to_string),
            engine: Arc::clone(&self.engine),
            sink: Arc::clone(&self.sink),
            policy: Arc::clone(&self.policy),
            config: self.config.clone(),
            stop: Arc::clone(&stop),
            emitter: Emitter {
                generation,
                current: Arc::clone(&self.generation),
                events: self.events.clone(),
            },
        };

        let task = tokio::spawn(utterance.run());
        self.in_flight = Some(InFlight { task, stop });
    }

    fn cancel(&mut self) {
        // Bumping the generation silences every event of the old utterance
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.stop.store(true, Ordering::SeqCst);
            in_flight.task.abort();
            tracing::debug!("speech cancelled");
        }
    }
}

struct Emitter {
    generation: u64,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<OutputEvent>,
}

impl Emitter {
    fn send(&self, event: OutputEvent) {
        if self.current.load(Ordering::SeqCst) == self.generation {
            let _ = self.events.send(event);
        }
    }
}

struct Utterance {
    text: String,
    language: Option<String>,
    engine: Arc<dyn SpeechEngine>,
    sink: Arc<dyn AudioSink>,
    policy: Arc<VoicePolicy>,
    config: OutputConfig,
    stop: Arc<AtomicBool>,
    emitter: Emitter,
}

impl Utterance {
    async fn run(self) {
        tokio::time::sleep(self.config.start_delay).await;

        let Some(voice) = self.wait_for_voice().await else {
            tracing::warn!(
                attempts = self.config.voice_poll_attempts,
                "no synthesis voice available"
            );
            self.emitter.send(OutputEvent::Error(OutputErrorKind::NoVoice));
            return;
        };

        let samples = match self.engine.synthesize(&self.text, &voice).await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                self.emitter
                    .send(OutputEvent::Error(OutputErrorKind::Synthesis));
                return;
            }
        };

        self.emitter.send(OutputEvent::Started);

        let sink = Arc::clone(&self.sink);
        let stop = Arc::clone(&self.stop);
        let played = tokio::task::spawn_blocking(move || sink.play(samples, &stop)).await;

        match played {
            Ok(Ok(())) if !self.stop.load(Ordering::SeqCst) => {
                self.emitter.send(OutputEvent::Ended);
            }
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "playback failed");
                self.emitter.send(OutputEvent::Error(OutputErrorKind::Playback));
            }
            Err(e) => {
                tracing::error!(error = %e, "playback task failed");
                self.emitter.send(OutputEvent::Error(OutputErrorKind::Playback));
            }
        }
    }

    /// Poll the engine until it offers voices, then pick one
    async fn wait_for_voice(&self) -> Option<Voice> {
        for attempt in 0..self.config.voice_poll_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.voice_poll_interval).await;
            }

            let voices = match self.engine.voices().await {
                Ok(voices) => voices,
                Err(e) => {
                    tracing::debug!(error = %e, attempt, "voice list unavailable");
                    continue;
                }
            };

            if let Some((voice, rule)) = self.policy.select(&voices, self.language.as_deref()) {
                tracing::debug!(voice = %voice.name, lang = %voice.lang, rule, "voice selected");
                return Some(voice.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::Result;

    /// Engine whose voice list appears after `empty_polls` lookups
    struct LateEngine {
        voices: Vec<Voice>,
        empty_polls: usize,
        polls: AtomicUsize,
        spoken: Mutex<Vec<(String, String)>>,
    }

    impl LateEngine {
        fn new(voices: Vec<Voice>, empty_polls: usize) -> Self {
            Self {
                voices,
                empty_polls,
                polls: AtomicUsize::new(0),
                spoken: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SpeechEngine for LateEngine {
        async fn voices(&self) -> Result<Vec<Voice>> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if n < self.empty_polls {
                Ok(Vec::new())
            } else {
                Ok(self.voices.clone())
            }
        }

        async fn synthesize(&self, text: &str, voice: &Voice) -> Result<Vec<f32>> {
            self.spoken
                .lock()
                .unwrap()
                .push((text.to_string(), voice.name.clone()));
            Ok(vec![0.0; 240])
        }
    }

    struct InstantSink;

    impl AudioSink for InstantSink {
        fn play(&self, _samples: Vec<f32>, _stop: &AtomicBool) -> Result<()> {
            Ok(())
        }
    }

    fn output(engine: Arc<LateEngine>) -> (SynthesizedOutput, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let out = SynthesizedOutput::new(engine, Arc::new(InstantSink), OutputConfig::default(), tx);
        (out, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<OutputEvent>) -> Option<OutputEvent> {
        tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn speaks_with_designated_voice() {
        let engine = Arc::new(LateEngine::new(
            vec![
                Voice::new("Samantha", "en-US"),
                Voice::new("Google हिन्दी", "hi-IN"),
            ],
            0,
        ));
        let (mut out, mut rx) = output(Arc::clone(&engine));

        out.speak("Hi there!", Some("EN"));

        assert_eq!(next(&mut rx).await, Some(OutputEvent::Started));
        assert_eq!(next(&mut rx).await, Some(OutputEvent::Ended));
        assert_eq!(
            engine.spoken.lock().unwrap().as_slice(),
            &[("Hi there!".to_string(), "Google हिन्दी".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn defers_until_voices_are_listed() {
        let engine = Arc::new(LateEngine::new(vec![Voice::new("nova", "en-US")], 3));
        let (mut out, mut rx) = output(Arc::clone(&engine));

        out.speak("later", None);

        assert_eq!(next(&mut rx).await, Some(OutputEvent::Started));
        assert_eq!(engine.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_no_voice_appears() {
        let engine = Arc::new(LateEngine::new(Vec::new(), 0));
        let (mut out, mut rx) = output(Arc::clone(&engine));

        out.speak("nobody home", None);

        assert_eq!(
            next(&mut rx).await,
            Some(OutputEvent::Error(OutputErrorKind::NoVoice))
        );
        assert_eq!(engine.polls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn latest_reply_wins() {
        let engine = Arc::new(LateEngine::new(vec![Voice::new("nova", "en-US")], 0));
        let (mut out, mut rx) = output(Arc::clone(&engine));

        out.speak("first", None);
        out.speak("second", None);

        assert_eq!(next(&mut rx).await, Some(OutputEvent::Started));
        assert_eq!(next(&mut rx).await, Some(OutputEvent::Ended));
        let spoken = engine.spoken.lock().unwrap();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].0, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silences_events() {
        let engine = Arc::new(LateEngine::new(vec![Voice::new("nova", "en-US")], 0));
        let (mut out, mut rx) = output(engine);

        out.speak("hush", None);
        out.cancel();

        assert_eq!(next(&mut rx).await, None);
        assert!(!out.is_busy());
    }
}
