//! Speech capture: one recognition attempt per `start`
//!
//! Each activation listens on the shared microphone tap until the endpoint
//! detector closes the utterance, then transcribes it and reports a single
//! final result. Every activation ends with exactly one [`CaptureEvent::Ended`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::CaptureConfig;
use crate::{Error, Result};

use super::endpoint::{Endpoint, EndpointDetector, EndpointState};
use super::microphone::{MicTap, SAMPLE_RATE, samples_to_wav};
use super::recognizer::Recognizer;

/// Why a recognition attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureErrorKind {
    /// Microphone access refused
    PermissionDenied,
    /// Recognition service refused the client
    ServiceNotAllowed,
    /// Nobody spoke before the timeout
    NoSpeech,
    /// Recognition service unreachable
    Network,
    /// Attempt cancelled
    Aborted,
    /// Anything else
    Other,
}

impl CaptureErrorKind {
    /// Fatal kinds end the session's listening; all others are retried
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::PermissionDenied | Self::ServiceNotAllowed)
    }

    /// Classify a recognizer failure
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::SttNotAllowed(_) => Self::ServiceNotAllowed,
            Error::Microphone(_) => Self::PermissionDenied,
            Error::Http(_) | Error::Io(_) => Self::Network,
            _ => Self::Other,
        }
    }
}

/// Events emitted by a speech capture adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Unstable partial transcript
    Interim(String),
    /// Finalized transcript for this activation
    Final(String),
    /// The activation is over (after stop, abort, or natural completion)
    Ended,
    /// The activation failed
    Error(CaptureErrorKind),
}

/// Capability: local speech-to-text
pub trait SpeechCapture {
    /// Begin one recognition attempt
    ///
    /// # Errors
    ///
    /// Returns error if the attempt cannot be started
    fn start(&mut self) -> Result<()>;

    /// Finish gracefully, emitting a final result if speech was heard
    fn stop(&mut self);

    /// Terminate immediately without a final result
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Stop,
    Abort,
}

/// Forwards events of one activation, dropping them once superseded
struct Emitter {
    id: u64,
    current: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    finalized: bool,
}

impl Emitter {
    fn send(&self, event: CaptureEvent) {
        if self.current.load(Ordering::SeqCst) != self.id {
            tracing::trace!(activation = self.id, ?event, "dropping event from superseded activation");
            return;
        }
        let _ = self.events.send(event);
    }

    fn interim(&self, text: String) {
        if !self.finalized {
            self.send(CaptureEvent::Interim(text));
        }
    }

    fn finalize(&mut self, text: String) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.send(CaptureEvent::Final(text));
    }

    fn error(&self, kind: CaptureErrorKind) {
        self.send(CaptureEvent::Error(kind));
    }

    fn ended(&self) {
        self.send(CaptureEvent::Ended);
    }
}

/// Speech capture built on the shared microphone, endpointing and a [`Recognizer`]
pub struct RecognizerCapture {
    recognizer: Arc<dyn Recognizer>,
    tap: MicTap,
    config: CaptureConfig,
    language: String,
    events: mpsc::UnboundedSender<CaptureEvent>,
    current: Arc<AtomicU64>,
    control: Option<mpsc::UnboundedSender<Control>>,
}

impl RecognizerCapture {
    /// Create a capture adapter
    ///
    /// Events for every activation are delivered on `events`.
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        tap: MicTap,
        config: CaptureConfig,
        language: String,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        Self {
            recognizer,
            tap,
            config,
            language,
            events,
            current: Arc::new(AtomicU64::new(0)),
            control: None,
        }
    }

    /// Whether an activation is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.control.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    fn send_control(&self, control: Control) {
        if let Some(tx) = &self.control {
            let _ = tx.send(control);
        }
    }
}

impl SpeechCapture for RecognizerCapture {
    fn start(&mut self) -> Result<()> {
        if self.is_active() {
            tracing::debug!("capture already active, ignoring start");
            return Ok(());
        }

        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.control = Some(control_tx);

        // Anything buffered while not listening (including our own playback) is stale
        self.tap.clear_pending();

        let activation = Activation {
            recognizer: Arc::clone(&self.recognizer),
            tap: self.tap.clone(),
            config: self.config.clone(),
            language: self.language.clone(),
            control: control_rx,
        };
        let emitter = Emitter {
            id,
            current: Arc::clone(&self.current),
            events: self.events.clone(),
            finalized: false,
        };

        tokio::spawn(async move {
            let mut emitter = emitter;
            activation.run(&mut emitter).await;
            emitter.ended();
        });

        tracing::debug!(activation = id, "capture started");
        Ok(())
    }

    fn stop(&mut self) {
        self.send_control(Control::Stop);
    }

    fn abort(&mut self) {
        self.send_control(Control::Abort);
    }
}

enum Step {
    Control(Option<Control>),
    Tick,
}

/// Result of waiting on a transcription while watching for control messages
enum Transcribed {
    Done(Result<String>),
    Aborted,
}

struct Activation {
    recognizer: Arc<dyn Recognizer>,
    tap: MicTap,
    config: CaptureConfig,
    language: String,
    control: mpsc::UnboundedReceiver<Control>,
}

impl Activation {
    async fn run(mut self, emitter: &mut Emitter) {
        let mut detector = EndpointDetector::new(&self.config);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut last_interim = Instant::now();
        let mut stop_requested = false;

        loop {
            let step = tokio::select! {
                control = self.control.recv() => Step::Control(control),
                _ = ticker.tick() => Step::Tick,
            };

            match step {
                Step::Control(Some(Control::Stop)) => stop_requested = true,
                Step::Control(Some(Control::Abort) | None) => {
                    tracing::debug!("capture aborted");
                    return;
                }
                Step::Tick => {
                    let samples = self.tap.take_pending();
                    match detector.process(&samples) {
                        Endpoint::Complete => {
                            self.finish(detector.take_speech_buffer(), emitter).await;
                            return;
                        }
                        Endpoint::NoSpeech => {
                            emitter.error(CaptureErrorKind::NoSpeech);
                            return;
                        }
                        Endpoint::SpeechStarted => last_interim = Instant::now(),
                        Endpoint::Pending => {}
                    }

                    let interim_due = self
                        .config
                        .interim_interval
                        .is_some_and(|every| last_interim.elapsed() >= every);
                    if interim_due
                        && detector.state() == EndpointState::Speaking
                        && !stop_requested
                    {
                        last_interim = Instant::now();
                        let partial = detector.speech_buffer().to_vec();
                        match self.transcribe(&partial, &mut stop_requested).await {
                            Transcribed::Done(Ok(text)) if !text.trim().is_empty() => {
                                emitter.interim(text.trim().to_string());
                            }
                            Transcribed::Done(Ok(_)) => {}
                            Transcribed::Done(Err(e)) => {
                                tracing::debug!(error = %e, "interim transcription failed");
                            }
                            Transcribed::Aborted => return,
                        }
                    }
                }
            }

            if stop_requested {
                if detector.has_speech() {
                    self.finish(detector.take_speech_buffer(), emitter).await;
                }
                return;
            }
        }
    }

    /// Transcribe the closed utterance and emit the final result
    async fn finish(&mut self, speech: Vec<f32>, emitter: &mut Emitter) {
        let mut ignored_stop = true;
        match self.transcribe(&speech, &mut ignored_stop).await {
            Transcribed::Done(Ok(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    emitter.error(CaptureErrorKind::NoSpeech);
                } else {
                    emitter.finalize(text.to_string());
                }
            }
            Transcribed::Done(Err(e)) => {
                let kind = CaptureErrorKind::from_error(&e);
                tracing::warn!(error = %e, ?kind, "recognition failed");
                emitter.error(kind);
            }
            Transcribed::Aborted => {}
        }
    }

    async fn transcribe(&mut self, samples: &[f32], stop_requested: &mut bool) -> Transcribed {
        let wav = match samples_to_wav(samples, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => return Transcribed::Done(Err(e)),
        };

        let recognizer = Arc::clone(&self.recognizer);
        let language = self.language.clone();
        let transcription = recognizer.transcribe(wav, &language);
        tokio::pin!(transcription);

        loop {
            tokio::select! {
                result = &mut transcription => return Transcribed::Done(result),
                control = self.control.recv() => match control {
                    Some(Control::Stop) => *stop_requested = true,
                    Some(Control::Abort) | None => return Transcribed::Aborted,
                },
            }
        }
    }
}
