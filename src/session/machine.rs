//! Turn-taking state machine
//!
//! The machine owns the session status and is the only place that drives the
//! adapters. Every handler re-reads the current status before acting, so an
//! event that arrives after the machine has moved on is simply dropped.

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::channel::{ChannelEvent, ClientEvent, DuplexChannel, STATUS_THINKING, ServerEvent};
use crate::history::{HistoryStore, Role};
use crate::voice::{
    CaptureErrorKind, CaptureEvent, LevelSensor, Microphone, OutputEvent, SpeechCapture,
    SpeechOutput,
};

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// No capture, no playback
    #[default]
    Idle,
    /// Capture active, waiting for the user
    Listening,
    /// Utterance sent, waiting for the reply
    Thinking,
    /// Reply playing
    Speaking,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        };
        f.write_str(label)
    }
}

/// User-visible notices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Microphone or recognition access was refused
    MicrophoneDenied,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MicrophoneDenied => {
                f.write_str("Microphone access denied. Check your input device permissions.")
            }
        }
    }
}

/// What presentation needs to render the session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub status: Status,
    pub current_transcript: String,
    pub emotion: Option<String>,
    pub language: Option<String>,
    pub audio_level: f32,
    pub connected: bool,
    pub conversation_id: String,
}

/// Everything the machine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Microphone control pressed
    ToggleMicrophone,
    /// Leave the session
    Exit,
    Capture(CaptureEvent),
    Output(OutputEvent),
    Channel(ChannelEvent),
    /// Latest sensor reading
    Level(f32),
    /// A scheduled capture restart is due
    RestartDue(u64),
}

/// The adapters driven by the machine
pub struct Adapters {
    pub microphone: Box<dyn Microphone>,
    pub capture: Box<dyn SpeechCapture>,
    pub output: Box<dyn SpeechOutput>,
    pub channel: Box<dyn DuplexChannel>,
    pub sensor: Box<dyn LevelSensor>,
    pub history: Box<dyn HistoryStore>,
}

/// The conversation turn-taking state machine
pub struct TurnMachine {
    adapters: Adapters,
    status: Status,
    capture_active: bool,
    playback_active: bool,
    restart_delay: Duration,
    restart_seq: u64,
    pending_restart: Option<u64>,
    torn_down: bool,
    timers: mpsc::UnboundedSender<SessionEvent>,
    notices: mpsc::UnboundedSender<Notice>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl TurnMachine {
    /// Create an idle machine
    ///
    /// Due restarts are delivered as [`SessionEvent::RestartDue`] on `timers`
    /// and must be fed back through [`TurnMachine::handle`].
    #[must_use]
    pub fn new(
        adapters: Adapters,
        restart_delay: Duration,
        conversation_id: String,
        timers: mpsc::UnboundedSender<SessionEvent>,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            connected: adapters.channel.is_open(),
            conversation_id,
            ..SessionSnapshot::default()
        });

        Self {
            adapters,
            status: Status::Idle,
            capture_active: false,
            playback_active: false,
            restart_delay,
            restart_seq: 0,
            pending_restart: None,
            torn_down: false,
            timers,
            notices,
            snapshot,
        }
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Whether a recognition attempt is running
    #[must_use]
    pub const fn capture_active(&self) -> bool {
        self.capture_active
    }

    /// Whether a reply is being spoken
    #[must_use]
    pub const fn playback_active(&self) -> bool {
        self.playback_active
    }

    /// Whether the session has been exited
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Observe session snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// The latest snapshot
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// React to one event
    pub fn handle(&mut self, event: SessionEvent) {
        if self.torn_down {
            tracing::trace!(?event, "session over, dropping event");
            return;
        }

        match event {
            SessionEvent::ToggleMicrophone => {
                if self.status == Status::Idle {
                    self.activate();
                } else {
                    self.halt(false);
                }
            }
            SessionEvent::Exit => {
                self.halt(true);
                self.torn_down = true;
                tracing::info!("session ended");
            }
            SessionEvent::Capture(event) => self.on_capture(event),
            SessionEvent::Output(event) => self.on_output(event),
            SessionEvent::Channel(event) => self.on_channel(event),
            SessionEvent::Level(level) => {
                if self.status == Status::Listening {
                    self.update(|s| s.audio_level = level);
                }
            }
            SessionEvent::RestartDue(token) => self.on_restart_due(token),
        }

        debug_assert!(
            !(self.capture_active && self.playback_active),
            "capture and playback active together"
        );
    }

    fn activate(&mut self) {
        if !self.adapters.microphone.is_open()
            && let Err(e) = self.adapters.microphone.open()
        {
            tracing::error!(error = %e, "microphone unavailable");
            let _ = self.notices.send(Notice::MicrophoneDenied);
            return;
        }

        self.update(|s| s.current_transcript.clear());
        self.set_status(Status::Listening);
        self.start_capture();
    }

    /// Stop everything and return to idle; `close_channel` ends the session's connection too
    fn halt(&mut self, close_channel: bool) {
        self.pending_restart = None;

        self.adapters.capture.abort();
        self.capture_active = false;

        self.adapters.output.cancel();
        self.playback_active = false;

        self.set_status(Status::Idle);
        self.adapters.sensor.stop();
        self.adapters.microphone.close();

        if close_channel {
            self.adapters.channel.close();
            self.update(|s| s.connected = false);
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Interim(text) => {
                if self.status == Status::Listening {
                    self.update(|s| s.current_transcript = text);
                }
            }
            CaptureEvent::Final(text) => {
                if self.status == Status::Listening && !text.trim().is_empty() {
                    self.submit(text);
                } else {
                    tracing::debug!(status = %self.status, "ignoring final transcript");
                }
            }
            CaptureEvent::Ended => {
                self.capture_active = false;
                if self.status == Status::Listening && self.pending_restart.is_none() {
                    tracing::debug!("capture ended while listening, restarting");
                    self.schedule_restart();
                }
            }
            CaptureEvent::Error(kind) => {
                if self.status != Status::Listening {
                    return;
                }
                if kind.is_fatal() {
                    self.fail_listening(kind);
                } else {
                    tracing::debug!(?kind, "transient capture error");
                }
            }
        }
    }

    /// Send a finalized utterance; capture is stopped before anything else
    fn submit(&mut self, text: String) {
        self.adapters.capture.stop();
        self.capture_active = false;

        self.update(|s| s.current_transcript.clone_from(&text));
        self.set_status(Status::Thinking);
        tracing::info!(text = %text, "user utterance");

        let sent = self
            .adapters
            .channel
            .send(ClientEvent::TextInput { text: text.clone() });
        self.append(Role::User, &text);

        if let Err(e) = sent {
            tracing::warn!(error = %e, "could not send utterance");
            self.update(|s| s.connected = false);
            self.resume_listening();
        }
    }

    fn fail_listening(&mut self, kind: CaptureErrorKind) {
        tracing::error!(?kind, "capture refused, stopping");
        let _ = self.notices.send(Notice::MicrophoneDenied);

        self.pending_restart = None;
        self.adapters.capture.abort();
        self.capture_active = false;
        self.set_status(Status::Idle);
        self.adapters.microphone.close();
    }

    fn on_output(&mut self, event: OutputEvent) {
        if self.status != Status::Speaking {
            tracing::debug!(?event, status = %self.status, "ignoring output event");
            return;
        }

        match event {
            OutputEvent::Started => self.abort_capture(),
            OutputEvent::Ended => {
                self.playback_active = false;
                self.update(|s| s.current_transcript.clear());
                self.resume_listening();
            }
            OutputEvent::Error(kind) => {
                tracing::warn!(?kind, "speech output failed");
                self.playback_active = false;
                self.resume_listening();
            }
        }
    }

    fn on_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Server(ServerEvent::Status { status }) => {
                if status == STATUS_THINKING && self.status == Status::Thinking {
                    self.update(|s| s.current_transcript.clear());
                    self.abort_capture();
                } else {
                    tracing::debug!(label = %status, current = %self.status, "ignoring status");
                }
            }
            ChannelEvent::Server(ServerEvent::Transcript {
                text,
                emotion,
                language,
            }) => {
                if self.status != Status::Thinking {
                    tracing::debug!(status = %self.status, "ignoring transcript");
                    return;
                }
                self.abort_capture();
                self.update(|s| {
                    if emotion.is_some() {
                        s.emotion.clone_from(&emotion);
                    }
                    if language.is_some() {
                        s.language.clone_from(&language);
                    }
                });
                tracing::info!(text = %text, ?emotion, ?language, "assistant reply");

                self.set_status(Status::Speaking);
                self.playback_active = true;
                self.adapters.output.speak(&text, language.as_deref());
                self.append(Role::Assistant, &text);
            }
            ChannelEvent::Server(ServerEvent::Info { message }) => {
                tracing::info!(message = %message, "server info");
            }
            ChannelEvent::Server(ServerEvent::Error { message }) => {
                tracing::warn!(message = %message, "server error");
                if self.status == Status::Thinking {
                    self.resume_listening();
                }
            }
            ChannelEvent::Malformed(error) => {
                if self.status == Status::Thinking {
                    tracing::warn!(error = %error, "undecodable reply, listening again");
                    self.resume_listening();
                }
            }
            ChannelEvent::Server(ServerEvent::Unknown) => {}
            ChannelEvent::Closed => {
                tracing::warn!("voice stream disconnected");
                self.update(|s| s.connected = false);
            }
        }
    }

    fn on_restart_due(&mut self, token: u64) {
        if self.pending_restart != Some(token) {
            return;
        }
        self.pending_restart = None;
        if self.status == Status::Listening {
            self.start_capture();
        }
    }

    fn start_capture(&mut self) {
        if self.capture_active || self.playback_active {
            return;
        }
        match self.adapters.capture.start() {
            Ok(()) => self.capture_active = true,
            Err(e) => {
                let kind = CaptureErrorKind::from_error(&e);
                tracing::warn!(error = %e, ?kind, "could not start capture");
                if kind.is_fatal() {
                    self.fail_listening(kind);
                } else {
                    self.schedule_restart();
                }
            }
        }
    }

    /// Abort whether or not an attempt is believed to be running
    fn abort_capture(&mut self) {
        self.adapters.capture.abort();
        self.capture_active = false;
    }

    fn resume_listening(&mut self) {
        self.set_status(Status::Listening);
        self.schedule_restart();
    }

    fn schedule_restart(&mut self) {
        self.restart_seq += 1;
        let token = self.restart_seq;
        self.pending_restart = Some(token);

        let timers = self.timers.clone();
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timers.send(SessionEvent::RestartDue(token));
        });
    }

    fn set_status(&mut self, status: Status) {
        let previous = self.status;
        if previous == status {
            return;
        }
        self.status = status;
        tracing::info!(from = %previous, to = %status, "status");

        if status == Status::Listening {
            self.adapters.sensor.start();
        } else if previous == Status::Listening {
            self.adapters.sensor.stop();
        }

        self.update(|s| {
            s.status = status;
            if status != Status::Listening {
                s.audio_level = 0.0;
            }
        });
    }

    fn append(&mut self, role: Role, text: &str) {
        let conversation_id = self.snapshot.borrow().conversation_id.clone();
        if let Err(e) = self
            .adapters
            .history
            .append_utterance(&conversation_id, role, text)
        {
            tracing::warn!(error = %e, %role, "could not save utterance");
        }
    }

    fn update(&self, change: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            change(snapshot);
            *snapshot != before
        });
    }
}
