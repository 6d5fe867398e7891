//! Voice session: wires the adapters to the turn-taking machine
//!
//! Adapter events arrive on their own channels and are fed to the machine one
//! at a time from a single loop, so transitions never interleave.

pub mod machine;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::channel::{ChannelClient, ChannelEvent};
use crate::config::Config;
use crate::history::{HistoryStore, JsonHistoryStore, new_conversation_id};
use crate::voice::{
    AudioCapture, AudioPlayback, CaptureEvent, LevelMeter, MicTap, OutputEvent,
    RecognizerCapture, SpeechToText, SynthesizedOutput, TextToSpeech,
};
use crate::Result;

pub use machine::{Adapters, Notice, SessionEvent, SessionSnapshot, Status, TurnMachine};

/// Senders handed to adapters so their events reach the session
#[derive(Debug, Clone)]
pub struct SessionWiring {
    pub capture: mpsc::UnboundedSender<CaptureEvent>,
    pub output: mpsc::UnboundedSender<OutputEvent>,
    pub channel: mpsc::UnboundedSender<ChannelEvent>,
    pub levels: mpsc::UnboundedSender<f32>,
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<SessionEvent>,
    capture: mpsc::UnboundedReceiver<CaptureEvent>,
    output: mpsc::UnboundedReceiver<OutputEvent>,
    channel: mpsc::UnboundedReceiver<ChannelEvent>,
    levels: mpsc::UnboundedReceiver<f32>,
    timers: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Assembles a session from adapters built against its [`SessionWiring`]
pub struct SessionBuilder {
    wiring: SessionWiring,
    inbox: Inbox,
    commands: mpsc::UnboundedSender<SessionEvent>,
    timers: mpsc::UnboundedSender<SessionEvent>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create the session's event channels
    #[must_use]
    pub fn new() -> Self {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (capture_tx, capture) = mpsc::unbounded_channel();
        let (output_tx, output) = mpsc::unbounded_channel();
        let (channel_tx, channel) = mpsc::unbounded_channel();
        let (levels_tx, levels) = mpsc::unbounded_channel();
        let (timers_tx, timers) = mpsc::unbounded_channel();

        Self {
            wiring: SessionWiring {
                capture: capture_tx,
                output: output_tx,
                channel: channel_tx,
                levels: levels_tx,
            },
            inbox: Inbox {
                commands,
                capture,
                output,
                channel,
                levels,
                timers,
            },
            commands: commands_tx,
            timers: timers_tx,
        }
    }

    /// Senders for adapter construction
    #[must_use]
    pub const fn wiring(&self) -> &SessionWiring {
        &self.wiring
    }

    /// Finish the session around `adapters`
    #[must_use]
    pub fn build(
        self,
        adapters: Adapters,
        restart_delay: Duration,
        conversation_id: String,
    ) -> (Session, SessionHandle) {
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let machine = TurnMachine::new(
            adapters,
            restart_delay,
            conversation_id,
            self.timers,
            notices_tx,
        );
        let handle = SessionHandle {
            commands: self.commands,
            snapshots: machine.subscribe(),
            notices,
        };
        let session = Session {
            machine,
            inbox: self.inbox,
        };
        (session, handle)
    }
}

/// Presentation's side of a session
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl SessionHandle {
    /// Press the microphone control
    pub fn toggle_microphone(&self) {
        let _ = self.commands.send(SessionEvent::ToggleMicrophone);
    }

    /// Leave the session
    pub fn exit(&self) {
        let _ = self.commands.send(SessionEvent::Exit);
    }

    /// Session snapshots
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the next user-visible notice
    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }
}

/// A running voice session
pub struct Session {
    machine: TurnMachine,
    inbox: Inbox,
}

impl Session {
    /// Build a session with the real devices and services from `config`
    ///
    /// The conversation continues `requested_conversation` when given, else
    /// the most recent stored conversation, else a new one. A voice stream
    /// that cannot be reached leaves the session disconnected rather than
    /// failing it.
    ///
    /// # Errors
    ///
    /// Returns error if an audio device or a speech provider is unavailable
    pub async fn connect(
        config: &Config,
        requested_conversation: Option<&str>,
    ) -> Result<(Self, SessionHandle)> {
        let builder = SessionBuilder::new();
        let wiring = builder.wiring().clone();

        let tap = MicTap::new(config.sensor.fft_size.max(2048));
        let microphone = AudioCapture::new(tap.clone())?;

        let recognizer = SpeechToText::from_config(&config.stt)?;
        let capture = RecognizerCapture::new(
            Arc::new(recognizer),
            tap.clone(),
            config.capture.clone(),
            config.session.capture_language.clone(),
            wiring.capture,
        );

        let engine = TextToSpeech::from_config(&config.tts, config.output.voices.clone())?;
        let output = SynthesizedOutput::new(
            Arc::new(engine),
            Arc::new(AudioPlayback::new()?),
            config.output.clone(),
            wiring.output,
        );

        let channel = match ChannelClient::connect(&config.server.url, wiring.channel).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(error = %e, url = %config.server.url, "continuing without voice stream");
                ChannelClient::offline()
            }
        };

        let sensor = LevelMeter::new(tap, config.sensor.clone(), wiring.levels);

        let history = JsonHistoryStore::new(config.history.path.clone());
        let conversation_id = history
            .resolve_active_conversation_id(requested_conversation)
            .unwrap_or_else(new_conversation_id);
        tracing::info!(conversation_id = %conversation_id, "voice session ready");

        let adapters = Adapters {
            microphone: Box::new(microphone),
            capture: Box::new(capture),
            output: Box::new(output),
            channel: Box::new(channel),
            sensor: Box::new(sensor),
            history: Box::new(history),
        };

        Ok(builder.build(adapters, config.session.restart_delay, conversation_id))
    }

    /// The machine driven by this session
    #[must_use]
    pub const fn machine(&self) -> &TurnMachine {
        &self.machine
    }

    /// Feed events to the machine until the session is exited
    ///
    /// Dropping every [`SessionHandle`] counts as exiting.
    pub async fn run(mut self) -> TurnMachine {
        loop {
            let inbox = &mut self.inbox;
            let event = tokio::select! {
                command = inbox.commands.recv() => command.unwrap_or(SessionEvent::Exit),
                Some(event) = inbox.capture.recv() => SessionEvent::Capture(event),
                Some(event) = inbox.output.recv() => SessionEvent::Output(event),
                Some(event) = inbox.channel.recv() => SessionEvent::Channel(event),
                Some(level) = inbox.levels.recv() => SessionEvent::Level(level),
                Some(event) = inbox.timers.recv() => event,
            };

            self.machine.handle(event);
            if self.machine.is_torn_down() {
                break;
            }
        }
        self.machine
    }
}
