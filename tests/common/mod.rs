//! Shared test utilities: scripted fake adapters

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::mpsc;

use apex_voice::channel::{ChannelEvent, ClientEvent, DuplexChannel, ServerEvent};
use apex_voice::history::{HistoryStore, Role};
use apex_voice::session::{Adapters, Notice, SessionEvent, Status, TurnMachine};
use apex_voice::voice::{
    CaptureEvent, LevelSensor, Microphone, OutputEvent, SpeechCapture, SpeechOutput,
};
use apex_voice::{Error, Result};

pub const RESTART_DELAY: Duration = Duration::from_millis(50);
pub const CONVERSATION_ID: &str = "conv-1";

/// Everything the fakes observed, in one place
#[derive(Debug, Default)]
pub struct Recorder {
    pub log: Vec<String>,

    pub mic_open: bool,
    pub mic_opens: usize,
    pub mic_closes: usize,
    pub mic_denied: bool,

    pub capture_running: bool,
    pub capture_starts: usize,
    pub capture_stops: usize,
    pub capture_aborts: usize,
    pub capture_start_error: Option<fn() -> Error>,

    pub speaking: bool,
    pub spoken: Vec<(String, Option<String>)>,
    pub cancels: usize,

    pub channel_open: bool,
    pub sent: Vec<ClientEvent>,
    pub channel_closes: usize,

    pub sensor_running: bool,
    pub sensor_starts: usize,
    pub sensor_stops: usize,

    pub history: Vec<(String, Role, String)>,
}

impl Recorder {
    pub fn count(&self, entry: &str) -> usize {
        self.log.iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log.iter().position(|e| e == entry)
    }

    pub fn last_position(&self, entry: &str) -> Option<usize> {
        self.log.iter().rposition(|e| e == entry)
    }

    pub fn text_inputs(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|e| match e {
                ClientEvent::TextInput { text } => Some(text.clone()),
                ClientEvent::Start => None,
            })
            .collect()
    }
}

pub type Shared = Rc<RefCell<Recorder>>;

pub struct FakeMicrophone(pub Shared);

impl Microphone for FakeMicrophone {
    fn open(&mut self) -> Result<()> {
        let mut rec = self.0.borrow_mut();
        if rec.mic_denied {
            return Err(Error::Microphone("permission denied".to_string()));
        }
        rec.mic_open = true;
        rec.mic_opens += 1;
        rec.log.push("mic.open".to_string());
        Ok(())
    }

    fn close(&mut self) {
        let mut rec = self.0.borrow_mut();
        if rec.mic_open {
            rec.mic_open = false;
            rec.mic_closes += 1;
            rec.log.push("mic.close".to_string());
        }
    }

    fn is_open(&self) -> bool {
        self.0.borrow().mic_open
    }
}

pub struct FakeCapture(pub Shared);

impl SpeechCapture for FakeCapture {
    fn start(&mut self) -> Result<()> {
        let mut rec = self.0.borrow_mut();
        if let Some(error) = rec.capture_start_error {
            return Err(error());
        }
        assert!(!rec.speaking, "capture started while playback active");
        rec.capture_running = true;
        rec.capture_starts += 1;
        rec.log.push("capture.start".to_string());
        Ok(())
    }

    fn stop(&mut self) {
        let mut rec = self.0.borrow_mut();
        rec.capture_running = false;
        rec.capture_stops += 1;
        rec.log.push("capture.stop".to_string());
    }

    fn abort(&mut self) {
        let mut rec = self.0.borrow_mut();
        rec.capture_running = false;
        rec.capture_aborts += 1;
        rec.log.push("capture.abort".to_string());
    }
}

pub struct FakeOutput(pub Shared);

impl SpeechOutput for FakeOutput {
    fn speak(&mut self, text: &str, language: Option<&str>) {
        let mut rec = self.0.borrow_mut();
        rec.speaking = true;
        rec.spoken
            .push((text.to_string(), language.map(str::to_string)));
        rec.log.push("speak".to_string());
    }

    fn cancel(&mut self) {
        let mut rec = self.0.borrow_mut();
        rec.speaking = false;
        rec.cancels += 1;
    }
}

pub struct FakeChannel(pub Shared);

impl DuplexChannel for FakeChannel {
    fn send(&mut self, event: ClientEvent) -> Result<()> {
        let mut rec = self.0.borrow_mut();
        if !rec.channel_open {
            return Err(Error::Channel("connection closed".to_string()));
        }
        rec.log.push("send".to_string());
        rec.sent.push(event);
        Ok(())
    }

    fn close(&mut self) {
        let mut rec = self.0.borrow_mut();
        rec.channel_open = false;
        rec.channel_closes += 1;
    }

    fn is_open(&self) -> bool {
        self.0.borrow().channel_open
    }
}

pub struct FakeSensor(pub Shared);

impl LevelSensor for FakeSensor {
    fn start(&mut self) {
        let mut rec = self.0.borrow_mut();
        rec.sensor_running = true;
        rec.sensor_starts += 1;
    }

    fn stop(&mut self) {
        let mut rec = self.0.borrow_mut();
        if rec.sensor_running {
            rec.sensor_stops += 1;
        }
        rec.sensor_running = false;
    }
}

pub struct FakeHistory(pub Shared);

impl HistoryStore for FakeHistory {
    fn append_utterance(&mut self, conversation_id: &str, role: Role, text: &str) -> Result<()> {
        let mut rec = self.0.borrow_mut();
        rec.log.push(format!("history.{role}"));
        rec.history
            .push((conversation_id.to_string(), role, text.to_string()));
        Ok(())
    }

    fn resolve_active_conversation_id(&self, requested: Option<&str>) -> Option<String> {
        requested.map(str::to_string)
    }
}

/// A fresh recorder with an open channel
pub fn recorder() -> Shared {
    Rc::new(RefCell::new(Recorder {
        channel_open: true,
        ..Recorder::default()
    }))
}

/// Fake adapters sharing one recorder
pub fn adapters(rec: &Shared) -> Adapters {
    Adapters {
        microphone: Box::new(FakeMicrophone(Rc::clone(rec))),
        capture: Box::new(FakeCapture(Rc::clone(rec))),
        output: Box::new(FakeOutput(Rc::clone(rec))),
        channel: Box::new(FakeChannel(Rc::clone(rec))),
        sensor: Box::new(FakeSensor(Rc::clone(rec))),
        history: Box::new(FakeHistory(Rc::clone(rec))),
    }
}

/// A machine wired to fakes, driven by hand
pub struct Harness {
    pub machine: TurnMachine,
    pub rec: Shared,
    pub timers: mpsc::UnboundedReceiver<SessionEvent>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(configure: impl FnOnce(&mut Recorder)) -> Self {
        let rec = recorder();
        configure(&mut rec.borrow_mut());

        let (timers_tx, timers) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();
        let machine = TurnMachine::new(
            adapters(&rec),
            RESTART_DELAY,
            CONVERSATION_ID.to_string(),
            timers_tx,
            notices_tx,
        );

        Self {
            machine,
            rec,
            timers,
            notices,
        }
    }

    pub fn send(&mut self, event: SessionEvent) {
        self.machine.handle(event);
        assert!(
            !(self.machine.capture_active() && self.machine.playback_active()),
            "machine reports capture and playback together"
        );
        let rec = self.rec.borrow();
        assert!(
            !(rec.capture_running && rec.speaking),
            "adapters capturing and speaking together"
        );
    }

    pub fn status(&self) -> Status {
        self.machine.status()
    }

    pub fn toggle(&mut self) {
        self.send(SessionEvent::ToggleMicrophone);
    }

    pub fn capture(&mut self, event: CaptureEvent) {
        self.send(SessionEvent::Capture(event));
    }

    pub fn output(&mut self, event: OutputEvent) {
        if matches!(event, OutputEvent::Ended | OutputEvent::Error(_)) {
            self.rec.borrow_mut().speaking = false;
        }
        self.send(SessionEvent::Output(event));
    }

    /// Deliver a raw server frame the way the channel client would
    pub fn server(&mut self, json: &str) {
        let event = ServerEvent::parse(json).expect("test frame should parse");
        self.send(SessionEvent::Channel(ChannelEvent::Server(event)));
    }

    /// Let every pending restart timer fire and feed it back
    pub async fn fire_timers(&mut self) {
        tokio::time::sleep(RESTART_DELAY + Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        while let Ok(event) = self.timers.try_recv() {
            self.send(event);
        }
    }

    /// idle → listening
    pub fn listen(&mut self) {
        self.toggle();
        assert_eq!(self.status(), Status::Listening);
    }

    /// idle → listening → thinking with `text`
    pub fn think(&mut self, text: &str) {
        self.listen();
        self.capture(CaptureEvent::Final(text.to_string()));
        assert_eq!(self.status(), Status::Thinking);
    }

    /// idle → … → speaking `reply`
    pub fn speak(&mut self, user: &str, reply: &str) {
        self.think(user);
        self.server(&format!(r#"{{"type":"transcript","text":"{reply}"}}"#));
        assert_eq!(self.status(), Status::Speaking);
    }
}
