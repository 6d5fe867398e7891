//! WebSocket client for the voice stream
//!
//! One connection per session. Frames are decoded on a reader task and
//! forwarded as [`ChannelEvent`]s, undecodable ones included; outgoing
//! events go through a writer task.
//! There is no reconnection: once the socket closes the client stays closed.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::{Error, Result};

use super::protocol::{ClientEvent, ServerEvent};

/// Events delivered by a duplex channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A decoded server message
    Server(ServerEvent),
    /// A text frame that could not be decoded
    Malformed(String),
    /// The connection is gone
    Closed,
}

/// Capability: a bidirectional message connection
pub trait DuplexChannel {
    /// Queue an event for sending
    ///
    /// # Errors
    ///
    /// Returns error if the connection is closed
    fn send(&mut self, event: ClientEvent) -> Result<()>;

    /// Close the connection; further sends fail
    fn close(&mut self);

    /// Whether the connection is still usable
    fn is_open(&self) -> bool;
}

/// Duplex channel over a WebSocket
pub struct ChannelClient {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
}

impl ChannelClient {
    /// A client that never connected; every send fails
    #[must_use]
    pub const fn offline() -> Self {
        Self {
            outgoing: None,
            reader: None,
        }
    }

    /// Connect to `url` and send the `start` event
    ///
    /// Server events are delivered on `events`, followed by
    /// [`ChannelEvent::Closed`] when the server goes away.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    pub async fn connect(url: &str, events: mpsc::UnboundedSender<ChannelEvent>) -> Result<Self> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            tracing::error!(url, error = %e, "voice stream connection failed");
            Error::WebSocket(Box::new(e))
        })?;
        tracing::info!(url, "connected to voice stream");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "voice stream send failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerEvent::parse(&text) {
                        Ok(ServerEvent::Unknown) => {
                            tracing::debug!(payload = %text, "ignoring unknown server event");
                        }
                        Ok(event) => {
                            if events.send(ChannelEvent::Server(event)).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "malformed server event");
                            if events.send(ChannelEvent::Malformed(e.to_string())).is_err() {
                                return;
                            }
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "voice stream closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "voice stream receive failed");
                        break;
                    }
                }
            }
            let _ = events.send(ChannelEvent::Closed);
        });

        let mut client = Self {
            outgoing: Some(out_tx),
            reader: Some(reader),
        };
        client.send(ClientEvent::Start)?;
        Ok(client)
    }
}

impl DuplexChannel for ChannelClient {
    fn send(&mut self, event: ClientEvent) -> Result<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .filter(|_| self.reader.as_ref().is_some_and(|r| !r.is_finished()))
            .ok_or_else(|| Error::Channel("connection closed".to_string()))?;

        tracing::debug!(?event, "sending client event");
        outgoing
            .send(Message::Text(event.to_json()?))
            .map_err(|_| Error::Channel("connection closed".to_string()))
    }

    fn close(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Message::Close(None));
            tracing::debug!("voice stream closing");
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn is_open(&self) -> bool {
        self.outgoing.as_ref().is_some_and(|tx| !tx.is_closed())
            && self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.close();
    }
}
