//! Duplex channel to the assistant service

mod client;
mod protocol;

pub use client::{ChannelClient, ChannelEvent, DuplexChannel};
pub use protocol::{ClientEvent, STATUS_THINKING, ServerEvent};
