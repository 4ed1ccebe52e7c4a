//! Signal channel backed by a signal-cli REST service.
//!
//! The REST client and its receive websocket run on a dedicated worker thread
//! behind a [`DispatchBridge`](chatrelay_channels::DispatchBridge); the
//! [`SignalChannel`] translates between that worker and the message bus.

pub mod access;
pub mod channel;
pub mod client;
pub mod config;
pub mod envelope;
pub mod markdown;
pub mod reply_context;

/// Name the Signal channel registers under and routes outbound messages by.
pub const CHANNEL_NAME: &str = "signal";

pub use {
    access::{AccessDenied, check_access},
    channel::SignalChannel,
    client::{SignalCommand, SignalConnector, SignalRestClient},
    config::{SignalAccountConfig, ServiceEndpoint},
    envelope::{SignalEvent, group_target},
    markdown::markdown_to_signal,
    reply_context::{ReplyContext, ReplyHandle},
};
