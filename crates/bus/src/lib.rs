//! In-process message bus.
//!
//! Channels publish decoded platform messages on the inbound stream; the
//! engine (or any other producer) publishes replies on the outbound stream,
//! and each channel's outbound subscriber picks the ones addressed to it.

pub mod bus;
pub mod handler;
mod topic;

pub use {
    bus::{BusConfig, DEFAULT_HANDOFF_TIMEOUT, DEFAULT_QUEUE_CAPACITY, MessageBus, SubscriptionId},
    chatrelay_common::{InboundMessage, OutboundMessage},
    handler::{FnHandler, MessageHandler, handler_fn},
};
