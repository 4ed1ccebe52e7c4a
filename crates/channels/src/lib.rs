//! Channel contract and the shared machinery channels are built from.
//!
//! Each chat platform implements [`Channel`]; a [`ChannelManager`] starts and
//! stops them together. Platforms whose clients must live on their own event
//! loop run behind a [`DispatchBridge`].

pub mod bridge;
pub mod channel;
pub mod error;
pub mod gating;
pub mod lifecycle;
pub mod manager;
pub mod route;
pub mod unavailable;

pub use {
    bridge::{
        BridgeHandle, BridgeTimeouts, DispatchBridge, EventSink, WorkerClient, WorkerConnector,
        WorkerEvent, WorkerEvents,
    },
    channel::{Channel, ChannelState, ChannelStatus},
    error::{Error, ErrorKind, Result},
    gating::{AllowList, is_allowed},
    lifecycle::{Lifecycle, StartGate, StopGate},
    manager::{ChannelManager, ChannelOutcome, LifecycleReport},
    route::OutboundRoute,
    unavailable::UnavailableChannel,
};
