use std::{error::Error as StdError, time::Duration};

use crate::channel::ChannelState;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used in lifecycle reports and status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Transport,
    NotRunning,
    LifecycleTimeout,
    Unavailable,
}

/// Typed channel errors shared by every channel and the dispatch bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required adapter settings are missing or malformed. Fatal to `start`
    /// for that channel only.
    #[error("{channel}: configuration error: {message}")]
    Configuration { channel: String, message: String },

    /// A platform call failed.
    #[error("transport error: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// `send` or inbound forwarding attempted outside `Running`.
    #[error("{channel} is not running (state: {state})")]
    NotRunning { channel: String, state: ChannelState },

    /// A worker did not reach the requested lifecycle point in time.
    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    LifecycleTimeout {
        operation: String,
        timeout: Duration,
    },

    /// Operation is currently unavailable (worker gone, queue closed).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn configuration(channel: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            channel: channel.into(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Transport failure without an underlying error value (e.g. HTTP status).
    #[must_use]
    pub fn transport_message(context: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Transport {
            context: context.into(),
            source: message.into(),
        }
    }

    #[must_use]
    pub fn not_running(channel: impl Into<String>, state: ChannelState) -> Self {
        Self::NotRunning {
            channel: channel.into(),
            state,
        }
    }

    #[must_use]
    pub fn lifecycle_timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::LifecycleTimeout {
            operation: operation.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::SerdeJson(_) => ErrorKind::Configuration,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::NotRunning { .. } => ErrorKind::NotRunning,
            Self::LifecycleTimeout { .. } => ErrorKind::LifecycleTimeout,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_channel() {
        let err = Error::configuration("signal", "phone_number is required");
        assert_eq!(
            err.to_string(),
            "signal: configuration error: phone_number is required"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = Error::not_running("signal", ChannelState::Stopped);
        assert_eq!(err.to_string(), "signal is not running (state: stopped)");
    }

    #[test]
    fn transport_message_keeps_context() {
        let err = Error::transport_message("POST /v2/send", "HTTP 400: bad recipient");
        assert_eq!(
            err.to_string(),
            "transport error: POST /v2/send: HTTP 400: bad recipient"
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn timeout_reports_milliseconds() {
        let err = Error::lifecycle_timeout("stop signal worker", Duration::from_secs(5));
        assert_eq!(err.to_string(), "stop signal worker timed out after 5000ms");
    }
}
