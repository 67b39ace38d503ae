use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Boxed error returned by broker handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the broker and the messaging connection.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: TransportError,
{
    /// The configuration does not describe a valid broker address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The transport could not be reached.
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] E),

    /// A stream could not be created or updated.
    #[error("failed to declare stream `{stream}`: {source}")]
    AddStream {
        /// The stream name.
        stream: String,
        /// The transport failure.
        #[source]
        source: E,
    },

    /// Closing the transport failed.
    #[error("failed to close connection: {0}")]
    Close(#[source] E),

    /// A message subject was empty.
    #[error("message subject must not be empty")]
    EmptySubject,

    /// A handler returned an error from `serve`.
    #[error("handler `{name}` failed: {source}")]
    Handler {
        /// The handler name.
        name: String,
        /// What the handler returned.
        #[source]
        source: BoxError,
    },

    /// A handler panicked or was aborted.
    #[error("handler `{name}` did not run to completion")]
    HandlerAborted {
        /// The handler name.
        name: String,
    },

    /// Sending a message failed.
    #[error("failed to publish to `{subject}`: {source}")]
    Publish {
        /// The subject.
        subject: String,
        /// The transport failure.
        #[source]
        source: E,
    },

    /// A request failed for a reason other than a missing reply.
    #[error("request to `{subject}` failed: {source}")]
    Request {
        /// The subject.
        subject: String,
        /// The transport failure.
        #[source]
        source: E,
    },

    /// Appending to a stream failed.
    #[error("failed to append to `{subject}`: {source}")]
    StreamPublish {
        /// The subject.
        subject: String,
        /// The transport failure.
        #[source]
        source: E,
    },

    /// A subscription could not be registered.
    #[error("failed to subscribe to `{subject}`: {source}")]
    Subscribe {
        /// The subject.
        subject: String,
        /// The transport failure.
        #[source]
        source: E,
    },

    /// No reply arrived in time, or nobody was listening.
    #[error("no reply from `{subject}` within {timeout:?}")]
    Timeout {
        /// The subject.
        subject: String,
        /// The deadline that passed.
        timeout: Duration,
    },
}
