use std::time::Duration;

use relay_messaging::{ConfigError, TransportError};
use thiserror::Error;

/// Errors that can occur talking to a NATS server.
#[derive(Debug, Error)]
pub enum Error {
    /// Acknowledging a stream message failed.
    #[error("failed to acknowledge message: {0}")]
    Ack(String),

    /// Creating or updating a stream failed.
    #[error("failed to declare stream `{stream}`: {reason}")]
    AddStream {
        /// The stream name.
        stream: String,
        /// What the server said.
        reason: String,
    },

    /// The configuration does not describe a valid address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The server could not be reached.
    #[error("failed to connect: {0}")]
    Connect(async_nats::ConnectErrorKind),

    /// Creating or binding a durable consumer failed.
    #[error("failed to create consumer: {0}")]
    Consumer(async_nats::jetstream::stream::ConsumerErrorKind),

    /// Flushing pending messages on close failed.
    #[error("failed to flush connection: {0}")]
    Flush(String),

    /// Opening the message stream of a consumer failed.
    #[error("failed to read consumer messages: {0}")]
    Messages(async_nats::jetstream::consumer::StreamErrorKind),

    /// No stream captures the subject.
    #[error("no stream captures subject `{0}`")]
    NoStream(String),

    /// Publishing failed.
    #[error("failed to publish: {0}")]
    Publish(async_nats::client::PublishErrorKind),

    /// A request failed.
    #[error("request failed: {0}")]
    Request(async_nats::client::RequestErrorKind),

    /// Looking up a stream failed.
    #[error("failed to look up stream: {0}")]
    Stream(String),

    /// Appending to a stream failed.
    #[error("failed to append to stream: {0}")]
    StreamPublish(async_nats::jetstream::context::PublishErrorKind),

    /// Subscribing failed.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),

    /// No reply arrived before the deadline.
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
}

impl TransportError for Error {
    fn is_no_reply(&self) -> bool {
        matches!(
            self,
            Self::TimedOut(_)
                | Self::Request(
                    async_nats::client::RequestErrorKind::TimedOut
                        | async_nats::client::RequestErrorKind::NoResponders
                )
        )
    }
}
