use relay_messaging::{ConfigError, TransportError};
use thiserror::Error;

/// Errors that can occur in the in-memory transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The connection was closed.
    #[error("connection is closed")]
    Closed,

    /// The configuration does not describe a valid address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A subject is empty, has empty tokens or misplaces wildcards.
    #[error("invalid subject `{0}`")]
    InvalidSubject(String),

    /// A stream name is empty or contains whitespace, '.', '*' or '>'.
    #[error("invalid stream name `{0}`")]
    InvalidStreamName(String),

    /// No subscriber was interested in a request.
    #[error("no responders on `{0}`")]
    NoResponders(String),

    /// No stream captures the subject.
    #[error("no stream captures subject `{0}`")]
    NoStream(String),

    /// The subjects of a new stream collide with an existing stream.
    #[error("subjects of stream `{stream}` overlap stream `{other}`")]
    Overlap {
        /// The stream being declared.
        stream: String,
        /// The stream already owning the subjects.
        other: String,
    },

    /// No reply arrived before the deadline.
    #[error("request to `{0}` timed out")]
    TimedOut(String),
}

impl TransportError for Error {
    fn is_no_reply(&self) -> bool {
        matches!(self, Self::NoResponders(_) | Self::TimedOut(_))
    }
}
