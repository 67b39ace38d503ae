use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// What to tell the transport about a delivery whose handler failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// The message is consumed and will not be redelivered.
    #[default]
    Acknowledge,

    /// The message should be redelivered according to transport policy.
    NegativeAcknowledge,
}

/// An error returned by a message handler.
///
/// Carries a [`Disposition`] and a description. Any `std::error::Error`
/// converts into a `HandlerError` through `?` and is then tagged
/// [`Disposition::Acknowledge`]: a failure that was not explicitly marked for
/// redelivery counts as consumed. Handlers that want a retry construct the
/// error with [`HandlerError::nak`].
///
/// This type does not implement `std::error::Error` itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    disposition: Disposition,
    description: String,
}

impl HandlerError {
    /// Creates an error with an explicit disposition.
    pub fn new(disposition: Disposition, description: impl Into<String>) -> Self {
        Self {
            disposition,
            description: description.into(),
        }
    }

    /// An error after which the message is considered consumed.
    pub fn ack(description: impl Into<String>) -> Self {
        Self::new(Disposition::Acknowledge, description)
    }

    /// An error after which the message should be redelivered.
    pub fn nak(description: impl Into<String>) -> Self {
        Self::new(Disposition::NegativeAcknowledge, description)
    }

    /// The attached disposition.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// The human readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.description)
    }
}

impl<E> From<E> for HandlerError
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::ack(error.to_string())
    }
}

/// Maps a handler error to the acknowledgment decision for its delivery.
#[must_use]
pub const fn classify(error: &HandlerError) -> Disposition {
    error.disposition
}
