//! NATS implementation of the messaging transport.
//!
//! Core NATS carries request-reply and queue subscriptions; JetStream carries
//! durable streams.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod delivery;
mod error;
mod headers;
mod transport;

pub use delivery::NatsDelivery;
pub use error::Error;
pub use transport::{NatsOptions, NatsTransport};
