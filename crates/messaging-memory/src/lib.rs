//! In-process implementation of the messaging transport.
//!
//! Subjects, queue groups, request-reply and durable streams behave like a
//! single broker node. Negative acknowledgments on stream deliveries redeliver
//! to the next member of the consumer, and every acknowledgment is counted so
//! tests can assert on them.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod delivery;
mod error;
mod hub;
mod transport;

/// Subject wildcard matching.
pub mod subject;

pub use delivery::MemoryDelivery;
pub use error::Error;
pub use transport::{MemoryOptions, MemoryTransport};
