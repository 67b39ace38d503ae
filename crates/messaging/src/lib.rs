//! Transport-agnostic messaging gateway.
//!
//! A [`Broker`] owns a [`Transport`] connection, the streams declared on it, and
//! a set of long-running handlers. Handlers talk to the transport through a
//! [`MessagingConnection`], which offers request-reply, queue-group subscribe,
//! durable stream publish and durable stream subscribe. Every message leaving
//! or entering the process crosses the [`InterceptorChain`], and every failed
//! delivery is classified into an acknowledgment decision by [`classify`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The broker owns the connection, stream registry and handlers.
pub mod broker;

/// Handler error classification into acknowledgment decisions.
pub mod classify;

/// Connection settings.
pub mod config;

/// The four interaction patterns, wrapped in interceptors.
pub mod connection;

/// Request-scoped values threaded through interceptors and handlers.
pub mod context;

mod error;

/// Ordered message transforms on the publish and subscribe paths.
pub mod interceptor;

/// Messages exchanged over the transport.
pub mod message;

/// Queue-group naming.
pub mod queue_group;

/// The seam between the gateway and a concrete broker.
pub mod transport;

pub use broker::{Broker, BrokerHandler};
pub use classify::{Disposition, HandlerError, classify};
pub use config::{BrokerConfig, ConfigError};
pub use connection::{MessageHandler, MessagingConnection, Subscription, SubscriptionState};
pub use context::Context;
pub use error::{BoxError, Error};
pub use interceptor::{
    HeaderInterceptor, Interceptor, InterceptorChain, PublishInterceptor, SubscribeInterceptor,
    TraceId, TraceInterceptor,
};
pub use message::{Headers, Message};
pub use queue_group::{InvalidQueueGroup, QueueGroup};
pub use transport::{Delivery, DeliveryStream, StreamConfig, Transport, TransportError};
