use std::error::Error as StdError;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::BrokerConfig;
use crate::message::Message;
use crate::queue_group::QueueGroup;

/// Marker trait for transport errors.
pub trait TransportError: StdError + Send + Sync + 'static {
    /// Whether a request failed because no reply arrived, either because the
    /// deadline passed or because nobody was listening.
    fn is_no_reply(&self) -> bool;
}

/// Declaration of a durable stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Unique stream name.
    pub name: String,

    /// Subject patterns the stream captures.
    pub subjects: Vec<String>,
}

impl StreamConfig {
    /// Creates a declaration. No subjects means `<name>.>`.
    pub fn new<N, I, S>(name: N, subjects: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let mut subjects: Vec<String> = subjects.into_iter().map(Into::into).collect();

        if subjects.is_empty() {
            subjects.push(format!("{name}.>"));
        }

        Self { name, subjects }
    }
}

/// One inbound message together with its acknowledgment handle.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    /// The error type for acknowledgments.
    type Error: TransportError;

    /// The message as received.
    fn message(&self) -> &Message;

    /// Tells the transport the message was consumed.
    async fn ack(&self) -> Result<(), Self::Error>;

    /// Tells the transport the message should be redelivered.
    async fn nak(&self) -> Result<(), Self::Error>;
}

/// Deliveries of one subscription. Ends when the subscription is torn down.
pub type DeliveryStream<D> = BoxStream<'static, D>;

/// A broker connection offering the primitives the gateway is built on.
///
/// Implementations must be cheap to clone and safe to use from many tasks at
/// once; clones share one underlying connection.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// Transport specific connection options.
    type Options: Clone + Debug + Default + Send + Sync + 'static;

    /// The delivery type handed out by subscriptions.
    type Delivery: Delivery<Error = Self::Error>;

    /// Connects to the broker described by `config`. Does not retry.
    async fn connect(config: &BrokerConfig, options: Self::Options) -> Result<Self, Self::Error>;

    /// Sends `message` and waits up to `timeout` for a single reply.
    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, Self::Error>;

    /// Sends `message` without waiting for anything.
    async fn publish(&self, message: Message) -> Result<(), Self::Error>;

    /// Joins `queue_group` on `subject`.
    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<Self::Delivery>, Self::Error>;

    /// Creates the stream, or reconfigures it if the name is taken.
    async fn add_stream(&self, config: &StreamConfig) -> Result<(), Self::Error>;

    /// Appends `message` to the stream capturing its subject and returns the
    /// sequence number it was stored under.
    async fn stream_publish(&self, message: Message) -> Result<u64, Self::Error>;

    /// Joins the durable consumer `queue_group` reading `subject` from the
    /// stream that captures it.
    async fn stream_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<Self::Delivery>, Self::Error>;

    /// Tears the connection down. Open delivery streams end.
    async fn close(&self) -> Result<(), Self::Error>;
}
