use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use relay_messaging::{BrokerConfig, DeliveryStream, Message, QueueGroup, StreamConfig, Transport};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::delivery::MemoryDelivery;
use crate::error::Error;
use crate::hub::Hub;
use crate::subject;

/// Hubs reachable through [`Transport::connect`], keyed by `host:port`.
static HUBS: LazyLock<Mutex<HashMap<String, Hub>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Options for the in-memory transport.
#[derive(Clone, Debug, Default)]
pub struct MemoryOptions {
    /// How long a negatively acknowledged stream message waits before it is
    /// offered again.
    pub redelivery_delay: Duration,
}

/// An in-process [`Transport`].
///
/// Connections made with [`Transport::connect`] to the same host and port
/// share one hub, as do connections created with [`sibling`](Self::sibling).
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    closed: Arc<AtomicBool>,
    connection: u64,
    hub: Hub,
    options: MemoryOptions,
}

impl MemoryTransport {
    /// Creates a connection to a fresh, private hub.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(MemoryOptions::default())
    }

    /// Creates a connection to a fresh, private hub with `options`.
    #[must_use]
    pub fn with_options(options: MemoryOptions) -> Self {
        Self::attach(Hub::default(), options)
    }

    /// Opens another connection to the same hub.
    #[must_use]
    pub fn sibling(&self) -> Self {
        Self::attach(self.hub.clone(), self.options.clone())
    }

    /// Negative acknowledgments recorded by the hub, across all connections.
    #[must_use]
    pub fn nak_count(&self) -> u64 {
        self.hub.nak_count()
    }

    /// Acknowledgments recorded by the hub, across all connections.
    #[must_use]
    pub fn ack_count(&self) -> u64 {
        self.hub.ack_count()
    }

    /// The current declaration of stream `name`.
    #[must_use]
    pub fn stream_config(&self, name: &str) -> Option<StreamConfig> {
        self.hub.stream_config(name)
    }

    /// Everything stored in stream `name`, oldest first.
    #[must_use]
    pub fn stream_messages(&self, name: &str) -> Option<Vec<Message>> {
        self.hub.stream_messages(name)
    }

    fn attach(hub: Hub, options: MemoryOptions) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            connection: hub.next_connection(),
            hub,
            options,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;
    type Options = MemoryOptions;
    type Delivery = MemoryDelivery;

    async fn connect(config: &BrokerConfig, options: MemoryOptions) -> Result<Self, Error> {
        config.url()?;
        let key = format!("{}:{}", config.host, config.port);

        let hub = HUBS.lock().entry(key).or_default().clone();
        let transport = Self::attach(hub, options);

        info!(host = %config.host, port = config.port, connection = transport.connection, "connected to in-memory hub");

        Ok(transport)
    }

    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, Error> {
        self.ensure_open()?;
        subject::validate_subject(&message.subject)?;

        let inbox = format!("_INBOX.{}", Uuid::new_v4().simple());
        let (id, mut replies) = self.hub.subscribe(self.connection, &inbox, None);

        let subject = message.subject.clone();
        let delivered = self.hub.publish(&message.with_reply(inbox));

        let outcome = if delivered == 0 {
            Err(Error::NoResponders(subject))
        } else {
            match tokio::time::timeout(timeout, replies.recv()).await {
                Ok(Some(reply)) => Ok(reply.into_message()),
                Ok(None) => Err(Error::Closed),
                Err(_) => Err(Error::TimedOut(subject)),
            }
        };

        self.hub.unsubscribe(id);

        outcome
    }

    async fn publish(&self, message: Message) -> Result<(), Error> {
        self.ensure_open()?;
        subject::validate_subject(&message.subject)?;

        self.hub.publish(&message);

        Ok(())
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<MemoryDelivery>, Error> {
        self.ensure_open()?;
        subject::validate_pattern(subject)?;

        let (_, receiver) =
            self.hub
                .subscribe(self.connection, subject, Some(queue_group.as_str()));

        debug!(subject, %queue_group, "subscribed");

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn add_stream(&self, config: &StreamConfig) -> Result<(), Error> {
        self.ensure_open()?;

        if config.name.is_empty()
            || config
                .name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
        {
            return Err(Error::InvalidStreamName(config.name.clone()));
        }

        for pattern in &config.subjects {
            subject::validate_pattern(pattern)?;
        }

        self.hub.add_stream(config)
    }

    async fn stream_publish(&self, message: Message) -> Result<u64, Error> {
        self.ensure_open()?;
        subject::validate_subject(&message.subject)?;

        self.hub.stream_publish(message)
    }

    async fn stream_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<MemoryDelivery>, Error> {
        self.ensure_open()?;
        subject::validate_pattern(subject)?;

        let receiver = self.hub.stream_subscribe(
            self.connection,
            subject,
            queue_group.as_str(),
            self.options.redelivery_delay,
        )?;

        debug!(subject, %queue_group, "joined consumer");

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn close(&self) -> Result<(), Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.hub.disconnect(self.connection);
            debug!(connection = self.connection, "closed in-memory connection");
        }

        Ok(())
    }
}
