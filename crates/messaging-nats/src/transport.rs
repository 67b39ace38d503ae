use std::time::Duration;

use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::stream::Config as NatsStreamConfig;
use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use futures::StreamExt;
use relay_messaging::{
    BrokerConfig, DeliveryStream, Message, QueueGroup, StreamConfig, Transport,
};
use tracing::{debug, info, warn};

use crate::delivery::{self, NatsDelivery};
use crate::error::Error;
use crate::headers;

/// Server error text when a stream name is taken.
const STREAM_NAME_IN_USE: &str = "stream name already in use";

/// Options for NATS connections.
#[derive(Clone, Debug)]
pub struct NatsOptions {
    /// How long to wait for the initial connection.
    pub connection_timeout: Duration,

    /// Client name reported to the server.
    pub name: Option<String>,
}

impl Default for NatsOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            name: None,
        }
    }
}

/// A [`Transport`] over core NATS and JetStream.
///
/// Request-reply and queue subscriptions use core NATS. Streams are JetStream
/// streams, and stream subscriptions are durable pull consumers named after
/// the queue group, so every process joining the group shares one consumer.
#[derive(Clone, Debug)]
pub struct NatsTransport {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsTransport {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());

        Self { client, jetstream }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// The JetStream context.
    #[must_use]
    pub const fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }
}

#[async_trait]
impl Transport for NatsTransport {
    type Error = Error;
    type Options = NatsOptions;
    type Delivery = NatsDelivery;

    async fn connect(config: &BrokerConfig, options: NatsOptions) -> Result<Self, Error> {
        let url = config.url()?;

        let mut connect_options =
            ConnectOptions::new().connection_timeout(options.connection_timeout);
        if let Some(name) = &options.name {
            connect_options = connect_options.name(name);
        }

        let client = connect_options
            .connect(url.as_str())
            .await
            .map_err(|error| Error::Connect(error.kind()))?;

        info!(host = %config.host, port = config.port, cluster_id = %config.cluster_id, "connected to nats");

        Ok(Self::new(client))
    }

    async fn request(&self, message: Message, timeout: Duration) -> Result<Message, Error> {
        let Message {
            subject,
            payload,
            headers,
            ..
        } = message;

        let request = async move {
            match headers {
                Some(headers) => {
                    self.client
                        .request_with_headers(subject, headers::to_nats(&headers), payload)
                        .await
                }
                None => self.client.request(subject, payload).await,
            }
        };

        let reply = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| Error::TimedOut(timeout))?
            .map_err(|error| Error::Request(error.kind()))?;

        Ok(delivery::convert(&reply))
    }

    async fn publish(&self, message: Message) -> Result<(), Error> {
        let Message {
            subject,
            payload,
            headers,
            ..
        } = message;

        let result = match headers {
            Some(headers) => {
                self.client
                    .publish_with_headers(subject, headers::to_nats(&headers), payload)
                    .await
            }
            None => self.client.publish(subject, payload).await,
        };

        result.map_err(|error| Error::Publish(error.kind()))
    }

    async fn queue_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<NatsDelivery>, Error> {
        let subscriber = self
            .client
            .queue_subscribe(subject.to_owned(), queue_group.to_string())
            .await
            .map_err(|error| Error::Subscribe(error.to_string()))?;

        debug!(subject, %queue_group, "subscribed");

        Ok(subscriber
            .map(|message| NatsDelivery::core(&message))
            .boxed())
    }

    async fn add_stream(&self, config: &StreamConfig) -> Result<(), Error> {
        let stream_config = NatsStreamConfig {
            name: config.name.clone(),
            subjects: config.subjects.clone(),
            ..Default::default()
        };

        match self.jetstream.create_stream(stream_config.clone()).await {
            Ok(_) => {
                debug!(stream = %config.name, "created stream");
                Ok(())
            }
            Err(error) if error.to_string().contains(STREAM_NAME_IN_USE) => {
                self.jetstream
                    .update_stream(stream_config)
                    .await
                    .map_err(|error| Error::AddStream {
                        stream: config.name.clone(),
                        reason: error.to_string(),
                    })?;

                debug!(stream = %config.name, "updated stream");
                Ok(())
            }
            Err(error) => Err(Error::AddStream {
                stream: config.name.clone(),
                reason: error.to_string(),
            }),
        }
    }

    async fn stream_publish(&self, message: Message) -> Result<u64, Error> {
        let Message {
            subject,
            payload,
            headers,
            ..
        } = message;

        let ack = match headers {
            Some(headers) => {
                self.jetstream
                    .publish_with_headers(subject, headers::to_nats(&headers), payload)
                    .await
            }
            None => self.jetstream.publish(subject, payload).await,
        }
        .map_err(|error| Error::StreamPublish(error.kind()))?
        .await
        .map_err(|error| Error::StreamPublish(error.kind()))?;

        Ok(ack.sequence)
    }

    async fn stream_subscribe(
        &self,
        subject: &str,
        queue_group: &QueueGroup,
    ) -> Result<DeliveryStream<NatsDelivery>, Error> {
        let stream_name = self
            .jetstream
            .stream_by_subject(subject)
            .await
            .map_err(|_| Error::NoStream(subject.to_owned()))?;

        let stream = self
            .jetstream
            .get_stream(&stream_name)
            .await
            .map_err(|error| Error::Stream(error.to_string()))?;

        let consumer = stream
            .get_or_create_consumer(
                queue_group.as_str(),
                PullConsumerConfig {
                    durable_name: Some(queue_group.to_string()),
                    filter_subject: subject.to_owned(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|error| Error::Consumer(error.kind()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|error| Error::Messages(error.kind()))?;

        debug!(stream = %stream_name, subject, %queue_group, "joined consumer");

        Ok(messages
            .filter_map(|message| async move {
                match message {
                    Ok(message) => Some(NatsDelivery::jetstream(message)),
                    Err(error) => {
                        warn!(%error, "failed to receive stream message");
                        None
                    }
                }
            })
            .boxed())
    }

    async fn close(&self) -> Result<(), Error> {
        self.client
            .flush()
            .await
            .map_err(|error| Error::Flush(error.to_string()))?;

        debug!("flushed nats connection");

        Ok(())
    }
}
