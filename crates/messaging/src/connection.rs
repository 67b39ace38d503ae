use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::classify::{Disposition, HandlerError, classify};
use crate::context::Context;
use crate::error::Error;
use crate::interceptor::InterceptorChain;
use crate::message::Message;
use crate::queue_group::QueueGroup;
use crate::transport::{Delivery, DeliveryStream, Transport, TransportError};

/// Processes the payload of one delivery.
///
/// Implemented for async closures `Fn(Context, Bytes) -> Result<Bytes, HandlerError>`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one payload. The returned bytes become the reply, if the
    /// delivery asked for one.
    async fn handle(&self, context: Context, payload: Bytes) -> Result<Bytes, HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Context, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send + 'static,
{
    async fn handle(&self, context: Context, payload: Bytes) -> Result<Bytes, HandlerError> {
        (self)(context, payload).await
    }
}

/// Lifecycle of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered with the transport, dispatch not yet running.
    Created,

    /// Dispatching deliveries to the handler.
    Active,

    /// Torn down. No further deliveries.
    Closed,
}

/// Handle to a running subscription.
#[derive(Clone, Debug)]
pub struct Subscription {
    subject: String,
    queue_group: QueueGroup,
    state: watch::Receiver<SubscriptionState>,
    stop: CancellationToken,
}

impl Subscription {
    /// The subscribed subject pattern.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The queue group this subscription competes in.
    #[must_use]
    pub const fn queue_group(&self) -> &QueueGroup {
        &self.queue_group
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Stops dispatching. Handlers already running finish.
    pub fn close(&self) {
        self.stop.cancel();
    }

    /// Waits until the subscription is closed.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == SubscriptionState::Closed)
            .await;
    }
}

/// What happens after a handler succeeds.
#[derive(Clone, Debug)]
enum Completion {
    /// Reply to the delivery's reply address, if it has one.
    Reply,

    /// Optionally append the result to another stream subject.
    Forward(Option<String>),
}

/// The four interaction patterns over one transport connection.
///
/// Every outbound message crosses the publish interceptors and every inbound
/// message the subscribe interceptors. Clones share the transport, the chain
/// and the set of running subscriptions.
#[derive(Clone, Debug)]
pub struct MessagingConnection<T>
where
    T: Transport,
{
    chain: Arc<InterceptorChain>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    transport: T,
}

impl<T> MessagingConnection<T>
where
    T: Transport,
{
    /// Binds `chain` to `transport`.
    pub fn new(transport: T, chain: InterceptorChain) -> Self {
        Self {
            chain: Arc::new(chain),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            transport,
        }
    }

    /// The underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The interceptor chain.
    #[must_use]
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    /// Sends a request and waits up to `timeout` for the reply payload.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if no reply arrives in time or nobody listens
    /// on the subject, and `Error::Request` on any other transport failure.
    pub async fn publish(
        &self,
        context: Context,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes, Error<T::Error>> {
        let (_, message) = self
            .chain
            .apply_publish(context, Message::new(subject, payload));
        ensure_subject(&message.subject)?;

        let subject = message.subject.clone();
        debug!(%subject, ?timeout, "sending request");

        match self.transport.request(message, timeout).await {
            Ok(reply) => Ok(reply.payload),
            Err(error) if error.is_no_reply() => {
                debug!(%subject, %error, "request got no reply");
                Err(Error::Timeout { subject, timeout })
            }
            Err(source) => Err(Error::Request { subject, source }),
        }
    }

    /// Sends a message without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns `Error::Publish` if the transport rejects the message.
    pub async fn send(
        &self,
        context: Context,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<(), Error<T::Error>> {
        let (_, message) = self
            .chain
            .apply_publish(context, Message::new(subject, payload));
        ensure_subject(&message.subject)?;

        let subject = message.subject.clone();
        self.transport
            .publish(message)
            .await
            .map_err(|source| Error::Publish { subject, source })
    }

    /// Joins `queue_group` on `subject` and dispatches every delivery to
    /// `handler`. Successful results are sent back to deliveries that carry a
    /// reply address.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscribe` if the transport refuses the subscription.
    pub async fn subscribe<H>(
        &self,
        subject: impl Into<String>,
        queue_group: QueueGroup,
        handler: H,
    ) -> Result<Subscription, Error<T::Error>>
    where
        H: MessageHandler,
    {
        let subject = subject.into();
        ensure_subject(&subject)?;

        let deliveries = self
            .transport
            .queue_subscribe(&subject, &queue_group)
            .await
            .map_err(|source| Error::Subscribe {
                subject: subject.clone(),
                source,
            })?;

        Ok(self.spawn_dispatch(
            subject,
            queue_group,
            deliveries,
            Arc::new(handler),
            Completion::Reply,
        ))
    }

    /// Appends a message to the durable log and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns `Error::StreamPublish` if no stream captures the subject or the
    /// transport rejects the message.
    pub async fn stream_publish(
        &self,
        context: Context,
        subject: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<u64, Error<T::Error>> {
        let (_, message) = self
            .chain
            .apply_publish(context, Message::new(subject, payload));
        ensure_subject(&message.subject)?;

        let subject = message.subject.clone();
        let sequence = self
            .transport
            .stream_publish(message)
            .await
            .map_err(|source| Error::StreamPublish {
                subject: subject.clone(),
                source,
            })?;

        debug!(%subject, sequence, "appended to stream");

        Ok(sequence)
    }

    /// Joins the durable consumer `queue_group` on `subject` and dispatches
    /// every delivery to `handler`. Results are discarded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscribe` if the transport refuses the consumer.
    pub async fn stream_subscribe<H>(
        &self,
        subject: impl Into<String>,
        queue_group: QueueGroup,
        handler: H,
    ) -> Result<Subscription, Error<T::Error>>
    where
        H: MessageHandler,
    {
        self.stream_consume(subject.into(), queue_group, None, handler)
            .await
    }

    /// Like [`stream_subscribe`](Self::stream_subscribe), but non-empty
    /// handler results are appended to the stream subject `forward_to`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Subscribe` if the transport refuses the consumer.
    pub async fn stream_subscribe_forwarding<H>(
        &self,
        subject: impl Into<String>,
        queue_group: QueueGroup,
        forward_to: impl Into<String>,
        handler: H,
    ) -> Result<Subscription, Error<T::Error>>
    where
        H: MessageHandler,
    {
        let forward_to = forward_to.into();
        ensure_subject(&forward_to)?;

        self.stream_consume(subject.into(), queue_group, Some(forward_to), handler)
            .await
    }

    /// Stops every subscription, waits for running handlers and closes the
    /// transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::Close` if the transport fails to shut down cleanly.
    pub async fn close(&self) -> Result<(), Error<T::Error>> {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.transport.close().await.map_err(Error::Close)
    }

    async fn stream_consume<H>(
        &self,
        subject: String,
        queue_group: QueueGroup,
        forward_to: Option<String>,
        handler: H,
    ) -> Result<Subscription, Error<T::Error>>
    where
        H: MessageHandler,
    {
        ensure_subject(&subject)?;

        let deliveries = self
            .transport
            .stream_subscribe(&subject, &queue_group)
            .await
            .map_err(|source| Error::Subscribe {
                subject: subject.clone(),
                source,
            })?;

        Ok(self.spawn_dispatch(
            subject,
            queue_group,
            deliveries,
            Arc::new(handler),
            Completion::Forward(forward_to),
        ))
    }

    fn spawn_dispatch(
        &self,
        subject: String,
        queue_group: QueueGroup,
        mut deliveries: DeliveryStream<T::Delivery>,
        handler: Arc<dyn MessageHandler>,
        completion: Completion,
    ) -> Subscription {
        let (state_sender, state) = watch::channel(SubscriptionState::Created);
        let stop = self.shutdown.child_token();

        let subscription = Subscription {
            subject: subject.clone(),
            queue_group: queue_group.clone(),
            state,
            stop: stop.clone(),
        };

        let connection = self.clone();
        self.tasks.spawn(async move {
            state_sender.send_replace(SubscriptionState::Active);
            debug!(%subject, %queue_group, "subscription active");

            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    delivery = deliveries.next() => {
                        let Some(delivery) = delivery else {
                            break;
                        };

                        let worker = connection.clone();
                        let handler = Arc::clone(&handler);
                        let completion = completion.clone();
                        connection.tasks.spawn(async move {
                            worker.dispatch(delivery, handler.as_ref(), completion).await;
                        });
                    }
                }
            }

            drop(deliveries);
            state_sender.send_replace(SubscriptionState::Closed);
            debug!(%subject, %queue_group, "subscription closed");
        });

        subscription
    }

    async fn dispatch(
        &self,
        delivery: T::Delivery,
        handler: &dyn MessageHandler,
        completion: Completion,
    ) {
        let inbound = delivery.message().clone();
        let subject = inbound.subject.clone();
        let reply_to = inbound.reply.clone();

        let (context, message) = self.chain.apply_subscribe(Context::new(), inbound);

        match handler.handle(context.clone(), message.payload).await {
            Err(error) => {
                let disposition = classify(&error);
                warn!(%subject, %error, ?disposition, "handler failed");

                match disposition {
                    Disposition::NegativeAcknowledge => self.nak(&delivery, &subject).await,
                    Disposition::Acknowledge => self.ack(&delivery, &subject).await,
                }
            }
            Ok(payload) => {
                let completed = match completion {
                    Completion::Reply => match reply_to {
                        Some(reply_to) => self.reply(context, reply_to, payload).await,
                        None => true,
                    },
                    Completion::Forward(Some(forward_to)) if !payload.is_empty() => {
                        self.forward(context, forward_to, payload).await
                    }
                    Completion::Forward(_) => true,
                };

                if completed {
                    self.ack(&delivery, &subject).await;
                } else {
                    self.nak(&delivery, &subject).await;
                }
            }
        }
    }

    async fn reply(&self, context: Context, reply_to: String, payload: Bytes) -> bool {
        let (_, reply) = self
            .chain
            .apply_publish(context, Message::new(reply_to, payload));
        let reply_to = reply.subject.clone();

        match self.transport.publish(reply).await {
            Ok(()) => true,
            Err(error) => {
                warn!(%reply_to, %error, "failed to send reply");
                false
            }
        }
    }

    async fn forward(&self, context: Context, forward_to: String, payload: Bytes) -> bool {
        match self.stream_publish(context, forward_to.clone(), payload).await {
            Ok(_) => true,
            Err(error) => {
                warn!(%forward_to, %error, "failed to forward result");
                false
            }
        }
    }

    async fn ack(&self, delivery: &T::Delivery, subject: &str) {
        if let Err(error) = delivery.ack().await {
            warn!(%subject, %error, "failed to acknowledge delivery");
        }
    }

    async fn nak(&self, delivery: &T::Delivery, subject: &str) {
        debug!(%subject, "negatively acknowledging delivery");

        if let Err(error) = delivery.nak().await {
            warn!(%subject, %error, "failed to negatively acknowledge delivery");
        }
    }
}

fn ensure_subject<E>(subject: &str) -> Result<(), Error<E>>
where
    E: TransportError,
{
    if subject.is_empty() {
        return Err(Error::EmptySubject);
    }

    Ok(())
}
