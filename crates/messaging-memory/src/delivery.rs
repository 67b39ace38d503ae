use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use relay_messaging::{Delivery, Message};
use tracing::trace;

use crate::error::Error;
use crate::hub::WeakHub;

/// Where a delivery came from, and so what a negative acknowledgment does.
#[derive(Clone, Debug)]
pub(crate) enum Origin {
    /// Plain subscription. Negative acknowledgments are only counted.
    Core,

    /// Durable consumer. Negative acknowledgments redeliver.
    Stream {
        stream: String,
        consumer: String,
        sequence: u64,
    },
}

/// A message handed to a subscriber of the in-memory transport.
#[derive(Debug)]
pub struct MemoryDelivery {
    hub: WeakHub,
    message: Message,
    origin: Origin,
    redelivery_delay: Duration,
    settled: AtomicBool,
}

impl MemoryDelivery {
    pub(crate) const fn new(
        hub: WeakHub,
        message: Message,
        origin: Origin,
        redelivery_delay: Duration,
    ) -> Self {
        Self {
            hub,
            message,
            origin,
            redelivery_delay,
            settled: AtomicBool::new(false),
        }
    }

    /// The stream sequence number, for stream deliveries.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        match &self.origin {
            Origin::Core => None,
            Origin::Stream { sequence, .. } => Some(*sequence),
        }
    }

    /// Takes the message out without redelivering it on drop.
    pub(crate) fn into_message(mut self) -> Message {
        self.settled.store(true, Ordering::Release);
        std::mem::take(&mut self.message)
    }

    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    type Error = Error;

    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&self) -> Result<(), Error> {
        if !self.settle() {
            return Ok(());
        }

        let hub = self.hub.upgrade().ok_or(Error::Closed)?;
        hub.record_ack();

        Ok(())
    }

    async fn nak(&self) -> Result<(), Error> {
        if !self.settle() {
            return Ok(());
        }

        let hub = self.hub.upgrade().ok_or(Error::Closed)?;
        hub.record_nak();

        if let Origin::Stream {
            stream,
            consumer,
            sequence,
        } = &self.origin
        {
            if !self.redelivery_delay.is_zero() {
                tokio::time::sleep(self.redelivery_delay).await;
            }

            hub.redeliver(stream, consumer, *sequence, self.message.clone());
        }

        Ok(())
    }
}

/// A stream delivery dropped before it was settled, for example one still
/// buffered when its subscription closed, goes back to its consumer.
impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        let Origin::Stream {
            stream,
            consumer,
            sequence,
        } = &self.origin
        else {
            return;
        };

        if !self.settle() {
            return;
        }

        if let Some(hub) = self.hub.upgrade() {
            trace!(%stream, %consumer, sequence, "unsettled delivery dropped");
            hub.redeliver(stream, consumer, *sequence, std::mem::take(&mut self.message));
        }
    }
}
