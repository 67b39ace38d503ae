use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use relay_messaging::{Delivery, Message};
use tracing::trace;

use crate::error::Error;
use crate::headers;

enum Acker {
    /// Core NATS has no acknowledgments.
    Core,

    /// JetStream message, acknowledged explicitly.
    JetStream(Box<async_nats::jetstream::Message>),
}

/// A message received from NATS.
pub struct NatsDelivery {
    acker: Acker,
    message: Message,
}

impl NatsDelivery {
    pub(crate) fn core(message: &async_nats::Message) -> Self {
        Self {
            acker: Acker::Core,
            message: convert(message),
        }
    }

    pub(crate) fn jetstream(message: async_nats::jetstream::Message) -> Self {
        let mut converted = convert(&message.message);

        // The reply subject of a JetStream message is the ack inbox.
        converted.reply = None;

        Self {
            acker: Acker::JetStream(Box::new(message)),
            message: converted,
        }
    }
}

impl std::fmt::Debug for NatsDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsDelivery")
            .field("message", &self.message)
            .field("jetstream", &matches!(self.acker, Acker::JetStream(_)))
            .finish()
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    type Error = Error;

    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(&self) -> Result<(), Error> {
        match &self.acker {
            Acker::Core => Ok(()),
            Acker::JetStream(message) => message
                .ack()
                .await
                .map_err(|error| Error::Ack(error.to_string())),
        }
    }

    async fn nak(&self) -> Result<(), Error> {
        match &self.acker {
            Acker::Core => {
                trace!(subject = %self.message.subject, "nak on core subscription has no effect");
                Ok(())
            }
            Acker::JetStream(message) => message
                .ack_with(AckKind::Nak(None))
                .await
                .map_err(|error| Error::Ack(error.to_string())),
        }
    }
}

pub(crate) fn convert(message: &async_nats::Message) -> Message {
    Message {
        subject: message.subject.to_string(),
        payload: message.payload.clone(),
        reply: message.reply.as_ref().map(ToString::to_string),
        headers: headers::from_nats(message.headers.as_ref()),
    }
}
