use super::PublishInterceptor;
use crate::context::Context;
use crate::message::{Headers, Message};

/// Stamps a fixed set of headers on every outbound message, e.g. credentials.
#[derive(Clone, Debug, Default)]
pub struct HeaderInterceptor {
    headers: Headers,
}

impl HeaderInterceptor {
    /// Creates an interceptor that sets the given headers.
    pub fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl PublishInterceptor for HeaderInterceptor {
    fn intercept_publish(&self, context: Context, mut message: Message) -> (Context, Message) {
        for (name, value) in &self.headers {
            message.insert_header(name.clone(), value.clone());
        }

        (context, message)
    }
}
