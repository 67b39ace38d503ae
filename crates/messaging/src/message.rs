use std::collections::HashMap;

use bytes::Bytes;

/// Message headers. One value per header name.
pub type Headers = HashMap<String, String>;

/// A message as seen by interceptors, handlers and transports.
///
/// Interceptors take messages by value and hand back a (possibly rewritten)
/// message, so no two transforms ever share one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// The routing key.
    pub subject: String,

    /// Opaque payload.
    pub payload: Bytes,

    /// Where a reply to this message should be sent, if anywhere.
    pub reply: Option<String>,

    /// Optional headers.
    pub headers: Option<Headers>,
}

impl Message {
    /// Creates a message without reply address or headers.
    pub fn new<S, P>(subject: S, payload: P) -> Self
    where
        S: Into<String>,
        P: Into<Bytes>,
    {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            reply: None,
            headers: None,
        }
    }

    /// Sets the reply address.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Sets a header, replacing any previous value under the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Sets a header in place.
    pub fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
    }

    /// Looks up a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(String::as_str)
    }
}
