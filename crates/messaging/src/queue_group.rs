use std::fmt::{Display, Formatter, Result as FmtResult};

use md5::{Digest, Md5};
use thiserror::Error;

/// A queue-group name is not usable.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid queue group `{0}`: must be non-empty and free of whitespace, '.', '*' and '>'")]
pub struct InvalidQueueGroup(pub String);

/// The name of a set of competing consumers.
///
/// Consumers in different processes that subscribe with the same name share
/// the messages instead of each receiving a copy. Names double as durable
/// consumer names on streams, hence the restricted alphabet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueGroup(String);

impl QueueGroup {
    /// Uses an explicit name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQueueGroup` if the name is empty or contains whitespace,
    /// `.`, `*` or `>`.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidQueueGroup> {
        let name = name.into();

        if name.is_empty()
            || name
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
        {
            return Err(InvalidQueueGroup(name));
        }

        Ok(Self(name))
    }

    /// Derives the name from the subscribed subject.
    ///
    /// `queue_` followed by the hex encoding of the last four bytes of the MD5
    /// digest of the subject. Stable across processes and restarts.
    #[must_use]
    pub fn for_subject(subject: &str) -> Self {
        let digest = Md5::digest(subject.as_bytes());

        Self(format!("queue_{}", hex::encode(&digest[12..])))
    }

    /// The name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for QueueGroup {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for QueueGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<QueueGroup> for String {
    fn from(queue_group: QueueGroup) -> Self {
        queue_group.0
    }
}
