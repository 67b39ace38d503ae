use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use relay_messaging::{Message, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::delivery::{MemoryDelivery, Origin};
use crate::error::Error;
use crate::subject;

type Sender = mpsc::UnboundedSender<MemoryDelivery>;

/// Receiving end of one subscription.
pub type Receiver = mpsc::UnboundedReceiver<MemoryDelivery>;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    connection: u64,
    pattern: String,
    queue_group: Option<String>,
    sender: Sender,
}

#[derive(Debug)]
struct Member {
    connection: u64,
    redelivery_delay: Duration,
    sender: Sender,
}

#[derive(Debug)]
struct Consumer {
    filter: String,
    members: Vec<Member>,
    next: usize,
    pending: VecDeque<(u64, Message)>,
}

impl Consumer {
    /// Hands pending messages to members in turn until one is refused by
    /// every member.
    fn flush(&mut self, hub: &WeakHub, stream: &str, name: &str) {
        while let Some((sequence, message)) = self.pending.pop_front() {
            if let Err(message) = self.offer(hub, stream, name, sequence, message) {
                self.pending.push_front((sequence, message));
                break;
            }
        }
    }

    fn offer(
        &mut self,
        hub: &WeakHub,
        stream: &str,
        name: &str,
        sequence: u64,
        mut message: Message,
    ) -> Result<(), Message> {
        while !self.members.is_empty() {
            let index = self.next % self.members.len();
            let member = &self.members[index];

            let origin = Origin::Stream {
                stream: stream.to_owned(),
                consumer: name.to_owned(),
                sequence,
            };
            let delivery =
                MemoryDelivery::new(hub.clone(), message, origin, member.redelivery_delay);

            match member.sender.send(delivery) {
                Ok(()) => {
                    self.next = index.wrapping_add(1);
                    trace!(stream, consumer = name, sequence, "delivered");
                    return Ok(());
                }
                Err(mpsc::error::SendError(delivery)) => {
                    self.members.remove(index);
                    message = delivery.into_message();
                }
            }
        }

        Err(message)
    }
}

#[derive(Debug)]
struct Stream {
    config: StreamConfig,
    consumers: BTreeMap<String, Consumer>,
    last_sequence: u64,
    messages: Vec<(u64, Message)>,
}

impl Stream {
    fn captures(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|pattern| subject::matches(pattern, subject))
    }
}

#[derive(Debug, Default)]
struct State {
    next_subscriber: u64,
    rotation: HashMap<(String, String), usize>,
    streams: BTreeMap<String, Stream>,
    subscribers: Vec<Subscriber>,
}

#[derive(Debug, Default)]
struct Shared {
    acks: AtomicU64,
    naks: AtomicU64,
    next_connection: AtomicU64,
    state: Mutex<State>,
}

/// One in-process broker. Connections sharing a hub see each other.
#[derive(Clone, Debug, Default)]
pub struct Hub {
    shared: Arc<Shared>,
}

/// A hub reference that does not keep the hub alive.
#[derive(Clone, Debug)]
pub struct WeakHub {
    shared: Weak<Shared>,
}

impl WeakHub {
    pub fn upgrade(&self) -> Option<Hub> {
        self.shared.upgrade().map(|shared| Hub { shared })
    }
}

impl Hub {
    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn next_connection(&self) -> u64 {
        self.shared.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_ack(&self) {
        self.shared.acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nak(&self) {
        self.shared.naks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ack_count(&self) -> u64 {
        self.shared.acks.load(Ordering::Relaxed)
    }

    pub fn nak_count(&self) -> u64 {
        self.shared.naks.load(Ordering::Relaxed)
    }

    /// Registers interest in `pattern`. Subscriptions with the same pattern and
    /// queue group share messages; everyone else gets a copy.
    pub fn subscribe(
        &self,
        connection: u64,
        pattern: &str,
        queue_group: Option<&str>,
    ) -> (u64, Receiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.shared.state.lock();

        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push(Subscriber {
            id,
            connection,
            pattern: pattern.to_owned(),
            queue_group: queue_group.map(ToOwned::to_owned),
            sender,
        });

        (id, receiver)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.shared
            .state
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.id != id);
    }

    /// Routes `message` to interested subscribers and returns how many got it.
    pub fn publish(&self, message: &Message) -> usize {
        let hub = self.downgrade();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        state
            .subscribers
            .retain(|subscriber| !subscriber.sender.is_closed());

        let core = |message: &Message| {
            MemoryDelivery::new(hub.clone(), message.clone(), Origin::Core, Duration::ZERO)
        };

        let mut delivered = 0;
        let mut groups: BTreeMap<(&str, &str), Vec<&Subscriber>> = BTreeMap::new();

        for subscriber in &state.subscribers {
            if !subject::matches(&subscriber.pattern, &message.subject) {
                continue;
            }

            match &subscriber.queue_group {
                Some(group) => groups
                    .entry((subscriber.pattern.as_str(), group.as_str()))
                    .or_default()
                    .push(subscriber),
                None => {
                    if subscriber.sender.send(core(message)).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        for ((pattern, group), members) in groups {
            let turn = state
                .rotation
                .entry((pattern.to_owned(), group.to_owned()))
                .or_default();
            let member = members[*turn % members.len()];
            *turn = turn.wrapping_add(1);

            if member.sender.send(core(message)).is_ok() {
                delivered += 1;
            }
        }

        trace!(subject = %message.subject, delivered, "routed");

        delivered
    }

    /// Creates the stream or replaces its subjects.
    pub fn add_stream(&self, config: &StreamConfig) -> Result<(), Error> {
        let mut state = self.shared.state.lock();

        for other in state.streams.values() {
            if other.config.name == config.name {
                continue;
            }

            let collides = config.subjects.iter().any(|wanted| {
                other
                    .config
                    .subjects
                    .iter()
                    .any(|taken| subject::overlaps(wanted, taken))
            });

            if collides {
                return Err(Error::Overlap {
                    stream: config.name.clone(),
                    other: other.config.name.clone(),
                });
            }
        }

        match state.streams.get_mut(&config.name) {
            Some(stream) => {
                stream.config = config.clone();
                debug!(stream = %config.name, "updated stream");
            }
            None => {
                state.streams.insert(
                    config.name.clone(),
                    Stream {
                        config: config.clone(),
                        consumers: BTreeMap::new(),
                        last_sequence: 0,
                        messages: Vec::new(),
                    },
                );
                debug!(stream = %config.name, "created stream");
            }
        }

        Ok(())
    }

    /// Appends `message` to the stream capturing its subject.
    pub fn stream_publish(&self, mut message: Message) -> Result<u64, Error> {
        let hub = self.downgrade();
        let mut state = self.shared.state.lock();

        let stream = state
            .streams
            .values_mut()
            .find(|stream| stream.captures(&message.subject))
            .ok_or_else(|| Error::NoStream(message.subject.clone()))?;

        message.reply = None;
        stream.last_sequence += 1;
        let sequence = stream.last_sequence;
        stream.messages.push((sequence, message.clone()));

        for (name, consumer) in &mut stream.consumers {
            if subject::matches(&consumer.filter, &message.subject) {
                consumer.pending.push_back((sequence, message.clone()));
                consumer.flush(&hub, &stream.config.name, name);
            }
        }

        Ok(sequence)
    }

    /// Joins the durable consumer `name` reading `filter`. A new consumer
    /// starts from the first stored message.
    pub fn stream_subscribe(
        &self,
        connection: u64,
        filter: &str,
        name: &str,
        redelivery_delay: Duration,
    ) -> Result<Receiver, Error> {
        let hub = self.downgrade();
        let mut state = self.shared.state.lock();

        let stream = state
            .streams
            .values_mut()
            .find(|stream| stream.captures(filter))
            .ok_or_else(|| Error::NoStream(filter.to_owned()))?;

        if !stream.consumers.contains_key(name) {
            let backlog = stream
                .messages
                .iter()
                .filter(|(_, message)| subject::matches(filter, &message.subject))
                .cloned()
                .collect();

            stream.consumers.insert(
                name.to_owned(),
                Consumer {
                    filter: filter.to_owned(),
                    members: Vec::new(),
                    next: 0,
                    pending: backlog,
                },
            );
            debug!(stream = %stream.config.name, consumer = name, "created consumer");
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        if let Some(consumer) = stream.consumers.get_mut(name) {
            consumer.members.push(Member {
                connection,
                redelivery_delay,
                sender,
            });
            consumer.flush(&hub, &stream.config.name, name);
        }

        Ok(receiver)
    }

    /// Puts a negatively acknowledged message back in front of its consumer.
    pub fn redeliver(&self, stream: &str, consumer: &str, sequence: u64, message: Message) {
        let hub = self.downgrade();
        let mut state = self.shared.state.lock();

        let Some(stream) = state.streams.get_mut(stream) else {
            return;
        };
        let Some(queue) = stream.consumers.get_mut(consumer) else {
            return;
        };

        debug!(stream = %stream.config.name, consumer, sequence, "redelivering");

        queue.pending.push_front((sequence, message));
        queue.flush(&hub, &stream.config.name, consumer);
    }

    /// Drops every subscription and consumer membership of `connection`.
    pub fn disconnect(&self, connection: u64) {
        let mut state = self.shared.state.lock();

        state
            .subscribers
            .retain(|subscriber| subscriber.connection != connection);

        for stream in state.streams.values_mut() {
            for consumer in stream.consumers.values_mut() {
                consumer
                    .members
                    .retain(|member| member.connection != connection);
            }
        }
    }

    pub fn stream_config(&self, name: &str) -> Option<StreamConfig> {
        self.shared
            .state
            .lock()
            .streams
            .get(name)
            .map(|stream| stream.config.clone())
    }

    pub fn stream_messages(&self, name: &str) -> Option<Vec<Message>> {
        self.shared.state.lock().streams.get(name).map(|stream| {
            stream
                .messages
                .iter()
                .map(|(_, message)| message.clone())
                .collect()
        })
    }
}
