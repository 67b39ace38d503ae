use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use relay_messaging::{
    Broker, Context, Error, HandlerError, Interceptor, InterceptorChain, Message,
    MessagingConnection, QueueGroup, SubscriptionState, TraceId, TraceInterceptor,
};
use relay_messaging_memory::{MemoryOptions, MemoryTransport};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(2);

fn append(tag: u8) -> impl Fn(Context, Message) -> (Context, Message) + Send + Sync + 'static {
    move |context: Context, mut message: Message| {
        let mut payload = message.payload.to_vec();
        payload.push(tag);
        message.payload = payload.into();
        (context, message)
    }
}

async fn eventually(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn connection(transport: &MemoryTransport) -> MessagingConnection<MemoryTransport> {
    MessagingConnection::new(transport.clone(), InterceptorChain::default())
}

#[tokio::test]
#[traced_test]
async fn test_interceptors_fold_in_registration_order() {
    let chain = InterceptorChain::new([
        Interceptor::publish_fn(append(b'1')),
        Interceptor::subscribe_fn(append(b'3')),
        Interceptor::publish_fn(append(b'2')),
        Interceptor::subscribe_fn(append(b'4')),
    ]);
    let connection = MessagingConnection::new(MemoryTransport::new(), chain);

    let (seen_sender, mut seen) = mpsc::unbounded_channel();
    connection
        .subscribe(
            "greet",
            QueueGroup::for_subject("greet"),
            move |_context: Context, payload: Bytes| {
                let seen_sender = seen_sender.clone();
                async move {
                    seen_sender.send(payload.clone()).unwrap();
                    Ok::<_, HandlerError>(payload)
                }
            },
        )
        .await
        .unwrap();

    let reply = connection
        .publish(Context::new(), "greet", "x", WAIT)
        .await
        .unwrap();

    assert_eq!(seen.recv().await.unwrap(), Bytes::from("x1234"));
    assert_eq!(reply, Bytes::from("x123412"));
}

#[tokio::test]
async fn test_interceptors_apply_to_stream_publish_subscribe_and_forward() {
    let transport = MemoryTransport::new();
    let chain = InterceptorChain::new([
        Interceptor::publish_fn(append(b'1')),
        Interceptor::subscribe_fn(append(b'2')),
    ]);
    let mut broker = Broker::new(transport.clone(), chain);
    broker.add_stream("ORDERS", ["orders.>"]).await.unwrap();
    broker.add_stream("RESULTS", ["results.>"]).await.unwrap();

    let (seen_sender, mut seen) = mpsc::unbounded_channel();
    broker
        .conn()
        .stream_subscribe_forwarding(
            "orders.>",
            QueueGroup::for_subject("orders.>"),
            "results.done",
            move |_context: Context, payload: Bytes| {
                let seen_sender = seen_sender.clone();
                async move {
                    seen_sender.send(payload.clone()).unwrap();
                    Ok::<_, HandlerError>(payload)
                }
            },
        )
        .await
        .unwrap();

    broker
        .conn()
        .stream_publish(Context::new(), "orders.created", "x")
        .await
        .unwrap();

    assert_eq!(
        timeout(WAIT, seen.recv()).await.unwrap().unwrap(),
        Bytes::from("x12")
    );
    eventually(|| transport.ack_count() == 1).await;

    let stored = transport.stream_messages("ORDERS").unwrap();
    assert_eq!(stored[0].payload, Bytes::from("x1"));

    let forwarded = transport.stream_messages("RESULTS").unwrap();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].payload, Bytes::from("x121"));
}

#[tokio::test]
async fn test_failed_reply_is_negatively_acknowledged() {
    let transport = MemoryTransport::new();
    let chain = InterceptorChain::new([Interceptor::publish_fn(
        |context: Context, mut message: Message| {
            if message.subject.starts_with("_INBOX.") {
                message.subject = "replies.*".to_owned();
            }
            (context, message)
        },
    )]);
    let connection = MessagingConnection::new(transport.clone(), chain);

    connection
        .subscribe(
            "echo",
            QueueGroup::for_subject("echo"),
            |_context: Context, payload: Bytes| async move { Ok::<_, HandlerError>(payload) },
        )
        .await
        .unwrap();

    let result = connection
        .publish(Context::new(), "echo", "hello", Duration::from_millis(100))
        .await;
    assert_matches!(result, Err(Error::Timeout { .. }));

    eventually(|| transport.nak_count() == 1).await;
    assert_eq!(transport.ack_count(), 0);
}

#[tokio::test]
async fn test_publish_times_out_without_subscriber() {
    let connection = connection(&MemoryTransport::new());

    let result = connection
        .publish(
            Context::new(),
            "nobody.listens",
            "ping",
            Duration::from_millis(50),
        )
        .await;

    assert_matches!(result, Err(Error::Timeout { subject, .. }) if subject == "nobody.listens");
}

#[tokio::test]
async fn test_publish_times_out_on_slow_handler() {
    let connection = connection(&MemoryTransport::new());

    connection
        .subscribe(
            "slow",
            QueueGroup::for_subject("slow"),
            |_context: Context, payload: Bytes| async move {
                sleep(Duration::from_millis(500)).await;
                Ok::<_, HandlerError>(payload)
            },
        )
        .await
        .unwrap();

    let result = connection
        .publish(Context::new(), "slow", "ping", Duration::from_millis(50))
        .await;

    assert_matches!(result, Err(Error::Timeout { .. }));
}

#[tokio::test]
async fn test_empty_subject_is_rejected() {
    let connection = connection(&MemoryTransport::new());

    assert_matches!(
        connection.send(Context::new(), "", "x").await,
        Err(Error::EmptySubject)
    );
    assert_matches!(
        connection.stream_publish(Context::new(), "", "x").await,
        Err(Error::EmptySubject)
    );
}

#[tokio::test]
#[traced_test]
async fn test_only_nak_classified_failures_are_negatively_acknowledged() {
    let transport = MemoryTransport::new();
    let connection = connection(&transport);

    connection
        .subscribe(
            "work",
            QueueGroup::for_subject("work"),
            |_context: Context, payload: Bytes| async move {
                match &payload[..] {
                    b"nak" => Err(HandlerError::nak("try again later")),
                    b"ack" => Err(HandlerError::ack("malformed, dropping")),
                    b"io" => Err(std::io::Error::other("disk full").into()),
                    _ => Ok(payload),
                }
            },
        )
        .await
        .unwrap();

    for payload in ["nak", "ack", "io", "ok"] {
        connection
            .send(Context::new(), "work", payload)
            .await
            .unwrap();
    }

    eventually(|| transport.ack_count() + transport.nak_count() == 4).await;

    assert_eq!(transport.nak_count(), 1);
    assert_eq!(transport.ack_count(), 3);
}

#[tokio::test]
async fn test_queue_group_delivers_once_across_connections() {
    let first = MemoryTransport::new();
    let second = first.sibling();

    let calls = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
    let group = QueueGroup::new("q1").unwrap();

    for (index, transport) in [&first, &second].into_iter().enumerate() {
        let calls = Arc::clone(&calls);
        connection(transport)
            .subscribe(
                "jobs.run",
                group.clone(),
                move |_context: Context, payload: Bytes| {
                    calls[index].fetch_add(1, Ordering::SeqCst);
                    async move { Ok::<_, HandlerError>(payload) }
                },
            )
            .await
            .unwrap();
    }

    let client = connection(&first);
    let reply = client
        .publish(Context::new(), "jobs.run", "once", WAIT)
        .await
        .unwrap();
    assert_eq!(reply, Bytes::from("once"));

    sleep(Duration::from_millis(50)).await;
    let total = || calls[0].load(Ordering::SeqCst) + calls[1].load(Ordering::SeqCst);
    assert_eq!(total(), 1);

    for _ in 0..10 {
        client
            .send(Context::new(), "jobs.run", "again")
            .await
            .unwrap();
    }

    eventually(|| total() == 11).await;
    assert!(calls[0].load(Ordering::SeqCst) > 0);
    assert!(calls[1].load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_reply_passes_publish_chain_with_trace_context() {
    let chain = InterceptorChain::new([Interceptor::both(TraceInterceptor)]);
    let connection = MessagingConnection::new(MemoryTransport::new(), chain);

    connection
        .subscribe(
            "whoami",
            QueueGroup::for_subject("whoami"),
            |context: Context, _payload: Bytes| async move {
                let trace_id = context
                    .get::<TraceId>()
                    .map(|trace_id| trace_id.0.clone())
                    .unwrap_or_default();
                Ok::<_, HandlerError>(Bytes::from(trace_id))
            },
        )
        .await
        .unwrap();

    let context = Context::new().with(TraceId("trace-42".to_owned()));
    let reply = connection
        .publish(context, "whoami", "", WAIT)
        .await
        .unwrap();

    assert_eq!(reply, Bytes::from("trace-42"));
}

#[tokio::test]
#[traced_test]
async fn test_stream_nak_redelivers_until_success() {
    let transport = MemoryTransport::new();
    let mut broker = Broker::new(transport.clone(), InterceptorChain::default());
    broker.add_stream("ORDERS", ["orders.>"]).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    broker
        .conn()
        .stream_subscribe(
            "orders.>",
            QueueGroup::new("billing").unwrap(),
            move |_context: Context, _payload: Bytes| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(HandlerError::nak("not ready"))
                    } else {
                        Ok(Bytes::new())
                    }
                }
            },
        )
        .await
        .unwrap();

    let sequence = broker
        .conn()
        .stream_publish(Context::new(), "orders.created", "42")
        .await
        .unwrap();
    assert_eq!(sequence, 1);

    eventually(|| transport.ack_count() == 1).await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(transport.nak_count(), 1);
}

#[tokio::test]
async fn test_stream_subscribe_acknowledges_untagged_failures() {
    let transport = MemoryTransport::new();
    let mut broker = Broker::new(transport.clone(), InterceptorChain::default());
    broker.add_stream("AUDIT", Vec::<String>::new()).await.unwrap();

    broker
        .conn()
        .stream_subscribe(
            "AUDIT.>",
            QueueGroup::for_subject("AUDIT.>"),
            |_context: Context, _payload: Bytes| async move {
                Err::<Bytes, _>(HandlerError::from(std::fmt::Error))
            },
        )
        .await
        .unwrap();

    broker
        .conn()
        .stream_publish(Context::new(), "AUDIT.login", "alice")
        .await
        .unwrap();

    eventually(|| transport.ack_count() == 1).await;
    assert_eq!(transport.nak_count(), 0);
}

#[tokio::test]
async fn test_stream_results_are_forwarded() {
    let transport = MemoryTransport::new();
    let mut broker = Broker::new(transport.clone(), InterceptorChain::default());
    broker.add_stream("ORDERS", ["orders.>"]).await.unwrap();
    broker.add_stream("RESULTS", ["results.>"]).await.unwrap();

    broker
        .conn()
        .stream_subscribe_forwarding(
            "orders.>",
            QueueGroup::for_subject("orders.>"),
            "results.done",
            |_context: Context, payload: Bytes| async move {
                if &payload[..] == b"skip" {
                    return Ok(Bytes::new());
                }
                Ok::<_, HandlerError>(Bytes::from(payload.to_ascii_uppercase()))
            },
        )
        .await
        .unwrap();

    let connection = broker.conn();
    connection
        .stream_publish(Context::new(), "orders.created", "a")
        .await
        .unwrap();
    connection
        .stream_publish(Context::new(), "orders.created", "skip")
        .await
        .unwrap();

    eventually(|| transport.ack_count() == 2).await;

    let forwarded = transport.stream_messages("RESULTS").unwrap();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].subject, "results.done");
    assert_eq!(forwarded[0].payload, Bytes::from("A"));
}

#[tokio::test]
async fn test_failed_forward_is_negatively_acknowledged() {
    let transport = MemoryTransport::with_options(MemoryOptions {
        redelivery_delay: Duration::from_millis(20),
    });
    let mut broker = Broker::new(transport.clone(), InterceptorChain::default());
    broker.add_stream("ORDERS", ["orders.>"]).await.unwrap();

    broker
        .conn()
        .stream_subscribe_forwarding(
            "orders.>",
            QueueGroup::for_subject("orders.>"),
            "nowhere.captured",
            |_context: Context, payload: Bytes| async move { Ok::<_, HandlerError>(payload) },
        )
        .await
        .unwrap();

    broker
        .conn()
        .stream_publish(Context::new(), "orders.created", "a")
        .await
        .unwrap();

    eventually(|| transport.nak_count() >= 1).await;
    assert_eq!(transport.ack_count(), 0);

    broker.close().await.unwrap();
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let connection = connection(&MemoryTransport::new());

    let subscription = connection
        .subscribe(
            "tick",
            QueueGroup::for_subject("tick"),
            |_context: Context, payload: Bytes| async move { Ok::<_, HandlerError>(payload) },
        )
        .await
        .unwrap();

    assert_eq!(subscription.subject(), "tick");
    assert_eq!(subscription.queue_group(), &QueueGroup::for_subject("tick"));
    eventually(|| subscription.state() == SubscriptionState::Active).await;

    subscription.close();
    timeout(WAIT, subscription.closed()).await.unwrap();

    assert_eq!(subscription.state(), SubscriptionState::Closed);
}

#[tokio::test]
async fn test_closing_connection_closes_subscriptions() {
    let transport = MemoryTransport::new();
    let connection = connection(&transport);

    let subscriptions = [
        connection
            .subscribe(
                "a",
                QueueGroup::for_subject("a"),
                |_context: Context, payload: Bytes| async move { Ok::<_, HandlerError>(payload) },
            )
            .await
            .unwrap(),
        connection
            .subscribe(
                "b",
                QueueGroup::for_subject("b"),
                |_context: Context, payload: Bytes| async move { Ok::<_, HandlerError>(payload) },
            )
            .await
            .unwrap(),
    ];

    timeout(WAIT, connection.close()).await.unwrap().unwrap();

    for subscription in &subscriptions {
        assert_eq!(subscription.state(), SubscriptionState::Closed);
    }
    assert_matches!(
        connection.send(Context::new(), "a", "late").await,
        Err(Error::Publish { .. })
    );
}

#[tokio::test]
async fn test_closed_stream_member_hands_backlog_to_group() {
    let transport = MemoryTransport::new();
    let mut broker = Broker::new(transport.clone(), InterceptorChain::default());
    broker.add_stream("ORDERS", ["orders.>"]).await.unwrap();
    let group = QueueGroup::new("billing").unwrap();

    let counter = |calls: &Arc<AtomicUsize>| {
        let calls = Arc::clone(calls);
        move |_context: Context, _payload: Bytes| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, HandlerError>(Bytes::new()) }
        }
    };

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first = broker
        .conn()
        .stream_subscribe("orders.>", group.clone(), counter(&first_calls))
        .await
        .unwrap();
    first.close();

    for n in 0..5 {
        broker
            .conn()
            .stream_publish(Context::new(), "orders.created", n.to_string())
            .await
            .unwrap();
    }
    timeout(WAIT, first.closed()).await.unwrap();

    let second_calls = Arc::new(AtomicUsize::new(0));
    connection(&transport.sibling())
        .stream_subscribe("orders.>", group, counter(&second_calls))
        .await
        .unwrap();

    eventually(|| transport.ack_count() == 5).await;
    assert_eq!(
        first_calls.load(Ordering::SeqCst) + second_calls.load(Ordering::SeqCst),
        5
    );
    assert_eq!(transport.nak_count(), 0);
}
