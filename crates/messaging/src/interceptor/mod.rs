mod headers;
mod trace;

pub use headers::HeaderInterceptor;
pub use trace::{TRACE_ID_HEADER, TraceId, TraceInterceptor};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::context::Context;
use crate::message::Message;

/// Transforms messages about to leave the process.
pub trait PublishInterceptor: Send + Sync + 'static {
    /// Rewrites an outbound message and its context.
    fn intercept_publish(&self, context: Context, message: Message) -> (Context, Message);
}

/// Transforms messages that just arrived, before the handler sees them.
pub trait SubscribeInterceptor: Send + Sync + 'static {
    /// Rewrites an inbound message and its context.
    fn intercept_subscribe(&self, context: Context, message: Message) -> (Context, Message);
}

/// Adapts a closure to either interceptor capability.
struct FnInterceptor<F>(F);

impl<F> PublishInterceptor for FnInterceptor<F>
where
    F: Fn(Context, Message) -> (Context, Message) + Send + Sync + 'static,
{
    fn intercept_publish(&self, context: Context, message: Message) -> (Context, Message) {
        (self.0)(context, message)
    }
}

impl<F> SubscribeInterceptor for FnInterceptor<F>
where
    F: Fn(Context, Message) -> (Context, Message) + Send + Sync + 'static,
{
    fn intercept_subscribe(&self, context: Context, message: Message) -> (Context, Message) {
        (self.0)(context, message)
    }
}

/// A registration of one interceptor with the capabilities it provides.
///
/// An interceptor may be publish-only, subscribe-only, both, or neither. The
/// chain sorts registrations into its two lists once, at construction.
#[derive(Clone, Default)]
pub struct Interceptor {
    publish: Option<Arc<dyn PublishInterceptor>>,
    subscribe: Option<Arc<dyn SubscribeInterceptor>>,
}

impl Interceptor {
    /// Registers a publish-only interceptor.
    pub fn publish<I>(interceptor: I) -> Self
    where
        I: PublishInterceptor,
    {
        Self {
            publish: Some(Arc::new(interceptor)),
            subscribe: None,
        }
    }

    /// Registers a subscribe-only interceptor.
    pub fn subscribe<I>(interceptor: I) -> Self
    where
        I: SubscribeInterceptor,
    {
        Self {
            publish: None,
            subscribe: Some(Arc::new(interceptor)),
        }
    }

    /// Registers one interceptor on both paths. Both lists share the instance.
    pub fn both<I>(interceptor: I) -> Self
    where
        I: PublishInterceptor + SubscribeInterceptor,
    {
        let shared = Arc::new(interceptor);
        let publish: Arc<dyn PublishInterceptor> = shared.clone();
        let subscribe: Arc<dyn SubscribeInterceptor> = shared;

        Self {
            publish: Some(publish),
            subscribe: Some(subscribe),
        }
    }

    /// Registers a closure on the publish path.
    pub fn publish_fn<F>(f: F) -> Self
    where
        F: Fn(Context, Message) -> (Context, Message) + Send + Sync + 'static,
    {
        Self::publish(FnInterceptor(f))
    }

    /// Registers a closure on the subscribe path.
    pub fn subscribe_fn<F>(f: F) -> Self
    where
        F: Fn(Context, Message) -> (Context, Message) + Send + Sync + 'static,
    {
        Self::subscribe(FnInterceptor(f))
    }

    /// Whether this registration takes part in the publish path.
    #[must_use]
    pub const fn is_publish(&self) -> bool {
        self.publish.is_some()
    }

    /// Whether this registration takes part in the subscribe path.
    #[must_use]
    pub const fn is_subscribe(&self) -> bool {
        self.subscribe.is_some()
    }
}

impl Debug for Interceptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Interceptor")
            .field("publish", &self.is_publish())
            .field("subscribe", &self.is_subscribe())
            .finish()
    }
}

/// Two ordered lists of transforms, one per direction.
///
/// Registration order is application order on both paths.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    publish: Vec<Arc<dyn PublishInterceptor>>,
    subscribe: Vec<Arc<dyn SubscribeInterceptor>>,
}

impl InterceptorChain {
    /// Builds a chain, splitting registrations into the publish and subscribe
    /// lists while keeping their relative order.
    pub fn new<I>(interceptors: I) -> Self
    where
        I: IntoIterator<Item = Interceptor>,
    {
        let mut chain = Self::default();

        for Interceptor { publish, subscribe } in interceptors {
            if let Some(publish) = publish {
                chain.publish.push(publish);
            }
            if let Some(subscribe) = subscribe {
                chain.subscribe.push(subscribe);
            }
        }

        chain
    }

    /// Folds the publish interceptors, first registered first.
    #[must_use]
    pub fn apply_publish(&self, context: Context, message: Message) -> (Context, Message) {
        self.publish
            .iter()
            .fold((context, message), |(context, message), interceptor| {
                interceptor.intercept_publish(context, message)
            })
    }

    /// Folds the subscribe interceptors, first registered first.
    #[must_use]
    pub fn apply_subscribe(&self, context: Context, message: Message) -> (Context, Message) {
        self.subscribe
            .iter()
            .fold((context, message), |(context, message), interceptor| {
                interceptor.intercept_subscribe(context, message)
            })
    }

    /// Number of publish interceptors.
    #[must_use]
    pub fn publish_len(&self) -> usize {
        self.publish.len()
    }

    /// Number of subscribe interceptors.
    #[must_use]
    pub fn subscribe_len(&self) -> usize {
        self.subscribe.len()
    }
}

impl Debug for InterceptorChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("InterceptorChain")
            .field("publish", &self.publish.len())
            .field("subscribe", &self.subscribe.len())
            .finish()
    }
}
