use uuid::Uuid;

use super::{PublishInterceptor, SubscribeInterceptor};
use crate::context::Context;
use crate::message::Message;

/// Header carrying the trace identifier between processes.
pub const TRACE_ID_HEADER: &str = "Trace-Id";

/// Trace identifier stored in the [`Context`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(pub String);

/// Propagates a trace identifier across the publish and subscribe paths.
///
/// On publish, the identifier comes from the context, then from an existing
/// header, and otherwise is a fresh UUID. On subscribe, the header is lifted
/// into the context so that replies and follow-up publishes made from the
/// handler carry the same identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceInterceptor;

impl PublishInterceptor for TraceInterceptor {
    fn intercept_publish(&self, context: Context, mut message: Message) -> (Context, Message) {
        let trace_id = context
            .get::<TraceId>()
            .map(|trace_id| trace_id.0.clone())
            .or_else(|| message.header(TRACE_ID_HEADER).map(ToOwned::to_owned))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        message.insert_header(TRACE_ID_HEADER, trace_id.clone());

        (context.with(TraceId(trace_id)), message)
    }
}

impl SubscribeInterceptor for TraceInterceptor {
    fn intercept_subscribe(&self, context: Context, message: Message) -> (Context, Message) {
        match message.header(TRACE_ID_HEADER) {
            Some(trace_id) => (context.with(TraceId(trace_id.to_owned())), message),
            None => (context, message),
        }
    }
}
