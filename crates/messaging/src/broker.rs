use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::BrokerConfig;
use crate::connection::MessagingConnection;
use crate::error::{BoxError, Error};
use crate::interceptor::InterceptorChain;
use crate::transport::{StreamConfig, Transport};

/// A long-running unit of work driven by [`Broker::serve`].
///
/// Handlers typically hold a [`MessagingConnection`] obtained from
/// [`Broker::conn`], register their subscriptions in `serve` and then wait.
#[async_trait]
pub trait BrokerHandler: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Runs until done or failed.
    async fn serve(&self) -> Result<(), BoxError>;
}

/// Owns a transport connection, the streams declared on it and the handlers
/// that run against it.
pub struct Broker<T>
where
    T: Transport,
{
    connection: MessagingConnection<T>,
    handlers: Vec<Box<dyn BrokerHandler>>,
    streams: BTreeMap<String, StreamConfig>,
}

impl<T> Debug for Broker<T>
where
    T: Transport,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Broker")
            .field("connection", &self.connection)
            .field("handlers", &self.handlers.len())
            .field("streams", &self.streams)
            .finish()
    }
}

impl<T> Broker<T>
where
    T: Transport,
{
    /// Connects with default transport options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the broker is unreachable. There is no retry.
    pub async fn connect(
        config: &BrokerConfig,
        chain: InterceptorChain,
    ) -> Result<Self, Error<T::Error>> {
        Self::connect_with(config, T::Options::default(), chain).await
    }

    /// Connects with explicit transport options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` does not form a broker URL and
    /// `Error::Connect` if the broker is unreachable. There is no retry.
    pub async fn connect_with(
        config: &BrokerConfig,
        options: T::Options,
        chain: InterceptorChain,
    ) -> Result<Self, Error<T::Error>> {
        config.url()?;

        let transport = T::connect(config, options)
            .await
            .map_err(Error::Connect)?;

        info!(host = %config.host, port = config.port, cluster_id = %config.cluster_id, "connected to broker");

        Ok(Self::new(transport, chain))
    }

    /// Wraps an already connected transport.
    pub fn new(transport: T, chain: InterceptorChain) -> Self {
        Self {
            connection: MessagingConnection::new(transport, chain),
            handlers: Vec::new(),
            streams: BTreeMap::new(),
        }
    }

    /// A connection handle bound to this broker's interceptor chain.
    #[must_use]
    pub fn conn(&self) -> MessagingConnection<T> {
        self.connection.clone()
    }

    /// Creates the stream `name`, or updates it if it already exists.
    ///
    /// No subjects means `<name>.>`.
    ///
    /// # Errors
    ///
    /// Returns `Error::AddStream` if the transport rejects the declaration.
    pub async fn add_stream<N, I, S>(&mut self, name: N, subjects: I) -> Result<(), Error<T::Error>>
    where
        N: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = StreamConfig::new(name, subjects);

        self.connection
            .transport()
            .add_stream(&config)
            .await
            .map_err(|source| Error::AddStream {
                stream: config.name.clone(),
                source,
            })?;

        let updated = self.streams.contains_key(&config.name);
        info!(stream = %config.name, subjects = ?config.subjects, updated, "declared stream");

        self.streams.insert(config.name.clone(), config);

        Ok(())
    }

    /// Streams declared through this broker, by name.
    #[must_use]
    pub const fn streams(&self) -> &BTreeMap<String, StreamConfig> {
        &self.streams
    }

    /// Queues `handler` for [`serve`](Self::serve). Does not start it.
    pub fn register_handler(&mut self, handler: impl BrokerHandler) {
        debug!(handler = handler.name(), "registered handler");

        self.handlers.push(Box::new(handler));
    }

    /// Number of handlers waiting for [`serve`](Self::serve).
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Runs every registered handler concurrently and waits for all of them.
    ///
    /// A failing handler does not stop the others. The handler list is
    /// consumed; a second call runs nothing.
    ///
    /// # Errors
    ///
    /// Returns the first failure to complete: `Error::Handler` for a returned
    /// error, `Error::HandlerAborted` for a panic.
    pub async fn serve(&mut self) -> Result<(), Error<T::Error>> {
        let handlers = std::mem::take(&mut self.handlers);
        info!(handlers = handlers.len(), "serving");

        let mut running = JoinSet::new();
        for handler in handlers {
            let name = handler.name().to_owned();
            let span = info_span!("handler", handler = %name);

            running.spawn(
                async move {
                    let outcome = AssertUnwindSafe(handler.serve()).catch_unwind().await;
                    (name, outcome)
                }
                .instrument(span),
            );
        }

        let mut first_error = None;
        while let Some(joined) = running.join_next().await {
            let error = match joined {
                Ok((name, Ok(Ok(())))) => {
                    debug!(handler = %name, "handler finished");
                    continue;
                }
                Ok((name, Ok(Err(source)))) => {
                    warn!(handler = %name, error = %source, "handler failed");
                    Error::Handler { name, source }
                }
                Ok((name, Err(_))) => {
                    warn!(handler = %name, "handler panicked");
                    Error::HandlerAborted { name }
                }
                Err(error) => {
                    warn!(%error, "handler task did not complete");
                    Error::HandlerAborted {
                        name: String::from("<unknown>"),
                    }
                }
            };

            first_error.get_or_insert(error);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Stops every subscription and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::Close` if the transport fails to shut down cleanly.
    pub async fn close(&self) -> Result<(), Error<T::Error>> {
        self.connection.close().await?;
        info!("broker closed");

        Ok(())
    }
}
