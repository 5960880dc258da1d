//! Persistent control connection from the supervisor to one managed service.

use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use crate::codec::{self, ExchangeGuard, FramedStream};
use crate::common::{ServiceRequest, ServiceResponse, StopRequest, StopResponse};
use crate::error::{Error, Result};

/// Configuration for a [`ControlChannel`].
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Upper bound for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// Idle time between keepalive pings (also used as the TCP keepalive idle time).
    pub keepalive_interval: Duration,

    /// How long a keepalive ping may take before the channel is considered dead.
    pub keepalive_timeout: Duration,

    /// Default upper bound for a request/response exchange.
    pub request_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(10),
            keepalive_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    address: String,
    closing: CancellationToken,
    framed: Mutex<FramedStream>,
}

impl Inner {
    async fn call(&self, request: &ServiceRequest, limit: Duration) -> Result<ServiceResponse> {
        if self.closing.is_cancelled() {
            return Err(Error::ConnectionClosing);
        }

        let exchange = async {
            let mut framed = self.framed.lock().await;
            let guard = ExchangeGuard::new(&self.closing);
            codec::send(&mut framed, request).await?;
            let response = codec::recv::<ServiceResponse>(&mut framed).await;
            guard.disarm();
            response?.ok_or(Error::ConnectionClosing)
        };

        let result = tokio::select! {
            () = self.closing.cancelled() => Err(Error::Cancelled),
            result = timeout(limit, exchange) => result.unwrap_or(Err(Error::Timeout(limit))),
        };

        if let Err(e) = &result {
            if codec::breaks_stream(e) {
                self.closing.cancel();
            }
        }

        match result? {
            ServiceResponse::Failure(failure) => Err(Error::Remote {
                kind: failure.kind,
                message: failure.message,
            }),
            response => Ok(response),
        }
    }
}

/// A long-lived control connection to a managed service.
///
/// Requests are serialized over the single connection. A background task
/// pings the service whenever the keepalive interval elapses, even if no
/// request is in flight, and retires the channel when a ping fails.
pub struct ControlChannel {
    config: ChannelConfig,
    inner: Arc<Inner>,
    task_tracker: TaskTracker,
}

impl ControlChannel {
    /// Dials `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established within
    /// [`ChannelConfig::connect_timeout`] or the socket cannot be configured.
    pub async fn connect(address: &str, config: ChannelConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::ConnectTimeout(address.to_string(), config.connect_timeout))?
            .map_err(|source| Error::Connect {
                addr: address.to_string(),
                source,
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| Error::Io("failed to set TCP_NODELAY", e))?;

        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_interval)
            .with_interval(config.keepalive_timeout);
        SockRef::from(&stream)
            .set_tcp_keepalive(&keepalive)
            .map_err(|e| Error::Io("failed to enable TCP keepalive", e))?;

        debug!("control channel established to {}", address);

        let inner = Arc::new(Inner {
            address: address.to_string(),
            closing: CancellationToken::new(),
            framed: Mutex::new(codec::framed(stream)),
        });

        let task_tracker = TaskTracker::new();
        task_tracker.spawn(keepalive_loop(
            Arc::clone(&inner),
            config.keepalive_interval,
            config.keepalive_timeout,
        ));
        task_tracker.close();

        Ok(Self {
            config,
            inner,
            task_tracker,
        })
    }

    /// The `host:port` this channel is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Whether the channel has been closed or retired.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.closing.is_cancelled()
    }

    /// Asks the service to drain and exit, waiting up to the request timeout.
    ///
    /// # Errors
    ///
    /// See [`ControlChannel::stop_with_timeout`].
    pub async fn stop(&self, request: StopRequest) -> Result<StopResponse> {
        self.stop_with_timeout(request, self.config.request_timeout)
            .await
    }

    /// Asks the service to drain and exit, waiting up to `limit` for the answer.
    ///
    /// A call that times out, or is dropped before the answer arrives,
    /// retires the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosing`] if the channel is already closed,
    /// [`Error::Cancelled`] if it is closed while waiting, [`Error::Timeout`]
    /// if no answer arrives within `limit`, or the transport error.
    #[instrument(skip(self), fields(address = %self.inner.address))]
    pub async fn stop_with_timeout(
        &self,
        request: StopRequest,
        limit: Duration,
    ) -> Result<StopResponse> {
        match self
            .inner
            .call(&ServiceRequest::Stop(request), limit)
            .await?
        {
            ServiceResponse::Stopped(response) => Ok(response),
            _ => Err(Error::BadResponseType),
        }
    }

    /// Round-trips a ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not answer within the keepalive timeout.
    pub async fn ping(&self) -> Result<()> {
        match self
            .inner
            .call(&ServiceRequest::Ping, self.config.keepalive_timeout)
            .await?
        {
            ServiceResponse::Pong => Ok(()),
            _ => Err(Error::BadResponseType),
        }
    }

    /// Closes the channel. Requests still waiting fail with [`Error::Cancelled`].
    pub async fn close(&self) {
        self.inner.closing.cancel();
        self.task_tracker.wait().await;
        debug!("control channel to {} closed", self.inner.address);
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.inner.closing.cancel();
    }
}

async fn keepalive_loop(inner: Arc<Inner>, interval: Duration, limit: Duration) {
    loop {
        tokio::select! {
            () = inner.closing.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        match inner.call(&ServiceRequest::Ping, limit).await {
            Ok(ServiceResponse::Pong) => debug!("keepalive to {} ok", inner.address),
            Ok(other) => warn!("unexpected keepalive answer from {}: {:?}", inner.address, other),
            Err(Error::Cancelled | Error::ConnectionClosing) => break,
            Err(e) => {
                warn!("keepalive to {} failed, retiring channel: {}", inner.address, e);
                inner.closing.cancel();
                break;
            }
        }
    }
}
