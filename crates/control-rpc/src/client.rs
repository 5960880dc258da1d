use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::codec::{self, ExchangeGuard, FramedStream};
use crate::common::{
    HealthStatus, HeartbeatRequest, RegisterRequest, RegisterResponse, ServiceCapabilities,
    ServiceDescriptor, ServiceMetrics, SupervisorRequest, SupervisorResponse, UnregisterRequest,
};
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Lower bound for a Register call. The supervisor dials the service back
/// before answering, which can take three 15s connect attempts plus backoff.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(90);

/// Client used by a managed service to talk to its supervisor.
///
/// A request that fails on the transport, times out or is dropped before its
/// answer arrives breaks the client; later requests fail with
/// [`Error::ConnectionClosing`] and the caller has to reconnect.
pub struct SupervisorClient {
    address: String,
    broken: CancellationToken,
    framed: Mutex<FramedStream>,
    request_timeout: Duration,
}

impl SupervisorClient {
    /// Connects to the supervisor's control listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(address: &str) -> Result<Self> {
        let stream = timeout(DEFAULT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| Error::ConnectTimeout(address.to_string(), DEFAULT_TIMEOUT))?
            .map_err(|source| Error::Connect {
                addr: address.to_string(),
                source,
            })?;

        Ok(Self {
            address: address.to_string(),
            broken: CancellationToken::new(),
            framed: Mutex::new(codec::framed(stream)),
            request_timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Overrides the per-request timeout. Register calls never wait less
    /// than the time the supervisor may spend dialing back.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Registers this service instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor rejects the registration or the request fails.
    pub async fn register(
        &self,
        descriptor: ServiceDescriptor,
        capabilities: ServiceCapabilities,
    ) -> Result<RegisterResponse> {
        let request = SupervisorRequest::Register(RegisterRequest {
            capabilities,
            descriptor,
        });

        let limit = self.request_timeout.max(REGISTER_TIMEOUT);
        if let SupervisorResponse::Registered(response) = self.send(request, limit).await? {
            Ok(response)
        } else {
            Err(Error::BadResponseType)
        }
    }

    /// Unregisters the service.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown to the supervisor or the request fails.
    pub async fn unregister(&self, service_id: &str) -> Result<()> {
        let request = SupervisorRequest::Unregister(UnregisterRequest {
            service_id: service_id.to_string(),
        });

        if let SupervisorResponse::Unregistered(_) =
            self.send(request, self.request_timeout).await?
        {
            Ok(())
        } else {
            Err(Error::BadResponseType)
        }
    }

    /// Reports health and metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unknown to the supervisor or the request fails.
    pub async fn heartbeat(
        &self,
        service_id: &str,
        health: HealthStatus,
        metrics: ServiceMetrics,
    ) -> Result<()> {
        let request = SupervisorRequest::Heartbeat(HeartbeatRequest {
            health,
            metrics,
            service_id: service_id.to_string(),
        });

        if let SupervisorResponse::HeartbeatAck(_) =
            self.send(request, self.request_timeout).await?
        {
            Ok(())
        } else {
            Err(Error::BadResponseType)
        }
    }

    /// Whether an earlier request left the connection unusable.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.is_cancelled()
    }

    #[instrument(skip(self, request), fields(address = %self.address))]
    async fn send(&self, request: SupervisorRequest, limit: Duration) -> Result<SupervisorResponse> {
        if self.broken.is_cancelled() {
            return Err(Error::ConnectionClosing);
        }

        debug!("sending request: {:?}", request);

        let exchange = async {
            let mut framed = self.framed.lock().await;
            let guard = ExchangeGuard::new(&self.broken);
            codec::send(&mut framed, &request).await?;
            let response = codec::recv::<SupervisorResponse>(&mut framed).await;
            guard.disarm();
            response?.ok_or(Error::ConnectionClosing)
        };

        let result = timeout(limit, exchange)
            .await
            .unwrap_or(Err(Error::Timeout(limit)));

        match result {
            Ok(SupervisorResponse::Failure(failure)) => Err(Error::Remote {
                kind: failure.kind,
                message: failure.message,
            }),
            Ok(response) => Ok(response),
            Err(e) => {
                if codec::breaks_stream(&e) {
                    warn!("connection to supervisor {} broken: {}", self.address, e);
                    self.broken.cancel();
                }
                Err(e)
            }
        }
    }
}
