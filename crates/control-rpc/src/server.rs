//! Listeners for both control-plane protocols.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::common::{
    Failure, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    ServiceRequest, ServiceResponse, StopRequest, StopResponse, SupervisorRequest,
    SupervisorResponse, UnregisterRequest, UnregisterResponse,
};
use crate::error::{Error, Result};

/// Handles the supervisor protocol. Implemented by the supervisor.
#[async_trait]
pub trait SupervisorHandler: Send + Sync + 'static {
    /// A service announces itself.
    async fn register(&self, request: RegisterRequest) -> std::result::Result<RegisterResponse, Failure>;

    /// A service announces it is going away.
    async fn unregister(
        &self,
        request: UnregisterRequest,
    ) -> std::result::Result<UnregisterResponse, Failure>;

    /// A service reports health and metrics.
    async fn heartbeat(
        &self,
        request: HeartbeatRequest,
    ) -> std::result::Result<HeartbeatResponse, Failure>;
}

/// Handles the service protocol. Implemented by managed services.
///
/// Pings are answered by the server itself.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// The supervisor asks the service to drain and exit.
    async fn stop(&self, request: StopRequest) -> StopResponse;
}

/// Maps one decoded request to one response.
#[async_trait]
trait Dispatch: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    async fn dispatch(&self, request: Self::Request) -> Self::Response;
}

struct SupervisorDispatch<H>(H);

#[async_trait]
impl<H: SupervisorHandler> Dispatch for SupervisorDispatch<H> {
    type Request = SupervisorRequest;
    type Response = SupervisorResponse;

    async fn dispatch(&self, request: SupervisorRequest) -> SupervisorResponse {
        let result: std::result::Result<SupervisorResponse, Failure> = match request {
            SupervisorRequest::Register(args) => self.0.register(args).await.map(Into::into),
            SupervisorRequest::Unregister(args) => self.0.unregister(args).await.map(Into::into),
            SupervisorRequest::Heartbeat(args) => self.0.heartbeat(args).await.map(Into::into),
        };

        result.unwrap_or_else(Into::into)
    }
}

struct ServiceDispatch<H>(H);

#[async_trait]
impl<H: ServiceHandler> Dispatch for ServiceDispatch<H> {
    type Request = ServiceRequest;
    type Response = ServiceResponse;

    async fn dispatch(&self, request: ServiceRequest) -> ServiceResponse {
        match request {
            ServiceRequest::Ping => ServiceResponse::Pong,
            ServiceRequest::Stop(args) => self.0.stop(args).await.into(),
        }
    }
}

/// Handle to a running listener.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl ServerHandle {
    /// The address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes every open connection and waits for the
    /// connection tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// Waits until the listener has been shut down.
    pub async fn wait(&self) {
        self.shutdown_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

/// Serves the supervisor protocol.
pub struct SupervisorServer;

impl SupervisorServer {
    /// Binds `addr` and starts serving `handler` in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn bind<A, H>(addr: A, handler: H) -> Result<ServerHandle>
    where
        A: ToSocketAddrs + Send,
        H: SupervisorHandler,
    {
        bind_and_serve(addr, SupervisorDispatch(handler), "supervisor").await
    }
}

/// Serves the service protocol.
pub struct ServiceServer;

impl ServiceServer {
    /// Binds `addr` and starts serving `handler` in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn bind<A, H>(addr: A, handler: H) -> Result<ServerHandle>
    where
        A: ToSocketAddrs + Send,
        H: ServiceHandler,
    {
        bind_and_serve(addr, ServiceDispatch(handler), "service").await
    }
}

async fn bind_and_serve<A, D>(addr: A, dispatcher: D, protocol: &'static str) -> Result<ServerHandle>
where
    A: ToSocketAddrs + Send,
    D: Dispatch,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Io("failed to bind control listener", e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::Io("failed to read listener address", e))?;

    info!("{} control listener bound to {}", protocol, local_addr);

    let shutdown_token = CancellationToken::new();
    let task_tracker = TaskTracker::new();
    let dispatcher = Arc::new(dispatcher);

    let accept_token = shutdown_token.clone();
    let accept_tracker = task_tracker.clone();
    task_tracker.spawn(async move {
        loop {
            tokio::select! {
                () = accept_token.cancelled() => {
                    debug!("{} control listener on {} shutting down", protocol, local_addr);
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let dispatcher = Arc::clone(&dispatcher);
                            let connection_token = accept_token.clone();
                            accept_tracker.spawn(async move {
                                serve_connection(stream, peer, dispatcher, connection_token).await;
                            });
                        }
                        Err(e) => {
                            error!("failed to accept control connection: {}", e);
                        }
                    }
                }
            }
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_token,
        task_tracker,
    })
}

async fn serve_connection<D: Dispatch>(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<D>,
    shutdown_token: CancellationToken,
) {
    debug!("control connection from {}", peer);

    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let mut framed = codec::framed(stream);

    loop {
        let request = tokio::select! {
            () = shutdown_token.cancelled() => break,
            request = codec::recv::<D::Request>(&mut framed) => request,
        };

        let request = match request {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("control connection from {} closed", peer);
                break;
            }
            Err(e) => {
                warn!("dropping control connection from {}: {}", peer, e);
                break;
            }
        };

        let response = dispatcher.dispatch(request).await;

        if let Err(e) = codec::send(&mut framed, &response).await {
            warn!("failed to answer {}: {}", peer, e);
            break;
        }
    }
}
