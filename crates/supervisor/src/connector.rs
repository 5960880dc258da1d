//! Control connections from the supervisor to its services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_control_rpc::{ChannelConfig, ControlChannel, StopRequest, StopResponse};

use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::error::{Error, Result};

/// The supervisor's handle on one service's control endpoint.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Asks the service to drain and exit, waiting up to `limit` for the answer.
    async fn stop(
        &self,
        request: StopRequest,
        limit: Duration,
    ) -> warden_control_rpc::Result<StopResponse>;

    /// Checks the service is still answering.
    async fn ping(&self) -> warden_control_rpc::Result<()>;

    /// Releases the connection.
    async fn close(&self);
}

#[async_trait]
impl ServiceController for ControlChannel {
    async fn stop(
        &self,
        request: StopRequest,
        limit: Duration,
    ) -> warden_control_rpc::Result<StopResponse> {
        self.stop_with_timeout(request, limit).await
    }

    async fn ping(&self) -> warden_control_rpc::Result<()> {
        Self::ping(self).await
    }

    async fn close(&self) {
        Self::close(self).await;
    }
}

/// Opens control connections.
#[async_trait]
pub trait ServiceConnector: Send + Sync + 'static {
    /// Connects to the service listening on `address` (`host:port`).
    async fn connect(&self, address: &str) -> Result<Arc<dyn ServiceController>>;
}

/// Dials services over TCP, retrying with backoff.
pub struct TcpConnector {
    attempts: u32,
    backoff: Backoff,
    channel_config: ChannelConfig,
    clock: Arc<dyn Clock>,
}

impl TcpConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(
        channel_config: ChannelConfig,
        attempts: u32,
        backoff: Backoff,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            channel_config,
            clock,
        }
    }
}

#[async_trait]
impl ServiceConnector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ServiceController>> {
        let mut attempt = 0;

        loop {
            let error = match ControlChannel::connect(address, self.channel_config.clone()).await {
                Ok(channel) => {
                    info!("control connection to {} established", address);
                    return Ok(Arc::new(channel));
                }
                Err(e) => e,
            };

            let delay = self.backoff.next(attempt);
            attempt += 1;

            warn!(
                "dial to {} failed (attempt {}/{}): {}",
                address, attempt, self.attempts, error
            );

            self.clock.sleep(delay).await;

            if attempt >= self.attempts {
                return Err(Error::Connection {
                    address: address.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use warden_control_rpc::ServiceServer;

    use super::*;
    use crate::Timeouts;
    use crate::testing::{RecordingClock, StopCounter};

    fn connector(clock: Arc<RecordingClock>) -> TcpConnector {
        let timeouts = Timeouts::default();
        TcpConnector::new(
            ChannelConfig::default(),
            timeouts.dial_attempts,
            timeouts.dial_backoff,
            clock,
        )
    }

    #[tokio::test]
    async fn test_dial_retries_with_backoff_then_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let clock = Arc::new(RecordingClock::default());
        let result = connector(Arc::clone(&clock)).connect(&address).await;

        assert!(matches!(result, Err(Error::Connection { attempts: 3, .. })));
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_connected_controller_stops_service() {
        let stops = StopCounter::default();
        let server = ServiceServer::bind("127.0.0.1:0", stops.clone())
            .await
            .unwrap();

        let clock = Arc::new(RecordingClock::default());
        let controller = connector(Arc::clone(&clock))
            .connect(&server.local_addr().to_string())
            .await
            .unwrap();

        controller.ping().await.unwrap();
        let response = controller
            .stop(
                StopRequest {
                    grace_period: Duration::from_secs(10),
                    save_state: true,
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(response, StopResponse { accepted: true });
        assert_eq!(stops.count(), 1);
        assert!(clock.sleeps().is_empty());

        controller.close().await;
        server.shutdown().await;
    }
}
