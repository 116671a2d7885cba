//! TCP listener: one task per accepted connection, all sharing one `RelayState`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::net::TcpListener;
use tracing::{debug, field, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::RelayResult;
use crate::metrics::CONNECTIONS_ACCEPTED;
use crate::protocol::FrameLimits;
use crate::state::RelayState;

/// Backoff after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct RelayServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl RelayServer {
    /// Open storage from `config` and bind the listener
    pub async fn bind(config: &Config) -> RelayResult<Self> {
        let state = Arc::new(RelayState::open(&config.store)?);
        let addr = config.server.bind_address;
        let limits = FrameLimits::from(&config.protocol);
        Self::bind_with_state(addr, state, limits).await
    }

    /// Bind the listener over already-opened state
    pub async fn bind_with_state(
        addr: SocketAddr,
        state: Arc<RelayState>,
        limits: FrameLimits,
    ) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let dispatcher = Arc::new(Dispatcher::new(state, limits));
        Ok(RelayServer {
            listener,
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &Arc<RelayState> {
        self.dispatcher.state()
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> RelayResult<()> {
        info!(addr = %self.local_addr()?, "Relay listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            counter!(CONNECTIONS_ACCEPTED).increment(1);
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Could not set TCP_NODELAY");
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let span = info_span!("connection", %peer, username = field::Empty);
            tokio::spawn(
                async move {
                    debug!("Connection accepted");
                    match dispatcher.serve(stream).await {
                        Ok(actions) => debug!(actions, "Connection closed"),
                        Err(e) if e.is_disconnect() => debug!(error = %e, "Peer disconnected"),
                        Err(e) => warn!(error = %e, "Session rejected"),
                    }
                }
                .instrument(span),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::protocol::{read_frame, write_frame, MAX_FRAME_LEN, SEND_ACK};
    use tempfile::tempdir;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let dir = tempdir().unwrap();
        let state = Arc::new(RelayState::open(&StoreConfig::in_dir(dir.path())).unwrap());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let limits = FrameLimits::default();
        let server = RelayServer::bind_with_state(addr, Arc::clone(&state), limits)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, b"KA").await.unwrap();
        write_frame(&mut stream, b"alice").await.unwrap();
        write_frame(&mut stream, b"send_message").await.unwrap();
        write_frame(&mut stream, b"KB").await.unwrap();
        write_frame(&mut stream, b"C1").await.unwrap();

        let reply = read_frame(&mut stream, "reply", MAX_FRAME_LEN)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply, SEND_ACK.as_bytes());
        assert_eq!(state.ledger().tail().unwrap().index, 1);

        task.abort();
    }

    #[tokio::test]
    async fn test_bind_refuses_locked_directory() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".parse().unwrap();
        config.store = StoreConfig::in_dir(dir.path());

        let first = RelayServer::bind(&config).await.unwrap();
        assert!(matches!(
            RelayServer::bind(&config).await,
            Err(crate::error::RelayError::LockUnavailable(_))
        ));
        drop(first);
        assert!(RelayServer::bind(&config).await.is_ok());
    }
}
