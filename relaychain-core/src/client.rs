//! Client side of the relay protocol
//!
//! `RelayClient` performs the handshake once and then issues any number of
//! actions on the same connection. Payloads are opaque here; pair it with a
//! [`Cipher`](crate::cipher::Cipher) to seal and open them.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use crate::ledger::MessageRecord;
use crate::protocol::{read_frame, write_frame, Action, ProtocolError, MAX_FRAME_LEN, SEND_ACK};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error text instead of a result
    #[error("Server replied: {0}")]
    Server(String),

    #[error("Server closed the connection")]
    Disconnected,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Protocol(ProtocolError::Io(err))
    }
}

pub struct RelayClient<S = TcpStream> {
    stream: S,
}

impl RelayClient<TcpStream> {
    /// Connect and present `identity` under `username`
    pub async fn connect(
        addr: impl ToSocketAddrs,
        identity: &[u8],
        username: &str,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, identity, username).await
    }
}

impl<S> RelayClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a session over an established stream
    pub async fn handshake(
        mut stream: S,
        identity: &[u8],
        username: &str,
    ) -> Result<Self, ClientError> {
        write_frame(&mut stream, identity).await?;
        write_frame(&mut stream, username.as_bytes()).await?;
        debug!(username, "Handshake sent");
        Ok(RelayClient { stream })
    }

    /// Store `ciphertext` for `receiver`
    pub async fn send_message(
        &mut self,
        receiver: &[u8],
        ciphertext: &[u8],
    ) -> Result<(), ClientError> {
        let token = Action::SendMessage.as_str();
        write_frame(&mut self.stream, token.as_bytes()).await?;
        write_frame(&mut self.stream, receiver).await?;
        write_frame(&mut self.stream, ciphertext).await?;

        let reply = self.read_reply().await?;
        if reply == SEND_ACK.as_bytes() {
            Ok(())
        } else {
            Err(server_reply(&reply))
        }
    }

    /// Every message addressed to this client's identity, in ledger order
    pub async fn retrieve_messages(&mut self) -> Result<Vec<MessageRecord>, ClientError> {
        let token = Action::RetrieveMessages.as_str();
        write_frame(&mut self.stream, token.as_bytes()).await?;

        let reply = self.read_reply().await?;
        serde_json::from_slice(&reply).map_err(|_| server_reply(&reply))
    }

    /// Send an arbitrary action token and return the server's text reply
    ///
    /// Only useful for tokens that take no further fields.
    pub async fn request(&mut self, token: &[u8]) -> Result<String, ClientError> {
        write_frame(&mut self.stream, token).await?;
        let reply = self.read_reply().await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// End the session at an action boundary
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Vec<u8>, ClientError> {
        read_frame(&mut self.stream, "reply", MAX_FRAME_LEN)
            .await?
            .ok_or(ClientError::Disconnected)
    }
}

/// An error text sent where a result was expected
fn server_reply(reply: &[u8]) -> ClientError {
    ClientError::Server(String::from_utf8_lossy(reply).into_owned())
}
