//! Per-connection session handling
//!
//! A session walks `AwaitIdentity -> AwaitAction -> {SendFlow | RetrieveFlow}
//! -> AwaitAction ...` until the client closes at an action boundary. Storage
//! failures end the current action with `ACTION_FAILED`; framing and
//! validation failures end the whole session with `MALFORMED_REQUEST`.

use std::sync::Arc;

use metrics::counter;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn, Span};

use crate::error::RelayResult;
use crate::ledger::{MessageRecord, StoreResult};
use crate::metrics::{
    Timer, ACTIONS_FAILED, ACTIONS_INVALID, ACTIONS_TOTAL, ACTION_DURATION_MS, SESSIONS_REJECTED,
};
use crate::protocol::{
    read_field, read_frame, write_frame, Action, FrameLimits, ProtocolError, ACTION_FAILED,
    INVALID_ACTION, MALFORMED_REQUEST, MAX_FRAME_LEN, SEND_ACK,
};
use crate::state::RelayState;

/// Where a session currently is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitIdentity,
    AwaitAction,
    SendFlow,
    RetrieveFlow,
    Closed,
}

struct Session<S> {
    stream: S,
    state: SessionState,
    /// Public identity presented during the handshake
    caller: Vec<u8>,
    actions: u64,
}

impl<S> Session<S>
where
    S: AsyncWrite + Unpin,
{
    /// One framed reply to the peer
    async fn reply(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        write_frame(&mut self.stream, payload).await
    }
}

/// Serves sessions against shared relay state
pub struct Dispatcher {
    state: Arc<RelayState>,
    limits: FrameLimits,
}

impl Dispatcher {
    pub fn new(state: Arc<RelayState>, limits: FrameLimits) -> Self {
        Self { state, limits }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Run one session to completion
    ///
    /// Returns the number of actions served. On error the peer has already
    /// been sent `MALFORMED_REQUEST` if it was still reachable.
    pub async fn serve<S>(&self, stream: S) -> Result<u64, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = Session {
            stream,
            state: SessionState::AwaitIdentity,
            caller: Vec::new(),
            actions: 0,
        };

        loop {
            let step = match session.state {
                SessionState::AwaitIdentity => self.await_identity(&mut session).await,
                SessionState::AwaitAction => self.await_action(&mut session).await,
                SessionState::SendFlow => self.send_flow(&mut session).await,
                SessionState::RetrieveFlow => self.retrieve_flow(&mut session).await,
                SessionState::Closed => return Ok(session.actions),
            };

            match step {
                Ok(next) => session.state = next,
                Err(err) => {
                    self.reject(&mut session, &err).await;
                    return Err(err);
                }
            }
        }
    }

    async fn await_identity<S>(
        &self,
        session: &mut Session<S>,
    ) -> Result<SessionState, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let limits = self.limits;
        let stream = &mut session.stream;
        let identity = read_field(stream, "identity", limits.identity).await?;
        let raw_username = read_field(stream, "username", limits.username).await?;
        let username = parse_username(raw_username)?;
        Span::current().record("username", username.as_str());

        let registry = Arc::clone(self.state.registry());
        let key = identity.clone();
        let name = username.clone();
        match run_blocking(move || registry.store(&name, &key)).await {
            Ok(added) => {
                debug!(added, "Identity accepted");
                session.caller = identity;
                Ok(SessionState::AwaitAction)
            }
            Err(e) => {
                warn!(error = %e, "Failed to register member");
                counter!(ACTIONS_FAILED).increment(1);
                session.reply(ACTION_FAILED.as_bytes()).await?;
                Ok(SessionState::Closed)
            }
        }
    }

    async fn await_action<S>(
        &self,
        session: &mut Session<S>,
    ) -> Result<SessionState, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = &mut session.stream;
        let Some(token) = read_frame(stream, "action", self.limits.action).await? else {
            debug!(actions = session.actions, "Client ended session");
            return Ok(SessionState::Closed);
        };

        match Action::parse(&token) {
            Some(Action::SendMessage) => Ok(SessionState::SendFlow),
            Some(Action::RetrieveMessages) => Ok(SessionState::RetrieveFlow),
            None => {
                debug!(token = %String::from_utf8_lossy(&token), "Invalid action requested");
                counter!(ACTIONS_INVALID).increment(1);
                session.reply(INVALID_ACTION.as_bytes()).await?;
                Ok(SessionState::AwaitAction)
            }
        }
    }

    async fn send_flow<S>(&self, session: &mut Session<S>) -> Result<SessionState, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timer = Timer::new(ACTION_DURATION_MS, Action::SendMessage.as_str());
        let limits = self.limits;
        let stream = &mut session.stream;
        let receiver = read_field(stream, "receiver", limits.identity).await?;
        let ciphertext = read_field(stream, "ciphertext", limits.ciphertext).await?;

        let record = MessageRecord::new(&session.caller, &receiver, &ciphertext);
        let ledger = Arc::clone(self.state.ledger());
        let reply = match run_blocking(move || ledger.append(record)).await {
            Ok(tail) => {
                debug!(index = tail.index, "Message appended");
                SEND_ACK
            }
            Err(e) => {
                warn!(error = %e, "Failed to append message");
                counter!(ACTIONS_FAILED).increment(1);
                ACTION_FAILED
            }
        };

        session.reply(reply.as_bytes()).await?;
        Ok(finish(session, Action::SendMessage, timer))
    }

    async fn retrieve_flow<S>(
        &self,
        session: &mut Session<S>,
    ) -> Result<SessionState, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let timer = Timer::new(ACTION_DURATION_MS, Action::RetrieveMessages.as_str());
        let ledger = Arc::clone(self.state.ledger());
        let caller = session.caller.clone();
        let result = run_blocking(move || -> StoreResult<(usize, Vec<u8>)> {
            let records = ledger.messages_for(&caller)?;
            Ok((records.len(), serde_json::to_vec(&records)?))
        })
        .await;

        let body = match result {
            Ok((count, body)) if body.len() <= MAX_FRAME_LEN => {
                debug!(count, "Messages retrieved");
                body
            }
            Ok((count, body)) => {
                warn!(
                    count,
                    bytes = body.len(),
                    "Retrieve reply exceeds frame limit"
                );
                counter!(ACTIONS_FAILED).increment(1);
                ACTION_FAILED.as_bytes().to_vec()
            }
            Err(e) => {
                warn!(error = %e, "Failed to retrieve messages");
                counter!(ACTIONS_FAILED).increment(1);
                ACTION_FAILED.as_bytes().to_vec()
            }
        };

        session.reply(&body).await?;
        Ok(finish(session, Action::RetrieveMessages, timer))
    }

    async fn reject<S>(&self, session: &mut Session<S>, err: &ProtocolError)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        session.state = SessionState::Closed;
        if err.is_disconnect() {
            return;
        }

        counter!(SESSIONS_REJECTED).increment(1);
        if let Err(e) = session.reply(MALFORMED_REQUEST.as_bytes()).await {
            debug!(error = %e, "Could not deliver malformed-request reply");
            return;
        }
        if let Err(e) = session.stream.shutdown().await {
            debug!(error = %e, "Could not shut down rejected session");
        }
    }
}

fn finish<S>(session: &mut Session<S>, action: Action, timer: Timer) -> SessionState {
    session.actions += 1;
    counter!(ACTIONS_TOTAL, "action" => action.as_str())
        .increment(1);
    timer.stop();
    SessionState::AwaitAction
}

/// Usernames are decoded lossily and must be non-blank and fit on one registry line
fn parse_username(raw: Vec<u8>) -> Result<String, ProtocolError> {
    let text = String::from_utf8_lossy(&raw);
    let username = text.trim();
    if username.is_empty() || username.contains(['\r', '\n']) {
        return Err(ProtocolError::InvalidUsername(format!("{:?}", text)));
    }
    Ok(username.to_string())
}

/// Run blocking storage work off the async workers
async fn run_blocking<T, F>(job: F) -> RelayResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(job).await??)
}
