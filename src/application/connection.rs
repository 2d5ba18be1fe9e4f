//! Connection Core
//!
//! The pieces shared by client and server connections: cross-task flags,
//! the framed byte stream, the handshake head reader and the steady-state
//! loop that multiplexes caller commands with socket reads.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::options::FrameLimits;
use crate::domain::frame::{self, Opcode, Role, CLOSE_NORMAL};
use crate::domain::handshake::{find_head_end, MAX_HEADER_SIZE};
use crate::domain::message::{CloseRequest, Message, MessageAssembler};
use crate::domain::reconnect::ReconnectRequest;
use crate::domain::state::{AtomicConnectionState, ConnectionState};
use crate::infrastructure::metrics;
use crate::infrastructure::transport::Transport;
use crate::shared::error::{ConnectionError, HandshakeError, SendError};

/// Upper bound on writing a Close frame to a peer that may have stopped reading.
pub(crate) const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// State visible to both the facade and the worker task.
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    state: AtomicConnectionState,
    connected: AtomicBool,
    user_closed: AtomicBool,
    close_request: Mutex<Option<CloseRequest>>,
    close_signal: Notify,
    cancel: CancellationToken,
}

impl ConnectionShared {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            state: AtomicConnectionState::new(ConnectionState::Closed),
            connected: AtomicBool::new(false),
            user_closed: AtomicBool::new(false),
            close_request: Mutex::new(None),
            close_signal: Notify::new(),
            cancel,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state);
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn is_user_closed(&self) -> bool {
        self.user_closed.load(Ordering::Acquire)
    }

    /// Record a close request and wake the worker. Only the first one counts.
    pub(crate) fn request_close(&self, request: CloseRequest) -> bool {
        {
            let mut slot = self.close_request.lock();
            if self.user_closed.load(Ordering::Acquire) {
                return false;
            }
            *slot = Some(request);
            self.user_closed.store(true, Ordering::Release);
        }
        self.close_signal.notify_one();
        true
    }

    pub(crate) fn take_close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().take()
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Exit reason when a phase was cut short by close or stop.
    fn interrupted_exit(&self) -> ServeExit {
        if self.is_user_closed() {
            let request = self
                .take_close_request()
                .unwrap_or_else(|| CloseRequest::new(CLOSE_NORMAL, ""));
            return ServeExit::UserClosed(request);
        }
        ServeExit::Stopped
    }
}

/// Queue `message` for the worker. Rejected unless the connection is up.
pub(crate) fn enqueue(
    shared: &ConnectionShared,
    outbound: &UnboundedSender<Message>,
    message: Message,
) -> Result<(), SendError> {
    if !shared.is_connected() {
        return Err(SendError::NotConnected);
    }
    outbound.send(message).map_err(|_| SendError::WorkerStopped)
}

/// Run `fut` unless a close request or stop arrives first.
pub(crate) async fn interruptible<F: Future>(shared: &ConnectionShared, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => None,
        _ = shared.close_signal.notified() => None,
        output = fut => Some(output),
    }
}

/// One handshake phase: failures become `ServeExit::Failed`, interruptions
/// become `UserClosed` or `Stopped`.
pub(crate) async fn step<T, E>(
    shared: &ConnectionShared,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, ServeExit>
where
    E: Into<ConnectionError>,
{
    match interruptible(shared, fut).await {
        Some(Ok(value)) => Ok(value),
        Some(Err(err)) => Err(ServeExit::Failed(err.into())),
        None => Err(shared.interrupted_exit()),
    }
}

/// Read an HTTP head terminated by a blank line. Bytes past the head stay in `buf`.
pub(crate) async fn read_http_head(
    transport: &mut Transport,
    buf: &mut BytesMut,
    wait: Duration,
) -> Result<String, ConnectionError> {
    loop {
        if let Some(end) = find_head_end(buf) {
            if end > MAX_HEADER_SIZE {
                return Err(HandshakeError::HeadersTooLarge(MAX_HEADER_SIZE).into());
            }
            let head = buf.split_to(end);
            return String::from_utf8(head.to_vec())
                .map_err(|_| HandshakeError::Malformed("HTTP head is not valid UTF-8".into()).into());
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Err(HandshakeError::HeadersTooLarge(MAX_HEADER_SIZE).into());
        }

        let n = timeout(wait, transport.recv(buf))
            .await
            .map_err(|_| HandshakeError::Timeout)??;
        if n == 0 {
            return Err(HandshakeError::ConnectionClosed.into());
        }
    }
}

/// Result of handling one buffered frame.
#[derive(Debug)]
enum Inbound {
    Message(Message),
    Closed { code: u16, reason: String },
    Handled,
}

/// Why the steady-state loop returned.
#[derive(Debug)]
pub(crate) enum ServeExit {
    /// Caller asked to close; the Close frame has been sent.
    UserClosed(CloseRequest),
    /// Peer sent Close; the echo has been sent.
    PeerClosed { code: u16, reason: String },
    /// Session layer asked for a fresh connection.
    Reconnect(ReconnectRequest),
    /// Stop requested or the owner went away.
    Stopped,
    Failed(ConnectionError),
}

/// An upgraded connection: transport, receive buffer and reassembly state.
#[derive(Debug)]
pub(crate) struct FrameConnection {
    transport: Transport,
    read_buf: BytesMut,
    assembler: MessageAssembler,
    role: Role,
    max_frame_size: usize,
    /// Set while a frame write is in flight. Stays set if that write was
    /// dropped part way, after which the stream is unusable for framing.
    write_incomplete: bool,
}

impl FrameConnection {
    /// `read_buf` holds whatever arrived after the handshake head.
    pub(crate) fn new(transport: Transport, read_buf: BytesMut, role: Role, limits: FrameLimits) -> Self {
        Self {
            transport,
            read_buf,
            assembler: MessageAssembler::new(limits.max_message_size),
            role,
            max_frame_size: limits.max_frame_size,
            write_incomplete: false,
        }
    }

    pub(crate) async fn send_message(&mut self, message: &Message) -> io::Result<()> {
        self.send_frame(message.opcode(), message.as_bytes()).await
    }

    /// Best effort: gives up after [`CLOSE_WRITE_TIMEOUT`].
    pub(crate) async fn send_close(&mut self, code: u16, reason: &str) -> io::Result<()> {
        self.send_close_payload(&frame::close_payload(code, reason)).await
    }

    async fn send_close_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        timeout(CLOSE_WRITE_TIMEOUT, self.send_frame(Opcode::Close, payload))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "close frame write timed out"))?
    }

    async fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
        if self.write_incomplete {
            return Err(io::Error::other("an earlier frame write was interrupted"));
        }
        let bytes = frame::encode(opcode, payload, true, self.role.masks_outgoing());
        self.write_incomplete = true;
        self.transport.send(&bytes).await?;
        self.write_incomplete = false;
        metrics::record_frame("out", opcode.as_str());
        tracing::trace!(opcode = opcode.as_str(), len = payload.len(), "Frame sent");
        Ok(())
    }

    /// Decode and act on one frame from the buffer, if a whole one is there.
    async fn process_buffered(&mut self) -> Result<Option<Inbound>, ConnectionError> {
        let Some(frame) = frame::decode(&mut self.read_buf, self.max_frame_size)? else {
            return Ok(None);
        };
        frame::check_mask(&frame, self.role)?;
        metrics::record_frame("in", frame.opcode.as_str());

        match frame.opcode {
            Opcode::Ping => {
                self.send_frame(Opcode::Pong, &frame.payload)
                    .await
                    .map_err(ConnectionError::Lost)?;
                Ok(Some(Inbound::Handled))
            }
            Opcode::Pong => Ok(Some(Inbound::Handled)),
            Opcode::Close => {
                let (code, reason) = frame::parse_close_payload(&frame.payload)?;
                if let Err(err) = self.send_close_payload(&frame.payload).await {
                    tracing::debug!(error = %err, "Close echo failed");
                }
                Ok(Some(Inbound::Closed { code, reason }))
            }
            _ => match self.assembler.push(frame)? {
                Some(message) => Ok(Some(Inbound::Message(message))),
                None => Ok(Some(Inbound::Handled)),
            },
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        self.transport.shutdown().await;
    }
}

async fn recv_control(rx: Option<&mut UnboundedReceiver<ReconnectRequest>>) -> Option<ReconnectRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Steady state. Each turn: a pending close first, then queued messages in
/// order, then one buffered frame, then wait for the next command or bytes.
pub(crate) async fn serve<F>(
    conn: &mut FrameConnection,
    shared: &ConnectionShared,
    outbound: &mut UnboundedReceiver<Message>,
    mut reconnects: Option<&mut UnboundedReceiver<ReconnectRequest>>,
    mut deliver: F,
) -> ServeExit
where
    F: FnMut(Message),
{
    // Writes and pong replies race stop and close; an interrupted step
    // restarts the turn so the close request or stop is handled first.
    'turn: loop {
        if let Some(request) = shared.take_close_request() {
            shared.set_state(ConnectionState::Closing);
            if let Err(err) = conn.send_close(request.code, &request.reason).await {
                tracing::debug!(error = %err, "Close frame not delivered");
            }
            return ServeExit::UserClosed(request);
        }
        if shared.is_stopped() {
            return ServeExit::Stopped;
        }

        while let Ok(message) = outbound.try_recv() {
            match interruptible(shared, conn.send_message(&message)).await {
                Some(Ok(())) => {}
                Some(Err(err)) => return ServeExit::Failed(ConnectionError::Lost(err)),
                None => continue 'turn,
            }
        }

        match interruptible(shared, conn.process_buffered()).await {
            Some(Ok(Some(Inbound::Message(message)))) => {
                deliver(message);
                continue;
            }
            Some(Ok(Some(Inbound::Closed { code, reason }))) => {
                shared.set_state(ConnectionState::Closing);
                return ServeExit::PeerClosed { code, reason };
            }
            Some(Ok(Some(Inbound::Handled))) => continue,
            Some(Ok(None)) => {}
            Some(Err(err)) => return ServeExit::Failed(err),
            None => continue,
        }

        match interruptible(shared, conn.transport.flush()).await {
            Some(Ok(())) => {}
            Some(Err(err)) => return ServeExit::Failed(ConnectionError::Lost(err)),
            None => continue,
        }

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return ServeExit::Stopped,
            _ = shared.close_signal.notified() => {}
            request = recv_control(reconnects.as_deref_mut()) => match request {
                Some(request) => {
                    shared.set_state(ConnectionState::Closing);
                    if let Err(err) = conn.send_close(request.close_code, &request.reason).await {
                        tracing::debug!(error = %err, "Close frame not delivered");
                    }
                    return ServeExit::Reconnect(request);
                }
                None => return ServeExit::Stopped,
            },
            message = outbound.recv() => match message {
                Some(message) => match interruptible(shared, conn.send_message(&message)).await {
                    Some(Ok(())) => {}
                    Some(Err(err)) => return ServeExit::Failed(ConnectionError::Lost(err)),
                    None => continue,
                },
                None => return ServeExit::Stopped,
            },
            read = conn.transport.recv(&mut conn.read_buf) => match read {
                Ok(0) => {
                    let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the socket");
                    return ServeExit::Failed(ConnectionError::Lost(eof));
                }
                Ok(_) => {}
                Err(err) => return ServeExit::Failed(ConnectionError::Lost(err)),
            },
        }
    }
}
