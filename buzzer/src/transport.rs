//! Socket ownership and line framing.
//!
//! A [`Connection`] owns one duplex socket. Two background tasks bridge it to
//! the rest of the client:
//!
//! - the writer drains an unbounded channel of outbound lines, so
//!   [`Connection::send`] never blocks the caller;
//! - the reader takes inbound lines strictly in arrival order and hands each
//!   one to exactly one consumer: the pending correlated request if it claims
//!   the line, otherwise the push handler.
//!
//! Two framings are supported. `ws://` and `wss://` endpoints carry one line
//! per WebSocket text frame; `tcp://host:port` (or a bare `host:port`) carries
//! newline-delimited lines over plain TCP. Anything implementing
//! `AsyncBufRead`/`AsyncWrite` can be attached with [`Connection::from_io`].

use std::{
    fmt, io, mem,
    pin::Pin,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures_util::{future, sink, stream, Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
    sync::{mpsc, watch},
};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::{
    correlator::{self, PendingSlot},
    error::ClientError,
    push::{self, PushSlot},
};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

type LineStream = Pin<Box<dyn Stream<Item = io::Result<String>> + Send>>;
type LineSink = Pin<Box<dyn Sink<String, Error = io::Error> + Send>>;
type CloseObserver = Box<dyn FnOnce(&CloseReason) + Send>;

/// Where to reach a Buzzer server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `ws://` or `wss://` URL; one line per text frame.
    WebSocket(String),
    /// `host:port`; newline-delimited lines over TCP.
    Tcp(String),
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("ws://") || s.starts_with("wss://") {
            return Ok(Endpoint::WebSocket(s.to_string()));
        }

        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port))
                if !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok() =>
            {
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            _ => Err(ClientError::InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::WebSocket(url) => f.write_str(url),
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::close`] was called.
    Local,
    /// The server ended the session.
    Remote,
    /// Reading or writing the socket failed.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::Remote => f.write_str("closed by server"),
            CloseReason::Error(detail) => write!(f, "connection error: {detail}"),
        }
    }
}

#[derive(Default)]
struct CloseObservers {
    reason: Option<CloseReason>,
    observers: Vec<CloseObserver>,
}

pub(crate) struct Inner {
    peer: String,
    state: watch::Sender<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
    close: Mutex<CloseObservers>,
    pub(crate) pending: PendingSlot,
    pub(crate) request_gate: tokio::sync::Mutex<()>,
    pub(crate) push: PushSlot,
}

/// Handle to one open socket. Clones share the same connection.
///
/// Dropping every handle does not close the socket; call
/// [`Connection::close`].
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
    pub(crate) request_timeout: Option<Duration>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("state", &self.state())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Connection {
    /// Open a connection; resolves once the socket is open.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, ClientError> {
        let connect_error = |reason: String| ClientError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let connection = match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|err| connect_error(err.to_string()))?;
                let (reader, writer) = stream.into_split();
                Self::start(
                    endpoint.to_string(),
                    Box::pin(tcp_lines(BufReader::new(reader))),
                    Box::pin(tcp_sink(writer)),
                )
            }
            Endpoint::WebSocket(url) => {
                let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
                    .await
                    .map_err(|err| connect_error(err.to_string()))?;
                let (sink, stream) = socket.split();
                Self::start(
                    endpoint.to_string(),
                    Box::pin(websocket_lines(stream)),
                    Box::pin(websocket_sink(sink)),
                )
            }
        };

        info!(peer = %endpoint, "connected");
        Ok(connection)
    }

    /// Attach to an already-established byte stream using newline framing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(
            "io".to_string(),
            Box::pin(tcp_lines(reader)),
            Box::pin(tcp_sink(writer)),
        )
    }

    fn start(peer: String, lines: LineStream, sink: LineSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            peer,
            state,
            outbound,
            close: Mutex::new(CloseObservers::default()),
            pending: PendingSlot::default(),
            request_gate: tokio::sync::Mutex::new(()),
            push: PushSlot::default(),
        });

        tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&inner)));
        tokio::spawn(read_loop(lines, Arc::clone(&inner)));

        // The reader may already have seen EOF; never resurrect a closed socket.
        inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });

        Self {
            inner,
            request_timeout: None,
        }
    }

    /// Reject correlated requests that get no reply within `timeout`.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue one protocol line for writing.
    pub fn send(&self, line: &str) -> Result<(), ClientError> {
        if line.contains(LINE_ENDINGS) {
            return Err(ClientError::InvalidArgument {
                what: "line",
                value: line.to_string(),
            });
        }
        if !self.is_open() {
            return Err(ClientError::NotOpen);
        }
        debug!(%line, "send");
        self.inner
            .outbound
            .send(line.to_string())
            .map_err(|_closed| ClientError::NotOpen)
    }

    /// Close the socket, reject any outstanding request and stop pushes.
    pub fn close(&self) {
        self.inner.shutdown(CloseReason::Local);
    }

    /// Run `observer` exactly once when the connection closes. If it is
    /// already closed, `observer` runs immediately.
    pub fn on_close<F>(&self, observer: F)
    where
        F: FnOnce(&CloseReason) + Send + 'static,
    {
        let mut close = lock(&self.inner.close);
        match close.reason.clone() {
            Some(reason) => {
                drop(close);
                observer(&reason);
            }
            None => close.observers.push(Box::new(observer)),
        }
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.inner.state.subscribe()).await;
    }
}

impl Inner {
    fn dispatch(&self, line: String) {
        debug!(%line, "recv");
        if let Some(line) = correlator::offer(&self.pending, line) {
            push::deliver(&self.push, &line);
        }
    }

    fn shutdown(&self, reason: CloseReason) {
        let closed_now = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !closed_now {
            return;
        }

        info!(peer = %self.peer, %reason, "connection closed");
        correlator::reject_pending(&self.pending);
        push::stop(&self.push);

        let observers = {
            let mut close = lock(&self.close);
            close.reason = Some(reason.clone());
            mem::take(&mut close.observers)
        };
        for observer in observers {
            observer(&reason);
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_closed(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state
        .wait_for(|state| *state == ConnectionState::Closed)
        .await;
}

async fn read_loop(mut lines: LineStream, inner: Arc<Inner>) {
    let mut state = inner.state.subscribe();
    let reason = loop {
        select! {
            next = lines.next() => match next {
                Some(Ok(line)) => inner.dispatch(line),
                Some(Err(error)) => {
                    warn!(?error, "failed to read from server");
                    break CloseReason::Error(error.to_string());
                }
                None => break CloseReason::Remote,
            },
            _ = wait_closed(&mut state) => return,
        }
    };
    inner.shutdown(reason);
}

async fn write_loop(
    mut sink: LineSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inner: Arc<Inner>,
) {
    let mut state = inner.state.subscribe();
    loop {
        select! {
            line = outbound.recv() => {
                let Some(line) = line else { break };
                if let Err(error) = sink.send(line).await {
                    warn!(?error, "failed to write to server");
                    inner.shutdown(CloseReason::Error(error.to_string()));
                    break;
                }
            }
            _ = wait_closed(&mut state) => break,
        }
    }

    if let Err(error) = sink.close().await {
        debug!(?error, "failed to close socket cleanly");
    }
}

async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(LINE_ENDINGS),
            Err(error) => {
                warn!(%error, bytes, "skipping line that is not valid UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        return Ok(Some(line.to_string()));
    }
}

fn tcp_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold(reader, |mut reader| async move {
        match read_line(&mut reader).await {
            Ok(Some(line)) => Some((Ok(line), reader)),
            Ok(None) => None,
            Err(error) => Some((Err(error), reader)),
        }
    })
}

fn tcp_sink<W>(writer: W) -> impl Sink<String, Error = io::Error> + Send
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    sink::unfold(writer, |mut writer, line: String| async move {
        let mut frame = line.into_bytes();
        frame.push(b'\n');
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok::<_, io::Error>(writer)
    })
}

fn websocket_lines<S>(socket: S) -> impl Stream<Item = io::Result<String>> + Send
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
{
    stream::unfold(socket, |mut socket| async move {
        loop {
            match socket.next().await? {
                Ok(Message::Text(text)) => return Some((Ok(text.to_string()), socket)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server sent close frame");
                    return None;
                }
                Ok(Message::Binary(_)) => debug!("discarding binary frame"),
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None;
                }
                Err(error) => return Some((Err(io::Error::other(error)), socket)),
            }
        }
    })
}

fn websocket_sink<S>(socket: S) -> impl Sink<String, Error = io::Error> + Send
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin + Send + 'static,
{
    socket
        .sink_map_err(io::Error::other)
        .with(|line: String| future::ready(Ok::<_, io::Error>(Message::Text(line.into()))))
}
