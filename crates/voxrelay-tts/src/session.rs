//! Duplex synthesis sessions.
//!
//! One session owns one vendor socket. The vendor protocols differ in
//! handshake and frame vocabulary but share the same shape: send text units
//! up, receive audio/metadata frames down, with completion and failure
//! flowing in both directions. The differences live in small protocol
//! descriptors ([`Handshake`], [`OutboundProtocol`], [`InboundProtocol`]);
//! [`drive_duplex`] is the one driver that runs all of them.

use crate::error::{TtsError, TtsResult};
use crate::provider::{AudioStream, TextStream};
use crate::relay::ChunkRelay;
use crate::segment::SentenceSegmenter;
use crate::types::{AudioChunk, CancelToken, TtsOptions};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Streaming,
    Finishing,
    Closed,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Streaming => "streaming",
            SessionState::Finishing => "finishing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One inbound message off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Outbound half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send(&mut self, frame: String) -> TtsResult<()>;
    /// Idempotent; safe in any state.
    async fn close(&mut self) -> TtsResult<()>;
}

/// Inbound half of a transport. `None` means the peer closed the connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    async fn next(&mut self) -> Option<TtsResult<InboundFrame>>;
}

/// Vendor-specific outbound frame vocabulary.
pub trait OutboundProtocol: Send + 'static {
    fn text_frame(&mut self, unit: &str, first: bool) -> String;
    /// The finishing control frame, or `None` for protocols where the server
    /// drives completion on its own.
    fn finish_frame(&mut self) -> Option<String>;
}

/// Outcome of decoding one inbound frame.
#[derive(Debug)]
pub enum Decoded {
    /// Server-side ready acknowledgement (handshake phase only).
    Ready,
    /// A normalized audio/metadata chunk.
    Chunk(AudioChunk),
    /// A chunk that also terminates the session.
    Final(AudioChunk),
    /// Session finished without a payload on this frame.
    Done,
    /// Heartbeats and other frames that never reach the consumer.
    Ignore,
}

/// Vendor-specific inbound frame vocabulary.
pub trait InboundProtocol: Send + 'static {
    fn provider(&self) -> &'static str;
    fn decode(&mut self, frame: InboundFrame) -> TtsResult<Decoded>;
}

/// Handshake description: what to send on open, whether the server must
/// acknowledge readiness, and what to send once it has.
#[derive(Debug, Default)]
pub struct Handshake {
    pub init_frames: Vec<String>,
    pub requires_ready: bool,
    pub start_frames: Vec<String>,
}

#[derive(Clone)]
struct StateCell(Arc<StdMutex<SessionState>>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(StdMutex::new(SessionState::Connecting)))
    }

    fn get(&self) -> SessionState {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, next: SessionState) {
        let mut state = self.0.lock().unwrap_or_else(|e| e.into_inner());
        if *state != next {
            log::trace!("session state {} -> {next}", *state);
            *state = next;
        }
    }
}

/// Exclusive owner of a transport's outbound half plus the session state
/// machine. Cloned across the sender and receiver tasks; the underlying sink
/// is serialized behind a mutex so `close` is safe concurrently with sends.
pub struct DuplexSession<Si: FrameSink> {
    sink: Arc<Mutex<Si>>,
    state: StateCell,
}

impl<Si: FrameSink> Clone for DuplexSession<Si> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            state: self.state.clone(),
        }
    }
}

impl<Si: FrameSink> DuplexSession<Si> {
    pub fn new(sink: Si) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            state: StateCell::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Send a handshake/control frame; valid before the session is ready.
    async fn send_control(&self, frame: String) -> TtsResult<()> {
        self.sink.lock().await.send(frame).await
    }

    /// Send a synthesis unit; only valid in `Ready`/`Streaming`.
    pub async fn send(&self, frame: String) -> TtsResult<()> {
        match self.state.get() {
            SessionState::Ready => self.state.set(SessionState::Streaming),
            SessionState::Streaming => {}
            other => {
                return Err(TtsError::ProtocolState(format!(
                    "cannot send text while session is {other}"
                )));
            }
        }
        self.sink.lock().await.send(frame).await
    }

    /// Best-effort finishing frame; never raises. Valid exactly once.
    pub async fn finish(&self, frame: Option<String>) {
        if matches!(
            self.state.get(),
            SessionState::Finishing | SessionState::Closed
        ) {
            return;
        }
        if !matches!(self.state.get(), SessionState::Failed) {
            self.state.set(SessionState::Finishing);
        }
        if let Some(frame) = frame {
            let _ = self.sink.lock().await.send(frame).await;
        }
    }

    /// Idempotent close from any state, including concurrently with a
    /// receive in flight.
    pub async fn close(&self, failed: bool) {
        let _ = self.sink.lock().await.close().await;
        if failed {
            self.state.set(SessionState::Failed);
        } else if self.state.get() != SessionState::Failed {
            self.state.set(SessionState::Closed);
        }
    }
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsSink {
    inner: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    closed: bool,
}

pub struct WsSource {
    inner: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> TtsResult<()> {
        if self.closed {
            return Err(TtsError::Connection("socket already closed".into()));
        }
        self.inner.send(Message::text(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> TtsResult<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.inner.close().await;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> Option<TtsResult<InboundFrame>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(InboundFrame::Text(text.as_str().to_owned())));
                }
                Ok(Message::Binary(data)) => return Some(Ok(InboundFrame::Binary(data.to_vec()))),
                Ok(Message::Close(_)) => return None,
                // Control frames tungstenite answers on its own.
                Ok(_) => continue,
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// Open a WebSocket, honoring extra headers and the caller's timeout.
pub async fn connect_ws(
    url: &str,
    headers: Option<&HashMap<String, String>>,
    timeout: Option<Duration>,
) -> TtsResult<(WsSink, WsSource)> {
    let mut request = url.into_client_request()?;
    if let Some(headers) = headers {
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TtsError::InvalidRequest(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TtsError::InvalidRequest(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }
    }

    log::debug!("connecting websocket: {url}");
    let connect = connect_async(request);
    let (socket, _response) = match timeout {
        Some(duration) => tokio::time::timeout(duration, connect)
            .await
            .map_err(|_| TtsError::Connection(format!("connect timed out after {duration:?}")))??,
        None => connect.await?,
    };
    let (sink, source) = socket.split();
    Ok((
        WsSink {
            inner: sink,
            closed: false,
        },
        WsSource { inner: source },
    ))
}

async fn wait_cancelled(cancel: &Option<CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// Run one duplex session: handshake, then concurrently drain the caller's
/// text into the socket while relaying inbound frames to the returned stream.
///
/// The handshake (init frames, the server's ready acknowledgement where the
/// protocol demands one, start frames) completes before this returns; a
/// caller timeout bounds it. `text` of `None` is a server-driven session with
/// no outbound traffic.
pub async fn drive_duplex<Tx, Rx, Si, So>(
    handshake: Handshake,
    outbound: Tx,
    inbound: Rx,
    sink: Si,
    source: So,
    text: Option<TextStream>,
    options: &TtsOptions,
) -> TtsResult<AudioStream>
where
    Tx: OutboundProtocol,
    Rx: InboundProtocol,
    Si: FrameSink,
    So: FrameSource,
{
    let session = DuplexSession::new(sink);
    let mut source = source;
    let mut inbound = inbound;
    let provider = inbound.provider();

    session.state.set(SessionState::Handshaking);
    let establish = async {
        for frame in handshake.init_frames {
            session.send_control(frame).await?;
        }
        if handshake.requires_ready {
            await_ready(&mut inbound, &mut source).await?;
        }
        for frame in handshake.start_frames {
            session.send_control(frame).await?;
        }
        Ok::<_, TtsError>(())
    };
    let established = match options.timeout {
        Some(duration) => tokio::time::timeout(duration, establish)
            .await
            .map_err(|_| TtsError::Connection(format!("handshake timed out after {duration:?}"))),
        None => Ok(establish.await),
    };
    match established {
        Ok(Ok(())) => {
            log::debug!("{provider} duplex session ready");
            session.state.set(SessionState::Ready);
        }
        Ok(Err(err)) | Err(err) => {
            log::warn!("{provider} duplex handshake failed: {err}");
            session.close(true).await;
            return Err(err);
        }
    }

    let relay: ChunkRelay<AudioChunk> = ChunkRelay::new();
    let cancel = options.cancel.clone();

    // Receiver: the only publisher, so consumer order equals arrival order.
    {
        let relay = relay.clone();
        let session = session.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = wait_cancelled(&cancel) => {
                        relay.fail(TtsError::Cancelled).await;
                        session.close(true).await;
                        return;
                    }
                    frame = source.next() => frame,
                };
                match frame {
                    Some(Ok(frame)) => match inbound.decode(frame) {
                        Ok(Decoded::Chunk(chunk)) => relay.publish(chunk).await,
                        Ok(Decoded::Final(chunk)) => {
                            relay.publish(chunk).await;
                            relay.complete().await;
                            session.close(false).await;
                            return;
                        }
                        Ok(Decoded::Done) => {
                            relay.complete().await;
                            session.close(false).await;
                            return;
                        }
                        Ok(Decoded::Ready) | Ok(Decoded::Ignore) => {}
                        Err(err) => {
                            log::warn!("{provider} session failed: {err}");
                            relay.fail(err).await;
                            session.close(true).await;
                            return;
                        }
                    },
                    Some(Err(err)) => {
                        log::warn!("{provider} transport failed: {err}");
                        relay.fail(err).await;
                        session.close(true).await;
                        return;
                    }
                    None => {
                        relay.complete().await;
                        session.close(false).await;
                        return;
                    }
                }
            }
        });
    }

    // Sender: segment the caller's text and drain it into the socket.
    {
        let relay = relay.clone();
        let session = session.clone();
        let mut outbound = outbound;
        tokio::spawn(async move {
            let mut segmenter = SentenceSegmenter::new();
            let mut first = true;
            let drained: TtsResult<()> = async {
                let Some(mut stream) = text else {
                    return Ok(());
                };
                loop {
                    let fragment = tokio::select! {
                        biased;
                        _ = wait_cancelled(&cancel) => return Err(TtsError::Cancelled),
                        fragment = stream.next() => fragment,
                    };
                    let Some(fragment) = fragment else { break };
                    if let Some(unit) = segmenter.push(&fragment) {
                        let frame = outbound.text_frame(&unit, first);
                        first = false;
                        session.send(frame).await?;
                    }
                }
                if let Some(unit) = segmenter.flush() {
                    session.send(outbound.text_frame(&unit, first)).await?;
                }
                Ok(())
            }
            .await;

            // The finishing frame goes out exactly once after the text is
            // exhausted, best-effort even when the relay already failed.
            session.finish(outbound.finish_frame()).await;
            if let Err(err) = drained {
                relay.fail(err).await;
                session.close(true).await;
            }
        });
    }

    Ok(Box::pin(relay.into_stream()))
}

async fn await_ready<Rx: InboundProtocol, So: FrameSource>(
    inbound: &mut Rx,
    source: &mut So,
) -> TtsResult<()> {
    loop {
        match source.next().await {
            Some(Ok(frame)) => match inbound.decode(frame)? {
                Decoded::Ready => return Ok(()),
                Decoded::Ignore => continue,
                Decoded::Done => {
                    return Err(TtsError::Connection(
                        "connection closed before ready signal".into(),
                    ));
                }
                Decoded::Chunk(_) | Decoded::Final(_) => {
                    return Err(TtsError::ProtocolState(
                        "audio frame received before ready signal".into(),
                    ));
                }
            },
            Some(Err(err)) => return Err(err),
            None => {
                return Err(TtsError::Connection(
                    "connection closed during handshake".into(),
                ));
            }
        }
    }
}
