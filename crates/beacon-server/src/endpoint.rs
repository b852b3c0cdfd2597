//! One live WebSocket connection: an inbound pump, an outbound pump and the
//! bounded queue between the hub and the socket.
//!
//! Lifecycle:
//! 1. The welcome envelope is queued before the queue is handed to the hub,
//!    so it is always the first frame on the wire.
//! 2. The queue sender is registered with the hub; from then on the hub is
//!    its only producer.
//! 3. Both pumps run as separate tasks. If the inbound pump ends first the
//!    connection unregisters, which closes the queue and lets the outbound
//!    pump flush and send a close frame. If the outbound pump ends first
//!    (queue closed by the hub, or a write error) the inbound pump is aborted.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};
use beacon_core::{ClientId, Envelope};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::hub::HubHandle;

/// Per-connection limits.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// Largest inbound frame, in bytes.
    pub max_message_size: usize,
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
    /// Keepalive ping interval (`None` disables).
    pub ping_interval: Option<Duration>,
    /// How long the outbound pump may keep flushing after the inbound pump ends.
    pub close_grace: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for EndpointConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            queue_capacity: config.outbound_queue_capacity.max(1),
            ping_interval: config.ping_interval(),
            close_grace: config.close_grace(),
        }
    }
}

/// Why the inbound pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// Transport read error.
    Failed,
    /// Peer sent a frame larger than the limit.
    Oversized,
}

/// Why the outbound pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteEnd {
    /// The hub closed the queue; a close frame was sent.
    QueueClosed,
    /// Writing to the transport failed.
    Failed,
}

/// Read frames until the peer closes, errors, or exceeds `max_size`.
///
/// Text and binary frames are logged and discarded.
pub async fn inbound_pump<S, E>(mut stream: S, id: &ClientId, max_size: usize) -> ReadEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(item) = stream.next().await {
        let msg = match item {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client_id = %id, error = %e, "websocket read error");
                return ReadEnd::Failed;
            }
        };
        match msg {
            Message::Text(text) => {
                let size = text.as_str().len();
                if size > max_size {
                    warn!(client_id = %id, size, max_size, "inbound frame too large");
                    return ReadEnd::Oversized;
                }
                debug!(client_id = %id, message = %text.as_str(), "inbound message discarded");
            }
            Message::Binary(data) => {
                if data.len() > max_size {
                    warn!(client_id = %id, size = data.len(), max_size, "inbound frame too large");
                    return ReadEnd::Oversized;
                }
                debug!(client_id = %id, size = data.len(), "inbound binary discarded");
            }
            Message::Close(_) => return ReadEnd::Closed,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    ReadEnd::Closed
}

/// Drain `queue` onto `sink` in FIFO order, pinging every `ping_interval`.
///
/// When the queue closes, a close frame is sent and the pump returns.
pub async fn outbound_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Utf8Bytes>,
    id: &ClientId,
    ping_interval: Option<Duration>,
) -> WriteEnd
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(Message::Text(frame)).await {
                        debug!(client_id = %id, error = %e, "websocket write failed");
                        return WriteEnd::Failed;
                    }
                }
                None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        trace!(client_id = %id, error = %e, "close frame not delivered");
                    }
                    return WriteEnd::QueueClosed;
                }
            },
            () = next_tick(&mut ping) => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(client_id = %id, error = %e, "ping failed");
                    return WriteEnd::Failed;
                }
                trace!(client_id = %id, "sent ping");
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Run one connection to completion.
///
/// Returns once both pumps have stopped and the registration is gone.
pub async fn run_connection<S, E>(socket: S, id: ClientId, hub: HubHandle, config: EndpointConfig)
where
    S: Stream<Item = Result<Message, E>> + Sink<Message> + Send + 'static,
    <S as Sink<Message>>::Error: Display + Send,
    E: Display + Send + 'static,
{
    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

    match Envelope::connected(&id).to_json() {
        Ok(welcome) => {
            if queue_tx.try_send(Utf8Bytes::from(welcome)).is_err() {
                warn!(client_id = %id, "welcome frame could not be queued");
            }
        }
        Err(e) => warn!(client_id = %id, error = %e, "failed to encode welcome envelope"),
    }

    let registration = match hub.register(id.clone(), queue_tx).await {
        Ok(registration) => registration,
        Err(e) => {
            warn!(client_id = %id, error = %e, "hub unavailable, dropping connection");
            return;
        }
    };
    info!(client_id = %id, serial = registration.serial(), "websocket client connected");

    let (sink, stream) = socket.split();

    let writer_id = id.clone();
    let ping_interval = config.ping_interval;
    let mut writer = tokio::spawn(async move {
        outbound_pump(sink, queue_rx, &writer_id, ping_interval).await
    });

    let reader_id = id.clone();
    let max_size = config.max_message_size;
    let mut reader =
        tokio::spawn(async move { inbound_pump(stream, &reader_id, max_size).await });

    tokio::select! {
        read_end = &mut reader => {
            debug!(client_id = %id, ?read_end, "inbound pump finished");
            if let Err(e) = hub.unregister(&registration).await {
                debug!(client_id = %id, error = %e, "unregister after read end failed");
            }
            match tokio::time::timeout(config.close_grace, &mut writer).await {
                Ok(write_end) => debug!(client_id = %id, ?write_end, "outbound pump finished"),
                Err(_) => {
                    debug!(client_id = %id, "outbound pump did not finish within grace period");
                    writer.abort();
                }
            }
        }
        write_end = &mut writer => {
            debug!(client_id = %id, ?write_end, "outbound pump finished");
            reader.abort();
            if let Err(e) = hub.unregister(&registration).await {
                debug!(client_id = %id, error = %e, "unregister after write end failed");
            }
        }
    }

    info!(client_id = %id, serial = registration.serial(), "websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use futures::channel::mpsc as fmpsc;
    use tokio_util::sync::CancellationToken;

    fn id(s: &str) -> ClientId {
        ClientId::from(s)
    }

    fn text(s: &str) -> Result<Message, String> {
        Ok(Message::Text(Utf8Bytes::from(s.to_owned())))
    }

    /// In-memory duplex transport: the test feeds `Message`s in and reads
    /// what the server writes out.
    struct Duplex {
        inbound: fmpsc::UnboundedReceiver<Result<Message, String>>,
        outbound: fmpsc::UnboundedSender<Message>,
    }

    impl Stream for Duplex {
        type Item = Result<Message, String>;
        fn poll_next(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            self.inbound.poll_next_unpin(cx)
        }
    }

    impl Sink<Message> for Duplex {
        type Error = fmpsc::SendError;
        fn poll_ready(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            self.outbound.poll_ready_unpin(cx)
        }
        fn start_send(
            mut self: std::pin::Pin<&mut Self>,
            item: Message,
        ) -> Result<(), Self::Error> {
            self.outbound.start_send_unpin(item)
        }
        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            self.outbound.poll_flush_unpin(cx)
        }
        fn poll_close(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            self.outbound.poll_close_unpin(cx)
        }
    }

    fn duplex() -> (
        Duplex,
        fmpsc::UnboundedSender<Result<Message, String>>,
        fmpsc::UnboundedReceiver<Message>,
    ) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        (
            Duplex {
                inbound: in_rx,
                outbound: out_tx,
            },
            in_tx,
            out_rx,
        )
    }

    fn no_ping() -> EndpointConfig {
        EndpointConfig {
            ping_interval: None,
            close_grace: Duration::from_millis(500),
            ..EndpointConfig::default()
        }
    }

    fn as_text(msg: &Message) -> &str {
        match msg {
            Message::Text(t) => t.as_str(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    // ── inbound pump ────────────────────────────────────────────────

    #[tokio::test]
    async fn inbound_discards_text_until_close() {
        let stream = futures::stream::iter(vec![
            text("hello"),
            text("world"),
            Ok(Message::Close(None)),
            text("never read"),
        ]);
        assert_eq!(inbound_pump(stream, &id("u1"), 512).await, ReadEnd::Closed);
    }

    #[tokio::test]
    async fn inbound_stream_end_is_close() {
        let stream = futures::stream::iter(vec![text("only")]);
        assert_eq!(inbound_pump(stream, &id("u1"), 512).await, ReadEnd::Closed);
    }

    #[tokio::test]
    async fn inbound_error_ends_pump() {
        let stream = futures::stream::iter(vec![text("ok"), Err("reset".to_string())]);
        assert_eq!(inbound_pump(stream, &id("u1"), 512).await, ReadEnd::Failed);
    }

    #[tokio::test]
    async fn inbound_limit_is_inclusive() {
        let at_limit = "a".repeat(512);
        let over = "a".repeat(513);
        let stream = futures::stream::iter(vec![text(&at_limit), text(&over)]);
        assert_eq!(inbound_pump(stream, &id("u1"), 512).await, ReadEnd::Oversized);

        let big_binary: Result<Message, String> = Ok(Message::Binary(Bytes::from(vec![0u8; 600])));
        let stream = futures::stream::iter(vec![big_binary]);
        assert_eq!(inbound_pump(stream, &id("u1"), 512).await, ReadEnd::Oversized);
    }

    // ── outbound pump ───────────────────────────────────────────────

    #[tokio::test]
    async fn outbound_fifo_then_close_frame() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        for s in ["a", "b", "c"] {
            tx.try_send(Utf8Bytes::from(s.to_owned())).unwrap();
        }
        drop(tx);

        let end = outbound_pump(sink, rx, &id("u1"), None).await;
        assert_eq!(end, WriteEnd::QueueClosed);

        let frames: Vec<Message> = written.by_ref().collect().await;
        assert_eq!(frames.len(), 4);
        assert_eq!(as_text(&frames[0]), "a");
        assert_eq!(as_text(&frames[1]), "b");
        assert_eq!(as_text(&frames[2]), "c");
        assert!(matches!(frames[3], Message::Close(None)));
    }

    #[tokio::test]
    async fn outbound_write_error_ends_pump() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, written) = fmpsc::unbounded::<Message>();
        drop(written);
        tx.try_send(Utf8Bytes::from("x".to_owned())).unwrap();

        let end = outbound_pump(sink, rx, &id("u1"), None).await;
        assert_eq!(end, WriteEnd::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn outbound_sends_pings() {
        let (tx, rx) = mpsc::channel::<Utf8Bytes>(8);
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let pump = tokio::spawn(async move {
            outbound_pump(sink, rx, &id("u1"), Some(Duration::from_secs(30))).await
        });

        let first = written.next().await.unwrap();
        assert!(matches!(first, Message::Ping(_)));

        drop(tx);
        assert_eq!(pump.await.unwrap(), WriteEnd::QueueClosed);
    }

    // ── full connection ─────────────────────────────────────────────

    #[tokio::test]
    async fn welcome_is_first_frame_then_broadcasts() {
        let cancel = CancellationToken::new();
        let (hub, _task) = Hub::spawn(cancel.clone());
        let (socket, client_tx, mut client_rx) = duplex();

        let conn = tokio::spawn(run_connection(socket, id("u7"), hub.clone(), no_ping()));

        let welcome = client_rx.next().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(as_text(&welcome)).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["user_id"], "u7");
        assert_eq!(value["message"], "WebSocket connection established");

        hub.broadcast(&Envelope::new("ping")).await.unwrap();
        let frame = client_rx.next().await.unwrap();
        assert_eq!(as_text(&frame), r#"{"type":"ping"}"#);

        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();
        conn.await.unwrap();

        assert!(!hub.contains(&id("u7")).await.unwrap());
        let tail: Vec<Message> = client_rx.collect().await;
        assert!(matches!(tail.last(), Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn oversized_frame_terminates_connection() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());
        let (socket, client_tx, mut client_rx) = duplex();
        let conn = tokio::spawn(run_connection(socket, id("big"), hub.clone(), no_ping()));

        let _welcome = client_rx.next().await.unwrap();
        client_tx.unbounded_send(text(&"x".repeat(513))).unwrap();
        conn.await.unwrap();

        assert!(!hub.contains(&id("big")).await.unwrap());
    }

    #[tokio::test]
    async fn superseded_connection_winds_down() {
        let (hub, _task) = Hub::spawn(CancellationToken::new());

        let (first, _first_tx, mut first_rx) = duplex();
        let first_conn = tokio::spawn(run_connection(first, id("u1"), hub.clone(), no_ping()));
        let _ = first_rx.next().await.unwrap();

        let (second, _second_tx, mut second_rx) = duplex();
        let _second_conn = tokio::spawn(run_connection(second, id("u1"), hub.clone(), no_ping()));
        let _ = second_rx.next().await.unwrap();

        // Replacing the registration closes the first queue: its writer sends
        // a close frame and the whole connection finishes.
        first_conn.await.unwrap();
        let tail: Vec<Message> = first_rx.collect().await;
        assert!(matches!(tail.last(), Some(Message::Close(None))));

        hub.send_to(&id("u1"), &Envelope::new("direct")).await.unwrap();
        let frame = second_rx.next().await.unwrap();
        assert_eq!(as_text(&frame), r#"{"type":"direct"}"#);
        assert!(hub.contains(&id("u1")).await.unwrap());
    }

    #[tokio::test]
    async fn hub_shutdown_closes_connection() {
        let cancel = CancellationToken::new();
        let (hub, hub_task) = Hub::spawn(cancel.clone());
        let (socket, _client_tx, mut client_rx) = duplex();
        let conn = tokio::spawn(run_connection(socket, id("u1"), hub, no_ping()));
        let _ = client_rx.next().await.unwrap();

        cancel.cancel();
        hub_task.await.unwrap();
        conn.await.unwrap();

        let tail: Vec<Message> = client_rx.collect().await;
        assert!(matches!(tail.last(), Some(Message::Close(None))));
    }
}
