use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{future, stream::BoxStream, Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ConnectionError;

pub type ConnectionId = Uuid;

/// Inbound text frames of one transport, in arrival order. Ends on transport
/// closure; a close frame or transport failure is yielded as an error first.
pub type Inbound = BoxStream<'static, Result<String, ConnectionError>>;

/// Limits applied to every connection's outbound side.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Deadline for writing a single frame to the socket.
    pub send_timeout: Duration,
    /// Frames that may wait in the outbound queue before sends start failing.
    pub queue_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            queue_capacity: 64,
        }
    }
}

/// Send half of one live transport.
///
/// Sending never waits: frames go into a bounded queue drained by a writer
/// task. A full queue, a dead writer or an explicit [`Connection::close`] all
/// make further sends fail with an error the caller must treat as terminal.
/// Clones share the same queue and the same closed state.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection detached from any socket. The returned receiver
    /// yields every frame accepted by [`Connection::send`].
    pub fn new(queue_capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let connection = Self {
            id: Uuid::new_v4(),
            tx,
            shutdown: CancellationToken::new(),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, frame: String) -> Result<(), ConnectionError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection = %self.id, "Outbound queue full, closing slow connection");
                self.close();
                Err(ConnectionError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(ConnectionError::Closed)
            }
        }
    }

    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection has been closed by anyone.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

/// Split a websocket into a [`Connection`] and its inbound frame stream,
/// spawning the writer task that drains the outbound queue.
pub fn attach(socket: WebSocket, settings: ConnectionSettings) -> (Connection, Inbound) {
    let (sink, stream) = socket.split();
    let (connection, rx) = Connection::new(settings.queue_capacity);

    tokio::spawn(write_loop(
        sink,
        rx,
        connection.shutdown.clone(),
        settings.send_timeout,
    ));

    let inbound = stream
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes).map_err(|e| ConnectionError::Decode(e.to_string())),
                ),
                // Answered by the transport itself.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                Ok(Message::Close(_)) => Some(Err(ConnectionError::Closed)),
                Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
            })
        })
        .boxed();

    (connection, inbound)
}

async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            // Queued frames win over shutdown: everything accepted before the
            // close is written ahead of the Close frame. Sends fail once closed,
            // so the drain is finite.
            biased;

            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                match timeout(send_timeout, sink.send(Message::Text(frame))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "Socket write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(timeout_ms = send_timeout.as_millis() as u64, "Socket write timed out");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                let _ = timeout(send_timeout, sink.send(Message::Close(None))).await;
                break;
            }
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::PollSender;

    use super::*;

    #[tokio::test]
    async fn queued_frames_are_written_before_close() {
        let (conn, rx) = Connection::new(4);
        let (sink_tx, mut written) = mpsc::channel(8);
        conn.send("one".into()).unwrap();
        conn.send("two".into()).unwrap();
        conn.close();

        write_loop(
            PollSender::new(sink_tx),
            rx,
            conn.shutdown.clone(),
            Duration::from_secs(1),
        )
        .await;

        let mut frames = Vec::new();
        while let Ok(message) = written.try_recv() {
            frames.push(message);
        }
        assert_eq!(
            frames,
            vec![
                Message::Text("one".into()),
                Message::Text("two".into()),
                Message::Close(None),
            ]
        );
    }

    #[tokio::test]
    async fn send_delivers_in_order() {
        let (conn, mut rx) = Connection::new(4);
        conn.send("one".into()).unwrap();
        conn.send("two".into()).unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[test]
    fn send_after_close_fails() {
        let (conn, _rx) = Connection::new(4);
        conn.close();
        assert!(conn.is_closed());
        assert_eq!(conn.send("late".into()), Err(ConnectionError::Closed));
    }

    #[test]
    fn full_queue_fails_and_closes() {
        let (conn, _rx) = Connection::new(1);
        conn.send("first".into()).unwrap();
        assert_eq!(conn.send("second".into()), Err(ConnectionError::QueueFull));
        assert!(conn.is_closed());
    }

    #[test]
    fn dropped_receiver_means_closed() {
        let (conn, rx) = Connection::new(4);
        drop(rx);
        assert_eq!(conn.send("nobody".into()), Err(ConnectionError::Closed));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn clones_share_closed_state() {
        let (conn, _rx) = Connection::new(4);
        let other = conn.clone();
        assert_eq!(conn.id(), other.id());
        other.close();
        conn.closed().await;
        assert!(conn.is_closed());
    }
}
