use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::error::SocketError;
use super::event::{Event, Reply};
use super::frame::{read_frame, Frame};
use super::{Dialer, EventSocket};

/// Inbound events buffered between the socket reader and `read_event`.
const EVENT_QUEUE_CAPACITY: usize = 1024;

type PendingReplies = parking_lot::Mutex<VecDeque<oneshot::Sender<Result<Reply, SocketError>>>>;

/// Dials the switch over TCP and performs the password handshake.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Dialer for TcpDialer {
    type Conn = Connection;

    async fn dial(&self, addr: &str, password: &str) -> Result<Connection, SocketError> {
        tokio::time::timeout(self.timeout, Connection::connect(addr, password))
            .await
            .map_err(|_| SocketError::DialTimeout(self.timeout))?
    }
}

/// One authenticated event socket session.
///
/// A background task owns the read half and routes each frame: replies go
/// to the oldest waiting sender, events go to the event queue. Once that
/// task stops, every pending and future call fails with `Disconnected`.
pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<PendingReplies>,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl Connection {
    /// Connect to `addr` and authenticate with `password`.
    pub async fn connect(addr: &str, password: &str) -> Result<Self, SocketError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = read_frame(&mut reader)
            .await?
            .ok_or(SocketError::Disconnected)?;
        if greeting.content_type() != Some("auth/request") {
            return Err(SocketError::Malformed(format!(
                "expected auth/request, got {:?}",
                greeting.content_type()
            )));
        }

        write_half
            .write_all(format!("auth {password}\n\n").as_bytes())
            .await?;

        let answer = read_frame(&mut reader)
            .await?
            .ok_or(SocketError::Disconnected)?;
        let reply_text = answer.header("Reply-Text").unwrap_or_default();
        if !reply_text.starts_with("+OK") {
            return Err(SocketError::Auth(reply_text.to_string()));
        }

        debug!(addr, "event socket authenticated");

        Ok(Self::spawn(reader, write_half))
    }

    fn spawn(reader: BufReader<OwnedReadHalf>, writer: OwnedWriteHalf) -> Self {
        let pending: Arc<PendingReplies> = Arc::new(parking_lot::Mutex::new(VecDeque::new()));
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            events_tx,
            closed.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            events: tokio::sync::Mutex::new(events_rx),
            closed,
            reader,
        }
    }

    /// Whether the reader task has stopped.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl EventSocket for Connection {
    async fn send(&self, command: &str) -> Result<Reply, SocketError> {
        if command.contains(['\r', '\n']) {
            return Err(SocketError::InvalidCommand(command.to_string()));
        }

        let rx = {
            let mut writer = self.writer.lock().await;
            queue_command(&mut *writer, &self.pending, &self.closed, command).await?
        };

        rx.await.map_err(|_| SocketError::Disconnected)?
    }

    async fn read_event(&self) -> Result<Event, SocketError> {
        let mut events = self.events.lock().await;
        events.recv().await.ok_or(SocketError::Disconnected)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Queue a reply slot and write `command`, under the caller's writer lock.
///
/// The writer lock orders queued reply slots the same way the commands hit
/// the wire, so on a failed write the slot just pushed is the newest one and
/// is withdrawn before the next command can queue behind it.
async fn queue_command<W>(
    writer: &mut W,
    pending: &PendingReplies,
    closed: &CancellationToken,
    command: &str,
) -> Result<oneshot::Receiver<Result<Reply, SocketError>>, SocketError>
where
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = oneshot::channel();
    {
        let mut pending = pending.lock();
        if closed.is_cancelled() {
            return Err(SocketError::Disconnected);
        }
        pending.push_back(tx);
    }

    if let Err(e) = writer.write_all(format!("{command}\n\n").as_bytes()).await {
        pending.lock().pop_back();
        return Err(e.into());
    }

    Ok(rx)
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: Arc<PendingReplies>,
    events: mpsc::Sender<Event>,
    closed: CancellationToken,
) {
    let reason = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break SocketError::Disconnected,
            Err(e) => break e,
        };

        if let Err(e) = route_frame(frame, &pending, &events).await {
            break e;
        }
    };

    debug!(reason = %reason, "event socket reader stopped");

    closed.cancel();
    for waiter in pending.lock().drain(..) {
        let _ = waiter.send(Err(SocketError::Disconnected));
    }
}

async fn route_frame(
    frame: Frame,
    pending: &PendingReplies,
    events: &mpsc::Sender<Event>,
) -> Result<(), SocketError> {
    match frame.content_type() {
        Some("command/reply") | Some("api/response") => {
            let waiter = pending.lock().pop_front();
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Reply::from_frame(frame));
                }
                None => warn!("dropping reply with no waiting command"),
            }
        }
        Some("text/event-json") | Some("text/event-plain") => match Event::from_frame(&frame) {
            Ok(event) => {
                trace!(event = %event.name(), "event received");
                events
                    .send(event)
                    .await
                    .map_err(|_| SocketError::Disconnected)?;
            }
            Err(e) => warn!(error = %e, "dropping undecodable event"),
        },
        Some("text/disconnect-notice") => return Err(SocketError::Disconnected),
        other => debug!(content_type = ?other, "ignoring frame"),
    }

    Ok(())
}
