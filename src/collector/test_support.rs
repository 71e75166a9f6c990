//! In-memory switch double for collector tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::esl::{Dialer, Event, EventSocket, Reply, SocketError};

/// Scripted switch. Commands without a canned answer are echoed back as
/// the reply body.
#[derive(Clone, Default)]
pub(crate) struct MockSwitch {
    inner: Arc<SwitchState>,
}

#[derive(Default)]
struct SwitchState {
    dials: AtomicUsize,
    failing_dials: parking_lot::Mutex<usize>,
    responses: parking_lot::Mutex<HashMap<String, Result<String, String>>>,
    sessions: parking_lot::Mutex<Vec<Arc<Session>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    send_delay: Duration,
}

/// Server-side view of one dialed session.
pub(crate) struct Session {
    sent: parking_lot::Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<Result<Event, SocketError>>,
}

impl Session {
    /// Commands received on this session, in order.
    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn push_event(&self, event: Event) {
        let _ = self.events.send(Ok(event));
    }

    /// Make the client's next read fail.
    pub(crate) fn fail_read(&self) {
        let _ = self.events.send(Err(SocketError::Disconnected));
    }
}

pub(crate) struct MockConn {
    session: Arc<Session>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Event, SocketError>>>,
    switch: Arc<SwitchState>,
}

impl MockSwitch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every command takes `delay` before its reply arrives.
    pub(crate) fn with_send_delay(delay: Duration) -> Self {
        Self {
            inner: Arc::new(SwitchState {
                send_delay: delay,
                ..Default::default()
            }),
        }
    }

    pub(crate) fn fail_next_dials(&self, n: usize) {
        *self.inner.failing_dials.lock() = n;
    }

    pub(crate) fn respond(&self, command: &str, body: &str) {
        self.inner
            .responses
            .lock()
            .insert(command.to_string(), Ok(body.to_string()));
    }

    pub(crate) fn respond_err(&self, command: &str, message: &str) {
        self.inner
            .responses
            .lock()
            .insert(command.to_string(), Err(message.to_string()));
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    pub(crate) fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<Session> {
        Arc::clone(&self.inner.sessions.lock()[index])
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Dialer for MockSwitch {
    type Conn = MockConn;

    async fn dial(&self, _addr: &str, _password: &str) -> Result<MockConn, SocketError> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);

        {
            let mut failing = self.inner.failing_dials.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(SocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            sent: parking_lot::Mutex::new(Vec::new()),
            events: tx,
        });
        self.inner.sessions.lock().push(Arc::clone(&session));

        Ok(MockConn {
            session,
            events: tokio::sync::Mutex::new(rx),
            switch: Arc::clone(&self.inner),
        })
    }
}

impl EventSocket for MockConn {
    async fn send(&self, command: &str) -> Result<Reply, SocketError> {
        self.session.sent.lock().push(command.to_string());

        let now = self.switch.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.switch.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.switch.send_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.switch.send_delay).await;
        }

        self.switch.in_flight.fetch_sub(1, Ordering::SeqCst);

        let canned = self.switch.responses.lock().get(command).cloned();
        match canned {
            Some(Ok(body)) => Ok(Reply::api(body)),
            Some(Err(message)) => Err(SocketError::Command(message)),
            None => Ok(Reply::api(command)),
        }
    }

    async fn read_event(&self) -> Result<Event, SocketError> {
        let mut events = self.events.lock().await;
        events.recv().await.unwrap_or(Err(SocketError::Disconnected))
    }
}

/// Yield to other tasks until `cond` holds, without advancing time.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Formatted log output, captured for the current thread.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    buf: Arc<parking_lot::Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Route events at `level` and above here until the guard drops.
    pub(crate) fn install(&self, level: tracing::Level) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
