//! Loopback FreeSWITCH double speaking the event socket protocol.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "ClueCon";

#[derive(Default)]
struct SwitchState {
    accepted: usize,
    closed: usize,
    commands: Vec<Vec<String>>,
    responses: HashMap<String, String>,
    sessions: Vec<mpsc::UnboundedSender<String>>,
}

/// Accepts any number of sessions on 127.0.0.1 and answers commands.
///
/// `api` commands get an `api/response` with the canned body, or the
/// command's argument echoed back. Everything else gets `+OK`.
pub struct FakeSwitch {
    addr: SocketAddr,
    state: Arc<Mutex<SwitchState>>,
    accept: JoinHandle<()>,
}

impl FakeSwitch {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(SwitchState::default()));

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = {
                    let mut s = accept_state.lock();
                    s.accepted += 1;
                    s.commands.push(Vec::new());
                    s.commands.len() - 1
                };
                tokio::spawn(serve(stream, index, Arc::clone(&accept_state)));
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn respond(&self, command: &str, body: &str) {
        self.state
            .lock()
            .responses
            .insert(command.to_string(), body.to_string());
    }

    pub fn accepted(&self) -> usize {
        self.state.lock().accepted
    }

    /// Authenticated sessions the client has since hung up.
    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }

    /// Number of sessions that authenticated.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Commands received on session `index`, excluding `auth`.
    pub fn commands(&self, index: usize) -> Vec<String> {
        self.state
            .lock()
            .commands
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    /// Write a raw frame to the most recent session.
    pub fn push_raw(&self, frame: String) {
        if let Some(tx) = self.state.lock().sessions.last() {
            let _ = tx.send(frame);
        }
    }

    pub fn push_json_event(&self, name: &str) {
        let body = format!(r#"{{"Event-Name":"{name}","Core-UUID":"d6f1a1e6"}}"#);
        self.push_raw(format!(
            "Content-Length: {}\nContent-Type: text/event-json\n\n{body}",
            body.len()
        ));
    }

    pub fn push_plain_event(&self, name: &str) {
        let body = format!("Event-Name: {name}\nEvent-Info: ready%20to%20go\n\n");
        self.push_raw(format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{body}",
            body.len()
        ));
    }

    pub fn push_disconnect_notice(&self) {
        let body = "Disconnected, goodbye.\n";
        self.push_raw(format!(
            "Content-Type: text/disconnect-notice\nContent-Length: {}\n\n{body}",
            body.len()
        ));
    }
}

impl Drop for FakeSwitch {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, index: usize, state: Arc<Mutex<SwitchState>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    if write_half
        .write_all(b"Content-Type: auth/request\n\n")
        .await
        .is_err()
    {
        return;
    }

    let Some(auth) = read_command(&mut reader).await else {
        return;
    };
    if auth != format!("auth {PASSWORD}") {
        let _ = write_half
            .write_all(b"Content-Type: command/reply\nReply-Text: -ERR invalid\n\n")
            .await;
        return;
    }
    if write_half
        .write_all(b"Content-Type: command/reply\nReply-Text: +OK accepted\n\n")
        .await
        .is_err()
    {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.lock().sessions.push(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(frame.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    while let Some(command) = read_command(&mut reader).await {
        let frame = {
            let mut s = state.lock();
            s.commands[index].push(command.clone());
            answer(&command, &s.responses)
        };
        if tx.send(frame).is_err() {
            break;
        }
    }

    writer.abort();
    state.lock().closed += 1;
}

fn answer(command: &str, responses: &HashMap<String, String>) -> String {
    match command.split_once(' ') {
        Some((verb, arg)) if verb.eq_ignore_ascii_case("api") => {
            let body = responses
                .get(command)
                .cloned()
                .unwrap_or_else(|| arg.to_string());
            format!(
                "Content-Type: api/response\nContent-Length: {}\n\n{body}",
                body.len()
            )
        }
        _ => "Content-Type: command/reply\nReply-Text: +OK\n\n".to_string(),
    }
}

/// Read one `command\n\n` block; `None` on EOF.
async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<String> {
    let mut command = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if command.is_empty() {
                continue;
            }
            return Some(command);
        }
        if command.is_empty() {
            command = line.to_string();
        }
    }
}

/// Poll `cond` every 10ms for up to five seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// Value of `series` in a Prometheus text exposition.
pub fn sample(text: &str, series: &str) -> Option<f64> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (name, value) = line.rsplit_once(' ')?;
            (name == series).then(|| value.parse::<f64>().ok())?
        })
}
