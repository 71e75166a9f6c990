//! Client for the FreeSWITCH inbound event socket.

pub mod connection;
pub mod error;
pub mod event;
pub mod frame;

use std::future::Future;

pub use connection::{Connection, TcpDialer};
pub use error::SocketError;
pub use event::{Event, EventKind, Reply};

/// A live session able to run commands and yield inbound events.
///
/// Command replies and events share one socket; implementations must hand
/// each reply to the caller that sent the matching command.
pub trait EventSocket: Send + Sync + 'static {
    /// Send one command and wait for its reply.
    fn send(&self, command: &str) -> impl Future<Output = Result<Reply, SocketError>> + Send;

    /// Wait for the next inbound event.
    fn read_event(&self) -> impl Future<Output = Result<Event, SocketError>> + Send;
}

/// Opens new sessions against a switch.
pub trait Dialer: Send + Sync + 'static {
    type Conn: EventSocket;

    /// Connect to `addr` and authenticate with `password`.
    fn dial(
        &self,
        addr: &str,
        password: &str,
    ) -> impl Future<Output = Result<Self::Conn, SocketError>> + Send;
}
