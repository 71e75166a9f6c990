use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use super::Shared;
use crate::esl::{Dialer, SocketError};

/// Holder for the single live session.
///
/// Swapped atomically: readers take a cheap `Arc` snapshot and never
/// observe a half-replaced handle.
pub struct ConnectionCell<C> {
    current: ArcSwapOption<C>,
}

impl<C> ConnectionCell<C> {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Snapshot of the current session, if any.
    pub fn current(&self) -> Option<Arc<C>> {
        self.current.load_full()
    }

    pub fn is_connected(&self) -> bool {
        self.current.load().is_some()
    }

    /// Install a freshly dialed session, replacing whatever was there.
    pub fn install(&self, conn: C) -> Arc<C> {
        let conn = Arc::new(conn);
        self.current.store(Some(Arc::clone(&conn)));
        conn
    }

    /// Drop `conn` if it is still the installed session.
    ///
    /// Returns false when a different session was installed meanwhile.
    pub fn invalidate(&self, conn: &Arc<C>) -> bool {
        let expected = Some(Arc::clone(conn));
        let previous = self.current.compare_and_swap(&expected, None::<Arc<C>>);
        matches!(&*previous, Some(prev) if Arc::ptr_eq(prev, conn))
    }

    pub fn clear(&self) {
        self.current.store(None);
    }
}

impl<C> Default for ConnectionCell<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands replayed after every successful connect.
///
/// Insertion-ordered and deduplicated; members are never removed.
#[derive(Debug, Default)]
pub struct InitCommands {
    commands: parking_lot::Mutex<Vec<String>>,
}

impl InitCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `command`; returns false if it was already a member.
    pub fn add(&self, command: &str) -> bool {
        let mut commands = self.commands.lock();
        if commands.iter().any(|c| c == command) {
            return false;
        }
        commands.push(command.to_string());
        true
    }

    /// Current members in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

impl<D: Dialer> Shared<D> {
    /// Dial the switch, install the session and replay the init commands.
    ///
    /// On failure the cell stays empty and the caller decides when to retry.
    pub(crate) async fn ensure_connected(&self) -> Result<(), SocketError> {
        debug!(addr = %self.target.addr, "connecting to FreeSWITCH");

        let conn = self
            .dialer
            .dial(&self.target.addr, &self.target.password)
            .await?;
        self.conn.install(conn);

        info!(addr = %self.target.addr, "connected to FreeSWITCH");

        for command in self.init_commands.snapshot() {
            if let Err(e) = self.send(&command).await {
                warn!(command = %command, error = %e, "init command failed");
            }
        }

        Ok(())
    }
}
