//! Idle connection reaping.
//!
//! The event loop calls [`KeepaliveManager::on_tick`] once per
//! [`KEEPALIVE_TICK`]. Every registered connection's idle counter goes up by
//! one per tick and back to zero on every read; a connection whose counter
//! exceeds the timeout is told to close.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;

/// Timer period of the keepalive manager.
pub const KEEPALIVE_TICK: Duration = Duration::from_secs(1);

/// Identity of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection state shared between the manager and the connection task.
#[derive(Debug, Default)]
pub struct ConnectionSlot {
    idle: Cell<u32>,
    closed: Cell<bool>,
    notify: Notify,
}

impl ConnectionSlot {
    pub fn idle_ticks(&self) -> u32 {
        self.idle.get()
    }

    /// Called on every read.
    pub fn reset_idle(&self) {
        self.idle.set(0);
    }

    fn step_idle(&self) -> u32 {
        let idle = self.idle.get().saturating_add(1);
        self.idle.set(idle);
        idle
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Asks the owning connection task to close its socket.
    pub fn close(&self) {
        self.closed.set(true);
        self.notify.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        if self.closed.get() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Registry of live connections, owned by one event loop.
#[derive(Debug)]
pub struct KeepaliveManager {
    timeout_ticks: u32,
    connections: RefCell<HashMap<ConnectionId, Rc<ConnectionSlot>>>,
}

impl KeepaliveManager {
    pub fn new(timeout_ticks: u32) -> Self {
        Self {
            timeout_ticks,
            connections: RefCell::new(HashMap::new()),
        }
    }

    /// Whole ticks in `timeout`, rounded down.
    pub fn from_timeout(timeout: Duration) -> Self {
        let ticks = timeout.as_millis() / KEEPALIVE_TICK.as_millis();
        Self::new(u32::try_from(ticks).unwrap_or(u32::MAX))
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn add(&self, id: ConnectionId) -> Rc<ConnectionSlot> {
        let slot = Rc::new(ConnectionSlot::default());
        self.connections.borrow_mut().insert(id, Rc::clone(&slot));
        slot
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.borrow_mut().remove(&id).is_some()
    }

    /// Adds `id` and returns a guard that removes it again when dropped.
    pub fn register(self: &Rc<Self>, id: ConnectionId) -> Registration {
        let slot = self.add(id);
        Registration {
            manager: Rc::clone(self),
            id,
            slot,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.borrow().is_empty()
    }

    /// Advances every idle counter and closes connections idle for more
    /// than the timeout. Returns the closed ids.
    pub fn on_tick(&self) -> Vec<ConnectionId> {
        let expired: Vec<(ConnectionId, Rc<ConnectionSlot>)> = {
            let mut connections = self.connections.borrow_mut();
            let ids: Vec<ConnectionId> = connections
                .iter()
                .filter(|(_, slot)| slot.step_idle() > self.timeout_ticks)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| connections.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(id, slot)| {
                slot.close();
                id
            })
            .collect()
    }
}

/// Registry membership of one connection; dropping it unregisters.
#[derive(Debug)]
pub struct Registration {
    manager: Rc<KeepaliveManager>,
    id: ConnectionId,
    slot: Rc<ConnectionSlot>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn slot(&self) -> &Rc<ConnectionSlot> {
        &self.slot
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.manager.remove(self.id);
    }
}
