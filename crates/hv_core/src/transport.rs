//! Transport seam.
//!
//! The anonymous overlay is external; Haven only needs private routes, opaque
//! message delivery, inbound polling and a small DHT. `MemoryTransport` is an
//! in-process implementation backed by a shared `MemoryHub`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use hv_proto::RouteHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Error)
                | (Error, Connecting)
                | (Error, Disconnected)
        )
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Worth retrying: timeouts, route churn, temporary disconnects.
    #[error("Transient transport failure: {0}")]
    Transient(String),

    #[error("Permanent transport failure: {0}")]
    Permanent(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Illegal connection transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_) | TransportError::NotConnected)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Register a transport identity and return its DHT record key.
    async fn create_identity(&self) -> Result<String, TransportError>;

    /// Allocate a private route others can send to.
    async fn create_private_route(&self) -> Result<RouteHandle, TransportError>;

    async fn send_message(&self, route: &RouteHandle, payload: &[u8]) -> Result<(), TransportError>;

    /// Drain payloads delivered to this endpoint since the last poll.
    async fn poll_inbound(&self) -> Result<Vec<Vec<u8>>, TransportError>;

    async fn dht_get(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError>;

    async fn dht_set(&self, key: &str, value: &[u8]) -> Result<(), TransportError>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}

// ── In-memory implementation ─────────────────────────────────────────────────

#[derive(Default)]
struct HubInner {
    routes: HashMap<Vec<u8>, u64>,
    inboxes: HashMap<u64, VecDeque<Vec<u8>>>,
    dht: HashMap<String, Vec<u8>>,
    next_endpoint: u64,
}

/// Shared medium connecting every `MemoryTransport` created from it.
#[derive(Default)]
pub struct MemoryHub {
    inner: Mutex<HubInner>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_endpoint += 1;
        let id = inner.next_endpoint;
        inner.inboxes.insert(id, VecDeque::new());
        id
    }
}

pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    endpoint: u64,
    state_tx: watch::Sender<ConnectionState>,
    failures: Mutex<VecDeque<TransportError>>,
    send_calls: AtomicUsize,
}

impl MemoryTransport {
    /// New endpoint on `hub`, initially `Disconnected`.
    pub fn new(hub: Arc<MemoryHub>) -> Self {
        let endpoint = hub.register();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            hub,
            endpoint,
            state_tx,
            failures: Mutex::new(VecDeque::new()),
            send_calls: AtomicUsize::new(0),
        }
    }

    /// New endpoint that has already walked `Disconnected -> Connecting -> Connected`.
    pub fn connected(hub: Arc<MemoryHub>) -> Self {
        let transport = Self::new(hub);
        transport.connect();
        transport
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, next: ConnectionState) -> Result<(), TransportError> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(TransportError::InvalidTransition { from: current, to: next });
        }
        self.state_tx.send_replace(next);
        tracing::debug!(event = "transport_state", from = ?current, to = ?next);
        Ok(())
    }

    pub fn connect(&self) {
        if self.state() == ConnectionState::Connected {
            return;
        }
        if self.state() != ConnectionState::Connecting {
            let _ = self.set_state(ConnectionState::Connecting);
        }
        let _ = self.set_state(ConnectionState::Connected);
    }

    pub fn disconnect(&self) {
        let _ = self.set_state(ConnectionState::Disconnected);
    }

    /// The next `send_message` calls fail with these errors, in order.
    pub fn fail_next_sends(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.failures.lock().extend(errors);
    }

    /// Number of `send_message` calls so far, failed ones included.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Queue a raw payload on this endpoint's inbox, bypassing routing.
    pub fn inject_inbound(&self, payload: Vec<u8>) {
        let mut inner = self.hub.inner.lock();
        inner.inboxes.entry(self.endpoint).or_default().push_back(payload);
    }

    fn require_connected(&self) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_identity(&self) -> Result<String, TransportError> {
        Ok(format!("dht:{}", uuid::Uuid::new_v4().simple()))
    }

    async fn create_private_route(&self) -> Result<RouteHandle, TransportError> {
        let route = RouteHandle(uuid::Uuid::new_v4().as_bytes().to_vec());
        self.hub.inner.lock().routes.insert(route.0.clone(), self.endpoint);
        Ok(route)
    }

    async fn send_message(&self, route: &RouteHandle, payload: &[u8]) -> Result<(), TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        self.require_connected()?;

        let mut inner = self.hub.inner.lock();
        let target = *inner
            .routes
            .get(&route.0)
            .ok_or_else(|| TransportError::Permanent("unknown route".into()))?;
        inner
            .inboxes
            .entry(target)
            .or_default()
            .push_back(payload.to_vec());
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<Vec<u8>>, TransportError> {
        self.require_connected()?;
        let mut inner = self.hub.inner.lock();
        Ok(inner
            .inboxes
            .get_mut(&self.endpoint)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default())
    }

    async fn dht_get(&self, key: &str) -> Result<Option<Vec<u8>>, TransportError> {
        self.require_connected()?;
        Ok(self.hub.inner.lock().dht.get(key).cloned())
    }

    async fn dht_set(&self, key: &str, value: &[u8]) -> Result<(), TransportError> {
        self.require_connected()?;
        self.hub.inner.lock().dht.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}
