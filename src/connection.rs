//! Self-healing handle to an outbound RPC client.
//!
//! A [`ConnectionHandle`] is read on every send and written only by its
//! [`ConnectionMonitor`], which probes the remote on a fixed interval and
//! swaps in a fresh client whenever the current one is gone or broken.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::rpc::RpcClient;

/// Reports whether a client can still carry calls.
pub trait Readiness {
    fn is_ready(&self) -> bool;
}

impl Readiness for RpcClient {
    fn is_ready(&self) -> bool {
        RpcClient::is_ready(self)
    }
}

/// Knows how to reach one remote service.
pub trait Connector: Send + Sync + 'static {
    type Client: Readiness + Send + Sync + 'static;

    /// Cheap reachability check.
    fn probe(&self) -> impl Future<Output = bool> + Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Client>> + Send;
}

/// Holds either nothing or exactly one client. Readers never wait on I/O.
pub struct ConnectionHandle<C> {
    name: String,
    slot: RwLock<Option<Arc<C>>>,
}

impl<C> ConnectionHandle<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current client, if any.
    pub fn load(&self) -> Option<Arc<C>> {
        self.slot.read().clone()
    }

    /// Install `client`, returning the one it replaced.
    pub fn store(&self, client: Arc<C>) -> Option<Arc<C>> {
        self.slot.write().replace(client)
    }

    pub fn clear(&self) -> Option<Arc<C>> {
        self.slot.write().take()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl<C> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// [`Connector`] for an [`RpcClient`] at a `host:port` address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    probe_timeout: Duration,
    call_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, config: &ConnectionConfig) -> Self {
        Self {
            addr: addr.into(),
            probe_timeout: config.probe_timeout(),
            call_timeout: config.call_timeout(),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Client = RpcClient;

    async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.probe_timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn connect(&self) -> Result<RpcClient> {
        RpcClient::connect(&self.addr, self.call_timeout).await
    }
}

/// Result of one monitor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Probe failed; the handle was cleared.
    Unreachable,
    /// A new client was stored.
    Connected,
    /// Probe succeeded but building the client failed; the handle is empty.
    ConnectFailed,
    /// The stored client is still usable.
    Ready,
}

pub struct ConnectionMonitor<K: Connector> {
    handle: Arc<ConnectionHandle<K::Client>>,
    connector: K,
    interval: Duration,
}

impl<K: Connector> ConnectionMonitor<K> {
    pub fn new(handle: Arc<ConnectionHandle<K::Client>>, connector: K, interval: Duration) -> Self {
        Self {
            handle,
            connector,
            interval,
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle<K::Client>> {
        &self.handle
    }

    /// Probe once and repair the handle if needed.
    pub async fn tick(&self) -> LinkState {
        if !self.connector.probe().await {
            self.handle.clear();
            return LinkState::Unreachable;
        }

        if let Some(client) = self.handle.load() {
            if client.is_ready() {
                return LinkState::Ready;
            }
        }

        // Drop the broken client first so senders see explicit absence
        // while the replacement is being built.
        self.handle.clear();
        match self.connector.connect().await {
            Ok(client) => {
                self.handle.store(Arc::new(client));
                LinkState::Connected
            }
            Err(e) => {
                debug!(service = self.handle.name(), "connect failed: {e}");
                LinkState::ConnectFailed
            }
        }
    }

    /// Run until `shutdown` resolves, logging state transitions.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut last = None;
        loop {
            let state = self.tick().await;
            if last != Some(state) {
                let service = self.handle.name();
                match state {
                    LinkState::Connected => info!(service, "connected"),
                    LinkState::Ready => {}
                    LinkState::Unreachable => warn!(service, "remote unreachable"),
                    LinkState::ConnectFailed => warn!(service, "remote reachable but connect failed"),
                }
                last = Some(state);
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!(service = self.handle.name(), "connection monitor stopped");
    }
}

/// Create a handle for `name` at `addr` and keep it healthy on the current
/// runtime for the life of the process.
pub fn monitor_rpc(name: &str, addr: &str, config: &ConnectionConfig) -> Arc<ConnectionHandle<RpcClient>> {
    let handle = Arc::new(ConnectionHandle::new(name));
    let monitor = ConnectionMonitor::new(handle.clone(), TcpConnector::new(addr, config), config.monitor_interval());
    tokio::spawn(monitor.run(std::future::pending()));
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeClient {
        ready: AtomicBool,
    }

    impl Readiness for FakeClient {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        reachable: Arc<AtomicBool>,
        fail_connect: Arc<AtomicBool>,
        connects: Arc<AtomicUsize>,
    }

    impl Connector for FakeConnector {
        type Client = FakeClient;

        async fn probe(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        async fn connect(&self) -> Result<FakeClient> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(crate::Error::Disconnected);
            }
            Ok(FakeClient {
                ready: AtomicBool::new(true),
            })
        }
    }

    fn monitor(connector: &FakeConnector) -> ConnectionMonitor<FakeConnector> {
        ConnectionMonitor::new(
            Arc::new(ConnectionHandle::new("detector")),
            connector.clone(),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_connects_then_stays_ready() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        let m = monitor(&connector);

        assert_eq!(m.tick().await, LinkState::Connected);
        assert_eq!(m.tick().await, LinkState::Ready);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(m.handle().load().is_some());
    }

    #[tokio::test]
    async fn test_probe_failure_clears() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        let m = monitor(&connector);
        m.tick().await;

        connector.reachable.store(false, Ordering::SeqCst);
        assert_eq!(m.tick().await, LinkState::Unreachable);
        assert_eq!(m.tick().await, LinkState::Unreachable);
        assert!(m.handle().load().is_none());
    }

    #[tokio::test]
    async fn test_broken_client_replaced() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        let m = monitor(&connector);
        m.tick().await;

        let old = m.handle().load().unwrap();
        old.ready.store(false, Ordering::SeqCst);
        assert_eq!(m.tick().await, LinkState::Connected);

        let new = m.handle().load().unwrap();
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(new.is_ready());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_empty() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        connector.fail_connect.store(true, Ordering::SeqCst);
        let m = monitor(&connector);

        assert_eq!(m.tick().await, LinkState::ConnectFailed);
        assert!(m.handle().load().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let connector = FakeConnector::default();
        connector.reachable.store(true, Ordering::SeqCst);
        let m = monitor(&connector);
        let handle = m.handle().clone();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(m.run(async {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.load().is_some());

        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
