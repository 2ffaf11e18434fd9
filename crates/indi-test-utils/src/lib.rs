//! Common test helpers and utilities for INDI client tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A scripted INDI server ([`MockServer`]) with RAII cleanup
//! - Event collectors for subscription testing

use bytes::Bytes;
use indi_core::{Event, EventKind};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for an atomic counter to reach a target value
pub async fn wait_for_count(counter: &AtomicU32, target: u32, max_wait: Duration) -> bool {
    wait_for(
        || async { counter.load(Ordering::SeqCst) >= target },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait for a boolean flag to become true
pub async fn wait_for_flag(flag: &AtomicBool, max_wait: Duration) -> bool {
    wait_for(
        || async { flag.load(Ordering::SeqCst) },
        DEFAULT_CHECK_INTERVAL,
        max_wait,
    )
    .await
}

/// Wait with notification - more efficient than polling
pub async fn wait_with_notify(notify: &Notify, max_wait: Duration) -> bool {
    timeout(max_wait, notify.notified()).await.is_ok()
}

// ============================================================================
// Mock Server - scripted INDI server with RAII cleanup
// ============================================================================

enum Outbound {
    Data(Bytes),
    Close,
}

#[derive(Default)]
struct MockState {
    /// Lines received from any client, in arrival order
    received: Mutex<Vec<String>>,
    line_count: AtomicU32,
    connections: AtomicU32,
    /// Writer for the most recently accepted connection
    active: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// An INDI server stand-in that records what clients send and pushes
/// whatever XML the test scripts
///
/// Only the most recent connection is driven by [`MockServer::send`];
/// earlier ones (e.g. liveness probes) are still read from.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start on an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener)
    }

    /// Start on a specific port, e.g. one a client is already polling
    pub async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::serve(listener)
    }

    fn serve(listener: TcpListener) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let accept_state = state.clone();

        let handle = tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("Mock server accepted {}", peer);
                let (tx, rx) = mpsc::unbounded_channel();
                *accept_state.active.lock() = Some(tx);
                accept_state.connections.fetch_add(1, Ordering::SeqCst);

                let task = tokio::spawn(run_connection(stream, rx, accept_state.clone()));
                accept_state.tasks.lock().push(task);
            }
        });

        Self {
            addr,
            state,
            handle: Some(handle),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Push raw bytes to the active connection
    pub fn send_bytes(&self, data: impl Into<Bytes>) -> bool {
        match self.state.active.lock().as_ref() {
            Some(tx) => tx.send(Outbound::Data(data.into())).is_ok(),
            None => false,
        }
    }

    /// Push XML text to the active connection
    pub fn send(&self, xml: &str) -> bool {
        self.send_bytes(Bytes::copy_from_slice(xml.as_bytes()))
    }

    /// Close the active connection from the server side
    pub fn drop_client(&self) -> bool {
        match self.state.active.lock().take() {
            Some(tx) => tx.send(Outbound::Close).is_ok(),
            None => false,
        }
    }

    /// Every non-empty line received so far
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    pub fn received_count(&self) -> u32 {
        self.state.line_count.load(Ordering::SeqCst)
    }

    /// Wait for at least n lines to be received
    pub async fn wait_for_lines(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.state.line_count, n, max_wait).await
    }

    /// Connections accepted, probes included
    pub fn connection_count(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.state.connections, n, max_wait).await
    }

    /// Stop accepting and drop every open connection (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        for task in self.state.tasks.lock().drain(..) {
            task.abort();
        }
        self.state.active.lock().take();
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_connection(
    stream: TcpStream,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<MockState>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Data(data)) => {
                    if writer.write_all(&data).await.is_err() || writer.flush().await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => break,
            },

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        state.received.lock().push(line.to_string());
                        state.line_count.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Ok(None) | Err(_) => break,
            },
        }
    }
}

// ============================================================================
// Test Collectors - for verifying delivered events
// ============================================================================

/// Collector for client events with thread-safe access
#[derive(Clone)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<Event>>>,
    notify: Arc<Notify>,
    count: Arc<AtomicU32>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            count: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Create a callback function for subscriptions
    pub fn callback(&self) -> impl Fn(&Event) + Send + Sync + 'static {
        let events = self.events.clone();
        let notify = self.notify.clone();
        let count = self.count.clone();

        move |event| {
            events.lock().push(event.clone());
            count.fetch_add(1, Ordering::SeqCst);
            notify.notify_waiters();
        }
    }

    /// Get the count of received events
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait for at least n events to be received
    pub async fn wait_for_count(&self, n: u32, max_wait: Duration) -> bool {
        wait_for_count(&self.count, n, max_wait).await
    }

    /// Wait until some received event satisfies `pred`
    pub async fn wait_for_event<P>(&self, pred: P, max_wait: Duration) -> bool
    where
        P: Fn(&Event) -> bool,
    {
        wait_for(
            || async { self.events.lock().iter().any(&pred) },
            DEFAULT_CHECK_INTERVAL,
            max_wait,
        )
        .await
    }

    /// Wait until an event of the given kind has been received
    pub async fn wait_for_kind(&self, kind: EventKind, max_wait: Duration) -> bool {
        self.wait_for_event(|e| e.kind() == kind, max_wait).await
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Kinds of all collected events, in delivery order
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(Event::kind).collect()
    }

    /// Collected events of one kind
    pub fn of_kind(&self, kind: EventKind) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    /// Get the last event received
    pub fn last_event(&self) -> Option<Event> {
        self.events.lock().last().cloned()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}
