//! Main INDI client implementation
//!
//! A [`Client`] owns at most one live server connection. Inbound bytes are
//! decoded and applied to the registry by a reader task; every resulting
//! event is published after the state lock is released, under a reentrant
//! delivery lock that keeps reader-produced and caller-produced events in
//! causal order.

use bytes::Bytes;
use indi_core::{
    dispatch, BlobMode, Device, Event, EventKind, IndiElement, Interface, Registry,
    StreamDecoder, SwitchState,
};
use indi_transport::{
    TcpConfig, TcpReceiver, TcpSender, TcpTransport, TransportError, TransportEvent,
    TransportReceiver, TransportSender,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::builder::{ClientBuilder, ClientConfig};
use crate::error::{ClientError, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::liveness::LivenessPoller;

/// The live connection
struct Link {
    sender: Arc<TcpSender>,
    reader: JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct ClientState {
    registry: Registry,
    decoder: StreamDecoder,
    link: Option<Link>,
    /// Bumped per connection so a stale reader can tell it was replaced
    generation: u64,
    /// Last mode requested per (device, property)
    blob_modes: BTreeMap<(String, Option<String>), BlobMode>,
}

impl ClientState {
    fn is_current(&self, generation: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.generation == generation)
    }
}

pub(crate) struct ClientInner {
    config: RwLock<ClientConfig>,
    state: Mutex<ClientState>,
    delivery: ReentrantMutex<()>,
    events: EventBus,
    poller: Mutex<Option<LivenessPoller>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(link) = self.state.get_mut().link.take() {
            link.reader.abort();
            link.sender.shutdown();
        }
    }
}

/// An INDI client
///
/// Cheap to clone; clones share the connection, registry and subscribers.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create an unconfigured client
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub(crate) fn with_config(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                state: Mutex::new(ClientState::default()),
                delivery: ReentrantMutex::new(()),
                events: EventBus::new(),
                poller: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Create a builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to `host:port` (convenience method)
    pub async fn connect_to(host: &str, port: u16) -> Result<Self> {
        ClientBuilder::new().host(host).port(port).connect().await
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Set the server endpoint; an empty host is rejected and nothing changes
    pub fn set_server(&self, host: &str, port: u16) -> Result<()> {
        if host.trim().is_empty() {
            return Err(ClientError::InvalidEndpoint("empty host".to_string()));
        }
        let mut config = self.inner.config.write();
        config.host = Some(host.to_string());
        config.port = port;
        debug!("Server set to {}:{}", host, port);
        Ok(())
    }

    pub fn host(&self) -> Option<String> {
        self.inner.config.read().host.clone()
    }

    pub fn port(&self) -> u16 {
        self.inner.config.read().port
    }

    pub fn set_connection_timeout(&self, timeout: Duration) {
        self.inner.config.write().connect_timeout_ms = timeout.as_millis() as u64;
    }

    /// Snapshot of the current settings
    pub fn config(&self) -> ClientConfig {
        self.inner.config.read().clone()
    }

    pub(crate) fn address(&self) -> Option<String> {
        self.inner.config.read().address()
    }

    pub(crate) fn probe_timeout(&self) -> Duration {
        self.inner.config.read().probe_timeout()
    }

    // ------------------------------------------------------------------
    // Connection management
    // ------------------------------------------------------------------

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().link.is_some()
    }

    /// Connect to the configured server
    ///
    /// Already connected: re-announces `ServerConnected` and succeeds.
    /// Failure leaves the client disconnected; nothing is retried here.
    pub async fn connect(&self) -> Result<()> {
        let (addr, tcp_config) = {
            let config = self.inner.config.read();
            let addr = config.address().ok_or(ClientError::NotConfigured)?;
            let tcp_config = TcpConfig {
                connect_timeout: config.connect_timeout(),
                ..Default::default()
            };
            (addr, tcp_config)
        };

        if self.is_connected() {
            debug!("Already connected to {}", addr);
            self.deliver(vec![Event::ServerConnected]);
            return Ok(());
        }

        info!("Connecting to {}", addr);
        let (sender, receiver) = match TcpTransport::with_config(tcp_config).connect(&addr).await {
            Ok(pair) => pair,
            Err(TransportError::Timeout) => {
                warn!("Connection to {} timed out", addr);
                return Err(ClientError::Timeout);
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", addr, e);
                return Err(ClientError::ConnectionFailed(e.to_string()));
            }
        };

        let installed = self.install_link(Arc::new(sender), receiver);
        if !installed {
            debug!("Connection to {} raced with another connect", addr);
        }
        Ok(())
    }

    /// Install a fresh link and announce it; false if one was already live
    fn install_link(&self, sender: Arc<TcpSender>, receiver: TcpReceiver) -> bool {
        let _delivery = self.inner.delivery.lock();
        {
            let mut state = self.inner.state.lock();
            if state.link.is_some() {
                drop(state);
                sender.shutdown();
                self.inner.events.publish(&Event::ServerConnected);
                return false;
            }

            state.generation += 1;
            let generation = state.generation;
            state.decoder.reset();
            let reader = tokio::spawn(run_reader(
                Arc::downgrade(&self.inner),
                receiver,
                generation,
            ));
            state.link = Some(Link {
                sender,
                reader,
                generation,
            });
        }

        info!("Connected to server");
        self.inner.events.publish(&Event::ServerConnected);
        true
    }

    /// Drop the connection and forget every device
    ///
    /// Emits `RemoveDevice` per device, then `ServerDisconnected` with the
    /// registry as it was. Calling it while disconnected does nothing.
    pub fn disconnect(&self) -> Result<()> {
        self.teardown(None);
        Ok(())
    }

    /// Disconnect, then wait until every command already sent is written
    pub async fn close(&self) -> Result<()> {
        if let Some(sender) = self.teardown(None) {
            sender.closed().await;
        }
        Ok(())
    }

    /// Tear down the link, only if it is still `generation` when given
    fn teardown(&self, generation: Option<u64>) -> Option<Arc<TcpSender>> {
        let _delivery = self.inner.delivery.lock();
        let (link, events) = {
            let mut state = self.inner.state.lock();
            let current = match generation {
                Some(generation) => state.is_current(generation),
                None => state.link.is_some(),
            };
            if !current {
                return None;
            }
            let link = state.link.take()?;

            state.decoder.reset();
            state.blob_modes.clear();
            let mut events = Vec::new();
            let devices = state.registry.clear_all(&mut events);
            events.push(Event::ServerDisconnected { devices });
            (link, events)
        };

        link.reader.abort();
        link.sender.shutdown();
        info!("Disconnected from server");

        for event in &events {
            self.inner.events.publish(event);
        }
        Some(link.sender)
    }

    /// Probe the server periodically and reconnect when it comes back
    ///
    /// Replaces any running poller. Must be called within a tokio runtime.
    pub fn start_liveness_polling(&self, interval: Duration) {
        let poller = LivenessPoller::start(Arc::downgrade(&self.inner), interval);
        *self.inner.poller.lock() = Some(poller);
    }

    pub fn stop_liveness_polling(&self) {
        self.inner.poller.lock().take();
    }

    /// Polling period, if polling is running
    pub fn liveness_interval(&self) -> Option<Duration> {
        self.inner.poller.lock().as_ref().map(|p| p.interval())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Subscribe to one event kind
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, callback)
    }

    /// Subscribe to every event
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.subscribe_all(callback)
    }

    /// Unsubscribe
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    fn deliver(&self, events: Vec<Event>) {
        let _delivery = self.inner.delivery.lock();
        for event in &events {
            self.inner.events.publish(event);
        }
    }

    // ------------------------------------------------------------------
    // Registry access
    // ------------------------------------------------------------------

    /// Snapshot of one device
    pub fn device(&self, name: &str) -> Option<Device> {
        self.inner.state.lock().registry.device(name).cloned()
    }

    /// Names of devices whose driver interface matches `mask`
    pub fn devices(&self, mask: Interface) -> Vec<String> {
        self.inner.state.lock().registry.list_devices(mask)
    }

    pub fn device_names(&self) -> Vec<String> {
        self.inner.state.lock().registry.device_names()
    }

    /// Run `f` against the registry without copying it
    ///
    /// The state lock is held while `f` runs; `f` must not call back into
    /// the client.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.inner.state.lock().registry)
    }

    /// Last BLOB mode requested for a device or one of its properties
    pub fn blob_mode(&self, device: &str, property: Option<&str>) -> BlobMode {
        let state = self.inner.state.lock();
        let key = |p: Option<&str>| (device.to_string(), p.map(str::to_string));
        state
            .blob_modes
            .get(&key(property))
            .or_else(|| state.blob_modes.get(&key(None)))
            .copied()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Set number elements of a known property
    pub async fn send_new_number<I, S>(&self, device: &str, property: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.require_property(device, property)?;
        self.send_element(IndiElement::new_number_vector(device, property, values))
            .await
    }

    /// Set text elements of a known property
    pub async fn send_new_text<I, S, T>(&self, device: &str, property: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        self.require_property(device, property)?;
        self.send_element(IndiElement::new_text_vector(device, property, values))
            .await
    }

    /// Set switch elements of a known property
    pub async fn send_new_switch<I, S>(&self, device: &str, property: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, SwitchState)>,
        S: Into<String>,
    {
        self.require_property(device, property)?;
        self.send_element(IndiElement::new_switch_vector(device, property, values))
            .await
    }

    /// Ask the driver to connect its hardware
    pub async fn connect_device(&self, device: &str) -> Result<()> {
        self.send_new_switch(device, "CONNECTION", [("CONNECT", SwitchState::On)])
            .await
    }

    /// Ask the driver to disconnect its hardware
    pub async fn disconnect_device(&self, device: &str) -> Result<()> {
        self.send_new_switch(device, "CONNECTION", [("DISCONNECT", SwitchState::On)])
            .await
    }

    /// Choose whether BLOB payloads are sent for a known device
    pub async fn set_blob_mode(&self, mode: BlobMode, device: &str, property: Option<&str>) -> Result<()> {
        if self.inner.state.lock().registry.device(device).is_none() {
            return Err(ClientError::UnknownDevice(device.to_string()));
        }
        self.send_element(IndiElement::enable_blob(mode, device, property))
            .await?;
        self.inner
            .state
            .lock()
            .blob_modes
            .insert((device.to_string(), property.map(str::to_string)), mode);
        Ok(())
    }

    /// Request property definitions, optionally scoped
    pub async fn get_properties(&self, device: Option<&str>, property: Option<&str>) -> Result<()> {
        self.send_element(IndiElement::get_properties(device, property))
            .await
    }

    /// Request every property of one device; an empty name means all devices
    pub async fn watch_device(&self, device: &str) -> Result<()> {
        let device = Some(device).filter(|d| !d.is_empty());
        self.get_properties(device, None).await
    }

    fn require_property(&self, device: &str, property: &str) -> Result<()> {
        let state = self.inner.state.lock();
        let known = state
            .registry
            .device(device)
            .ok_or_else(|| ClientError::UnknownDevice(device.to_string()))?;
        if known.property(property).is_none() {
            return Err(ClientError::UnknownProperty {
                device: device.to_string(),
                property: property.to_string(),
            });
        }
        Ok(())
    }

    /// Write one element, newline terminated
    async fn send_element(&self, element: IndiElement) -> Result<()> {
        let sender = self
            .inner
            .state
            .lock()
            .link
            .as_ref()
            .map(|link| link.sender.clone())
            .ok_or(ClientError::NotConnected)?;

        debug!("Sending <{}>", element.tag);
        self.send_raw(&sender, element.encode_line()).await
    }

    async fn send_raw(&self, sender: &TcpSender, data: Bytes) -> Result<()> {
        sender.send(data).await.map_err(|e| match e {
            TransportError::NotConnected => ClientError::NotConnected,
            e => ClientError::SendFailed(e.to_string()),
        })
    }
}

/// Apply one inbound chunk; false once the link is no longer current
fn handle_data(inner: &ClientInner, generation: u64, data: &[u8]) -> bool {
    let _delivery = inner.delivery.lock();
    let events = {
        let mut state = inner.state.lock();
        if !state.is_current(generation) {
            return false;
        }

        let state = &mut *state;
        let mut events = Vec::new();
        for element in state.decoder.feed(data) {
            if let Err(e) = dispatch(&mut state.registry, &element, &mut events) {
                warn!("Dropping <{}>: {}", element.tag, e);
            }
        }
        events
    };

    for event in &events {
        // A subscriber may have torn the link down mid-batch
        if !inner.state.lock().is_current(generation) {
            return false;
        }
        inner.events.publish(event);
    }
    true
}

async fn run_reader(inner: Weak<ClientInner>, mut receiver: TcpReceiver, generation: u64) {
    while let Some(event) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Data(data) => {
                if !handle_data(&inner, generation, &data) {
                    return;
                }
            }
            TransportEvent::Disconnected { reason } => {
                warn!(
                    "Server closed the connection{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                Client::from_inner(inner).teardown(Some(generation));
                return;
            }
            TransportEvent::Error(e) => {
                warn!("Connection error: {}", e);
                Client::from_inner(inner).teardown(Some(generation));
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        warn!("Connection lost");
        Client::from_inner(inner).teardown(Some(generation));
    }
}
