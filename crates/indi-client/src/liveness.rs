//! Server liveness polling
//!
//! While the client is disconnected, each tick probes the configured
//! endpoint with a throwaway TCP connection. A successful probe triggers a
//! regular connect. At most one probe is in flight; ticks that find the
//! slot taken are skipped rather than queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{Client, ClientInner};

/// Single-occupancy slot for the in-flight probe
#[derive(Debug, Default)]
pub(crate) struct ProbeSlot {
    busy: AtomicBool,
}

impl ProbeSlot {
    /// Claim the slot without blocking
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<ProbeGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProbeGuard { slot: self.clone() })
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot when dropped, including on task abort
pub(crate) struct ProbeGuard {
    slot: Arc<ProbeSlot>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// Spawn `probe` if the slot is free; false when a probe is already running
pub(crate) fn try_launch<F>(slot: &Arc<ProbeSlot>, probe: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match slot.try_acquire() {
        Some(guard) => {
            tokio::spawn(async move {
                let _guard = guard;
                probe.await;
            });
            true
        }
        None => false,
    }
}

/// Background poller owned by the client
pub(crate) struct LivenessPoller {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl LivenessPoller {
    pub(crate) fn start(inner: Weak<ClientInner>, interval: Duration) -> Self {
        info!("Liveness polling every {:?}", interval);
        let handle = tokio::spawn(run_poller(inner, interval));
        Self { handle, interval }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for LivenessPoller {
    fn drop(&mut self) {
        debug!("Liveness polling stopped");
        self.handle.abort();
    }
}

async fn run_poller(inner: Weak<ClientInner>, interval: Duration) {
    let slot = Arc::new(ProbeSlot::default());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let client = Client::from_inner(inner);
        if client.is_connected() {
            continue;
        }
        let Some(addr) = client.address() else {
            continue;
        };
        let timeout = client.probe_timeout();

        let launched = try_launch(&slot, async move {
            if !indi_transport::probe(&addr, timeout).await {
                return;
            }
            if client.is_connected() {
                return;
            }
            info!("Server at {} is reachable, reconnecting", addr);
            if let Err(e) = client.connect().await {
                warn!("Reconnect to {} failed: {}", addr, e);
            }
        });
        if !launched {
            debug!("Probe still in flight, skipping tick");
        }
    }
}
