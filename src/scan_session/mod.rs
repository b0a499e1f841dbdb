//! ScanSession - barcode scan session state machine
//!
//! ## Responsibilities
//!
//! - Idle -> Starting -> Active -> Stopping -> Idle lifecycle
//! - Bind retry across ranked devices, at most one attempt per device
//! - Engine events through the detection throttle
//! - Auto-stop on the first accepted detection
//! - Manual camera switch (release old, then start new)
//!
//! ## Concurrency
//!
//! Every transition happens under the session lock. Each start request gets
//! a generation number; a stop that lands while Starting only flips the state
//! to Stopping, and the in-flight start notices on its next check and
//! releases whatever it bound.

mod types;

pub use types::*;

use crate::camera::{ranking, CameraDevice, DeviceEnumerator};
use crate::decode_engine::{DecodeEngine, EngineEvent, EVENT_QUEUE_DEPTH};
use crate::detection_throttle::{DetectionEvent, DetectionThrottle};
use crate::device_lease::{DeviceLease, DeviceLeaseManager, LeaseSlot};
use crate::error::{Error, Result};
use crate::feedback_hub::{DetectionMessage, FeedbackHub, HubMessage, ToastLevel};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Camera bound and forwarding events
struct ActiveBinding {
    device_id: String,
    lease: DeviceLease,
    stop_tx: oneshot::Sender<()>,
    forwarder: JoinHandle<()>,
}

/// Camera bound, not yet committed
struct PendingBinding {
    device_id: String,
    lease: DeviceLease,
    events: mpsc::Receiver<EngineEvent>,
}

struct SessionInner {
    state: SessionState,
    generation: u64,
    devices: Vec<CameraDevice>,
    current_index: usize,
    attempts: usize,
    throttle: DetectionThrottle,
    binding: Option<ActiveBinding>,
}

impl SessionInner {
    fn is_starting(&self, generation: u64) -> bool {
        self.state == SessionState::Starting && self.generation == generation
    }
}

struct SessionCore {
    engine: Arc<dyn DecodeEngine>,
    enumerator: DeviceEnumerator,
    leases: Arc<DeviceLeaseManager>,
    hub: Arc<FeedbackHub>,
    sink: Arc<dyn DetectionSink>,
    config: ScanSessionConfig,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state != state {
            tracing::debug!(from = ?inner.state, to = ?state, "Scan session transition");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Scan session handle (cheap to clone)
#[derive(Clone)]
pub struct ScanSession {
    core: Arc<SessionCore>,
}

impl ScanSession {
    pub fn new(
        engine: Arc<dyn DecodeEngine>,
        enumerator: DeviceEnumerator,
        leases: Arc<DeviceLeaseManager>,
        hub: Arc<FeedbackHub>,
        sink: Arc<dyn DetectionSink>,
        config: ScanSessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let inner = SessionInner {
            state: SessionState::Idle,
            generation: 0,
            devices: Vec::new(),
            current_index: 0,
            attempts: 0,
            throttle: DetectionThrottle::new(config.throttle),
            binding: None,
        };

        Self {
            core: Arc::new(SessionCore {
                engine,
                enumerator,
                leases,
                hub,
                sink,
                config,
                inner: Mutex::new(inner),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.core.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.core.state_tx.subscribe()
    }

    pub fn config(&self) -> &ScanSessionConfig {
        &self.core.config
    }

    /// Device at the current index of the last enumeration
    pub async fn current_device(&self) -> Option<CameraDevice> {
        let inner = self.core.inner.lock().await;
        inner.devices.get(inner.current_index).cloned()
    }

    /// Device the engine is bound to, while Active
    pub async fn bound_device_id(&self) -> Option<String> {
        let inner = self.core.inner.lock().await;
        inner.binding.as_ref().map(|b| b.device_id.clone())
    }

    /// Bind attempts made by the current start
    pub async fn attempts(&self) -> usize {
        self.core.inner.lock().await.attempts
    }

    /// Start scanning
    ///
    /// No-op while Starting or Active. While Stopping, waits (bounded) for
    /// the stop to finish first.
    pub async fn start(&self) -> Result<()> {
        match self.begin_start().await {
            Some(generation) => self.run_start(generation).await,
            None => Ok(()),
        }
    }

    /// Claim the Starting state; `None` when a start is not needed
    pub(crate) async fn begin_start(&self) -> Option<u64> {
        if self.state() == SessionState::Stopping {
            self.wait_until_settled().await;
        }

        let generation = {
            let mut inner = self.core.inner.lock().await;
            if inner.state != SessionState::Idle {
                tracing::debug!(state = ?inner.state, "Scan start ignored");
                return None;
            }

            inner.generation += 1;
            inner.attempts = 0;
            self.core.set_state(&mut inner, SessionState::Starting);
            inner.generation
        };

        self.publish(SessionState::Starting, None).await;
        Some(generation)
    }

    /// Enumerate and bind, retrying across devices
    pub(crate) async fn run_start(&self, generation: u64) -> Result<()> {
        let core = &self.core;
        let mode = core.config.mode;
        let from = core.inner.lock().await.current_index;

        let ranked = match core
            .enumerator
            .list_cameras_from(core.engine.as_ref(), mode, from)
            .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                if !self.abort_start(generation).await {
                    return Ok(());
                }
                let err = Error::CameraUnavailable {
                    attempts: 0,
                    reason: e.to_string(),
                };
                self.report(&err).await;
                return Err(err);
            }
        };

        let order = ranking::attempt_order(&ranked.devices, ranked.preferred, mode, core.enumerator.filter());
        {
            let mut inner = core.inner.lock().await;
            if !inner.is_starting(generation) {
                drop(inner);
                self.finish_cancelled(generation).await;
                return Ok(());
            }
            inner.devices = ranked.devices.clone();
            inner.current_index = ranked.preferred;
        }

        let mut last_error = String::new();
        for (n, &index) in order.iter().enumerate() {
            if n > 0 && !core.config.retry_delay.is_zero() {
                tokio::time::sleep(core.config.retry_delay).await;
            }

            {
                let mut inner = core.inner.lock().await;
                if !inner.is_starting(generation) {
                    drop(inner);
                    tracing::info!("Scan start cancelled between attempts");
                    self.finish_cancelled(generation).await;
                    return Ok(());
                }
                inner.current_index = index;
                inner.attempts = n + 1;
            }

            let device = &ranked.devices[index];
            match self.bind(device).await {
                Ok(pending) => return self.commit(generation, index, pending).await,
                Err(e) => {
                    tracing::warn!(
                        device_id = %device.id,
                        label = %device.label,
                        attempt = n + 1,
                        of = order.len(),
                        error = %e,
                        "Camera bind failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        if !self.abort_start(generation).await {
            return Ok(());
        }

        let err = Error::CameraUnavailable {
            attempts: order.len(),
            reason: last_error,
        };
        self.report(&err).await;
        Err(err)
    }

    async fn bind(&self, device: &CameraDevice) -> Result<PendingBinding> {
        let core = &self.core;
        let lease = core
            .leases
            .acquire(LeaseSlot::Scan, &device.id)
            .await
            .map_err(|e| Error::Bind(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        match timeout(
            core.config.bind_timeout,
            core.engine.start(&device.id, &core.config.engine, tx),
        )
        .await
        {
            Ok(Ok(())) => Ok(PendingBinding {
                device_id: device.id.clone(),
                lease,
                events: rx,
            }),
            Ok(Err(e)) => Err(Error::Bind(e.to_string())),
            Err(_) => {
                let timeout_ms = core.config.bind_timeout.as_millis() as u64;
                tracing::warn!(device_id = %device.id, timeout_ms = timeout_ms, "Camera bind timed out");
                self.release_engine().await;
                Err(Error::Bind(format!("bind timed out after {}ms", timeout_ms)))
            }
        }
    }

    /// Promote a pending binding to Active, or release it if cancelled
    async fn commit(&self, generation: u64, index: usize, pending: PendingBinding) -> Result<()> {
        let mut inner = self.core.inner.lock().await;
        if !inner.is_starting(generation) {
            drop(inner);
            tracing::info!(device_id = %pending.device_id, "Scan start cancelled after bind, releasing");
            self.release_engine().await;
            drop(pending);
            self.finish_cancelled(generation).await;
            return Ok(());
        }

        let PendingBinding {
            device_id,
            lease,
            events,
        } = pending;
        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(self.clone().forward_events(
            generation,
            events,
            stop_rx,
            device_id.clone(),
        ));

        inner.binding = Some(ActiveBinding {
            device_id: device_id.clone(),
            lease,
            stop_tx,
            forwarder,
        });
        inner.attempts = 0;
        inner.current_index = index;
        self.core.set_state(&mut inner, SessionState::Active);
        drop(inner);

        tracing::info!(device_id = %device_id, "Scanner active");
        self.publish(SessionState::Active, Some(device_id)).await;
        Ok(())
    }

    async fn forward_events(
        self,
        generation: u64,
        mut events: mpsc::Receiver<EngineEvent>,
        mut stop_rx: oneshot::Receiver<()>,
        device_id: String,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                EngineEvent::Decoded { payload, at } => {
                    let event = DetectionEvent::new(payload, at);
                    if self.handle_decoded(generation, event, &device_id).await {
                        break;
                    }
                }
                EngineEvent::Error(message) => {
                    tracing::trace!(device_id = %device_id, error = %message, "Frame decode error");
                }
            }
        }

        tracing::debug!(device_id = %device_id, "Event forwarder stopped");
    }

    /// Returns true when the detection was accepted and the session stopped
    async fn handle_decoded(&self, generation: u64, event: DetectionEvent, device_id: &str) -> bool {
        let binding = {
            let mut inner = self.core.inner.lock().await;
            let active = inner.state == SessionState::Active && inner.generation == generation;
            if !inner.throttle.evaluate(&event, active).is_accepted() {
                return false;
            }
            self.core.set_state(&mut inner, SessionState::Stopping);
            inner.binding.take()
        };

        tracing::info!(payload = %event.payload, device_id = %device_id, "Detection accepted");
        self.core.hub.flash().await;
        self.release(binding, generation).await;

        let detection = AcceptedDetection {
            payload: event.payload,
            device_id: device_id.to_string(),
            accepted_at: Utc::now(),
        };
        self.core
            .hub
            .broadcast(HubMessage::Detection(DetectionMessage {
                payload: detection.payload.clone(),
                device_id: detection.device_id.clone(),
                timestamp: detection.accepted_at.to_rfc3339(),
            }))
            .await;
        self.core.sink.on_detection(detection).await;
        true
    }

    /// Stop scanning
    ///
    /// No-op when Idle. Never fails: release errors are logged, and a
    /// release that does not finish in time is abandoned.
    pub async fn stop(&self) {
        let (generation, binding) = {
            let mut inner = self.core.inner.lock().await;
            match inner.state {
                SessionState::Idle => return,
                SessionState::Stopping => {
                    drop(inner);
                    self.wait_until_settled().await;
                    return;
                }
                SessionState::Starting => {
                    self.core.set_state(&mut inner, SessionState::Stopping);
                    drop(inner);
                    tracing::info!("Stop requested while starting");
                    self.publish(SessionState::Stopping, None).await;
                    self.wait_until_settled().await;
                    return;
                }
                SessionState::Active => {
                    self.core.set_state(&mut inner, SessionState::Stopping);
                    (inner.generation, inner.binding.take())
                }
            }
        };

        self.publish(SessionState::Stopping, None).await;
        self.release(binding, generation).await;
        tracing::info!("Scanner stopped");
    }

    /// Switch to the next camera
    ///
    /// Stops the session, pauses, then starts again on the new device. Needs
    /// at least two devices; otherwise the session is left untouched.
    pub async fn switch_camera(&self) -> Result<()> {
        let core = &self.core;
        let mode = core.config.mode;

        let cached = core.inner.lock().await.devices.clone();
        let devices = if cached.is_empty() {
            match core.enumerator.list_cameras(core.engine.as_ref(), mode).await {
                Ok(ranked) => ranked.devices,
                Err(e) => {
                    self.report(&e).await;
                    return Err(e);
                }
            }
        } else {
            cached
        };

        if devices.len() < 2 {
            let err = Error::SwitchUnavailable(format!("{} camera(s) available", devices.len()));
            self.report(&err).await;
            return Err(err);
        }

        let target = {
            let mut inner = core.inner.lock().await;
            let target = ranking::switch_target(&devices, inner.current_index, mode, core.enumerator.filter());
            inner.devices = devices;
            inner.current_index = target;
            inner.devices[target].clone()
        };

        tracing::info!(device_id = %target.id, label = %target.label, "Switching camera");

        self.stop().await;
        if !core.config.restart_delay.is_zero() {
            tokio::time::sleep(core.config.restart_delay).await;
        }
        self.start().await
    }

    /// Stop the engine, drop the lease, and settle in Idle
    async fn release(&self, binding: Option<ActiveBinding>, generation: u64) {
        if let Some(binding) = binding {
            let ActiveBinding {
                device_id,
                lease,
                stop_tx,
                forwarder,
            } = binding;

            let _ = stop_tx.send(());
            self.release_engine().await;
            drop(lease);
            // detached; it exits on the stop signal
            drop(forwarder);
            tracing::debug!(device_id = %device_id, "Scan camera released");
        }

        let settled = {
            let mut inner = self.core.inner.lock().await;
            if inner.generation == generation && inner.state == SessionState::Stopping {
                self.core.set_state(&mut inner, SessionState::Idle);
                true
            } else {
                false
            }
        };

        if settled {
            self.publish(SessionState::Idle, None).await;
        }
    }

    async fn release_engine(&self) {
        match timeout(self.core.config.release_timeout, self.core.engine.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Camera release failed"),
            Err(_) => tracing::warn!(
                timeout_ms = self.core.config.release_timeout.as_millis() as u64,
                "Camera release timed out, abandoning"
            ),
        }
    }

    /// Return to Idle after an unsuccessful start; false if the start was cancelled
    async fn abort_start(&self, generation: u64) -> bool {
        let was_starting = {
            let mut inner = self.core.inner.lock().await;
            if inner.generation != generation || inner.state == SessionState::Idle {
                return false;
            }
            let was_starting = inner.state == SessionState::Starting;
            self.core.set_state(&mut inner, SessionState::Idle);
            was_starting
        };

        self.publish(SessionState::Idle, None).await;
        was_starting
    }

    async fn finish_cancelled(&self, generation: u64) {
        self.abort_start(generation).await;
    }

    /// Wait for an in-flight stop; force Idle if it does not finish in time
    async fn wait_until_settled(&self) {
        let mut rx = self.core.state_tx.subscribe();
        let wait = rx.wait_for(|s| *s != SessionState::Stopping);
        let settled = timeout(self.core.config.release_timeout, wait).await.is_ok();
        if settled {
            return;
        }

        let forced = {
            let mut inner = self.core.inner.lock().await;
            if inner.state == SessionState::Stopping {
                self.core.set_state(&mut inner, SessionState::Idle);
                true
            } else {
                false
            }
        };

        if forced {
            tracing::warn!("Scan stop did not finish in time, forcing Idle");
            self.publish(SessionState::Idle, None).await;
        }
    }

    async fn publish(&self, state: SessionState, device_id: Option<String>) {
        self.core
            .hub
            .session_state(LeaseSlot::Scan.as_str(), state, device_id)
            .await;
    }

    async fn report(&self, err: &Error) {
        tracing::warn!(code = err.code(), error = %err, "Scan session error");
        self.core
            .hub
            .toast(ToastLevel::Error, format!("Camera error: {}", err))
            .await;
    }
}
