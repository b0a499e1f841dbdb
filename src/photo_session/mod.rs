//! ProductPhotoSession - still capture for the product form
//!
//! ## Responsibilities
//!
//! - Live preview on the preferred device, with retry across devices
//! - One still capture, after which the preview is released
//! - Retake and manual device switch
//!
//! Runs alongside the scan session without sharing any of its state: own
//! device list, own index, own lease slot.

mod types;

pub use types::*;

use crate::camera::{ranking, CameraDevice, DeviceEnumerator, ProductionMode};
use crate::device_lease::{DeviceLease, DeviceLeaseManager, LeaseSlot};
use crate::error::{Error, Result};
use crate::feedback_hub::{FeedbackHub, ToastLevel};
use crate::scan_session::SessionState;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

struct PhotoBinding {
    device_id: String,
    lease: DeviceLease,
    stream: Box<dyn PreviewStream>,
}

struct PhotoInner {
    state: SessionState,
    generation: u64,
    devices: Vec<CameraDevice>,
    current_index: usize,
    /// Cached device preference (device id)
    preferred: Option<String>,
    /// Device picked by a manual switch
    selected: Option<String>,
    binding: Option<PhotoBinding>,
}

impl PhotoInner {
    fn is_starting(&self, generation: u64) -> bool {
        self.state == SessionState::Starting && self.generation == generation
    }
}

/// ProductPhotoSession instance
pub struct ProductPhotoSession {
    camera: Arc<dyn StillCamera>,
    enumerator: DeviceEnumerator,
    leases: Arc<DeviceLeaseManager>,
    hub: Arc<FeedbackHub>,
    config: PhotoSessionConfig,
    inner: Mutex<PhotoInner>,
    state_tx: watch::Sender<SessionState>,
}

impl ProductPhotoSession {
    pub fn new(
        camera: Arc<dyn StillCamera>,
        enumerator: DeviceEnumerator,
        leases: Arc<DeviceLeaseManager>,
        hub: Arc<FeedbackHub>,
        config: PhotoSessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            camera,
            enumerator,
            leases,
            hub,
            config,
            inner: Mutex::new(PhotoInner {
                state: SessionState::Idle,
                generation: 0,
                devices: Vec::new(),
                current_index: 0,
                preferred: None,
                selected: None,
                binding: None,
            }),
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Device with the open preview, while Active
    pub async fn bound_device_id(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.binding.as_ref().map(|b| b.device_id.clone())
    }

    /// Forget the cached device preference and any manual selection
    pub async fn reset_preference(&self) {
        let mut inner = self.inner.lock().await;
        inner.preferred = None;
        inner.selected = None;
    }

    fn set_state(&self, inner: &mut PhotoInner, state: SessionState) {
        if inner.state != state {
            tracing::debug!(from = ?inner.state, to = ?state, "Photo session transition");
        }
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    /// Open the preview
    ///
    /// Rejected with `InvalidState` while Starting or Active.
    pub async fn start(&self) -> Result<()> {
        if self.state() == SessionState::Stopping {
            self.wait_until_settled().await;
        }

        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Idle {
                tracing::debug!(state = ?inner.state, "Photo start rejected");
                return Err(Error::InvalidState(format!(
                    "photo session is {:?}",
                    inner.state
                )));
            }
            inner.generation += 1;
            self.set_state(&mut inner, SessionState::Starting);
            inner.generation
        };
        self.publish(SessionState::Starting, None).await;

        let devices = match self.enumerator.enumerate(self.camera.as_ref()).await {
            Ok(devices) => devices,
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

        let first = {
            let mut inner = self.inner.lock().await;
            let first = self.choose_device(&mut inner, &devices);
            inner.devices = devices.clone();
            inner.current_index = first;
            first
        };

        // photo retry is a plain rotation from the chosen device
        let order = ranking::attempt_order(
            &devices,
            first,
            ProductionMode::Development,
            self.enumerator.filter(),
        );

        let mut last_error = String::new();
        for (n, &index) in order.iter().enumerate() {
            if n > 0 && !self.config.retry_delay.is_zero() {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            {
                let mut inner = self.inner.lock().await;
                if !inner.is_starting(generation) {
                    drop(inner);
                    self.abort_start(generation).await;
                    return Ok(());
                }
                inner.current_index = index;
            }

            let device = &devices[index];
            match self.open(device).await {
                Ok(binding) => return self.commit(generation, index, binding).await,
                Err(e) => {
                    tracing::warn!(
                        device_id = %device.id,
                        label = %device.label,
                        attempt = n + 1,
                        error = %e,
                        "Photo camera open failed"
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

    /// Manual selection first, then the cached preference
    fn choose_device(&self, inner: &mut PhotoInner, devices: &[CameraDevice]) -> usize {
        let position = |id: &Option<String>| {
            id.as_ref()
                .and_then(|id| devices.iter().position(|d| &d.id == id))
        };

        if let Some(index) = position(&inner.selected) {
            return index;
        }
        if let Some(index) = position(&inner.preferred) {
            return index;
        }

        let index = ranking::photo_preference(devices, self.enumerator.filter()).unwrap_or(0);
        inner.preferred = devices.get(index).map(|d| d.id.clone());
        tracing::debug!(device_id = ?inner.preferred, "Photo device preference cached");
        index
    }

    async fn open(&self, device: &CameraDevice) -> Result<PhotoBinding> {
        let lease = self
            .leases
            .acquire(LeaseSlot::Photo, &device.id)
            .await
            .map_err(|e| Error::Bind(e.to_string()))?;

        match timeout(self.config.bind_timeout, self.camera.open(&device.id)).await {
            Ok(Ok(stream)) => Ok(PhotoBinding {
                device_id: device.id.clone(),
                lease,
                stream,
            }),
            Ok(Err(e)) => Err(Error::Bind(e.to_string())),
            Err(_) => {
                let timeout_ms = self.config.bind_timeout.as_millis() as u64;
                tracing::warn!(device_id = %device.id, timeout_ms = timeout_ms, "Photo camera open timed out");
                Err(Error::Bind(format!("open timed out after {}ms", timeout_ms)))
            }
        }
    }

    async fn commit(&self, generation: u64, index: usize, binding: PhotoBinding) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.is_starting(generation) {
            drop(inner);
            tracing::info!(device_id = %binding.device_id, "Photo start cancelled after open, releasing");
            self.close(binding).await;
            self.abort_start(generation).await;
            return Ok(());
        }

        let device_id = binding.device_id.clone();
        inner.binding = Some(binding);
        inner.current_index = index;
        self.set_state(&mut inner, SessionState::Active);
        drop(inner);

        tracing::info!(device_id = %device_id, "Photo preview active");
        self.publish(SessionState::Active, Some(device_id)).await;
        Ok(())
    }

    /// Capture one still frame, then release the preview
    pub async fn capture(&self) -> Result<StillImage> {
        let (generation, binding) = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Active {
                return Err(Error::InvalidState(format!(
                    "no active preview ({:?})",
                    inner.state
                )));
            }
            self.set_state(&mut inner, SessionState::Stopping);
            (inner.generation, inner.binding.take())
        };

        let Some(mut binding) = binding else {
            self.settle(generation).await;
            return Err(Error::Internal("active photo session without a preview".to_string()));
        };

        let result = match timeout(self.config.capture_timeout, binding.stream.capture_frame()).await {
            Ok(Ok(image)) => Ok(image),
            Ok(Err(e)) => Err(Error::Capture(e.to_string())),
            Err(_) => Err(Error::Capture("capture timed out".to_string())),
        };

        match &result {
            Ok(image) => tracing::info!(
                device_id = %binding.device_id,
                bytes = image.data.len(),
                width = image.width,
                height = image.height,
                "Product photo captured"
            ),
            Err(e) => {
                tracing::warn!(device_id = %binding.device_id, error = %e, "Product photo capture failed");
                self.hub.toast(ToastLevel::Error, e.to_string()).await;
            }
        }

        self.close(binding).await;
        self.settle(generation).await;
        result
    }

    /// Reopen the preview after a capture
    pub async fn retake(&self) -> Result<()> {
        self.start().await
    }

    /// Advance to the next device (wrapping) and reopen
    pub async fn switch_camera(&self) -> Result<()> {
        let cached = self.inner.lock().await.devices.clone();
        let devices = if cached.is_empty() {
            match self.enumerator.enumerate(self.camera.as_ref()).await {
                Ok(devices) => devices,
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
            let mut inner = self.inner.lock().await;
            let next = (inner.current_index + 1) % devices.len();
            let target = devices[next].clone();
            inner.selected = Some(target.id.clone());
            inner.current_index = next;
            inner.devices = devices;
            target
        };

        tracing::info!(device_id = %target.id, label = %target.label, "Switching photo camera");
        self.stop().await;
        self.start().await
    }

    /// Close the preview; no-op when Idle
    pub async fn stop(&self) {
        let (generation, binding) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Idle => return,
                SessionState::Stopping => {
                    drop(inner);
                    self.wait_until_settled().await;
                    return;
                }
                SessionState::Starting => {
                    self.set_state(&mut inner, SessionState::Stopping);
                    drop(inner);
                    self.publish(SessionState::Stopping, None).await;
                    self.wait_until_settled().await;
                    return;
                }
                SessionState::Active => {
                    self.set_state(&mut inner, SessionState::Stopping);
                    (inner.generation, inner.binding.take())
                }
            }
        };

        self.publish(SessionState::Stopping, None).await;
        if let Some(binding) = binding {
            self.close(binding).await;
        }
        self.settle(generation).await;
        tracing::info!("Photo preview stopped");
    }

    /// Close the stream, then release the lease
    async fn close(&self, binding: PhotoBinding) {
        let PhotoBinding {
            device_id,
            lease,
            stream,
        } = binding;

        match timeout(self.config.release_timeout, stream.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(device_id = %device_id, error = %e, "Photo camera release failed"),
            Err(_) => tracing::warn!(device_id = %device_id, "Photo camera release timed out, abandoning"),
        }
        drop(lease);
    }

    async fn settle(&self, generation: u64) {
        let settled = {
            let mut inner = self.inner.lock().await;
            if inner.generation == generation && inner.state == SessionState::Stopping {
                self.set_state(&mut inner, SessionState::Idle);
                true
            } else {
                false
            }
        };

        if settled {
            self.publish(SessionState::Idle, None).await;
        }
    }

    /// Back to Idle after an unsuccessful start; false if it was cancelled
    async fn abort_start(&self, generation: u64) -> bool {
        let was_starting = {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation || inner.state == SessionState::Idle {
                return false;
            }
            let was_starting = inner.state == SessionState::Starting;
            self.set_state(&mut inner, SessionState::Idle);
            was_starting
        };

        self.publish(SessionState::Idle, None).await;
        was_starting
    }

    async fn wait_until_settled(&self) {
        let mut rx = self.state_tx.subscribe();
        let wait = rx.wait_for(|s| *s != SessionState::Stopping);
        let settled = timeout(self.config.release_timeout, wait).await.is_ok();
        if settled {
            return;
        }

        let forced = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Stopping {
                self.set_state(&mut inner, SessionState::Idle);
                true
            } else {
                false
            }
        };

        if forced {
            tracing::warn!("Photo stop did not finish in time, forcing Idle");
            self.publish(SessionState::Idle, None).await;
        }
    }

    async fn publish(&self, state: SessionState, device_id: Option<String>) {
        self.hub.session_state(LeaseSlot::Photo.as_str(), state, device_id).await;
    }

    async fn report(&self, err: &Error) {
        tracing::warn!(code = err.code(), error = %err, "Photo session error");
        self.hub
            .toast(ToastLevel::Error, format!("Camera error: {}", err))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, DeviceSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// In-memory still camera
    struct MockStillCamera {
        devices: Vec<CameraDevice>,
        failing: Vec<String>,
        open_delay: Duration,
        opened: StdMutex<Vec<String>>,
        open_streams: Arc<AtomicUsize>,
    }

    impl MockStillCamera {
        fn new(devices: Vec<CameraDevice>) -> Self {
            Self {
                devices,
                failing: Vec::new(),
                open_delay: Duration::ZERO,
                opened: StdMutex::new(Vec::new()),
                open_streams: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn failing(mut self, ids: &[&str]) -> Self {
            self.failing = ids.iter().map(|s| s.to_string()).collect();
            self
        }

        fn with_open_delay(mut self, delay: Duration) -> Self {
            self.open_delay = delay;
            self
        }

        fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    struct MockStream {
        device_id: String,
        open_streams: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PreviewStream for MockStream {
        async fn capture_frame(&mut self) -> std::result::Result<StillImage, CameraError> {
            Ok(StillImage::jpeg(self.device_id.as_bytes().to_vec(), 640, 360))
        }

        async fn close(self: Box<Self>) -> std::result::Result<(), CameraError> {
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl DeviceSource for MockStillCamera {
        async fn list_cameras(&self) -> std::result::Result<Vec<CameraDevice>, CameraError> {
            Ok(self.devices.clone())
        }
    }

    #[async_trait]
    impl StillCamera for MockStillCamera {
        async fn open(&self, device_id: &str) -> std::result::Result<Box<dyn PreviewStream>, CameraError> {
            self.opened.lock().unwrap().push(device_id.to_string());
            if !self.open_delay.is_zero() {
                tokio::time::sleep(self.open_delay).await;
            }
            if self.failing.iter().any(|f| f == device_id) {
                return Err(CameraError::Busy(device_id.to_string()));
            }

            self.open_streams.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockStream {
                device_id: device_id.to_string(),
                open_streams: self.open_streams.clone(),
            }))
        }
    }

    fn session(camera: Arc<MockStillCamera>) -> ProductPhotoSession {
        ProductPhotoSession::new(
            camera,
            DeviceEnumerator::default(),
            Arc::new(DeviceLeaseManager::new()),
            Arc::new(FeedbackHub::new()),
            PhotoSessionConfig::default(),
        )
    }

    fn cams(list: &[(&str, &str)]) -> Vec<CameraDevice> {
        list.iter().map(|(id, label)| CameraDevice::new(*id, *label)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefers_integrated_webcam() {
        let camera = Arc::new(MockStillCamera::new(cams(&[
            ("v", "Camo"),
            ("usb", "USB Cam"),
            ("int", "Integrated Webcam"),
        ])));
        let photo = session(camera.clone());

        photo.start().await.unwrap();
        assert_eq!(photo.bound_device_id().await.as_deref(), Some("int"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_returns_image_and_stops() {
        let camera = Arc::new(MockStillCamera::new(cams(&[("usb", "USB Cam")])));
        let photo = session(camera.clone());

        photo.start().await.unwrap();
        let image = photo.capture().await.unwrap();

        assert_eq!(image.mime, "image/jpeg");
        assert!(image.to_data_url().starts_with("data:image/jpeg;base64,"));
        assert_eq!(photo.state(), SessionState::Idle);
        assert_eq!(camera.open_streams.load(Ordering::SeqCst), 0);

        photo.retake().await.unwrap();
        assert_eq!(photo.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_capture_requires_active_preview() {
        let camera = Arc::new(MockStillCamera::new(cams(&[("usb", "USB Cam")])));
        let photo = session(camera);

        let err = photo.capture().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reentrant_start_rejected() {
        let camera = Arc::new(MockStillCamera::new(cams(&[("usb", "USB Cam")])));
        let photo = session(camera.clone());

        photo.start().await.unwrap();
        let err = photo.start().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(camera.opened(), vec!["usb"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preference_cached_until_reset() {
        let camera = Arc::new(
            MockStillCamera::new(cams(&[("int", "Integrated Camera"), ("usb", "USB Cam")]))
                .failing(&["int"]),
        );
        let photo = session(camera.clone());

        photo.start().await.unwrap();
        assert_eq!(photo.bound_device_id().await.as_deref(), Some("usb"));
        photo.stop().await;

        // cached preference still points at the integrated camera
        photo.start().await.unwrap();
        assert_eq!(camera.opened(), vec!["int", "usb", "int", "usb"]);

        photo.reset_preference().await;
        photo.stop().await;
        photo.start().await.unwrap();
        assert_eq!(camera.opened().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_cycles_devices() {
        let camera = Arc::new(MockStillCamera::new(cams(&[("a", "USB A"), ("b", "USB B")])));
        let photo = session(camera.clone());

        photo.start().await.unwrap();
        photo.switch_camera().await.unwrap();
        assert_eq!(photo.bound_device_id().await.as_deref(), Some("b"));
        photo.switch_camera().await.unwrap();
        assert_eq!(photo.bound_device_id().await.as_deref(), Some("a"));
        assert_eq!(camera.open_streams.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_needs_two_devices() {
        let camera = Arc::new(MockStillCamera::new(cams(&[("a", "USB A")])));
        let photo = session(camera);

        photo.start().await.unwrap();
        let err = photo.switch_camera().await.unwrap_err();
        assert!(matches!(err, Error::SwitchUnavailable(_)));
        assert_eq!(photo.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_opening_releases_stream() {
        let camera = Arc::new(
            MockStillCamera::new(cams(&[("a", "USB A")])).with_open_delay(Duration::from_millis(1000)),
        );
        let photo = Arc::new(session(camera.clone()));

        let starter = photo.clone();
        let start = tokio::spawn(async move { starter.start().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        photo.stop().await;
        start.await.unwrap().unwrap();

        assert_eq!(photo.state(), SessionState::Idle);
        assert_eq!(camera.open_streams.load(Ordering::SeqCst), 0);
    }
}
