//! End-to-end scan station flow over in-memory backends

use async_trait::async_trait;
use scanstation::camera::{CameraDevice, CameraError, DeviceSource};
use scanstation::decode_engine::{DecodeEngine, EngineConfig, EngineEvent};
use scanstation::feedback_hub::HubMessage;
use scanstation::inventory_client::{Product, ProductLookup, ProductSource};
use scanstation::photo_session::{PreviewStream, StillCamera, StillImage};
use scanstation::scan_session::SessionState;
use scanstation::state::{AppConfig, AppState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

struct FakeEngine {
    devices: Vec<CameraDevice>,
    starts: AtomicUsize,
    sender: Mutex<Option<mpsc::Sender<EngineEvent>>>,
}

impl FakeEngine {
    fn new(devices: Vec<CameraDevice>) -> Self {
        Self {
            devices,
            starts: AtomicUsize::new(0),
            sender: Mutex::new(None),
        }
    }

    fn emit(&self, payload: &str) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            tx.try_send(EngineEvent::decoded(payload)).unwrap();
        }
    }
}

#[async_trait]
impl DeviceSource for FakeEngine {
    async fn list_cameras(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(self.devices.clone())
    }
}

#[async_trait]
impl DecodeEngine for FakeEngine {
    async fn start(
        &self,
        _device_id: &str,
        _config: &EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(), CameraError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sender.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CameraError> {
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

struct FakeStillCamera {
    devices: Vec<CameraDevice>,
    failing: bool,
}

struct FakeStream;

#[async_trait]
impl PreviewStream for FakeStream {
    async fn capture_frame(&mut self) -> Result<StillImage, CameraError> {
        Ok(StillImage::jpeg(vec![0xff, 0xd8, 0xff], 1, 1))
    }

    async fn close(self: Box<Self>) -> Result<(), CameraError> {
        Ok(())
    }
}

#[async_trait]
impl DeviceSource for FakeStillCamera {
    async fn list_cameras(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(self.devices.clone())
    }
}

#[async_trait]
impl StillCamera for FakeStillCamera {
    async fn open(&self, device_id: &str) -> Result<Box<dyn PreviewStream>, CameraError> {
        if self.failing {
            return Err(CameraError::Busy(device_id.to_string()));
        }
        Ok(Box::new(FakeStream))
    }
}

struct FakeInventory {
    logged: mpsc::UnboundedSender<(String, i64)>,
}

#[async_trait]
impl ProductLookup for FakeInventory {
    async fn lookup_by_payload(&self, payload: &str) -> scanstation::Result<Option<Product>> {
        if payload != "12345678" {
            return Ok(None);
        }
        Ok(Some(Product {
            barcode: payload.to_string(),
            name: "Oat Milk".to_string(),
            category: Some("Dairy".to_string()),
            quantity: 12,
            price: Some(3.5),
            image_url: None,
            source: ProductSource::Inventory,
        }))
    }

    async fn add_product(&self, _product: &Product) -> scanstation::Result<()> {
        Ok(())
    }

    async fn log_scan_event(&self, payload: &str, current_quantity: i64) -> scanstation::Result<()> {
        let _ = self.logged.send((payload.to_string(), current_quantity));
        Ok(())
    }
}

fn test_config() -> AppConfig {
    AppConfig::from_lookup(|key| match key {
        "DEPLOYMENT_HOST" => Some("shop.example.com".to_string()),
        _ => None,
    })
}

async fn wait_for(mut rx: watch::Receiver<SessionState>, state: SessionState) {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn visible_scanner_accepts_one_code_then_looks_it_up() {
    let engine = Arc::new(FakeEngine::new(vec![
        CameraDevice::new("camo", "Camo Camera"),
        CameraDevice::new("usb", "USB Camera"),
    ]));
    let (logged_tx, mut logged) = mpsc::unbounded_channel();
    let state = AppState::build(
        test_config(),
        engine.clone(),
        Arc::new(FakeInventory { logged: logged_tx }),
        None,
    );
    let (_id, mut messages) = state.hub.subscribe("test").await;

    state.show_scanner();
    wait_for(state.scan.subscribe_state(), SessionState::Active).await;
    assert_eq!(state.scan.bound_device_id().await.as_deref(), Some("usb"));

    engine.emit("12345678");
    engine.emit("12345678");

    assert_eq!(logged.recv().await, Some(("12345678".to_string(), 12)));
    assert_eq!(state.scan.state(), SessionState::Idle);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let mut detections = 0;
    let mut flashes = 0;
    let mut found = None;
    while let Ok(message) = messages.try_recv() {
        match message {
            HubMessage::Detection(_) => detections += 1,
            HubMessage::Flash(_) => flashes += 1,
            HubMessage::LookupResult(result) => found = result.product,
            _ => {}
        }
    }

    assert_eq!(detections, 1);
    assert_eq!(flashes, 1);
    assert_eq!(found.map(|p| p.name), Some("Oat Milk".to_string()));
    assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hiding_the_scanner_stops_it() {
    let engine = Arc::new(FakeEngine::new(vec![CameraDevice::new("usb", "USB Camera")]));
    let (logged_tx, _logged) = mpsc::unbounded_channel();
    let state = AppState::build(
        test_config(),
        engine.clone(),
        Arc::new(FakeInventory { logged: logged_tx }),
        None,
    );

    state.show_scanner();
    wait_for(state.scan.subscribe_state(), SessionState::Active).await;

    state.hide_scanner();
    wait_for(state.scan.subscribe_state(), SessionState::Idle).await;
    assert!(engine.sender.lock().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn photo_session_runs_beside_the_scanner() {
    let devices = vec![CameraDevice::new("usb", "USB Camera")];
    let engine = Arc::new(FakeEngine::new(devices.clone()));
    let (logged_tx, _logged) = mpsc::unbounded_channel();
    let state = AppState::build(
        test_config(),
        engine.clone(),
        Arc::new(FakeInventory { logged: logged_tx }),
        Some(Arc::new(FakeStillCamera {
            devices,
            failing: false,
        })),
    );
    let photo = state.photo.clone().unwrap();

    state.scan.start().await.unwrap();
    photo.start().await.unwrap();
    assert_eq!(state.scan.state(), SessionState::Active);
    assert_eq!(photo.state(), SessionState::Active);

    state.scan.stop().await;
    assert_eq!(photo.state(), SessionState::Active);

    let image = photo.capture().await.unwrap();
    assert!(image.to_data_url().starts_with("data:image/jpeg;base64,"));
    assert_eq!(photo.state(), SessionState::Idle);
    assert_eq!(state.scan.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn photo_camera_failure_leaves_scanner_running() {
    let devices = vec![
        CameraDevice::new("front", "Front Camera"),
        CameraDevice::new("usb", "USB Camera"),
    ];
    let engine = Arc::new(FakeEngine::new(devices.clone()));
    let (logged_tx, _logged) = mpsc::unbounded_channel();
    let state = AppState::build(
        test_config(),
        engine.clone(),
        Arc::new(FakeInventory { logged: logged_tx }),
        Some(Arc::new(FakeStillCamera {
            devices,
            failing: true,
        })),
    );
    let photo = state.photo.clone().unwrap();

    state.scan.start().await.unwrap();
    let bound = state.scan.bound_device_id().await;
    assert!(bound.is_some());

    let err = photo.start().await.unwrap_err();
    assert_eq!(err.code(), "CAMERA_UNAVAILABLE");
    assert_eq!(photo.state(), SessionState::Idle);

    assert!(photo.capture().await.is_err());
    assert_eq!(photo.state(), SessionState::Idle);

    assert_eq!(state.scan.state(), SessionState::Active);
    assert_eq!(state.scan.bound_device_id().await, bound);
    assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
}
