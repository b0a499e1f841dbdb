//! Line-oriented decode engine
//!
//! Treats every non-empty input line as one decoded frame from a single
//! keyboard-wedge style device. Lines read while no binding is active are
//! dropped, as frames are when no camera is running.

use super::{DecodeEngine, EngineConfig, EngineEvent};
use crate::camera::{CameraDevice, CameraError, DeviceSource};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

const LINE_DEVICE_ID: &str = "line-input";
const LINE_DEVICE_LABEL: &str = "Keyboard wedge (line input)";

pub struct LineDecodeEngine {
    device: CameraDevice,
    binding: Arc<Mutex<Option<mpsc::Sender<EngineEvent>>>>,
    reader: JoinHandle<()>,
}

impl LineDecodeEngine {
    /// Spawn the reader task over `input`
    pub fn spawn<R>(input: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let binding: Arc<Mutex<Option<mpsc::Sender<EngineEvent>>>> = Arc::new(Mutex::new(None));
        let task_binding = binding.clone();

        let reader = tokio::spawn(async move {
            let mut lines = input.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let payload = line.trim();
                        if payload.is_empty() {
                            continue;
                        }

                        let binding = task_binding.lock().await;
                        match binding.as_ref() {
                            Some(tx) => {
                                if tx.try_send(EngineEvent::decoded(payload)).is_err() {
                                    tracing::debug!("Event queue full or closed, frame dropped");
                                }
                            }
                            None => tracing::debug!("No active binding, frame dropped"),
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Line input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Line input read failed");
                        break;
                    }
                }
            }
        });

        Self {
            device: CameraDevice::new(LINE_DEVICE_ID, LINE_DEVICE_LABEL),
            binding,
            reader,
        }
    }

    /// Engine over the process's standard input
    pub fn stdin() -> Self {
        Self::spawn(BufReader::new(tokio::io::stdin()))
    }
}

impl Drop for LineDecodeEngine {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl DeviceSource for LineDecodeEngine {
    async fn list_cameras(&self) -> Result<Vec<CameraDevice>, CameraError> {
        Ok(vec![self.device.clone()])
    }
}

#[async_trait]
impl DecodeEngine for LineDecodeEngine {
    async fn start(
        &self,
        device_id: &str,
        config: &EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> Result<(), CameraError> {
        if device_id != self.device.id {
            return Err(CameraError::NotFound(device_id.to_string()));
        }

        let mut binding = self.binding.lock().await;
        if binding.is_some() {
            return Err(CameraError::Busy(device_id.to_string()));
        }
        *binding = Some(events);

        tracing::debug!(device_id = %device_id, fps = config.fps, "Line engine started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), CameraError> {
        // stopping an engine that is not running is not an error
        self.binding.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_lines_become_decoded_events_while_bound() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let engine = LineDecodeEngine::spawn(BufReader::new(reader));
        let (tx, mut rx) = mpsc::channel(8);

        engine
            .start(LINE_DEVICE_ID, &EngineConfig::DEFAULT, tx)
            .await
            .unwrap();
        writer.write_all(b"  \n12345678\n").await.unwrap();

        match rx.recv().await {
            Some(EngineEvent::Decoded { payload, .. }) => assert_eq!(payload, "12345678"),
            other => panic!("unexpected event: {:?}", other),
        }

        engine.stop().await.unwrap();
        // second stop is a no-op
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_unknown_device_and_double_start() {
        let (_writer, reader) = tokio::io::duplex(64);
        let engine = LineDecodeEngine::spawn(BufReader::new(reader));

        let (tx, _rx) = mpsc::channel(1);
        let err = engine
            .start("other", &EngineConfig::DEFAULT, tx.clone())
            .await
            .unwrap_err();
        assert_eq!(err, CameraError::NotFound("other".to_string()));

        engine.start(LINE_DEVICE_ID, &EngineConfig::DEFAULT, tx.clone()).await.unwrap();
        let err = engine
            .start(LINE_DEVICE_ID, &EngineConfig::DEFAULT, tx)
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::Busy(_)));
    }
}
