//! SessionTrigger - scanner visibility to session lifecycle
//!
//! ## Responsibilities
//!
//! - Scanner shown (false -> true): begin a scan start if Idle
//! - Scanner hidden (true -> false): stop unconditionally
//! - Manual start / stop / switch for the UI buttons
//!
//! The Idle -> Starting claim happens inline in the watcher, so a hide that
//! follows a show always finds the session at least Starting. Device binding
//! runs on its own task.

use crate::error::Result;
use crate::scan_session::ScanSession;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// SessionTrigger instance
pub struct SessionTrigger {
    session: ScanSession,
    watcher: JoinHandle<()>,
}

impl SessionTrigger {
    /// Watch `visibility` and drive `session` from it
    ///
    /// The value present at spawn time counts as the first transition.
    pub fn spawn(session: ScanSession, mut visibility: watch::Receiver<bool>) -> Self {
        let watched = session.clone();

        let watcher = tokio::spawn(async move {
            let mut visible = false;

            loop {
                let now = *visibility.borrow_and_update();
                if now != visible {
                    visible = now;
                    if now {
                        Self::on_show(&watched).await;
                    } else {
                        Self::on_hide(&watched).await;
                    }
                }

                if visibility.changed().await.is_err() {
                    tracing::debug!("Visibility signal closed");
                    break;
                }
            }

            tracing::info!("Session trigger stopped");
        });

        Self { session, watcher }
    }

    async fn on_show(session: &ScanSession) {
        tracing::debug!("Scanner shown");

        let Some(generation) = session.begin_start().await else {
            return;
        };

        let session = session.clone();
        tokio::spawn(async move {
            // failures are already reported to the user by the session
            if let Err(e) = session.run_start(generation).await {
                tracing::debug!(error = %e, "Triggered scan start failed");
            }
        });
    }

    async fn on_hide(session: &ScanSession) {
        tracing::debug!("Scanner hidden");
        session.stop().await;
    }

    pub fn session(&self) -> &ScanSession {
        &self.session
    }

    /// Manual start button
    pub async fn start(&self) -> Result<()> {
        self.session.start().await
    }

    /// Manual stop button
    pub async fn stop(&self) {
        self.session.stop().await
    }

    /// Switch-camera button
    pub async fn switch_camera(&self) -> Result<()> {
        self.session.switch_camera().await
    }
}

impl Drop for SessionTrigger {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
