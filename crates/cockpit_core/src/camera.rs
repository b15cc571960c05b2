use anyhow::{bail, Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

pub const CAMERA_STREAM_PORT: u16 = 8081;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraStatus {
    Running,
    Stopped,
    Error,
    Unknown,
}

/// Fire-and-forget client for the camera endpoint each car exposes next to
/// its telemetry port. No state machine; every call is one GET.
pub struct CameraClient {
    http: Client,
    port: u16,
}

impl CameraClient {
    pub fn new() -> Self {
        Self::with_port(CAMERA_STREAM_PORT)
    }

    pub fn with_port(port: u16) -> Self {
        Self {
            http: Client::new(),
            port,
        }
    }

    pub async fn start_stream(&self, ip: &str) -> CameraStatus {
        match self.request(ip, "start").await {
            Ok(body) => {
                debug!(ip, body = %body.trim(), "camera stream started");
                CameraStatus::Running
            }
            Err(err) => {
                warn!(ip, error = %err, "camera start failed");
                CameraStatus::Error
            }
        }
    }

    pub async fn stop_stream(&self, ip: &str) -> CameraStatus {
        match self.request(ip, "stop").await {
            Ok(body) => {
                debug!(ip, body = %body.trim(), "camera stream stopped");
                CameraStatus::Stopped
            }
            Err(err) => {
                warn!(ip, error = %err, "camera stop failed");
                CameraStatus::Error
            }
        }
    }

    pub async fn stream_status(&self, ip: &str) -> CameraStatus {
        match self.request(ip, "status").await {
            Ok(body) => {
                if body.contains("Running") {
                    CameraStatus::Running
                } else {
                    CameraStatus::Stopped
                }
            }
            Err(err) => {
                warn!(ip, error = %err, "camera status check failed");
                CameraStatus::Unknown
            }
        }
    }

    async fn request(&self, ip: &str, action: &str) -> Result<String> {
        let url = format!("http://{ip}:{}/stream?action={action}", self.port);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("camera request failed: {url}"))?;
        if !response.status().is_success() {
            bail!("camera endpoint returned {}", response.status());
        }
        response
            .text()
            .await
            .context("camera response body unreadable")
    }
}

impl Default for CameraClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "tests/camera_tests.rs"]
mod tests;
