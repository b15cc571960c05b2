use std::{collections::HashMap, fs, time::Duration};

use cockpit_core::camera::CAMERA_STREAM_PORT;
use control_link::{
    ControlChannelConfig, CONTROL_MAX_RETRIES, CONTROL_RETRY_DELAY, DEFAULT_CONTROL_URL,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub control_url: String,
    pub control_retry_delay_ms: u64,
    pub control_max_retries: u32,
    pub camera_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            control_url: DEFAULT_CONTROL_URL.into(),
            control_retry_delay_ms: CONTROL_RETRY_DELAY.as_millis() as u64,
            control_max_retries: CONTROL_MAX_RETRIES,
            camera_port: CAMERA_STREAM_PORT,
        }
    }
}

impl Settings {
    pub fn control_config(&self) -> ControlChannelConfig {
        ControlChannelConfig {
            url: self.control_url.clone(),
            retry_delay: Duration::from_millis(self.control_retry_delay_ms),
            max_retries: self.control_max_retries,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("cockpit.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("control_url") {
                settings.control_url = v.clone();
            }
            if let Some(v) = file_cfg.get("control_retry_delay_ms") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.control_retry_delay_ms = parsed;
                }
            }
            if let Some(v) = file_cfg.get("control_max_retries") {
                if let Ok(parsed) = v.parse::<u32>() {
                    settings.control_max_retries = parsed;
                }
            }
            if let Some(v) = file_cfg.get("camera_port") {
                if let Ok(parsed) = v.parse::<u16>() {
                    settings.camera_port = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("CONTROL_URL") {
        settings.control_url = v;
    }
    if let Ok(v) = std::env::var("COCKPIT__CONTROL_URL") {
        settings.control_url = v;
    }

    if let Ok(v) = std::env::var("COCKPIT__CONTROL_RETRY_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.control_retry_delay_ms = parsed;
        }
    }

    if let Ok(v) = std::env::var("COCKPIT__CONTROL_MAX_RETRIES") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.control_max_retries = parsed;
        }
    }

    if let Ok(v) = std::env::var("CAMERA_PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.camera_port = parsed;
        }
    }
    if let Ok(v) = std::env::var("COCKPIT__CAMERA_PORT") {
        if let Ok(parsed) = v.parse::<u16>() {
            settings.camera_port = parsed;
        }
    }

    settings
}
