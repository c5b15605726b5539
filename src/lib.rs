#![cfg_attr(not(test), no_std)]

//! ESP32-C3 Light Sensor & Buzzer Board Library
//!
//! This library provides the on-device control surface of a network-attached
//! board that reads an ambient-light sensor, plays tones on a PWM buzzer and
//! answers a small JSON/HTTP API so a remote coordinator can poll and command it.

extern crate alloc;

pub mod api;
pub mod http;
pub mod playback;
pub mod sensor;
pub mod server;
pub mod tone;

#[cfg(target_arch = "riscv32")]
pub mod board;
#[cfg(target_arch = "riscv32")]
pub mod wifi;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// HTTP port the control API listens on
    pub const HTTP_PORT: u16 = 80;

    /// Number of sockets concurrently waiting in `accept()`
    pub const HTTP_WORKERS: usize = 2;

    /// Idle timeout applied to every accepted connection
    pub const HTTP_SOCKET_TIMEOUT_SECS: u64 = 10;

    /// GPIO wired to the passive buzzer (LEDC channel 0)
    pub const BUZZER_PIN: u8 = 6;

    /// GPIO wired to the photoresistor divider (ADC1 channel 2)
    pub const LIGHT_SENSOR_PIN: u8 = 2;

    /// Duty cycle used when a request does not carry one
    pub const DEFAULT_DUTY: f32 = 0.5;

    /// Silence between melody notes when a request does not carry one
    pub const DEFAULT_GAP_MS: u32 = 50;

    /// Lux reported for a fully saturated sensor
    pub const LUX_FULL_SCALE: f32 = 1000.0;

    /// Device identity reported by `/health`
    pub const DEVICE_ID: &str = env!("DEVICE_ID");

    /// Raw sample read in darkness
    pub const RAW_MIN: u16 = parse_u16(env!("LIGHT_RAW_MIN"));

    /// Raw sample read under strong light
    pub const RAW_MAX: u16 = parse_u16(env!("LIGHT_RAW_MAX"));

    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// WiFi reconnection interval in milliseconds
    pub const WIFI_RECONNECT_INTERVAL_MS: u64 = 5000;

    // build.rs already validated the digits, so this never sees anything else.
    const fn parse_u16(s: &str) -> u16 {
        let bytes = s.as_bytes();
        let mut value: u32 = 0;
        let mut i = 0;
        while i < bytes.len() {
            value = value * 10 + (bytes[i] - b'0') as u32;
            i += 1;
        }
        value as u16
    }
}

/// Error types for the light/buzzer board bring-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardError {
    /// WiFi connection error
    WiFiError,
    /// Network stack error (no DHCP lease)
    NetworkError,
}

#[cfg(test)]
mod tests {
    use super::config;

    #[test]
    fn calibration_is_ordered() {
        assert!(config::RAW_MIN < config::RAW_MAX);
    }

    #[test]
    fn device_id_is_never_empty() {
        assert!(!config::DEVICE_ID.is_empty());
    }
}
