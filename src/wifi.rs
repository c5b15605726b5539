//! WiFi module for ESP32-C3 board
//!
//! Station-mode association using esp-wifi 0.14.1; addressing comes from the
//! embassy-net DHCP client.

use embassy_net::{Ipv4Address, Stack};
use embassy_time::{Duration, Timer};
use esp_wifi::wifi::{AuthMethod, ClientConfiguration, Configuration, WifiController, WifiEvent};
use log::{info, warn};

use crate::{BoardError, config};

/// How long to wait for a DHCP lease after association
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);

/// WiFi manager for handling network connectivity
pub struct WiFiManager<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
}

impl<'a> WiFiManager<'a> {
    /// Create a new WiFi manager instance
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self { controller, stack }
    }

    /// Associate with `ssid` and wait for the DHCP lease
    pub async fn connect(&mut self, ssid: &str, password: &str) -> Result<Ipv4Address, BoardError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            let client_config = ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| BoardError::WiFiError)?,
                password: password.try_into().map_err(|_| BoardError::WiFiError)?,
                auth_method: if password.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            };
            self.controller
                .set_configuration(&Configuration::Client(client_config))
                .map_err(|_| BoardError::WiFiError)?;

            info!("[WIFI] Starting station");
            self.controller
                .start_async()
                .await
                .map_err(|_| BoardError::WiFiError)?;
        }

        info!("[WIFI] Connecting to WiFi network: {}", ssid);
        self.controller.connect_async().await.map_err(|err| {
            warn!("[WIFI] connect failed: {:?}", err);
            BoardError::WiFiError
        })?;

        self.wait_for_lease().await
    }

    async fn wait_for_lease(&self) -> Result<Ipv4Address, BoardError> {
        let deadline = embassy_time::Instant::now() + DHCP_TIMEOUT;
        while embassy_time::Instant::now() < deadline {
            if let Some(ip) = self.ip_address() {
                info!("[DHCP] IP address obtained: {}", ip);
                return Ok(ip);
            }
            Timer::after(Duration::from_millis(500)).await;
        }
        warn!("[DHCP] no lease within {} s", DHCP_TIMEOUT.as_secs());
        Err(BoardError::NetworkError)
    }

    /// Current DHCP address, if any
    pub fn ip_address(&self) -> Option<Ipv4Address> {
        self.stack.config_v4().map(|cfg| cfg.address.address())
    }

    /// Check if WiFi is associated
    pub fn is_connected(&self) -> bool {
        self.controller.is_connected().unwrap_or(false)
    }

    /// Keep the station associated with the configured network forever
    pub async fn run(&mut self) -> ! {
        loop {
            match self
                .connect(config::WIFI_SSID, config::WIFI_PASSWORD)
                .await
            {
                Ok(ip) => {
                    info!("[WIFI] Link up, API at http://{}:{}/", ip, config::HTTP_PORT);
                    self.controller
                        .wait_for_event(WifiEvent::StaDisconnected)
                        .await;
                    warn!("[WIFI] WiFi connection lost!");
                }
                Err(err) => {
                    warn!("[WIFI] connection attempt failed: {:?}", err);
                    if self.is_connected() {
                        // Associated without a lease; start over.
                        let _ = self.controller.disconnect_async().await;
                    }
                }
            }
            Timer::after(Duration::from_millis(config::WIFI_RECONNECT_INTERVAL_MS)).await;
        }
    }
}
