//! HTTP connection server
//!
//! Accepts TCP connections on the API port and hands each one to the
//! [`RequestRouter`] for exactly one request/response exchange.

use embassy_net::{Stack, tcp::TcpSocket};
use embassy_time::{Duration, Timer};
use log::{info, warn};

use crate::api::{DeviceStats, RequestRouter};
use crate::config;
use crate::sensor::LightSampler;
use crate::tone::PwmOutput;

const SOCKET_BUFFER_SIZE: usize = 1024;

/// One accept worker on the API port
pub struct HttpServer<'a> {
    stack: Stack<'a>,
    port: u16,
}

impl<'a> HttpServer<'a> {
    pub fn new(stack: Stack<'a>, port: u16) -> Self {
        Self { stack, port }
    }

    /// Accept and serve connections forever. Several workers may run this on
    /// the same port; each owns its own socket buffers.
    pub async fn run<S, P, D>(&self, router: &RequestRouter<'_, S, P, D>, worker_id: usize) -> !
    where
        S: LightSampler,
        P: PwmOutput,
        D: DeviceStats,
    {
        let mut rx_buffer = [0u8; SOCKET_BUFFER_SIZE];
        let mut tx_buffer = [0u8; SOCKET_BUFFER_SIZE];

        info!("[HTTP] worker {} starting on port {}", worker_id, self.port);

        loop {
            // Ensure network is configured before accepting connections.
            self.stack.wait_config_up().await;

            let mut socket = TcpSocket::new(self.stack, &mut rx_buffer, &mut tx_buffer);
            socket.set_timeout(Some(Duration::from_secs(
                config::HTTP_SOCKET_TIMEOUT_SECS,
            )));

            match socket.accept(self.port).await {
                Ok(()) => {
                    if let Err(err) = router.handle_connection(&mut socket).await {
                        warn!("[HTTP] worker {} connection error: {:?}", worker_id, err);
                    }
                    socket.close();
                    if let Err(err) = socket.flush().await {
                        warn!("[HTTP] worker {} flush on close failed: {:?}", worker_id, err);
                    }
                }
                Err(err) => {
                    warn!("[HTTP] worker {} accept error: {:?}", worker_id, err);
                    Timer::after(Duration::from_millis(200)).await;
                }
            }

            socket.abort();
        }
    }
}
