use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::bridge::BridgeHandle;
use crate::outbound::Outbound;

const MAX_DATAGRAM: usize = 65_507;

/// UDP listener for outbound messages
///
/// Every datagram carries one or more lines. A line holding a JSON object is a
/// structured message; any other non-empty line is sent as Actisense text.
pub struct UdpIngress {
    socket: UdpSocket,
    handle: BridgeHandle,
    message_count: u64,
    error_count: u64,
}

impl UdpIngress {
    /// Bind the listener
    ///
    /// # Arguments
    /// * `address` - Local UDP address (e.g., "127.0.0.1:10111")
    /// * `handle` - Bridge accepting the decoded messages
    pub async fn bind(address: &str, handle: BridgeHandle) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(address).await?;
        info!("Accepting outbound messages on udp://{}", socket.local_addr()?);
        Ok(Self {
            socket,
            handle,
            message_count: 0,
            error_count: 0,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Receive until the bridge goes away
    pub async fn run(mut self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    if self.error_count < 10 {
                        warn!("Failed to receive UDP datagram: {}", e);
                    }
                    self.error_count += 1;
                    continue;
                }
            };

            let text = String::from_utf8_lossy(&buf[..len]);
            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                if !self.handle.send(Outbound::from_line(line)) {
                    debug!("bridge stopped, closing UDP listener");
                    return;
                }
                self.message_count += 1;
                if self.message_count % 1000 == 0 {
                    debug!("Received {} outbound messages via UDP (last from {})", self.message_count, peer);
                }
            }
        }
    }
}
