use nmea2k::RawFrame;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bridge::BridgeEvent;
use crate::error::BridgeError;
use crate::transport::{EventSender, RawChannel};

/// Kernel raw CAN channel.
///
/// One socket is read on a detached thread that forwards frames to the bridge
/// queue; a second socket is used for transmission.
pub struct SocketCanChannel {
    interface: String,
    tx_socket: CanSocket,
    shutdown: Arc<AtomicBool>,
}

impl SocketCanChannel {
    /// Opens `interface`, registers the inbound listener and starts reading.
    pub fn open(interface: &str, events: EventSender) -> Result<Self, BridgeError> {
        info!("Opening CAN interface: {}", interface);
        let rx_socket = open_socket(interface)?;
        configure_nmea2k_socket(&rx_socket).map_err(|source| BridgeError::Socket {
            interface: interface.to_string(),
            source,
        })?;
        let tx_socket = open_socket(interface)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = shutdown.clone();
            let name = interface.to_string();
            std::thread::Builder::new()
                .name(format!("can-reader-{}", interface))
                .spawn(move || read_loop(rx_socket, events, shutdown, name))?;
        }

        info!("Successfully opened CAN interface: {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            tx_socket,
            shutdown,
        })
    }
}

impl RawChannel for SocketCanChannel {
    fn send(&mut self, frame: &RawFrame) -> Result<(), BridgeError> {
        let id = ExtendedId::new(frame.identifier()).ok_or(BridgeError::InvalidFrame(frame.identifier()))?;
        let can_frame = CanFrame::new(id, frame.data()).ok_or(BridgeError::InvalidFrame(frame.identifier()))?;
        self.tx_socket.write_frame(&can_frame)?;
        Ok(())
    }

    fn stop(&mut self) {
        // The reader sees the flag within one read timeout and exits on its own
        self.shutdown.store(true, Ordering::SeqCst);
        info!("CAN channel {} stopped", self.interface);
    }
}

impl Drop for SocketCanChannel {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn open_socket(interface: &str) -> Result<CanSocket, BridgeError> {
    CanSocket::open(interface).map_err(|source| BridgeError::Socket {
        interface: interface.to_string(),
        source,
    })
}

/// Configures a CAN socket with NMEA2000-specific settings
fn configure_nmea2k_socket(socket: &CanSocket) -> std::io::Result<()> {
    // Short read timeout so the reader notices shutdown promptly
    socket.set_read_timeout(Duration::from_millis(100))
}

/// Reads one frame; NMEA2000 only uses 29-bit extended identifiers.
fn read_nmea2k_frame(socket: &CanSocket) -> std::io::Result<Option<RawFrame>> {
    let frame = socket.read_frame()?;
    if !frame.is_extended() || frame.is_remote_frame() {
        return Ok(None);
    }
    Ok(Some(RawFrame::new(frame.raw_id(), frame.data().to_vec())))
}

fn read_loop(socket: CanSocket, events: EventSender, shutdown: Arc<AtomicBool>, interface: String) {
    debug!("Starting CAN read loop on {}", interface);
    while !shutdown.load(Ordering::SeqCst) {
        match read_nmea2k_frame(&socket) {
            Ok(Some(frame)) => {
                if events.send(BridgeEvent::Frame(frame)).is_err() {
                    // Bridge is gone
                    break;
                }
            }
            Ok(None) => {}
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                // Timeout is expected, loop to check the shutdown flag
            }
            Err(e) => {
                warn!("Error reading CAN frame on {}: {}", interface, e);
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
    debug!("CAN read loop on {} terminated", interface);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    #[test]
    fn test_stop_returns_without_waiting_for_reader() {
        let (tx, _rx) = mpsc::unbounded_channel();
        // Needs a virtual CAN interface (ip link add dev vcan0 type vcan)
        let Ok(mut channel) = SocketCanChannel::open("vcan0", tx) else {
            return;
        };
        let started = Instant::now();
        channel.stop();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_open_unknown_interface_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            SocketCanChannel::open("nocan9", tx),
            Err(BridgeError::Socket { .. })
        ));
    }
}
