//! The ways the bridge can reach the CAN bus.
//!
//! Exactly one [`Transport`] is active per bridge. It is chosen once at startup
//! through a [`TransportFactory`], which tests replace with a fake.

use async_trait::async_trait;
use nmea2k::RawFrame;
use std::io::Write;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bridge::BridgeEvent;
use crate::error::BridgeError;
use crate::socketcan_channel::SocketCanChannel;
use crate::writer_process::WriterProcess;

/// Queue feeding the bridge event loop.
pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Direct kernel CAN socket.
    RawChannel,
    /// Helper subprocess writing frames, with candump text as the inbound path.
    ExternalWriter,
    /// JSON lines over standard input/output.
    StdioPipe,
    /// No usable transport.
    None,
}

/// An open raw CAN channel. Inbound frames are delivered as
/// [`BridgeEvent::Frame`] on the queue given when the channel was opened.
pub trait RawChannel: Send {
    /// Transmits one extended-format frame.
    fn send(&mut self, frame: &RawFrame) -> Result<(), BridgeError>;
    fn stop(&mut self);
}

/// Input side of an external writer subprocess.
pub trait FrameWriter: Send {
    /// Queues one line (without newline) for the subprocess input.
    fn write_line(&mut self, line: &str) -> Result<(), BridgeError>;
    /// Forcefully terminates the subprocess.
    fn kill(&mut self);
}

/// The active transport, carrying only the resources that mode needs.
pub enum Transport {
    RawChannel(Box<dyn RawChannel>),
    /// `None` once the writer process has exited.
    ExternalWriter(Option<Box<dyn FrameWriter>>),
    StdioPipe(Box<dyn Write + Send>),
    None,
}

impl Transport {
    pub fn mode(&self) -> TransportMode {
        match self {
            Transport::RawChannel(_) => TransportMode::RawChannel,
            Transport::ExternalWriter(_) => TransportMode::ExternalWriter,
            Transport::StdioPipe(_) => TransportMode::StdioPipe,
            Transport::None => TransportMode::None,
        }
    }

    /// Releases owned resources: stops the channel or kills the writer.
    pub fn shutdown(&mut self) {
        match std::mem::replace(self, Transport::None) {
            Transport::RawChannel(mut channel) => channel.stop(),
            Transport::ExternalWriter(Some(mut writer)) => {
                debug!("end, killing external writer process");
                writer.kill();
            }
            Transport::StdioPipe(mut out) => {
                let _ = out.flush();
            }
            Transport::ExternalWriter(None) | Transport::None => {}
        }
    }
}

/// Creates transports for the bridge.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Whether kernel raw CAN channels can be used on this host.
    fn raw_channels_supported(&self) -> bool;

    fn open_raw_channel(&self, device: &str, events: EventSender) -> Result<Box<dyn RawChannel>, BridgeError>;

    /// Probes the host for the writer helper binary.
    async fn writer_available(&self, program: &str) -> bool;

    async fn spawn_writer(
        &self,
        program: &str,
        device: &str,
        events: EventSender,
    ) -> Result<Box<dyn FrameWriter>, BridgeError>;

    /// Sink for JSON lines in piped mode.
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(std::io::stdout())
    }
}

/// SocketCAN and `sh` subprocesses on the local host.
pub struct SystemTransportFactory;

#[async_trait]
impl TransportFactory for SystemTransportFactory {
    fn raw_channels_supported(&self) -> bool {
        cfg!(target_os = "linux")
    }

    fn open_raw_channel(&self, device: &str, events: EventSender) -> Result<Box<dyn RawChannel>, BridgeError> {
        Ok(Box::new(SocketCanChannel::open(device, events)?))
    }

    async fn writer_available(&self, program: &str) -> bool {
        match Command::new("sh")
            .arg("-c")
            .arg(format!("which {}", program))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("probe for {} failed: {}", program, e);
                false
            }
        }
    }

    async fn spawn_writer(
        &self,
        program: &str,
        device: &str,
        events: EventSender,
    ) -> Result<Box<dyn FrameWriter>, BridgeError> {
        Ok(Box::new(WriterProcess::spawn(program, device, events)?))
    }
}
