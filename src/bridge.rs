//! The bridge between the CAN transports and upward consumers.
//!
//! All inputs (frames from a raw channel, candump text lines, outbound messages,
//! subprocess exits and timers) arrive on a single [`BridgeEvent`] queue and are
//! handled one at a time by [`run`]. Inbound traffic leaves on the upward queue
//! as [`Upward`] items, in the order the transport delivered it.

use nmea2k::{
    AddressClaimer, FastPacketAssembler, LineParser, PgnEncoder, PgnEnvelope, RawFrame, frame_to_text,
    envelope::now_timestamp,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::app_metrics::{AppMetrics, MetricsLogger};
use crate::config::Config;
use crate::frame_filter::is_self_originated;
use crate::outbound::{Dispatcher, Outbound};
use crate::reporter::StatusReporter;
use crate::transport::{EventSender, Transport, TransportFactory, TransportMode};

/// Everything the bridge reacts to.
#[derive(Debug)]
pub enum BridgeEvent {
    /// Frame from the kernel channel.
    Frame(RawFrame),
    /// One line of candump text.
    Line(String),
    Outbound(Outbound),
    /// The external writer process ended; `None` when killed by a signal.
    WriterExited { code: Option<i32> },
    /// The settling delay after spawning the writer has passed.
    DeviceSettled,
    Shutdown,
}

/// Inbound traffic for upward consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum Upward {
    Envelope(PgnEnvelope),
    /// Actisense line, when plain text output is configured.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub device: String,
    pub use_external_writer: bool,
    pub from_stdin: bool,
    pub external_device: bool,
    pub writer_command: String,
    pub writer_settle: Duration,
    pub multi_frame_pgns: Vec<u32>,
    pub plain_text: bool,
    pub reassemble_fast_packets: bool,
    pub fast_packet_pgns: Vec<u32>,
}

impl From<&Config> for BridgeOptions {
    fn from(config: &Config) -> Self {
        Self {
            device: config.can_interface.clone(),
            use_external_writer: config.transport.use_external_writer,
            from_stdin: config.transport.from_stdin,
            external_device: config.transport.external_device,
            writer_command: config.transport.writer_command.clone(),
            writer_settle: config.transport.writer_settle(),
            multi_frame_pgns: config.multi_frame_pgns.clone(),
            plain_text: config.plain_text,
            reassemble_fast_packets: config.reassemble_fast_packets,
            fast_packet_pgns: config.fast_packet_pgns.clone(),
        }
    }
}

/// External collaborators handed to the bridge at construction.
pub struct Collaborators {
    pub factory: Arc<dyn TransportFactory>,
    pub reporter: Arc<dyn StatusReporter>,
    pub encoder: Box<dyn PgnEncoder>,
    /// Local address-claim device; ignored when `external_device` is set.
    pub device: Option<Box<dyn AddressClaimer>>,
}

/// Accepts outbound messages and lifecycle requests from any task.
#[derive(Clone)]
pub struct BridgeHandle {
    events: EventSender,
}

impl BridgeHandle {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Queues a message for transmission. Returns false once the bridge is gone.
    pub fn send(&self, message: Outbound) -> bool {
        self.events.send(BridgeEvent::Outbound(message)).is_ok()
    }

    /// Queues one line of candump text.
    pub fn line(&self, line: String) -> bool {
        self.events.send(BridgeEvent::Line(line)).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(BridgeEvent::Shutdown);
    }
}

pub struct Bridge {
    options: BridgeOptions,
    transport: Transport,
    parser: LineParser,
    device: Option<Box<dyn AddressClaimer>>,
    pending_device: Option<Box<dyn AddressClaimer>>,
    dispatcher: Dispatcher,
    assembler: Option<FastPacketAssembler>,
    reporter: Arc<dyn StatusReporter>,
    upward: mpsc::UnboundedSender<Upward>,
    events: EventSender,
    metrics: AppMetrics,
    ended: bool,
}

impl Bridge {
    /// Selects the transport and brings it up.
    ///
    /// Acquisition failures are reported and leave the bridge running without a
    /// transport; they never fail construction.
    pub async fn start(
        options: BridgeOptions,
        collaborators: Collaborators,
        upward: mpsc::UnboundedSender<Upward>,
        events: EventSender,
    ) -> Self {
        let Collaborators {
            factory,
            reporter,
            encoder,
            device,
        } = collaborators;

        let assembler = options
            .reassemble_fast_packets
            .then(|| FastPacketAssembler::new(options.fast_packet_pgns.clone()));

        let mut bridge = Bridge {
            dispatcher: Dispatcher::new(encoder, options.multi_frame_pgns.clone()),
            pending_device: if options.external_device { None } else { device },
            options,
            transport: Transport::None,
            parser: LineParser::new(),
            device: None,
            assembler,
            reporter,
            upward,
            events,
            metrics: AppMetrics::new(),
            ended: false,
        };

        if bridge.options.from_stdin {
            info!("Piped mode: exchanging JSON lines over stdin/stdout");
            bridge.transport = Transport::StdioPipe(factory.stdout());
            return bridge;
        }

        let raw_supported = factory.raw_channels_supported();
        if !raw_supported {
            warn!("unable to use native socketcan interface");
        }

        if !raw_supported || bridge.options.use_external_writer {
            bridge.start_external_writer(factory.as_ref()).await;
        } else {
            bridge.start_raw_channel(factory.as_ref());
        }
        bridge
    }

    async fn start_external_writer(&mut self, factory: &dyn TransportFactory) {
        let program = self.options.writer_command.clone();
        let device = self.options.device.clone();

        if !factory.writer_available(&program).await {
            let msg = format!("{} not found, no CAN output available", program);
            self.reporter.error(&msg);
            return;
        }

        debug!("found {}, starting...", program);
        self.reporter.status("Starting");
        match factory.spawn_writer(&program, &device, self.events.clone()).await {
            Ok(writer) => {
                self.transport = Transport::ExternalWriter(Some(writer));
                self.reporter.status(&format!("Connected to {}", device));
                self.schedule_device();
            }
            Err(e) => self.reporter.error(&e.to_string()),
        }
    }

    fn start_raw_channel(&mut self, factory: &dyn TransportFactory) {
        let device = self.options.device.clone();
        info!("Creating raw channel on {}", device);
        match factory.open_raw_channel(&device, self.events.clone()) {
            Ok(channel) => {
                self.transport = Transport::RawChannel(channel);
                self.start_device();
                self.reporter.status("Connected");
            }
            Err(e) => self.reporter.error(&e.to_string()),
        }
    }

    /// Starts the local device once the writer has had time to initialize.
    fn schedule_device(&self) {
        if self.pending_device.is_none() {
            return;
        }
        let events = self.events.clone();
        let settle = self.options.writer_settle;
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let _ = events.send(BridgeEvent::DeviceSettled);
        });
    }

    /// The writer may have died while the device was waiting to start.
    fn device_settled(&mut self) {
        if matches!(self.transport, Transport::ExternalWriter(Some(_))) {
            self.start_device();
        } else {
            debug!("no writer running, local device not started");
            self.pending_device = None;
        }
    }

    fn start_device(&mut self) {
        let Some(mut device) = self.pending_device.take() else {
            return;
        };
        let claims = device.start();
        self.device = Some(device);
        for claim in claims {
            self.send(Outbound::Structured(claim));
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// Address currently claimed by the local device.
    #[cfg(test)]
    pub fn local_address(&self) -> Option<u8> {
        self.device.as_ref().and_then(|device| device.address())
    }

    pub fn metrics_mut(&mut self) -> &mut AppMetrics {
        &mut self.metrics
    }

    /// Handles one queued event. Breaks on shutdown.
    pub fn handle_event(&mut self, event: BridgeEvent) -> ControlFlow<()> {
        if self.ended {
            trace!("ignoring {:?} after end", event);
            return ControlFlow::Break(());
        }
        match event {
            BridgeEvent::Frame(frame) => self.handle_frame(frame),
            BridgeEvent::Line(line) => self.handle_line(&line),
            BridgeEvent::Outbound(message) => self.send(message),
            BridgeEvent::WriterExited { code } => self.writer_exited(code),
            BridgeEvent::DeviceSettled => self.device_settled(),
            BridgeEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Filters, timestamps and emits one inbound frame.
    pub fn handle_frame(&mut self, frame: RawFrame) {
        if self.ended {
            return;
        }
        self.metrics.frames_received += 1;

        let id = frame.can_id();
        if is_self_originated(id, self.device.as_deref()) {
            trace!("got a message from me: PGN {}", id.pgn());
            self.metrics.self_filtered += 1;
            return;
        }

        let timestamp = now_timestamp();
        let data = match self.assembler.as_mut() {
            Some(assembler) => match assembler.process(id, frame.data()) {
                Some(data) => data,
                None => return,
            },
            None => frame.data().to_vec(),
        };

        let envelope = PgnEnvelope::from_parts(id, data, timestamp);
        let item = if self.options.plain_text {
            Upward::Text(frame_to_text(&envelope))
        } else {
            Upward::Envelope(envelope)
        };
        if self.upward.send(item).is_err() {
            debug!("upward consumer is gone, dropping frame");
            return;
        }
        self.metrics.envelopes_emitted += 1;
    }

    /// Parses one line of candump text and handles the resulting frame.
    pub fn handle_line(&mut self, line: &str) {
        match self.parser.parse_line(line) {
            Some(frame) => self.handle_frame(frame),
            None => {
                if !line.trim().is_empty() {
                    self.metrics.lines_dropped += 1;
                }
            }
        }
    }

    /// Sends one outbound message. Failures go to the error hook.
    pub fn send(&mut self, message: Outbound) {
        match self.dispatcher.dispatch(message, &mut self.transport) {
            Ok(count) => {
                trace!("sent {} frame(s)", count);
                self.metrics.messages_sent += 1;
            }
            Err(e) => {
                self.metrics.send_errors += 1;
                self.reporter.error(&e.to_string());
            }
        }
    }

    fn writer_exited(&mut self, code: Option<i32>) {
        if let Transport::ExternalWriter(writer) = &mut self.transport {
            *writer = None;
        }
        let msg = match code {
            Some(code) => format!("{} process exited with code {}", self.options.writer_command, code),
            None => format!("{} process was terminated by a signal", self.options.writer_command),
        };
        if code == Some(0) {
            self.reporter.status(&msg);
        } else {
            self.reporter.error(&msg);
        }
    }

    /// Tears the bridge down: kills the writer, stops the channel.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        self.pending_device = None;
        self.transport.shutdown();
        info!("bridge stopped");
    }
}

/// Drives the bridge until a shutdown event or until every sender is gone.
pub async fn run(mut bridge: Bridge, mut events: mpsc::UnboundedReceiver<BridgeEvent>) {
    let mut metrics_logger = MetricsLogger::new(Duration::from_secs(60));
    let mut tick = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if bridge.handle_event(event).is_break() {
                    break;
                }
            }
            _ = tick.tick() => {}
        }
        metrics_logger.check_and_log(bridge.metrics_mut());
    }

    bridge.end();
}
