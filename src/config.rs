use nmea2k::IsoName;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// CAN interface the bridge binds to (e.g. "can0", "vcan0")
    pub can_interface: String,
    #[serde(default)]
    pub transport: TransportConfig,
    /// PGNs always sent as multi-frame sequences, whatever their size
    #[serde(default = "default_multi_frame_pgns")]
    pub multi_frame_pgns: Vec<u32>,
    /// Emit Actisense text lines upward instead of JSON envelopes
    #[serde(default)]
    pub plain_text: bool,
    /// Reassemble inbound fast packets before emitting them
    #[serde(default)]
    pub reassemble_fast_packets: bool,
    #[serde(default = "default_fast_packet_pgns")]
    pub fast_packet_pgns: Vec<u32>,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub outbound: OutboundConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_multi_frame_pgns() -> Vec<u32> {
    vec![126720]
}

fn default_fast_packet_pgns() -> Vec<u32> {
    nmea2k::fast_packet::DEFAULT_FAST_PACKET_PGNS.to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Prefer the external writer subprocess over a raw channel
    pub use_external_writer: bool,
    /// Exchange JSON lines over stdin/stdout, no CAN access at all
    pub from_stdin: bool,
    /// Helper binary that writes Actisense lines to the bus
    pub writer_command: String,
    /// Delay before the local device starts after the writer is spawned
    pub writer_settle_ms: u64,
    /// The address-claim device is run by someone else
    pub external_device: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            use_external_writer: false,
            from_stdin: false,
            writer_command: "socketcan-writer".to_string(),
            writer_settle_ms: 5000,
            external_device: false,
        }
    }
}

impl TransportConfig {
    pub fn writer_settle(&self) -> Duration {
        Duration::from_millis(self.writer_settle_ms)
    }
}

/// Identity of the local node on the NMEA2000 network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub preferred_address: u8,
    pub unique_number: u32,
    pub manufacturer_code: u16,
    pub device_function: u8,
    pub device_class: u8,
    pub industry_group: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // Simrad AC12 autopilot
            preferred_address: 3,
            unique_number: 1751521,
            manufacturer_code: 1857,
            device_function: 150,
            device_class: 40,
            industry_group: 4, // Marine
        }
    }
}

impl DeviceConfig {
    pub fn iso_name(&self) -> IsoName {
        IsoName::default()
            .with_unique_number(self.unique_number)
            .with_manufacturer_code(self.manufacturer_code)
            .with_device_function(self.device_function)
            .with_device_class(self.device_class)
            .with_industry_group(self.industry_group)
            .with_arbitrary_address_capable(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutboundConfig {
    /// UDP address accepting outbound messages, one per line (e.g. "127.0.0.1:10111")
    #[serde(default)]
    pub udp_listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory where log files will be stored
    pub directory: String,
    /// Log file name prefix (date will be appended)
    pub file_prefix: String,
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: "./logs".to_string(),
            file_prefix: "nmea_canbridge".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if !self.transport.from_stdin && self.can_interface.trim().is_empty() {
            return Err("CAN interface must not be empty".to_string());
        }
        if self.transport.writer_command.trim().is_empty() {
            return Err("transport.writer_command must not be empty".to_string());
        }
        if self.device.preferred_address > nmea2k::device::MAX_CLAIMABLE_ADDRESS {
            return Err(format!(
                "device.preferred_address {} is above {}",
                self.device.preferred_address,
                nmea2k::device::MAX_CLAIMABLE_ADDRESS
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            can_interface: "can0".to_string(),
            transport: TransportConfig::default(),
            multi_frame_pgns: default_multi_frame_pgns(),
            plain_text: false,
            reassemble_fast_packets: false,
            fast_packet_pgns: default_fast_packet_pgns(),
            device: DeviceConfig::default(),
            outbound: OutboundConfig::default(),
            logging: LogConfig::default(),
        }
    }
}
