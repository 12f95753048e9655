pub mod buffer;
pub mod channel;
pub mod config;
pub mod scanner;
pub mod timeout;
pub mod types;

pub use buffer::{PushOutcome, ReceiveBuffer};
pub use channel::SerialChannel;
pub use config::{Parity, SerialConfig, StopBits, INFINITE_TIMEOUT};
pub use scanner::{TokenMatch, TokenScanner};
pub use timeout::{Deadline, TimeoutPolicy};
pub use types::{ChannelMetrics, PortState, SerialEvent};

use serde::{Deserialize, Serialize};
use serialport::SerialPortType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Port {port} unavailable: {reason}")]
    ResourceUnavailable { port: String, reason: String },

    #[error("Port already open")]
    AlreadyOpen,

    #[error("Port not open")]
    NotOpen,

    #[error("Transport error after {transferred} bytes: {source}")]
    Transport {
        transferred: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

impl SerialError {
    /// Only `ResourceUnavailable` is worth retrying; every other failure is either a
    /// caller bug or a broken link.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SerialError::ResourceUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// List the serial ports the OS currently exposes
pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
    let ports = serialport::available_ports()?;
    let mut devices = Vec::with_capacity(ports.len());

    for port in ports {
        let device = match port.port_type {
            SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                port_name: port.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                serial_number: usb_info.serial_number,
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => SerialDeviceInfo {
                port_name: port.port_name,
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        };
        devices.push(device);
    }

    log::debug!("Discovered {} serial ports", devices.len());
    Ok(devices)
}
