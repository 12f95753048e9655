use std::time::Duration;
use serde::{Deserialize, Serialize};

use super::{Result, SerialError};

/// A zero timeout never expires
pub const INFINITE_TIMEOUT: Duration = Duration::ZERO;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_DATA_BITS: u8 = 8;
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;

pub const MIN_DATA_BITS: u8 = 5;
pub const MAX_DATA_BITS: u8 = 9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Line settings for a serial channel.
///
/// The channel copies this at `open()`. Changing it afterwards only affects the
/// next open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,
    pub receive_buffer_size: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout: INFINITE_TIMEOUT,
            write_timeout: INFINITE_TIMEOUT,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
        }
    }
}

impl SerialConfig {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate, ..Self::default() }
    }

    pub fn data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Check the settings every transport has to honour. Transports may reject
    /// further combinations their hardware cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(SerialError::Configuration("baud rate must be positive".to_string()));
        }
        if !(MIN_DATA_BITS..=MAX_DATA_BITS).contains(&self.data_bits) {
            return Err(SerialError::Configuration(format!(
                "data bits {} outside {}..={}",
                self.data_bits, MIN_DATA_BITS, MAX_DATA_BITS
            )));
        }
        if self.receive_buffer_size == 0 {
            return Err(SerialError::Configuration("receive buffer size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SerialError::Configuration(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SerialError::Configuration(format!("unserializable config: {}", e)))
    }
}

mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    // Negative values mean "no timeout", same as zero.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms.max(0) as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_9600_8n1_infinite() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.read_timeout, INFINITE_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_data_bits_range() {
        assert!(SerialConfig::default().data_bits(5).validate().is_ok());
        assert!(SerialConfig::default().data_bits(9).validate().is_ok());
        assert!(matches!(
            SerialConfig::default().data_bits(4).validate(),
            Err(SerialError::Configuration(_))
        ));
        assert!(SerialConfig::default().data_bits(10).validate().is_err());
    }

    #[test]
    fn test_zero_baud_and_buffer_rejected() {
        assert!(SerialConfig::new(0).validate().is_err());
        assert!(SerialConfig::default().receive_buffer_size(0).validate().is_err());
    }

    #[test]
    fn test_json_timeouts_in_millis() {
        let json = r#"{ "baud_rate": 115200, "parity": "Even", "read_timeout_ms": 250, "write_timeout_ms": -1 }"#;
        let config = SerialConfig::from_json(json).expect("valid json config");
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert_eq!(config.write_timeout, INFINITE_TIMEOUT);
        assert_eq!(config.data_bits, DEFAULT_DATA_BITS);

        let rendered = config.to_json().expect("serializable");
        assert!(rendered.contains("\"read_timeout_ms\": 250"));
    }

    #[test]
    fn test_json_invalid_values_rejected() {
        assert!(SerialConfig::from_json(r#"{ "data_bits": 12 }"#).is_err());
        assert!(SerialConfig::from_json("not json").is_err());
    }
}
