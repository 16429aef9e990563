use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::DEFAULT_BAUD_RATE;

const DEFAULT_PORT: &str = "/dev/rfcomm0";
const DEFAULT_SAMPLING_RATE: u16 = 1000;
const DEFAULT_HORIZONTAL_CHANNEL: u8 = 1;
const DEFAULT_VERTICAL_CHANNEL: u8 = 2;
/// Settle time after every command byte, shared with `Bitalino::new`.
pub(crate) const DEFAULT_COMMAND_DELAY_MS: u64 = 50;

/// Connection and acquisition settings for one BITalino session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port path (e.g. `/dev/rfcomm0`, `COM3`).
    pub port: String,
    pub baud_rate: u32,
    /// Sampling rate in Hz. Must be 1, 10, 100 or 1000.
    pub sampling_rate: u16,
    /// Analog channel (0-5) wired to the horizontal electrodes.
    pub horizontal_channel: u8,
    /// Analog channel (0-5) wired to the vertical electrodes.
    pub vertical_channel: u8,
    /// Settle time after every command byte, in milliseconds.
    pub command_delay_ms: u64,
}

impl DeviceConfig {
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            sampling_rate: DEFAULT_SAMPLING_RATE,
            horizontal_channel: DEFAULT_HORIZONTAL_CHANNEL,
            vertical_channel: DEFAULT_VERTICAL_CHANNEL,
            command_delay_ms: DEFAULT_COMMAND_DELAY_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.sampling_rate, 1000);
        assert_eq!((config.horizontal_channel, config.vertical_channel), (1, 2));
        assert_eq!(config.command_delay(), Duration::from_millis(50));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{ "port": "COM3", "sampling_rate": 100 }"#).unwrap();
        assert_eq!(
            config,
            DeviceConfig {
                port: "COM3".into(),
                sampling_rate: 100,
                ..DeviceConfig::default()
            }
        );
    }

    #[test]
    fn serialized_config_reads_back() {
        let config = DeviceConfig {
            horizontal_channel: 0,
            vertical_channel: 3,
            command_delay_ms: 0,
            ..DeviceConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<DeviceConfig>(&json).unwrap(), config);
    }
}
