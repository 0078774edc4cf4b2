use serde::{Deserialize, Serialize};

use crate::vocabulary::CommandVocabulary;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid runtime config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid runtime config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub hostname: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            hostname: "ac-remote".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
            port: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 4,
            rmt_channel: 0,
            carrier_khz: 38,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub reconnect_poll_ms: u64,
    /// Zero waits forever.
    pub reconnect_timeout_ms: u64,
    /// Consecutive reconnect timeouts tolerated before the firmware restarts.
    pub max_reconnect_failures: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            reconnect_poll_ms: 500,
            reconnect_timeout_ms: 30_000,
            max_reconnect_failures: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Added to the requested temperature; the unit's lowest setpoint sits
    /// above the lowest one the client offers.
    pub temperature_offset: i32,
    pub reject_unknown_names: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            temperature_offset: 2,
            reject_unknown_names: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub network: NetworkConfig,
    pub http: HttpConfig,
    pub ir: IrHardwareConfig,
    pub sequencer: SequencerConfig,
    pub translator: TranslatorConfig,
    pub vocabulary: CommandVocabulary,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config = serde_json::from_slice::<Self>(raw)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.ir.sanitize();
        self.sequencer.sanitize();
        self.translator.sanitize();

        if self.network.hostname.trim().is_empty() {
            self.network.hostname = NetworkConfig::default().hostname;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.username.is_empty() {
            return Err(ConfigError::Invalid("http username cannot be empty"));
        }
        if self.http.username.contains(':') {
            return Err(ConfigError::Invalid("http username cannot contain ':'"));
        }
        if self.network.wifi_ssid.len() > 32 {
            return Err(ConfigError::Invalid("wifi ssid is longer than 32 bytes"));
        }
        if self.network.wifi_pass.len() > 64 {
            return Err(ConfigError::Invalid("wifi password is longer than 64 bytes"));
        }
        Ok(())
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 4;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

impl SequencerConfig {
    pub fn sanitize(&mut self) {
        self.reconnect_poll_ms = self.reconnect_poll_ms.clamp(50, 10_000);
        if self.reconnect_timeout_ms != 0 {
            self.reconnect_timeout_ms = self.reconnect_timeout_ms.max(self.reconnect_poll_ms);
        }
        self.max_reconnect_failures = self.max_reconnect_failures.max(1);
    }
}

impl TranslatorConfig {
    pub fn sanitize(&mut self) {
        self.temperature_offset = self.temperature_offset.clamp(-10, 10);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RuntimeConfig::from_json(b"{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.translator.temperature_offset, 2);
        assert_eq!(config.ir.carrier_khz, 38);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = RuntimeConfig::from_json(
            br#"{"http":{"password":"hunter2"},"sequencer":{"reconnect_timeout_ms":0}}"#,
        )
        .unwrap();

        assert_eq!(config.http.username, "admin");
        assert_eq!(config.http.password, "hunter2");
        assert_eq!(config.http.port, 80);
        assert_eq!(config.sequencer.reconnect_timeout_ms, 0);
        assert_eq!(config.sequencer.reconnect_poll_ms, 500);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut config = RuntimeConfig::default();
        config.ir.tx_pin = -1;
        config.ir.rmt_channel = 12;
        config.ir.carrier_khz = 500;
        config.sequencer.reconnect_poll_ms = 1;
        config.sequencer.reconnect_timeout_ms = 10;
        config.sequencer.max_reconnect_failures = 0;
        config.translator.temperature_offset = 40;
        config.network.hostname = "  ".to_string();

        config.sanitize();

        assert_eq!(config.ir, IrHardwareConfig::default().with_carrier(100));
        assert_eq!(config.sequencer.reconnect_poll_ms, 50);
        assert_eq!(config.sequencer.reconnect_timeout_ms, 50);
        assert_eq!(config.sequencer.max_reconnect_failures, 1);
        assert_eq!(config.translator.temperature_offset, 10);
        assert_eq!(config.network.hostname, "ac-remote");
    }

    #[test]
    fn rejects_unusable_credentials() {
        let err = RuntimeConfig::from_json(br#"{"http":{"username":"a:b"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RuntimeConfig::from_json(br#"{"http":{"username":""}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = RuntimeConfig::from_json(b"not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    impl IrHardwareConfig {
        fn with_carrier(mut self, carrier_khz: u32) -> Self {
            self.carrier_khz = carrier_khz;
            self
        }
    }
}
