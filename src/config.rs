use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::Profile;
use crate::demux::PartialFrameMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub profile: Profile,
    /// Slave address on serial profiles.
    pub unit_id: u8,
    pub coils: usize,
    pub discrete_inputs: usize,
    pub holding_registers: usize,
    pub input_registers: usize,
    pub partial_frames: PartialFrameMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Tcp,
            unit_id: 1,
            coils: 10000,
            discrete_inputs: 10000,
            holding_registers: 10000,
            input_registers: 10000,
            partial_frames: PartialFrameMode::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.profile.is_serial() && !(1..=247).contains(&self.unit_id) {
            return Err(ConfigError::Invalid(format!("serial unit_id {} outside 1..=247", self.unit_id)));
        }
        let max_points = u16::MAX as usize + 1;
        for (name, count) in [
            ("coils", self.coils),
            ("discrete_inputs", self.discrete_inputs),
            ("holding_registers", self.holding_registers),
            ("input_registers", self.input_registers),
        ] {
            if count > max_points {
                return Err(ConfigError::Invalid(format!("{} count {} exceeds {}", name, count, max_points)));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub profile: Profile,
    pub response_timeout_ms: u64,
    /// Outstanding transaction limit on a TCP channel.
    pub max_concurrent: usize,
    /// Re-sends after a serial response timeout.
    pub retries: u32,
    /// Bus quiet time after a serial broadcast.
    pub turnaround_delay_ms: u64,
    /// Delay before the single re-send that follows an ACKNOWLEDGE exception.
    pub ack_retry_delay_ms: u64,
    pub partial_frames: PartialFrameMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Tcp,
            response_timeout_ms: 1000,
            max_concurrent: 64,
            retries: 0,
            turnaround_delay_ms: 100,
            ack_retry_delay_ms: 500,
            partial_frames: PartialFrameMode::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid("response_timeout_ms must be positive".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be positive".to_string()));
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn turnaround_delay(&self) -> Duration {
        Duration::from_millis(self.turnaround_delay_ms)
    }

    pub fn ack_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ack_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_concurrent, 64);
        assert_eq!(config.response_timeout(), Duration::from_secs(1));
        assert_eq!(config.partial_frames, PartialFrameMode::Accumulate);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = ClientConfig::from_json(r#"{"profile":"rtu","retries":2}"#).unwrap();
        assert_eq!(config.profile, Profile::Rtu);
        assert_eq!(config.retries, 2);
        assert_eq!(config.turnaround_delay_ms, 100);

        let server = ServerConfig::from_json(r#"{"profile":"ascii","unit_id":17,"coils":16}"#).unwrap();
        assert_eq!(server.unit_id, 17);
        assert_eq!(server.coils, 16);
        assert_eq!(server.holding_registers, 10000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ServerConfig::from_json(r#"{"profile":"rtu","unit_id":0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ClientConfig::from_json(r#"{"response_timeout_ms":0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(ClientConfig::from_json("{"), Err(ConfigError::Json(_))));
    }
}
