use anyhow::Result;
use serde_derive::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// What happens to the channel when the broker refuses a single operation.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The failing operation and everything queued after it fails, the channel is closed. This
    /// is what AMQP does, method failures are channel exceptions.
    #[default]
    CloseChannel,
    /// Only the operation at the head of the queue fails, the channel remains open.
    FailOperation,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub failure_policy: FailurePolicy,
    /// Refuse acks and rejects of delivery tags which were never delivered or already settled.
    pub validate_delivery_tags: bool,
    /// The highest channel number the connection may allocate.
    pub channel_max: u16,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            failure_policy: FailurePolicy::CloseChannel,
            validate_delivery_tags: false,
            channel_max: 2047,
        }
    }
}

impl FromStr for ChannelConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

pub fn parse_config(path: impl AsRef<Path>) -> Result<ChannelConfig> {
    let cfg = std::fs::read_to_string(path)?;

    cfg.parse()
}
