//! Configuration structures for the multisim stack
//!
//! The stack configuration is read once at startup and treated as immutable
//! for the process lifetime: it fixes the number of subscriptions, the
//! default active-data-subscription and the per-subscription card identity
//! and APN provisioning.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{ApnType, AppFamily, AppIndex, SlotId, SubId};

/// Maximum number of subscriptions one device can carry.
pub const MAX_SUBSCRIPTIONS: usize = 4;

/// Default actor mailbox capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default fallback timeout for safe radio power-off, in milliseconds.
pub const DEFAULT_POWER_OFF_TIMEOUT_MS: u64 = 30_000;

/// One provisioned APN context for a GSM-family subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnConfig {
    /// Access point name
    pub name: String,
    /// Context kind
    #[serde(rename = "type")]
    pub apn_type: ApnType,
}

/// Per-subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Physical slot the subscription boots on
    pub slot: SlotId,
    /// Application record index on that card
    #[serde(default)]
    pub app_index: AppIndex,
    /// Card application family at boot
    pub app_family: AppFamily,
    /// Operator numeric (MCC+MNC) the simulated card reports
    #[serde(default = "default_operator_numeric")]
    pub operator_numeric: String,
    /// APN contexts (GSM family; ignored by the CDMA family)
    #[serde(default = "default_apns")]
    pub apns: Vec<ApnConfig>,
}

fn default_operator_numeric() -> String {
    "00101".to_string()
}

fn default_apns() -> Vec<ApnConfig> {
    vec![ApnConfig {
        name: "internet".to_string(),
        apn_type: ApnType::Default,
    }]
}

/// Top-level stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Per-subscription provisioning; the vector length fixes the
    /// subscription count for the process lifetime
    pub subscriptions: Vec<SubscriptionConfig>,
    /// Active-data-subscription at boot
    #[serde(default)]
    pub default_data_subscription: SubId,
    /// Actor mailbox capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Fallback timeout for safe radio power-off, in milliseconds
    #[serde(default = "default_power_off_timeout_ms")]
    pub power_off_timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_power_off_timeout_ms() -> u64 {
    DEFAULT_POWER_OFF_TIMEOUT_MS
}

impl Default for StackConfig {
    /// Dual-SIM GSM configuration with subscription 0 as the data
    /// subscription.
    fn default() -> Self {
        Self {
            subscriptions: (0..2)
                .map(|slot| SubscriptionConfig {
                    slot,
                    app_index: 0,
                    app_family: AppFamily::ThreeGpp,
                    operator_numeric: default_operator_numeric(),
                    apns: default_apns(),
                })
                .collect(),
            default_data_subscription: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            power_off_timeout_ms: DEFAULT_POWER_OFF_TIMEOUT_MS,
        }
    }
}

impl StackConfig {
    /// Loads and validates a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: StackConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of configured subscriptions.
    pub fn num_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.subscriptions.is_empty() {
            return Err(Error::Config("at least one subscription is required".into()));
        }
        if self.subscriptions.len() > MAX_SUBSCRIPTIONS {
            return Err(Error::Config(format!(
                "at most {} subscriptions are supported, got {}",
                MAX_SUBSCRIPTIONS,
                self.subscriptions.len()
            )));
        }
        if self.default_data_subscription >= self.subscriptions.len() {
            return Err(Error::Config(format!(
                "default data subscription {} out of range (0..{})",
                self.default_data_subscription,
                self.subscriptions.len()
            )));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be non-zero".into()));
        }
        for (i, sub) in self.subscriptions.iter().enumerate() {
            if sub.app_family == AppFamily::ThreeGpp && sub.apns.is_empty() {
                return Err(Error::Config(format!(
                    "subscription {i} is GSM-family but has no APN contexts"
                )));
            }
        }
        Ok(())
    }
}
