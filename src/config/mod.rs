//! Startup Configuration
//!
//! Everything the engine needs is fixed here before the first tick:
//! the sample rate, the packing layout, and the channel list. Configurations
//! come from the built-in presets or from a JSON file.

pub mod loader;

pub use loader::read_config_from_file;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::engine::PackingLayout;
use crate::phase::{frequency_to_ftw, validate_sample_rate};
use crate::{Result, SimError};

/// Default sample rate of the single-channel preset (Hz)
pub const SINGLE_SAMPLE_RATE: f64 = 24e6;
/// Default reference frequency of the single-channel preset (Hz)
pub const SINGLE_REF_FREQUENCY: f64 = 2.0e6;
/// Default sample rate of the reference/measurement preset (Hz)
pub const DUAL_SAMPLE_RATE: f64 = 48e6;
/// Default reference frequency of the reference/measurement preset (Hz)
pub const DUAL_REF_FREQUENCY: f64 = 1.97e6;

/// One square-wave output channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel frequency in Hz
    pub frequency: f64,
    /// Bit position within each tick's group
    pub bit: u8,
    /// Constant phase offset added to the register phase
    #[serde(default)]
    pub phase_delta: u32,
}

impl ChannelConfig {
    /// Channel read straight from its phase register
    pub fn new(frequency: f64, bit: u8) -> Self {
        ChannelConfig {
            frequency,
            bit,
            phase_delta: 0,
        }
    }

    /// Channel offset from its register by `phase_delta`
    pub fn with_delta(frequency: f64, bit: u8, phase_delta: u32) -> Self {
        ChannelConfig {
            frequency,
            bit,
            phase_delta,
        }
    }
}

fn default_ticks_per_sample() -> u8 {
    1
}

fn default_group_width() -> u8 {
    1
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Tick rate in Hz. Only used to derive tuning words; ticks run as fast
    /// as the sink drains them.
    pub sample_rate: f64,
    /// Internal ticks folded into each output byte
    #[serde(default = "default_ticks_per_sample")]
    pub ticks_per_sample: u8,
    /// Bits each tick occupies in the output byte
    #[serde(default = "default_group_width")]
    pub group_width: u8,
    /// Output channels
    pub channels: Vec<ChannelConfig>,
}

impl SimConfig {
    /// One channel on bit 0, one tick per byte.
    pub fn single_channel(sample_rate: f64, frequency: f64) -> Self {
        SimConfig {
            sample_rate,
            ticks_per_sample: 1,
            group_width: 1,
            channels: vec![ChannelConfig::new(frequency, 0)],
        }
    }

    /// Reference on bit 0 and measurement on bit 1 sharing one register,
    /// two ticks per byte in nibbles (first tick in the high nibble).
    pub fn reference_and_measurement(sample_rate: f64, frequency: f64, phase_delta: u32) -> Self {
        SimConfig {
            sample_rate,
            ticks_per_sample: 2,
            group_width: 4,
            channels: vec![
                ChannelConfig::new(frequency, 0),
                ChannelConfig::with_delta(frequency, 1, phase_delta),
            ],
        }
    }

    /// Load and validate a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: SimConfig = read_config_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Packing layout described by this configuration
    pub fn layout(&self) -> PackingLayout {
        PackingLayout {
            ticks_per_sample: self.ticks_per_sample,
            group_width: self.group_width,
        }
    }

    /// Check every value that could make the engine misbehave.
    ///
    /// Runs once at startup; the tick loop assumes a valid configuration.
    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;
        self.layout().validate()?;

        if self.channels.is_empty() {
            return Err(SimError::ConfigError(
                "at least one channel is required".to_string(),
            ));
        }

        let mut used_bits = 0u8;
        for (index, channel) in self.channels.iter().enumerate() {
            if channel.bit >= self.group_width {
                return Err(SimError::ConfigError(format!(
                    "channel {} bit {} does not fit a {}-bit group",
                    index, channel.bit, self.group_width
                )));
            }
            let mask = 1u8 << channel.bit;
            if used_bits & mask != 0 {
                return Err(SimError::ConfigError(format!(
                    "channel {} reuses bit {}",
                    index, channel.bit
                )));
            }
            used_bits |= mask;
            frequency_to_ftw(channel.frequency, self.sample_rate)?;
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::single_channel(SINGLE_SAMPLE_RATE, SINGLE_REF_FREQUENCY)
    }
}
