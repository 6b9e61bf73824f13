//! Phase Accumulator Engine
//!
//! Owns the phase registers and channel list built from a [`SimConfig`].
//! Channels with the same tuning word share one register, so a measurement
//! channel offset from its reference by a phase delta has no accumulator of
//! its own.

pub mod layout;

pub use layout::PackingLayout;

use std::fmt;

use crate::config::SimConfig;
use crate::phase::{frequency_to_ftw, is_high, PhaseAccumulator, TickCounter};
use crate::Result;

/// One packed output byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sample(pub u8);

impl Sample {
    /// Raw byte value
    pub fn value(self) -> u8 {
        self.0
    }
}

impl From<Sample> for u8 {
    fn from(sample: Sample) -> u8 {
        sample.0
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// A channel bound to a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Channel {
    register: usize,
    phase_delta: u32,
    mask: u8,
}

/// Phase accumulator engine
#[derive(Debug, Clone)]
pub struct Engine {
    registers: Vec<PhaseAccumulator>,
    channels: Vec<Channel>,
    layout: PackingLayout,
    counter: TickCounter,
    sample_rate: f64,
}

impl Engine {
    /// Build an engine from a configuration.
    ///
    /// Tuning words are computed here, once. Any invalid value is rejected
    /// before a single tick runs.
    pub fn new(config: &SimConfig) -> Result<Self> {
        config.validate()?;

        let mut registers: Vec<PhaseAccumulator> = Vec::new();
        let mut channels = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let ftw = frequency_to_ftw(channel.frequency, config.sample_rate)?;
            let register = match registers.iter().position(|r| r.ftw() == ftw) {
                Some(index) => index,
                None => {
                    registers.push(PhaseAccumulator::new(ftw));
                    registers.len() - 1
                }
            };
            if channel.frequency > config.sample_rate / 2.0 {
                tracing::warn!(
                    frequency = channel.frequency,
                    sample_rate = config.sample_rate,
                    "channel frequency is above Nyquist and will alias"
                );
            }
            tracing::debug!(
                frequency = channel.frequency,
                ftw,
                register,
                bit = channel.bit,
                phase_delta = channel.phase_delta,
                "channel configured"
            );
            channels.push(Channel {
                register,
                phase_delta: channel.phase_delta,
                mask: 1 << channel.bit,
            });
        }

        tracing::info!(
            sample_rate = config.sample_rate,
            registers = registers.len(),
            channels = channels.len(),
            ticks_per_sample = config.ticks_per_sample,
            "engine ready"
        );

        Ok(Engine {
            registers,
            channels,
            layout: config.layout(),
            counter: TickCounter::new(),
            sample_rate: config.sample_rate,
        })
    }

    /// Run one output sample's worth of internal ticks and pack the result.
    pub fn tick(&mut self) -> Sample {
        let mut sample = 0u8;
        for _ in 0..self.layout.ticks_per_sample {
            let group = self.step();
            sample = self.layout.push(sample, group);
        }
        self.counter.sample();
        Sample(sample)
    }

    /// Advance every register once and return this tick's channel group.
    fn step(&mut self) -> u8 {
        for register in &mut self.registers {
            register.tick();
        }
        self.counter.tick();

        self.channels.iter().fold(0u8, |group, channel| {
            let phase = self.registers[channel.register].offset_phase(channel.phase_delta);
            if is_high(phase) {
                group | channel.mask
            } else {
                group
            }
        })
    }

    /// Current register phases, in configuration order of first use
    pub fn phases(&self) -> impl Iterator<Item = u32> + '_ {
        self.registers.iter().map(PhaseAccumulator::phase)
    }

    /// Tuning words of the registers
    pub fn ftws(&self) -> impl Iterator<Item = u32> + '_ {
        self.registers.iter().map(PhaseAccumulator::ftw)
    }

    /// Number of distinct phase registers
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Packing layout in use
    pub fn layout(&self) -> PackingLayout {
        self.layout
    }

    /// Internal ticks run so far
    pub fn ticks(&self) -> u64 {
        self.counter.ticks()
    }

    /// Output samples produced so far
    pub fn samples(&self) -> u64 {
        self.counter.samples()
    }

    /// Simulated time elapsed in seconds
    pub fn elapsed_seconds(&self) -> f64 {
        self.counter.elapsed_seconds(self.sample_rate)
    }
}

impl Iterator for Engine {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        Some(self.tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::phase::HALF_TURN;

    #[test]
    fn test_single_channel_bits() {
        let mut engine = Engine::new(&SimConfig::default()).unwrap();
        let bytes: Vec<u8> = engine.by_ref().take(24).map(u8::from).collect();
        let expected: Vec<u8> = [0u8, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]
            .iter()
            .cycle()
            .take(24)
            .copied()
            .collect();
        assert_eq!(bytes, expected);
        assert_eq!(engine.ticks(), 24);
        // 24 * 357913941 mod 2^32
        assert_eq!(engine.phases().next(), Some(4_294_967_288));
    }

    #[test]
    fn test_shared_register_for_equal_frequency() {
        let config = SimConfig::reference_and_measurement(48e6, 1.97e6, 0x1234);
        let engine = Engine::new(&config).unwrap();
        assert_eq!(engine.register_count(), 1);
        assert_eq!(engine.ftws().collect::<Vec<_>>(), vec![176_272_616]);
    }

    #[test]
    fn test_distinct_frequencies_get_own_registers() {
        let config = SimConfig {
            sample_rate: 48e6,
            ticks_per_sample: 2,
            group_width: 4,
            channels: vec![ChannelConfig::new(1.0e6, 0), ChannelConfig::new(3.0e6, 1)],
        };
        let engine = Engine::new(&config).unwrap();
        assert_eq!(engine.register_count(), 2);
    }

    #[test]
    fn test_half_turn_delta_inverts_measurement() {
        let config = SimConfig::reference_and_measurement(48e6, 1.97e6, HALF_TURN);
        let engine = Engine::new(&config).unwrap();
        for sample in engine.take(200) {
            for group in PackingLayout::NIBBLES.unpack(sample.value()) {
                let reference = group & 0x1 != 0;
                let measurement = group & 0x2 != 0;
                assert_ne!(reference, measurement);
            }
        }
    }

    #[test]
    fn test_measurement_follows_offset_phase() {
        let delta = 0x4000_0000;
        let ftw = frequency_to_ftw(1.97e6, 48e6).unwrap();
        let config = SimConfig::reference_and_measurement(48e6, 1.97e6, delta);
        let mut engine = Engine::new(&config).unwrap();
        let mut shadow = PhaseAccumulator::new(ftw);

        for _ in 0..500 {
            let sample = engine.tick();
            for group in PackingLayout::NIBBLES.unpack(sample.value()) {
                shadow.tick();
                assert_eq!(group & 0x1 != 0, is_high(shadow.phase()));
                assert_eq!(group & 0x2 != 0, is_high(shadow.offset_phase(delta)));
                assert_eq!(group & 0xC, 0);
            }
        }
        assert_eq!(engine.phases().next(), Some(shadow.phase()));
        assert_eq!(engine.ticks(), 1000);
        assert_eq!(engine.samples(), 500);
    }

    #[test]
    fn test_fresh_engines_are_deterministic() {
        let config = SimConfig::reference_and_measurement(48e6, 1.97e6, 0x2000_0000);
        let first: Vec<Sample> = Engine::new(&config).unwrap().take(4096).collect();
        let second: Vec<Sample> = Engine::new(&config).unwrap().take(4096).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_independent_engines_coexist() {
        let mut single = Engine::new(&SimConfig::default()).unwrap();
        let mut dual =
            Engine::new(&SimConfig::reference_and_measurement(48e6, 1.97e6, 0)).unwrap();
        for _ in 0..10 {
            single.tick();
        }
        dual.tick();
        assert_eq!(single.ticks(), 10);
        assert_eq!(dual.ticks(), 2);
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = SimConfig::single_channel(0.0, 2.0e6);
        assert!(Engine::new(&config).is_err());
    }

    #[test]
    fn test_sample_display() {
        assert_eq!(Sample(0x3).to_string(), "0x03");
    }
}
