//! Fixed-Point Phase Arithmetic
//!
//! 32-bit phase registers where one full turn is 2^32. Addition wraps
//! natively, so no masking or saturation is ever needed.

pub mod tick_counter;

pub use tick_counter::TickCounter;

use crate::{Result, SimError};

/// One full turn in phase units (2^32)
pub const TURN: u64 = 1 << 32;

/// Half a turn; phases at or above this are the "high" half of the square wave
pub const HALF_TURN: u32 = 0x8000_0000;

/// Compute a frequency tuning word: `round(frequency * 2^32 / sample_rate)`.
///
/// Rejects a sample rate that is zero, negative or not finite, and any
/// frequency whose tuning word falls outside `[0, 2^32)`.
pub fn frequency_to_ftw(frequency: f64, sample_rate: f64) -> Result<u32> {
    validate_sample_rate(sample_rate)?;
    if !frequency.is_finite() || frequency < 0.0 {
        return Err(SimError::ConfigError(format!(
            "reference frequency {} Hz is not a non-negative finite number",
            frequency
        )));
    }

    let ftw = (frequency * TURN as f64 / sample_rate).round();
    if ftw >= TURN as f64 {
        return Err(SimError::ConfigError(format!(
            "reference frequency {} Hz does not fit a 32-bit tuning word at sample rate {} Hz",
            frequency, sample_rate
        )));
    }
    Ok(ftw as u32)
}

/// Reject sample rates that would divide by zero or produce nonsense.
pub fn validate_sample_rate(sample_rate: f64) -> Result<()> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(SimError::ConfigError(format!(
            "sample rate {} Hz must be a positive finite number",
            sample_rate
        )));
    }
    Ok(())
}

/// Square-wave decision for a phase: bit 31 of the register.
#[inline]
pub fn is_high(phase: u32) -> bool {
    phase >= HALF_TURN
}

/// Phase accumulator register with its tuning word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseAccumulator {
    phase: u32,
    ftw: u32,
}

impl PhaseAccumulator {
    /// Create an accumulator at phase zero
    pub fn new(ftw: u32) -> Self {
        Self::with_phase(0, ftw)
    }

    /// Create an accumulator starting from an arbitrary phase
    pub fn with_phase(phase: u32, ftw: u32) -> Self {
        PhaseAccumulator { phase, ftw }
    }

    /// Advance by one tick and return the new phase
    #[inline]
    pub fn tick(&mut self) -> u32 {
        self.phase = self.phase.wrapping_add(self.ftw);
        self.phase
    }

    /// Current phase
    pub fn phase(&self) -> u32 {
        self.phase
    }

    /// Frequency tuning word
    pub fn ftw(&self) -> u32 {
        self.ftw
    }

    /// Phase shifted by a constant offset, modulo 2^32
    #[inline]
    pub fn offset_phase(&self, delta: u32) -> u32 {
        self.phase.wrapping_add(delta)
    }
}
