//! Digital PLL
//!
//! Locks a 32-bit phase accumulator onto the rising edges of the reference
//! channel. A proportional-integral loop filter steers the tuning word,
//! clamped to `[ftw_min, ftw_max]`. The unwrapped phase is what position
//! tracking measures against.

use num_traits::clamp;

use crate::phase::validate_sample_rate;
use crate::{Result, SimError};

/// Consecutive in-window edges required before the loop counts as locked
pub const DEFAULT_LOCK_COUNT: u32 = 1_000_000;

/// Digital phase-locked loop
#[derive(Debug, Clone)]
pub struct Dpll {
    ftw_min: i64,
    ftw_max: i64,
    ki: i64,
    kp: i64,

    ftw: i64,
    integrator: i64,

    phase: i64,
    phase_unwrapped: i64,

    lock_count: u32,
    was_locked: bool,
    /// `None` once locked, otherwise in-window edges seen so far
    wait_lock: Option<u32>,
}

impl Dpll {
    /// One turn in DPLL phase units
    pub const TURN: i64 = 0x1_0000_0000;

    /// Create a loop with tuning word bounds and loop filter gains.
    ///
    /// Both bounds must be non-negative, ordered, and below half a turn.
    pub fn new(ftw_min: i64, ftw_max: i64, ki: i64, kp: i64) -> Result<Self> {
        if ftw_min < 0 || ftw_max >= Self::TURN / 2 || ftw_min > ftw_max {
            return Err(SimError::ConfigError(format!(
                "DPLL tuning word range [{}, {}] must lie within [0, {})",
                ftw_min,
                ftw_max,
                Self::TURN / 2
            )));
        }
        let init_ftw = (ftw_min + ftw_max) / 2;
        Ok(Dpll {
            ftw_min,
            ftw_max,
            ki,
            kp,
            ftw: init_ftw,
            integrator: init_ftw,
            phase: 0,
            phase_unwrapped: 0,
            lock_count: DEFAULT_LOCK_COUNT,
            was_locked: false,
            wait_lock: Some(0),
        })
    }

    /// Create a loop from a reference frequency range in Hz
    pub fn from_frequencies(
        ref_min: f64,
        ref_max: f64,
        sample_rate: f64,
        ki: i64,
        kp: i64,
    ) -> Result<Self> {
        Self::new(
            Self::frequency_to_ftw(ref_min, sample_rate)?,
            Self::frequency_to_ftw(ref_max, sample_rate)?,
            ki,
            kp,
        )
    }

    /// Tuning word for `frequency` in DPLL units, truncated
    pub fn frequency_to_ftw(frequency: f64, sample_rate: f64) -> Result<i64> {
        validate_sample_rate(sample_rate)?;
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(SimError::ConfigError(format!(
                "DPLL frequency {} Hz is not a non-negative finite number",
                frequency
            )));
        }
        Ok((frequency * (Self::TURN as f64) / sample_rate) as i64)
    }

    /// Override the number of in-window edges needed to declare lock
    pub fn with_lock_count(mut self, lock_count: u32) -> Self {
        self.lock_count = lock_count;
        self
    }

    /// Advance one tick; `edge` is a rising edge on the reference channel.
    pub fn tick(&mut self, edge: bool) {
        self.phase = (self.phase + self.ftw) & (Self::TURN - 1);
        self.phase_unwrapped = self.phase_unwrapped.wrapping_add(self.ftw);
        if !edge {
            return;
        }

        let pe = Self::TURN / 2 - self.phase;
        self.integrator = clamp(
            self.integrator + scale(pe, self.ki),
            self.ftw_min,
            self.ftw_max,
        );
        self.ftw = clamp(
            self.integrator + scale(pe, self.kp),
            self.ftw_min,
            self.ftw_max,
        );

        if pe.abs() <= self.ftw + self.ftw / 3 {
            if let Some(wait_lock) = self.wait_lock {
                self.wait_lock = if wait_lock < self.lock_count {
                    Some(wait_lock + 1)
                } else {
                    None
                };
            }
        } else {
            self.wait_lock = Some(0);
        }

        let locked = self.locked();
        if locked && !self.was_locked {
            tracing::info!(ftw = self.ftw, "DPLL locked");
        }
        if !locked && self.was_locked {
            tracing::warn!(phase_error = pe, "DPLL lost lock");
        }
        self.was_locked = locked;
    }

    /// Phase accumulated since start, without wrapping at one turn
    pub fn phase_unwrapped(&self) -> i64 {
        self.phase_unwrapped
    }

    /// Phase within the current turn
    pub fn phase(&self) -> i64 {
        self.phase
    }

    /// Current tuning word
    pub fn ftw(&self) -> i64 {
        self.ftw
    }

    /// True once enough consecutive edges fell inside the lock window
    pub fn locked(&self) -> bool {
        self.wait_lock.is_none()
    }
}

/// `(pe * gain) >> 32` without intermediate overflow
#[inline]
fn scale(pe: i64, gain: i64) -> i64 {
    ((pe as i128 * gain as i128) >> 32) as i64
}
