//! Sample Packing Layout
//!
//! Each output byte holds `ticks_per_sample` groups of `group_width` bits.
//! Groups are folded in with `sample = (sample << group_width) | bits`, so the
//! first tick of a sample ends up in the most significant group.

use crate::{Result, SimError};

/// Packing layout for one output sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackingLayout {
    /// Internal ticks per output byte
    pub ticks_per_sample: u8,
    /// Bits per tick group
    pub group_width: u8,
}

impl PackingLayout {
    /// One tick per byte, channel bit in bit 0
    pub const SINGLE: PackingLayout = PackingLayout {
        ticks_per_sample: 1,
        group_width: 1,
    };

    /// Two ticks per byte as nibbles, high nibble first
    pub const NIBBLES: PackingLayout = PackingLayout {
        ticks_per_sample: 2,
        group_width: 4,
    };

    /// Reject layouts that do not fit one byte
    pub fn validate(&self) -> Result<()> {
        if self.ticks_per_sample == 0 || self.group_width == 0 {
            return Err(SimError::ConfigError(format!(
                "ticks per sample ({}) and group width ({}) must be non-zero",
                self.ticks_per_sample, self.group_width
            )));
        }
        if self.ticks_per_sample as u32 * self.group_width as u32 > 8 {
            return Err(SimError::ConfigError(format!(
                "{} ticks of {} bits do not fit in one byte",
                self.ticks_per_sample, self.group_width
            )));
        }
        Ok(())
    }

    /// Mask covering one group
    #[inline]
    pub fn group_mask(&self) -> u8 {
        ((1u16 << self.group_width) - 1) as u8
    }

    /// Fold one tick's group into a partially built sample
    #[inline]
    pub fn push(&self, sample: u8, group: u8) -> u8 {
        let shifted = (sample as u16) << self.group_width;
        (shifted as u8) | (group & self.group_mask())
    }

    /// Pack groups in tick order into one byte
    pub fn pack(&self, groups: &[u8]) -> u8 {
        groups.iter().fold(0, |sample, &group| self.push(sample, group))
    }

    /// Split a byte back into its groups, first tick first
    pub fn unpack(&self, sample: u8) -> impl Iterator<Item = u8> {
        let layout = *self;
        (0..layout.ticks_per_sample).map(move |index| {
            let shift = (layout.ticks_per_sample - 1 - index) * layout.group_width;
            (((sample as u16) >> shift) as u8) & layout.group_mask()
        })
    }
}

impl Default for PackingLayout {
    fn default() -> Self {
        Self::SINGLE
    }
}
