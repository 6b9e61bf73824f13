//! Tick Accounting
//!
//! Counts internal accumulator ticks and emitted output samples.

/// Tick counter for the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickCounter {
    /// Internal accumulator ticks
    ticks: u64,
    /// Output samples completed
    samples: u64,
}

impl TickCounter {
    /// Create a new counter at zero
    pub fn new() -> Self {
        TickCounter {
            ticks: 0,
            samples: 0,
        }
    }

    /// Record one internal tick
    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    /// Record one completed output sample
    pub fn sample(&mut self) {
        self.samples += 1;
    }

    /// Internal ticks so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Output samples so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Elapsed simulated time in seconds at the given tick rate
    pub fn elapsed_seconds(&self, sample_rate: f64) -> f64 {
        self.ticks as f64 / sample_rate
    }
}
