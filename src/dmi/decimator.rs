//! Averaging decimator

/// Averages every `max_count` inputs into one output
#[derive(Debug, Clone)]
pub struct Decimator {
    accumulator: i64,
    current_count: u32,
    max_count: u32,
}

impl Decimator {
    /// Decimator by `max_count`; a count of zero is treated as one
    pub fn new(max_count: u32) -> Self {
        Decimator {
            accumulator: 0,
            current_count: 0,
            max_count: max_count.max(1),
        }
    }

    /// Add a value; returns the mean when `max_count` values have arrived
    pub fn input(&mut self, data: i64) -> Option<i64> {
        self.accumulator += data;
        self.current_count += 1;
        if self.current_count == self.max_count {
            let average = self.accumulator / self.current_count as i64;
            self.accumulator = 0;
            self.current_count = 0;
            Some(average)
        } else {
            None
        }
    }
}
