//! CSV trace dump
//!
//! One row per output sample with the register phases after it. Useful for
//! checking a configuration by eye or building golden traces.

use serde::Serialize;
use std::io::Write;

use crate::engine::Engine;
use crate::{Result, SimError};

#[derive(Debug, Serialize)]
struct TraceRow {
    sample: u64,
    ticks: u64,
    value: u8,
    binary: String,
    phases: String,
}

/// Writes engine output as CSV
pub struct TraceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TraceWriter<W> {
    /// Wrap a writer; the header row is written with the first record
    pub fn new(inner: W) -> Self {
        TraceWriter {
            writer: csv::Writer::from_writer(inner),
        }
    }

    /// Run `count` samples through the engine and record each one
    pub fn record(&mut self, engine: &mut Engine, count: u64) -> Result<()> {
        for _ in 0..count {
            let sample = engine.tick();
            let phases = engine
                .phases()
                .map(|p| format!("{:#010x}", p))
                .collect::<Vec<_>>()
                .join(" ");
            let row = TraceRow {
                sample: engine.samples() - 1,
                ticks: engine.ticks(),
                value: sample.value(),
                binary: format!("{:08b}", sample.value()),
                phases,
            };
            self.writer.serialize(row).map_err(csv_error)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the inner writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| SimError::Io(e.into_error()))
    }
}

fn csv_error(e: csv::Error) -> SimError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => SimError::Io(io),
        other => SimError::Other(format!("trace write failed: {:?}", other)),
    }
}
