//! Sample Output
//!
//! Writes each packed sample as a single byte and flushes it straight away,
//! so producer and consumer stay one sample apart. A blocked write is the
//! only flow control: a slow reader slows the simulator down.

#[cfg(feature = "trace")]
pub mod trace;

use std::io::{self, Write};

use crate::engine::{Engine, Sample};
use crate::{Result, SimError};

/// Single-byte sample writer
#[derive(Debug)]
pub struct SampleEmitter<W: Write> {
    sink: W,
    name: String,
    emitted: u64,
}

impl SampleEmitter<io::Stdout> {
    /// Emitter bound to standard output
    pub fn stdout() -> Self {
        SampleEmitter::new(io::stdout(), "stdout")
    }
}

impl<W: Write> SampleEmitter<W> {
    /// Wrap a byte sink; `name` identifies it in error messages
    pub fn new(sink: W, name: impl Into<String>) -> Self {
        SampleEmitter {
            sink,
            name: name.into(),
            emitted: 0,
        }
    }

    /// Write one sample and flush it.
    ///
    /// Fails with `SimError::StreamError` when the sink is closed or refuses
    /// the byte.
    pub fn emit(&mut self, sample: Sample) -> Result<()> {
        self.sink
            .write_all(&[sample.value()])
            .and_then(|()| self.sink.flush())
            .map_err(|source| SimError::StreamError {
                stream: self.name.clone(),
                source,
            })?;
        self.emitted += 1;
        Ok(())
    }

    /// Samples written successfully
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Stream name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference to the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Consume the emitter and return the sink
    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Drive the engine into the emitter, one sample per tick, in order.
///
/// Runs until the emitter fails, or until `limit` samples have been
/// written when a limit is given. Returns the number of samples written.
/// The first write failure ends the loop; no tick runs after it.
pub fn run<W: Write>(
    engine: &mut Engine,
    emitter: &mut SampleEmitter<W>,
    limit: Option<u64>,
) -> Result<u64> {
    let start = emitter.emitted();
    loop {
        if let Some(limit) = limit {
            if emitter.emitted() - start >= limit {
                break;
            }
        }
        let sample = engine.tick();
        if let Err(e) = emitter.emit(sample) {
            tracing::warn!(
                stream = emitter.name(),
                ticks = engine.ticks(),
                samples = emitter.emitted() - start,
                "output stream failed, stopping"
            );
            return Err(e);
        }
    }
    Ok(emitter.emitted() - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    /// Sink that accepts `capacity` bytes and then reports a broken pipe
    struct ClosingSink {
        written: Vec<u8>,
        capacity: usize,
        flushes: usize,
    }

    impl ClosingSink {
        fn new(capacity: usize) -> Self {
            ClosingSink {
                written: Vec::new(),
                capacity,
                flushes: 0,
            }
        }
    }

    impl Write for ClosingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written.len() >= self.capacity {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader gone"));
            }
            self.written.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_emit_writes_single_flushed_byte() {
        let mut emitter = SampleEmitter::new(ClosingSink::new(16), "test");
        emitter.emit(Sample(0x33)).unwrap();
        emitter.emit(Sample(0x01)).unwrap();
        assert_eq!(emitter.get_ref().written, vec![0x33, 0x01]);
        assert_eq!(emitter.get_ref().flushes, 2);
        assert_eq!(emitter.emitted(), 2);
    }

    #[test]
    fn test_run_with_limit() {
        let mut engine = Engine::new(&SimConfig::default()).unwrap();
        let mut emitter = SampleEmitter::new(Vec::new(), "buffer");
        let written = run(&mut engine, &mut emitter, Some(12)).unwrap();
        assert_eq!(written, 12);
        assert_eq!(
            emitter.into_inner(),
            vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_closed_sink_halts_production() {
        let mut engine =
            Engine::new(&SimConfig::reference_and_measurement(48e6, 1.97e6, 0)).unwrap();
        let mut emitter = SampleEmitter::new(ClosingSink::new(5), "pipe");

        let err = run(&mut engine, &mut emitter, None).unwrap_err();
        assert!(err.is_stream_closed());
        assert!(err.to_string().contains("pipe"));
        assert_eq!(emitter.emitted(), 5);
        // five delivered samples plus the one that failed, two ticks each
        assert_eq!(engine.samples(), 6);
        assert_eq!(engine.ticks(), 12);
    }

    #[test]
    fn test_emit_after_close_keeps_failing() {
        let mut emitter = SampleEmitter::new(ClosingSink::new(0), "pipe");
        assert!(emitter.emit(Sample(1)).is_err());
        assert!(emitter.emit(Sample(1)).is_err());
        assert_eq!(emitter.emitted(), 0);
    }
}
