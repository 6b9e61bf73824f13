//! Direct Digital Synthesis / NCO simulator
//!
//! Models the phase-accumulator core found in FPGA and ASIC frequency
//! references. One or more 32-bit phase registers advance by a fixed
//! frequency tuning word every tick; each channel's square-wave bit is the
//! most significant bit of its (optionally offset) phase; channel bits are
//! packed into one byte per output sample and written to a byte stream.
//!
//! # Features
//! - Exact modulo 2^32 phase arithmetic with rounded tuning words
//! - Single-channel and reference/measurement sub-sampled layouts
//! - Unbuffered single-byte sample emission with broken-pipe detection
//! - Interferometer front end: edge sampler, DPLL, position tracking,
//!   scan calibration and fringe-counting wavemeter
//!
//! # Crate feature flags
//! - `dmi` (default): Interferometer front end (`dmi`)
//! - `trace` (default): CSV trace dump of the simulator output (`emitter::trace`)
//!
//! # Quick start
//! ```no_run
//! use dds_sim::{Engine, SampleEmitter, SimConfig};
//! let config = SimConfig::reference_and_measurement(48e6, 1.97e6, 0);
//! let mut engine = Engine::new(&config).unwrap();
//! let mut emitter = SampleEmitter::stdout();
//! dds_sim::emitter::run(&mut engine, &mut emitter, None).unwrap();
//! ```

#![warn(missing_docs)]

pub mod config; // Startup configuration
#[cfg(feature = "dmi")]
pub mod dmi; // Interferometer front end
pub mod emitter; // Sample output
pub mod engine; // Phase Accumulator Engine
pub mod phase; // Fixed-point phase arithmetic

use std::io;

/// Error types for simulator operations
#[derive(thiserror::Error, Debug)]
pub enum SimError {
    /// Invalid configuration value, rejected before the tick loop starts
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A sample stream could not be written or read
    #[error("Stream '{stream}' failed: {source}")]
    StreamError {
        /// Name of the stream (e.g. `stdout`)
        stream: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },

    /// IO error from the filesystem
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SimError {
    /// True when the error is a broken or closed stream rather than a bad setup.
    pub fn is_stream_closed(&self) -> bool {
        match self {
            SimError::StreamError { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::WriteZero
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<String> for SimError {
    /// Converts a String into `SimError::Other`.
    ///
    /// Prefer `SimError::ConfigError` for configuration problems so the
    /// startup path can tell them apart.
    fn from(msg: String) -> Self {
        SimError::Other(msg)
    }
}

impl From<&str> for SimError {
    fn from(msg: &str) -> Self {
        SimError::Other(msg.to_string())
    }
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

// Public API exports
pub use config::{ChannelConfig, SimConfig};
pub use emitter::SampleEmitter;
pub use engine::{Engine, PackingLayout, Sample};
pub use phase::{frequency_to_ftw, PhaseAccumulator};

#[cfg(feature = "dmi")]
pub use dmi::{
    Decimator, DmiConfig, Dpll, EdgeSampler, MinMaxMonitor, PositionTracker, Wavemeter,
};
#[cfg(feature = "trace")]
pub use emitter::trace::TraceWriter;
