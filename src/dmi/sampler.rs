//! Edge Sampler
//!
//! Reads a packed sample stream and reports rising and falling edges per
//! tick. Each byte is split into its tick groups with the same layout the
//! engine packed it with, first tick first.

use std::io::{self, BufReader, Read};
use std::process::{Child, Command, Stdio};

use crate::engine::PackingLayout;
use crate::{Result, SimError};

/// Edges seen on one tick, one bit per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edges {
    /// Channels that went from low to high
    pub rising: u8,
    /// Channels that went from high to low
    pub falling: u8,
}

impl Edges {
    /// True when `bit` rose on this tick
    #[inline]
    pub fn rose(&self, bit: u8) -> bool {
        self.rising & (1 << bit) != 0
    }

    /// True when `bit` fell on this tick
    #[inline]
    pub fn fell(&self, bit: u8) -> bool {
        self.falling & (1 << bit) != 0
    }
}

/// Tick-by-tick edge detector over packed samples
#[derive(Debug, Clone)]
pub struct EdgeSampler {
    layout: PackingLayout,
    last: u8,
    ticks: u64,
}

impl EdgeSampler {
    /// Sampler for streams packed with `layout`; all channels start low
    pub fn new(layout: PackingLayout) -> Self {
        EdgeSampler {
            layout,
            last: 0,
            ticks: 0,
        }
    }

    /// Feed one byte, calling `callback` once per tick it holds
    pub fn feed(&mut self, byte: u8, mut callback: impl FnMut(Edges)) {
        let mask = self.layout.group_mask();
        for group in self.layout.unpack(byte) {
            let edges = Edges {
                rising: group & !self.last & mask,
                falling: !group & self.last & mask,
            };
            self.last = group;
            self.ticks += 1;
            callback(edges);
        }
    }

    /// Level of every channel after the last tick
    pub fn levels(&self) -> u8 {
        self.last
    }

    /// Ticks decoded so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Read `reader` to the end, feeding every byte.
    ///
    /// End of stream is a normal finish and returns the number of bytes read.
    /// Any other read failure is a `StreamError` naming `stream`. The first
    /// error returned by `callback` stops sampling and is passed through.
    pub fn run<R: Read>(
        &mut self,
        reader: R,
        stream: &str,
        mut callback: impl FnMut(Edges) -> Result<()>,
    ) -> Result<u64> {
        let mut reader = BufReader::new(reader);
        let mut buffer = [0u8; 1];
        let mut bytes = 0u64;
        loop {
            match reader.read_exact(&mut buffer) {
                Ok(()) => {
                    bytes += 1;
                    let mut failure = None;
                    self.feed(buffer[0], |edges| {
                        if failure.is_none() {
                            failure = callback(edges).err();
                        }
                    });
                    if let Some(e) = failure {
                        return Err(e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::info!(stream, bytes, "sample stream ended");
                    return Ok(bytes);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(SimError::StreamError {
                        stream: stream.to_string(),
                        source,
                    })
                }
            }
        }
    }
}

/// Start `sh -c <command>` with its standard output piped back to us.
pub fn spawn_sample_command(command: &str) -> Result<Child> {
    tracing::info!(command, "starting sample command");
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|source| SimError::StreamError {
            stream: command.to_string(),
            source,
        })
}
