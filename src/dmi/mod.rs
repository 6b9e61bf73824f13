//! Interferometer Front End
//!
//! Consumes the packed square-wave stream the engine produces, as a
//! displacement measuring interferometer would consume a logic analyzer
//! capture: a DPLL locks onto the reference channel, and every measurement
//! edge is placed against the DPLL's unwrapped phase to track position.
//!
//! ## Modes
//! - [`Interferometer`]: decimated position, one value per `decimation`
//!   measurement edges
//! - [`Calibrator`]: peak-to-peak displacement over a monitoring window
//! - [`Wavemeter`]: input laser wavelength from fringes counted during scans

pub mod decimator;
pub mod dpll;
pub mod sampler;
pub mod tracker;
pub mod wavemeter;

pub use decimator::Decimator;
pub use dpll::Dpll;
pub use sampler::{spawn_sample_command, EdgeSampler, Edges};
pub use tracker::{MinMaxMonitor, PositionTracker};
pub use wavemeter::{FringeCounter, FringeEvent, Quadrant, QuadrantTracker, Wavemeter};

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use crate::config::read_config_from_file;
use crate::engine::PackingLayout;
use crate::phase::validate_sample_rate;
use crate::{Result, SimError};

fn default_decimation() -> u32 {
    1
}

fn default_ticks_per_sample() -> u8 {
    PackingLayout::NIBBLES.ticks_per_sample
}

fn default_group_width() -> u8 {
    PackingLayout::NIBBLES.group_width
}

/// Interferometer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmiConfig {
    /// Shell command producing the sample stream; standard input when absent
    #[serde(default)]
    pub sample_command: Option<String>,
    /// Tick rate of the stream in Hz
    pub sample_rate: f64,
    /// Bit of the reference channel within each tick group
    pub bit_ref: u8,
    /// Bit of the measurement channel within each tick group
    pub bit_meas: u8,
    /// Lowest expected reference frequency in Hz
    pub ref_min: f64,
    /// Highest expected reference frequency in Hz
    pub ref_max: f64,
    /// DPLL integral gain
    pub refpll_ki: i64,
    /// DPLL proportional gain
    pub refpll_kp: i64,
    /// Positions averaged per output line
    #[serde(default = "default_decimation")]
    pub decimation: u32,
    /// In-window reference edges required before the DPLL counts as locked
    #[serde(default)]
    pub lock_count: Option<u32>,
    /// Ticks packed in each stream byte
    #[serde(default = "default_ticks_per_sample")]
    pub ticks_per_sample: u8,
    /// Bits per tick group
    #[serde(default = "default_group_width")]
    pub group_width: u8,
    /// Reference laser wavelength in metres (calibration)
    #[serde(default)]
    pub ref_wavelength: Option<f64>,
    /// Position monitoring window in seconds (calibration, wavemeter)
    #[serde(default)]
    pub position_mon_time: Option<f64>,
    /// Bit of the input laser fringe detector within each tick group
    #[serde(default)]
    pub bit_input: Option<u8>,
    /// Fraction of the scan used for counting fringes
    #[serde(default)]
    pub duty_cycle: Option<f64>,
    /// Cut-off of the position low-pass filter in Hz
    #[serde(default)]
    pub motion_cutoff: Option<f64>,
    /// Fewest fringes between the boundary pairs of a usable scan
    #[serde(default)]
    pub min_fringes: Option<u32>,
    /// Allowed deviation of fringe spacing, as a fraction of the nominal
    #[serde(default)]
    pub fringe_jitter_tol: Option<f64>,
}

/// Value of an optional field a mode cannot run without
pub(crate) fn required<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| SimError::ConfigError(format!("{} is required for this mode", name)))
}

impl DmiConfig {
    /// Load and validate from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: DmiConfig = read_config_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Stream layout
    pub fn layout(&self) -> PackingLayout {
        PackingLayout {
            ticks_per_sample: self.ticks_per_sample,
            group_width: self.group_width,
        }
    }

    /// Reject values that would make the front end misbehave
    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;
        self.layout().validate()?;
        let mut bits = vec![("bit_ref", self.bit_ref), ("bit_meas", self.bit_meas)];
        bits.extend(self.bit_input.map(|bit| ("bit_input", bit)));
        for (index, &(name, bit)) in bits.iter().enumerate() {
            if bit >= self.group_width {
                return Err(SimError::ConfigError(format!(
                    "{} {} does not fit a {}-bit group",
                    name, bit, self.group_width
                )));
            }
            if let Some((other, _)) = bits[..index].iter().find(|(_, b)| *b == bit) {
                return Err(SimError::ConfigError(format!(
                    "{} and {} both use bit {}",
                    other, name, bit
                )));
            }
        }
        if let Some(wavelength) = self.ref_wavelength {
            if !(wavelength.is_finite() && wavelength > 0.0) {
                return Err(SimError::ConfigError(format!(
                    "ref_wavelength {} must be positive",
                    wavelength
                )));
            }
        }
        if let Some(duty_cycle) = self.duty_cycle {
            if !(duty_cycle > 0.0 && duty_cycle <= 1.0) {
                return Err(SimError::ConfigError(format!(
                    "duty_cycle {} must be in (0, 1]",
                    duty_cycle
                )));
            }
        }
        if let Some(cutoff) = self.motion_cutoff {
            if !(cutoff > 0.0 && cutoff < self.sample_rate / 2.0) {
                return Err(SimError::ConfigError(format!(
                    "motion_cutoff {} Hz must lie between 0 and half the sample rate",
                    cutoff
                )));
            }
        }
        if let Some(tolerance) = self.fringe_jitter_tol {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(SimError::ConfigError(format!(
                    "fringe_jitter_tol {} must be non-negative",
                    tolerance
                )));
            }
        }
        if self.decimation == 0 {
            return Err(SimError::ConfigError(
                "decimation must be at least 1".to_string(),
            ));
        }
        self.build_dpll()?;
        Ok(())
    }

    /// DPLL configured from the reference range and gains
    pub fn build_dpll(&self) -> Result<Dpll> {
        let dpll = Dpll::from_frequencies(
            self.ref_min,
            self.ref_max,
            self.sample_rate,
            self.refpll_ki,
            self.refpll_kp,
        )?;
        Ok(match self.lock_count {
            Some(count) => dpll.with_lock_count(count),
            None => dpll,
        })
    }

    /// Read the configured sample stream to its end, feeding `callback`
    /// with the edges of every tick.
    pub fn sample(&self, callback: impl FnMut(Edges) -> Result<()>) -> Result<u64> {
        let mut sampler = EdgeSampler::new(self.layout());
        match &self.sample_command {
            Some(command) => {
                let mut child = spawn_sample_command(command)?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| SimError::Other(format!("'{}' has no stdout", command)))?;
                let result = sampler.run(stdout, command, callback);
                if result.is_err() {
                    let _ = child.kill();
                }
                let status = child.wait()?;
                let bytes = result?;
                if !status.success() {
                    return Err(SimError::Other(format!(
                        "sample command '{}' failed ({}) after {} bytes",
                        command, status, bytes
                    )));
                }
                Ok(bytes)
            }
            None => sampler.run(io::stdin().lock(), "stdin", callback),
        }
    }
}

/// Decimated position measurement
#[derive(Debug, Clone)]
pub struct Interferometer {
    dpll: Dpll,
    tracker: PositionTracker,
    decimator: Decimator,
    bit_ref: u8,
    bit_meas: u8,
}

impl Interferometer {
    /// Build from a configuration, validating it first
    pub fn new(config: &DmiConfig) -> Result<Self> {
        config.validate()?;
        Ok(Interferometer {
            dpll: config.build_dpll()?,
            tracker: PositionTracker::new(),
            decimator: Decimator::new(config.decimation),
            bit_ref: config.bit_ref,
            bit_meas: config.bit_meas,
        })
    }

    /// Process one tick; returns an averaged position when one is ready.
    ///
    /// Measurement edges are ignored until the DPLL has locked.
    pub fn tick(&mut self, edges: Edges) -> Option<i64> {
        self.dpll.tick(edges.rose(self.bit_ref));
        if self.dpll.locked() && edges.rose(self.bit_meas) {
            let position = self.tracker.edge(self.dpll.phase_unwrapped());
            self.decimator.input(position)
        } else {
            None
        }
    }

    /// Reference loop
    pub fn dpll(&self) -> &Dpll {
        &self.dpll
    }
}

/// Scan displacement calibration
#[derive(Debug, Clone)]
pub struct Calibrator {
    dpll: Dpll,
    tracker: PositionTracker,
    monitor: MinMaxMonitor,
    bit_ref: u8,
    bit_meas: u8,
    ref_wavelength: f64,
}

impl Calibrator {
    /// Build from a configuration carrying `ref_wavelength` and
    /// `position_mon_time`
    pub fn new(config: &DmiConfig) -> Result<Self> {
        config.validate()?;
        let ref_wavelength = required(config.ref_wavelength, "ref_wavelength")?;
        let mon_time = required(config.position_mon_time, "position_mon_time")?;
        let window = ((config.ref_min + config.ref_max) / 2.0 * mon_time) as u32;
        if window == 0 {
            return Err(SimError::ConfigError(format!(
                "position_mon_time {} s covers no reference periods",
                mon_time
            )));
        }
        Ok(Calibrator {
            dpll: config.build_dpll()?,
            tracker: PositionTracker::new(),
            monitor: MinMaxMonitor::new(window),
            bit_ref: config.bit_ref,
            bit_meas: config.bit_meas,
            ref_wavelength,
        })
    }

    /// Process one tick; returns peak-to-peak displacement in metres at the
    /// end of each monitoring window.
    pub fn tick(&mut self, edges: Edges) -> Option<f64> {
        self.dpll.tick(edges.rose(self.bit_ref));
        if !self.dpll.locked() {
            self.monitor.reset();
            return None;
        }
        if !edges.rose(self.bit_meas) {
            return None;
        }
        let position = self.tracker.edge(self.dpll.phase_unwrapped());
        self.monitor
            .input(position)
            .map(|(min, max)| (max - min) as f64 / Dpll::TURN as f64 * self.ref_wavelength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::engine::Engine;
    use approx::assert_relative_eq;

    fn dmi_config() -> DmiConfig {
        serde_json::from_str(
            r#"{
                "sample_rate": 48e6,
                "bit_ref": 0,
                "bit_meas": 1,
                "ref_min": 1.9e6,
                "ref_max": 2.1e6,
                "refpll_ki": 0,
                "refpll_kp": 0
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = dmi_config();
        assert_eq!(config.layout(), PackingLayout::NIBBLES);
        assert_eq!(config.decimation, 1);
        assert!(config.sample_command.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_rejects_bit_outside_group() {
        let mut config = dmi_config();
        config.bit_meas = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bit_meas"));
    }

    #[test]
    fn test_config_rejects_inverted_range() {
        let mut config = dmi_config();
        config.ref_min = 3e6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_calibrator_requires_wavelength() {
        let config = dmi_config();
        assert!(matches!(
            Calibrator::new(&config),
            Err(SimError::ConfigError(_))
        ));
    }

    #[test]
    fn test_config_rejects_shared_bits() {
        let mut config = dmi_config();
        config.bit_meas = config.bit_ref;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bit_ref and bit_meas"));

        let mut config = dmi_config();
        config.bit_input = Some(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bit_meas and bit_input"));
    }

    #[test]
    fn test_modes_validate_their_config() {
        let mut config = dmi_config();
        config.bit_ref = 9;
        config.ref_wavelength = Some(633e-9);
        config.position_mon_time = Some(1e-3);
        assert!(matches!(
            Interferometer::new(&config),
            Err(SimError::ConfigError(_))
        ));
        assert!(matches!(
            Calibrator::new(&config),
            Err(SimError::ConfigError(_))
        ));
    }

    fn run_calibrator(config: &DmiConfig, samples: usize) -> Vec<f64> {
        let mut calibrator = Calibrator::new(config).unwrap();
        let engine =
            Engine::new(&SimConfig::reference_and_measurement(48e6, 2.0e6, 0x1000_0000)).unwrap();
        let mut sampler = EdgeSampler::new(config.layout());
        let mut outputs = Vec::new();
        for sample in engine.take(samples) {
            sampler.feed(sample.value(), |edges| {
                outputs.extend(calibrator.tick(edges));
            });
        }
        outputs
    }

    fn calibration_config() -> DmiConfig {
        let mut config = dmi_config();
        config.ref_min = 2.0e6;
        config.ref_max = 2.0e6;
        config.lock_count = Some(10);
        config.ref_wavelength = Some(633e-9);
        // 20 reference periods
        config.position_mon_time = Some(1.025e-5);
        config
    }

    #[test]
    fn test_calibrator_reports_peak_to_peak() {
        let outputs = run_calibrator(&calibration_config(), 2000);
        assert!(outputs.len() >= 5, "only {} windows", outputs.len());
        // the position creeps 16 units per edge: 19 steps within a window
        for displacement in outputs {
            assert_relative_eq!(
                displacement,
                16.0 * 19.0 / Dpll::TURN as f64 * 633e-9,
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn test_calibrator_silent_until_locked() {
        let mut config = calibration_config();
        config.lock_count = Some(u32::MAX);
        assert!(run_calibrator(&config, 2000).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_sample_command_stream() {
        let mut config = dmi_config();
        // ticks 0,1 | 1,0 | 0,1 | 1,0 on the reference bit
        config.sample_command = Some(r"printf '\001\020\001\020'".to_string());
        let mut ref_rising = 0;
        let bytes = config
            .sample(|edges| {
                if edges.rose(config.bit_ref) {
                    ref_rising += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(bytes, 4);
        assert_eq!(ref_rising, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_sample_command_is_an_error() {
        let mut config = dmi_config();
        config.sample_command = Some(r"printf '\001'; exit 3".to_string());
        let mut ticks = 0;
        let err = config
            .sample(|_| {
                ticks += 1;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(ticks, 2);
        let message = err.to_string();
        assert!(message.contains("exit status: 3"), "{}", message);
        assert!(message.contains("after 1 bytes"), "{}", message);
    }

    #[test]
    fn test_interferometer_waits_for_lock() {
        let mut config = dmi_config();
        config.lock_count = Some(u32::MAX);
        let mut dmi = Interferometer::new(&config).unwrap();
        let engine =
            Engine::new(&SimConfig::reference_and_measurement(48e6, 2.0e6, 0x1000_0000)).unwrap();
        let mut sampler = EdgeSampler::new(config.layout());
        let mut outputs = 0;
        for sample in engine.take(1000) {
            sampler.feed(sample.value(), |edges| {
                if dmi.tick(edges).is_some() {
                    outputs += 1;
                }
            });
        }
        assert!(!dmi.dpll().locked());
        assert_eq!(outputs, 0);
    }
}
