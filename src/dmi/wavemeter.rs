//! Wavemeter
//!
//! Measures the wavelength of an input laser against the reference by
//! counting its fringes while the measurement arm scans. The filtered arm
//! position is split into scan quadrants; each upward scan opens a fringe
//! acquisition, and the spacing of fringes between two boundary pairs gives
//! one fringe period in reference phase units.

use biquad::frequency::Hertz;
use biquad::{Biquad, Coefficients, DirectForm2Transposed, Type, Q_BUTTERWORTH_F64};

use super::{required, DmiConfig, Dpll, Edges, MinMaxMonitor, PositionTracker};
use crate::{Result, SimError};

/// Scan phase of the filtered arm position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    /// Below the lower limit
    BelowMin,
    /// Between the limits, moving up
    Up,
    /// Above the upper limit
    AboveMax,
    /// Between the limits, moving down
    Down,
}

/// Follows the scan through its quadrants.
///
/// Limits reported by [`update_limits`](Self::update_limits) only take
/// effect when the position next crosses their middle going up, so a limit
/// change never lands in the middle of a turnaround.
#[derive(Debug, Clone)]
pub struct QuadrantTracker {
    prev_state: Quadrant,
    state: Quadrant,
    min: i64,
    max: i64,
    new_min: i64,
    new_max: i64,
    middle: i64,
    prev_above_middle: bool,
}

impl Default for QuadrantTracker {
    fn default() -> Self {
        QuadrantTracker {
            prev_state: Quadrant::BelowMin,
            state: Quadrant::BelowMin,
            min: i64::MAX,
            max: i64::MIN,
            new_min: i64::MAX,
            new_max: i64::MIN,
            middle: i64::MAX,
            prev_above_middle: false,
        }
    }
}

impl QuadrantTracker {
    /// Tracker with no limits; it stays `BelowMin` until limits arrive
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget limits and state
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed one filtered position
    pub fn input(&mut self, position: i64) {
        let above_min = position > self.min;
        let below_max = position < self.max;
        let next_state = if above_min && below_max {
            match self.state {
                Quadrant::BelowMin | Quadrant::Up => Quadrant::Up,
                Quadrant::AboveMax | Quadrant::Down => Quadrant::Down,
            }
        } else if above_min {
            Quadrant::AboveMax
        } else {
            Quadrant::BelowMin
        };

        self.prev_state = self.state;
        if self.state != next_state {
            match (self.state, next_state) {
                (Quadrant::BelowMin, Quadrant::Up)
                | (Quadrant::Up, Quadrant::AboveMax)
                | (Quadrant::AboveMax, Quadrant::Down)
                | (Quadrant::Down, Quadrant::BelowMin) => (),
                (from, to) => {
                    tracing::warn!(?from, ?to, "invalid quadrant transition");
                }
            }
            self.state = next_state;
        }

        let above_middle = position > self.middle;
        if above_middle && !self.prev_above_middle {
            self.min = self.new_min;
            self.max = self.new_max;
        }
        self.prev_above_middle = above_middle;
    }

    /// Stage new scan limits
    pub fn update_limits(&mut self, min: i64, max: i64) {
        self.new_min = min;
        self.new_max = max;
        self.middle = min / 2 + max / 2;
    }

    /// Current quadrant
    pub fn state(&self) -> Quadrant {
        self.state
    }

    /// Entered the upward band on the last input
    pub fn up_start(&self) -> bool {
        self.prev_state == Quadrant::BelowMin && self.state == Quadrant::Up
    }

    /// Left the upward band on the last input
    pub fn up_end(&self) -> bool {
        self.prev_state == Quadrant::Up && self.state == Quadrant::AboveMax
    }

    /// Entered the downward band on the last input
    pub fn down_start(&self) -> bool {
        self.prev_state == Quadrant::AboveMax && self.state == Quadrant::Down
    }

    /// Left the downward band on the last input
    pub fn down_end(&self) -> bool {
        self.prev_state == Quadrant::Down && self.state == Quadrant::BelowMin
    }
}

/// Input to the fringe counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FringeEvent {
    /// An upward scan began
    Start,
    /// Input laser fringe at an arm position
    Fringe(i64),
    /// The upward scan ended
    End,
}

/// Counting window fixed by the first scan of an acquisition
#[derive(Debug, Clone, Copy)]
struct ScanWindow {
    nominal_distance: i64,
    jitter_tol: i64,
    limit1: i64,
    limit2: i64,
    expected_fringes: u32,
}

impl ScanWindow {
    fn contains(&self, position: i64) -> bool {
        (position > self.limit1 && position < self.limit2)
            || (position > self.limit2 && position < self.limit1)
    }
}

/// Fringes seen during one averaging scan
#[derive(Debug, Clone, Copy, Default)]
struct Pass {
    last_fringe: Option<i64>,
    count: u32,
}

#[derive(Debug, Clone)]
enum FringeState {
    /// Waiting for a scan to start
    Idle,
    /// Collecting the first four fringes of a scan
    Boundary { fringes: [i64; 4], seen: usize },
    /// Counting fringes; the last two are kept as the closing boundary
    Counting { fringes: [i64; 4], between: u32 },
    /// Re-scanning the same window to average its end fringes
    Averaging {
        window: ScanWindow,
        f1_acc: i64,
        f2_acc: i64,
        remaining: u32,
        pass: Option<Pass>,
    },
}

/// Turns scan and fringe events into wavelength measurements.
///
/// The first scan of an acquisition takes two boundary fringe pairs and
/// counts the fringes between them. Further scans, `decimation - 1` of
/// them, must see exactly the same number of fringes within the window
/// bounded by those pairs, at a spacing within the jitter tolerance; their
/// first and last fringes are averaged in. Any irregularity drops the
/// acquisition and waits for the next scan.
#[derive(Debug, Clone)]
pub struct FringeCounter {
    state: FringeState,
    min_fringes: u32,
    jitter_tol: f64,
    decimation: u32,
    ref_wavelength: f64,
}

impl FringeCounter {
    /// Counter reporting wavelengths in the unit of `ref_wavelength`
    pub fn new(min_fringes: u32, jitter_tol: f64, decimation: u32, ref_wavelength: f64) -> Self {
        FringeCounter {
            state: FringeState::Idle,
            min_fringes,
            jitter_tol,
            decimation: decimation.max(1),
            ref_wavelength,
        }
    }

    /// Feed one event; returns a wavelength when an acquisition completes
    pub fn input(&mut self, event: FringeEvent) -> Option<f64> {
        let state = std::mem::replace(&mut self.state, FringeState::Idle);
        let (next, wavelength) = self.step(state, event);
        self.state = next;
        wavelength
    }

    fn step(&self, state: FringeState, event: FringeEvent) -> (FringeState, Option<f64>) {
        use FringeEvent::*;
        use FringeState::*;

        match (state, event) {
            (Idle, Start) => (
                Boundary {
                    fringes: [0; 4],
                    seen: 0,
                },
                None,
            ),
            (Idle, _) => (Idle, None),

            (Boundary { mut fringes, seen }, Fringe(position)) => {
                fringes[seen] = position;
                if seen + 1 == fringes.len() {
                    (
                        Counting {
                            fringes,
                            between: 0,
                        },
                        None,
                    )
                } else {
                    (
                        Boundary {
                            fringes,
                            seen: seen + 1,
                        },
                        None,
                    )
                }
            }
            (Boundary { .. }, event) => {
                tracing::warn!(?event, "unexpected event during boundary fringe acquisition");
                (Idle, None)
            }

            (
                Counting {
                    mut fringes,
                    between,
                },
                Fringe(position),
            ) => {
                fringes[2] = fringes[3];
                fringes[3] = position;
                (
                    Counting {
                        fringes,
                        between: between + 1,
                    },
                    None,
                )
            }
            (Counting { fringes, between }, End) => self.open_window(fringes, between),
            (Counting { .. }, Start) => {
                tracing::warn!("unexpected scan start during initial fringe counting");
                (Idle, None)
            }

            (
                Averaging {
                    window,
                    f1_acc,
                    f2_acc,
                    remaining,
                    pass: None,
                },
                event,
            ) => {
                let pass = (event == Start).then(Pass::default);
                (
                    Averaging {
                        window,
                        f1_acc,
                        f2_acc,
                        remaining,
                        pass,
                    },
                    None,
                )
            }
            (Averaging { pass: Some(_), .. }, Start) => {
                tracing::warn!("unexpected scan start during secondary fringe counting");
                (Idle, None)
            }
            (
                Averaging {
                    window,
                    mut f1_acc,
                    f2_acc,
                    remaining,
                    pass: Some(mut pass),
                },
                Fringe(position),
            ) => {
                if window.contains(position) {
                    if let Some(last_fringe) = pass.last_fringe {
                        let distance = position - last_fringe;
                        if (distance - window.nominal_distance).abs() > window.jitter_tol {
                            tracing::warn!(
                                distance,
                                nominal = window.nominal_distance,
                                "distance between fringes above tolerance"
                            );
                            return (Idle, None);
                        }
                    }
                    pass.last_fringe = Some(position);
                    pass.count += 1;
                    if pass.count == 1 {
                        f1_acc += position;
                    }
                }
                (
                    Averaging {
                        window,
                        f1_acc,
                        f2_acc,
                        remaining,
                        pass: Some(pass),
                    },
                    None,
                )
            }
            (
                Averaging {
                    window,
                    f1_acc,
                    f2_acc,
                    remaining,
                    pass: Some(pass),
                },
                End,
            ) => match pass.last_fringe {
                Some(last_fringe) if pass.count == window.expected_fringes => {
                    self.advance(window, f1_acc, f2_acc + last_fringe, remaining - 1)
                }
                _ => {
                    tracing::warn!(
                        got = pass.count,
                        expected = window.expected_fringes,
                        "unexpected fringe count"
                    );
                    (Idle, None)
                }
            },
        }
    }

    fn open_window(&self, fringes: [i64; 4], between: u32) -> (FringeState, Option<f64>) {
        if between < self.min_fringes {
            tracing::warn!(between, "insufficient fringes between boundary");
            return (FringeState::Idle, None);
        }
        let nominal_distance = fringes[1] - fringes[0];
        let window = ScanWindow {
            nominal_distance,
            jitter_tol: (nominal_distance as f64 * self.jitter_tol) as i64,
            limit1: (fringes[0] + fringes[1]) / 2,
            limit2: (fringes[2] + fringes[3]) / 2,
            expected_fringes: between + 2,
        };
        self.advance(window, fringes[1], fringes[2], self.decimation - 1)
    }

    fn advance(
        &self,
        window: ScanWindow,
        f1_acc: i64,
        f2_acc: i64,
        remaining: u32,
    ) -> (FringeState, Option<f64>) {
        if remaining > 0 {
            let state = FringeState::Averaging {
                window,
                f1_acc,
                f2_acc,
                remaining,
                pass: None,
            };
            return (state, None);
        }
        let scans = self.decimation as i64;
        let f1_avg = f1_acc / scans;
        let f2_avg = f2_acc / scans;
        let period = (f2_avg - f1_avg).abs() / (window.expected_fringes as i64 - 1);
        let wavelength = period as f64 * self.ref_wavelength / Dpll::TURN as f64;
        (FringeState::Idle, Some(wavelength))
    }
}

/// Input laser wavelength measurement
pub struct Wavemeter {
    dpll: Dpll,
    tracker: PositionTracker,
    position: i64,
    motion_filter: DirectForm2Transposed<f64>,
    monitor: MinMaxMonitor,
    quadrants: QuadrantTracker,
    fringes: FringeCounter,
    bit_ref: u8,
    bit_meas: u8,
    bit_input: u8,
    duty_cycle: f64,
}

impl Wavemeter {
    /// Build from a configuration carrying the wavemeter fields
    pub fn new(config: &DmiConfig) -> Result<Self> {
        config.validate()?;
        let bit_input = required(config.bit_input, "bit_input")?;
        let ref_wavelength = required(config.ref_wavelength, "ref_wavelength")?;
        let mon_time = required(config.position_mon_time, "position_mon_time")?;
        let duty_cycle = required(config.duty_cycle, "duty_cycle")?;
        let motion_cutoff = required(config.motion_cutoff, "motion_cutoff")?;
        let min_fringes = required(config.min_fringes, "min_fringes")?;
        let jitter_tol = required(config.fringe_jitter_tol, "fringe_jitter_tol")?;

        let window = (config.sample_rate * mon_time) as u32;
        if window == 0 {
            return Err(SimError::ConfigError(format!(
                "position_mon_time {} s covers no ticks",
                mon_time
            )));
        }

        let coefficients = Hertz::<f64>::from_hz(config.sample_rate)
            .and_then(|fs| {
                let f0 = Hertz::<f64>::from_hz(motion_cutoff)?;
                Coefficients::<f64>::from_params(Type::LowPass, fs, f0, Q_BUTTERWORTH_F64)
            })
            .map_err(|e| {
                SimError::ConfigError(format!(
                    "motion_cutoff {} Hz at {} Hz: {:?}",
                    motion_cutoff, config.sample_rate, e
                ))
            })?;

        tracing::debug!(window, motion_cutoff, duty_cycle, "wavemeter ready");
        Ok(Wavemeter {
            dpll: config.build_dpll()?,
            tracker: PositionTracker::new(),
            position: 0,
            motion_filter: DirectForm2Transposed::<f64>::new(coefficients),
            monitor: MinMaxMonitor::new(window),
            quadrants: QuadrantTracker::new(),
            fringes: FringeCounter::new(
                min_fringes,
                jitter_tol,
                config.decimation,
                ref_wavelength,
            ),
            bit_ref: config.bit_ref,
            bit_meas: config.bit_meas,
            bit_input,
            duty_cycle,
        })
    }

    /// Process one tick; returns a wavelength in metres when a measurement
    /// completes.
    ///
    /// While the DPLL is unlocked the position, scan limits and quadrant
    /// state are held reset.
    pub fn tick(&mut self, edges: Edges) -> Option<f64> {
        self.dpll.tick(edges.rose(self.bit_ref));
        if !self.dpll.locked() {
            self.position = 0;
            self.monitor.reset();
            self.quadrants.reset();
            return None;
        }

        if edges.rose(self.bit_meas) {
            self.position = self.tracker.edge(self.dpll.phase_unwrapped());
        }
        let filtered = self.motion_filter.run(self.position as f64) as i64;
        if let Some((min, max)) = self.monitor.input(filtered) {
            let amplitude = max - min;
            let off_duty = (amplitude as f64 * (1.0 - self.duty_cycle)) as i64;
            self.quadrants
                .update_limits(min + off_duty / 2, max - off_duty / 2);
        }
        self.quadrants.input(filtered);

        let mut wavelength = None;
        if self.quadrants.up_start() {
            wavelength = wavelength.or(self.fringes.input(FringeEvent::Start));
        }
        if self.quadrants.up_end() {
            wavelength = wavelength.or(self.fringes.input(FringeEvent::End));
        }
        if edges.rose(self.bit_input) {
            wavelength = wavelength.or(self.fringes.input(FringeEvent::Fringe(self.position)));
        }
        wavelength
    }

    /// Reference loop
    pub fn dpll(&self) -> &Dpll {
        &self.dpll
    }

    /// Current scan quadrant
    pub fn quadrant(&self) -> Quadrant {
        self.quadrants.state()
    }
}
