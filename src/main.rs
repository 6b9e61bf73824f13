//! `dds-sim` command line
//!
//! Sample data goes to standard output; logs go to standard error so the
//! byte stream stays clean for whatever reads it.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dds_sim::config::{
    DUAL_REF_FREQUENCY, DUAL_SAMPLE_RATE, SINGLE_REF_FREQUENCY, SINGLE_SAMPLE_RATE,
};
use dds_sim::{Engine, SampleEmitter, SimConfig, SimError};

#[derive(Parser)]
#[command(name = "dds-sim")]
#[command(about = "Phase-accumulator DDS simulator and interferometer front end")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write packed samples to stdout until the reader goes away
    Simulate {
        #[command(flatten)]
        source: SourceArgs,

        /// Stop after this many output samples
        #[arg(short, long)]
        count: Option<u64>,
    },

    /// Dump samples and register phases as CSV
    #[cfg(feature = "trace")]
    Trace {
        #[command(flatten)]
        source: SourceArgs,

        /// Number of output samples to record
        #[arg(short, long, default_value_t = 100)]
        count: u64,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Track position from a sample stream and print decimated values
    #[cfg(feature = "dmi")]
    Dmi {
        /// Interferometer configuration file
        #[arg(long, default_value = "simple-dmi.json")]
        config: PathBuf,
    },

    /// Report peak-to-peak scan displacement from a sample stream
    #[cfg(feature = "dmi")]
    Calibrate {
        /// Interferometer configuration file
        #[arg(long, default_value = "simple-dmi.json")]
        config: PathBuf,
    },

    /// Measure the input laser wavelength by counting fringes during scans
    #[cfg(feature = "dmi")]
    Wavemeter {
        /// Wavemeter configuration file
        #[arg(long, default_value = "wavemeter.json")]
        config: PathBuf,
    },
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Simulator configuration file (overrides --variant)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in configuration
    #[arg(long, value_enum, default_value_t = Variant::Single)]
    variant: Variant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Variant {
    /// One channel, one tick per byte
    Single,
    /// Reference and measurement, two ticks per byte
    Dual,
}

impl SourceArgs {
    fn load(&self) -> anyhow::Result<SimConfig> {
        match &self.config {
            Some(path) => SimConfig::from_file(path)
                .with_context(|| format!("loading simulator configuration {}", path.display())),
            None => Ok(match self.variant {
                Variant::Single => SimConfig::single_channel(SINGLE_SAMPLE_RATE, SINGLE_REF_FREQUENCY),
                Variant::Dual => {
                    SimConfig::reference_and_measurement(DUAL_SAMPLE_RATE, DUAL_REF_FREQUENCY, 0)
                }
            }),
        }
    }

    fn engine(&self) -> anyhow::Result<Engine> {
        let config = self.load()?;
        Engine::new(&config).context("building engine")
    }
}

fn simulate(source: &SourceArgs, count: Option<u64>) -> anyhow::Result<()> {
    let mut engine = source.engine()?;
    let mut emitter = SampleEmitter::stdout();
    match dds_sim::emitter::run(&mut engine, &mut emitter, count) {
        Ok(written) => {
            tracing::info!(samples = written, ticks = engine.ticks(), "done");
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                samples = emitter.emitted(),
                elapsed_s = engine.elapsed_seconds(),
                "{}",
                e
            );
            Err(e).context("sample output stopped")
        }
    }
}

#[cfg(feature = "trace")]
fn trace(source: &SourceArgs, count: u64, output: Option<&Path>) -> anyhow::Result<()> {
    let mut engine = source.engine()?;
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating trace file {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let mut writer = dds_sim::TraceWriter::new(sink);
    writer.record(&mut engine, count)?;
    writer.into_inner()?.flush()?;
    Ok(())
}

#[cfg(feature = "dmi")]
fn print_line(out: &mut impl Write, line: std::fmt::Arguments<'_>) -> dds_sim::Result<()> {
    writeln!(out, "{}", line)
        .and_then(|()| out.flush())
        .map_err(|source| SimError::StreamError {
            stream: "stdout".to_string(),
            source,
        })
}

#[cfg(feature = "dmi")]
fn dmi(config_path: &Path) -> anyhow::Result<()> {
    let config = dds_sim::DmiConfig::from_file(config_path)
        .with_context(|| format!("loading interferometer configuration {}", config_path.display()))?;
    let mut interferometer = dds_sim::dmi::Interferometer::new(&config)?;
    let mut out = io::stdout().lock();
    config.sample(|edges| match interferometer.tick(edges) {
        Some(position) => print_line(&mut out, format_args!("{}", position)),
        None => Ok(()),
    })?;
    Ok(())
}

#[cfg(feature = "dmi")]
fn calibrate(config_path: &Path) -> anyhow::Result<()> {
    let config = dds_sim::DmiConfig::from_file(config_path)
        .with_context(|| format!("loading interferometer configuration {}", config_path.display()))?;
    let mut calibrator = dds_sim::dmi::Calibrator::new(&config)?;
    let mut out = io::stdout().lock();
    config.sample(|edges| match calibrator.tick(edges) {
        Some(displacement) => {
            print_line(&mut out, format_args!("{:.1} um", 1.0e6 * displacement))
        }
        None => Ok(()),
    })?;
    Ok(())
}

#[cfg(feature = "dmi")]
fn wavemeter(config_path: &Path) -> anyhow::Result<()> {
    let config = dds_sim::DmiConfig::from_file(config_path)
        .with_context(|| format!("loading wavemeter configuration {}", config_path.display()))?;
    let mut wavemeter = dds_sim::Wavemeter::new(&config)?;
    let mut out = io::stdout().lock();
    config.sample(|edges| match wavemeter.tick(edges) {
        Some(wavelength) => print_line(&mut out, format_args!("{:.4}", 1.0e9 * wavelength)),
        None => Ok(()),
    })?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let result = match &args.command {
        Command::Simulate { source, count } => simulate(source, *count),
        #[cfg(feature = "trace")]
        Command::Trace {
            source,
            count,
            output,
        } => trace(source, *count, output.as_deref()),
        #[cfg(feature = "dmi")]
        Command::Dmi { config } => dmi(config),
        #[cfg(feature = "dmi")]
        Command::Calibrate { config } => calibrate(config),
        #[cfg(feature = "dmi")]
        Command::Wavemeter { config } => wavemeter(config),
    };

    if let Err(e) = &result {
        if e
            .downcast_ref::<SimError>()
            .is_some_and(SimError::is_stream_closed)
        {
            tracing::info!("reader closed the stream");
        }
    }
    result
}
