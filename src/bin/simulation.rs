//! Gait Device Simulation
//!
//! Emits the line protocol of a gait device on stdout: one JSON object per
//! line with the device timestamp `t` (ms) and hip angle `h`, plus the
//! firmware-filtered kinematic channels in filtered mode. Prompt echoes and
//! corrupt lines are mixed in so the capture side sees what a real serial
//! link delivers.
//!
//! # Usage
//! ```bash
//! gait-simulation --cycles 20 | gaitscope --stdin
//! gait-simulation --mode filtered --realtime | gaitscope --stdin --mode filtered
//! ```

use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use gaitscope::pipeline::ProcessingMode;
use gaitscope::types::{Channel, TIMESTAMP_KEY};

// ============================================================================
// Gait Constants
// ============================================================================

/// Peak-to-peak hip excursion is twice this (degrees)
const HIP_AMPLITUDE: f64 = 25.0;
/// Hip flexion bias (degrees)
const HIP_OFFSET: f64 = 5.0;
/// Ankle excursion (degrees)
const ANKLE_AMPLITUDE: f64 = 15.0;
/// Ankle lags the hip by this fraction of a cycle
const ANKLE_LAG: f64 = 0.15;
/// Fraction of the cycle spent in stance
const STANCE_FRACTION: f64 = 0.6;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gait-simulation")]
#[command(about = "Synthetic gait telemetry for gaitscope testing")]
#[command(version = "1.0")]
struct Args {
    /// Number of gait cycles to emit
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=100_000))]
    cycles: u32,

    /// Sample rate in Hz
    #[arg(short, long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..=1000))]
    rate: u32,

    /// Nominal cycle period in milliseconds
    #[arg(short, long, default_value = "1200")]
    period_ms: u64,

    /// Per-cycle period jitter as a fraction of the nominal period
    #[arg(long, default_value = "0.05")]
    cadence_jitter: f64,

    /// Standard deviation of additive angle noise (degrees)
    #[arg(long, default_value = "0.3")]
    noise: f64,

    /// Channel set: raw (t, h, a) or filtered (all kinematic channels)
    #[arg(short, long, default_value = "raw")]
    mode: ProcessingMode,

    /// Probability of a corrupt line after each sample
    #[arg(long, default_value = "0.0")]
    garbage: f64,

    /// Device clock at the first sample (ms)
    #[arg(long, default_value = "0")]
    start_ms: u64,

    /// Pace output at the sample rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress the banner on stderr
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================================
// Simulation State
// ============================================================================

struct GaitState {
    rng: StdRng,
    noise: Normal<f64>,
    jitter: Normal<f64>,
    nominal_period_ms: f64,
    /// Period of the cycle in progress
    period_ms: f64,
    /// Position within the current cycle, 0..1
    cycle_phase: f64,
    prev_filtered: Option<f64>,
}

/// One emitted sample, already noisy.
struct GaitSample {
    hip: f64,
    ankle: f64,
    hip_filtered: f64,
    hip_velocity: f64,
    in_swing: bool,
    swing_progress: f64,
}

impl GaitState {
    fn new(args: &Args) -> Result<Self, rand_distr::NormalError> {
        let rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let nominal = args.period_ms.max(1) as f64;
        Ok(Self {
            rng,
            noise: Normal::new(0.0, args.noise.max(0.0))?,
            jitter: Normal::new(0.0, args.cadence_jitter.max(0.0) * nominal)?,
            nominal_period_ms: nominal,
            period_ms: nominal,
            cycle_phase: 0.0,
            prev_filtered: None,
        })
    }

    /// Advance by `dt_ms` and return the sample at the new position.
    /// Returns `true` alongside when a new cycle began.
    fn step(&mut self, dt_ms: f64) -> (GaitSample, bool) {
        self.cycle_phase += dt_ms / self.period_ms;
        let mut wrapped = false;
        if self.cycle_phase >= 1.0 {
            self.cycle_phase -= 1.0;
            let jitter = self.jitter.sample(&mut self.rng);
            self.period_ms = (self.nominal_period_ms + jitter).max(self.nominal_period_ms * 0.5);
            wrapped = true;
        }

        let angle = TAU * self.cycle_phase;
        let clean_hip = HIP_OFFSET + HIP_AMPLITUDE * angle.sin();
        let clean_ankle = ANKLE_AMPLITUDE * (angle - TAU * ANKLE_LAG).sin();
        let hip = clean_hip + self.noise.sample(&mut self.rng);
        let ankle = clean_ankle + self.noise.sample(&mut self.rng);

        // The firmware filter is modelled as a light exponential smoother.
        let hip_filtered = match self.prev_filtered {
            Some(prev) => 0.7 * prev + 0.3 * hip,
            None => hip,
        };
        let hip_velocity = self
            .prev_filtered
            .map_or(0.0, |prev| (hip_filtered - prev) / (dt_ms / 1000.0));
        self.prev_filtered = Some(hip_filtered);

        let in_swing = self.cycle_phase >= STANCE_FRACTION;
        let swing_progress = if in_swing {
            (self.cycle_phase - STANCE_FRACTION) / (1.0 - STANCE_FRACTION)
        } else {
            0.0
        };

        (
            GaitSample {
                hip,
                ankle,
                hip_filtered,
                hip_velocity,
                in_swing,
                swing_progress,
            },
            wrapped,
        )
    }

    fn corrupt_line(&mut self, t: u64) -> String {
        match self.rng.gen_range(0..4) {
            0 => format!("{{\"{TIMESTAMP_KEY}\":{t},\"h\":"),
            1 => format!("{{\"{TIMESTAMP_KEY}\":{t}}}"),
            2 => "> gc".to_string(),
            _ => "IMU status: ok".to_string(),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn sample_line(t: u64, sample: &GaitSample, mode: ProcessingMode) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert(TIMESTAMP_KEY.to_string(), t.into());
    obj.insert(Channel::Hip.wire_key().to_string(), round2(sample.hip).into());
    obj.insert(Channel::Ankle.wire_key().to_string(), round2(sample.ankle).into());

    if mode == ProcessingMode::Filtered {
        obj.insert(Channel::HipFiltered.wire_key().to_string(), round2(sample.hip_filtered).into());
        obj.insert(Channel::HipVelocity.wire_key().to_string(), round2(sample.hip_velocity).into());
        obj.insert(Channel::Phase.wire_key().to_string(), u8::from(sample.in_swing).into());
        obj.insert(Channel::SwingProgress.wire_key().to_string(), round2(sample.swing_progress).into());
        obj.insert(Channel::AnkleRaw.wire_key().to_string(), round2(sample.ankle).into());
        obj.insert(Channel::Assist.wire_key().to_string(), sample.in_swing.into());
    }
    serde_json::Value::Object(obj)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut state = GaitState::new(&args)?;

    let dt_ms = 1000.0 / f64::from(args.rate);
    let interval = Duration::from_secs_f64(dt_ms / 1000.0);

    if !args.quiet {
        eprintln!("{}", "=".repeat(60));
        eprintln!("GAIT DEVICE SIMULATION");
        eprintln!("  Cycles: {} x ~{} ms", args.cycles, args.period_ms);
        eprintln!("  Rate: {} Hz, mode: {}", args.rate, args.mode);
        if let Some(seed) = args.seed {
            eprintln!("  Random seed: {seed}");
        }
        eprintln!("{}", "=".repeat(60));
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Command: gc")?;

    let start = Instant::now();
    let mut elapsed_ms = 0.0_f64;
    let mut cycles_done = 0u32;
    let mut emitted = 0u64;

    while cycles_done < args.cycles {
        let t = args.start_ms + elapsed_ms.round() as u64;
        let (sample, wrapped) = state.step(dt_ms);
        if wrapped {
            cycles_done += 1;
        }

        writeln!(out, "{}", sample_line(t, &sample, args.mode))?;
        emitted += 1;

        if args.garbage > 0.0 && state.rng.gen_bool(args.garbage.min(1.0)) {
            let line = state.corrupt_line(t);
            writeln!(out, "{line}")?;
        }

        elapsed_ms += dt_ms;
        if args.realtime {
            out.flush()?;
            let due = start + interval.mul_f64(emitted as f64);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
    }
    out.flush()?;

    if !args.quiet {
        eprintln!("Emitted {emitted} samples over {cycles_done} cycles");
    }
    Ok(())
}
