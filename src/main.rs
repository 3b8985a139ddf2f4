use std::f32::consts::PI;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use echo_fdnlms::{EchoCanceller, EngineConfig, HALF_FRAME};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SYLLABLE_SAMPLES: f32 = 4000.0;

/// Runs the echo canceller over a synthetic far-end/near-end scenario and
/// reports echo return loss enhancement over time.
#[derive(Parser, Debug)]
#[command(name = "echobench")]
struct Args {
    /// Adaptive filter length, in samples.
    #[arg(long, default_value_t = 256)]
    tail: usize,
    /// Sampling rate, in Hz.
    #[arg(long, default_value_t = 16_000)]
    sample_rate: u32,
    /// Echo path delay, in samples. Must be shorter than the tail.
    #[arg(long, default_value_t = 40)]
    delay: usize,
    /// Echo path gain.
    #[arg(long, default_value_t = 0.5)]
    gain: f32,
    /// Scenario length, in seconds.
    #[arg(long, default_value_t = 6.0)]
    seconds: f32,
    /// Add a near-end talker during the second half of the run.
    #[arg(long)]
    double_talk: bool,
    /// Seed for the signal generator.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Upper bound of the per-bin step sizes.
    #[arg(long, default_value_t = 0.5)]
    mju_max: f32,
    /// Drive the far-end with a constant tone at this frequency, in Hz,
    /// instead of enveloped noise.
    #[arg(long)]
    tone: Option<f32>,
    /// Seconds between progress reports.
    #[arg(long, default_value_t = 1.0)]
    report_interval: f32,
    /// Directory receiving far.wav, near.wav and out.wav.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

struct Scenario {
    far: Vec<i16>,
    near: Vec<i16>,
    echo: Vec<i16>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    ensure!(
        args.delay < args.tail,
        "echo delay {} does not fit in a {}-tap filter",
        args.delay,
        args.tail
    );
    ensure!(args.seconds > 0.0, "scenario length must be positive");
    ensure!(args.report_interval > 0.0, "report interval must be positive");

    let config = EngineConfig::new(args.tail, args.sample_rate as f32).with_mju_max(args.mju_max);
    let mut canceller = EchoCanceller::with_config(config).context("failed to build canceller")?;

    let len = (args.seconds * args.sample_rate as f32) as usize;
    let scenario = generate(args, len);
    info!(
        "scenario: {len} samples, delay {}, gain {}, double talk {}",
        args.delay, args.gain, args.double_talk
    );

    let mut output = vec![0i16; len];
    let report_every = ((args.report_interval * args.sample_rate as f32) as usize).max(1);
    let mut restarts = 0u32;
    let mut reported = 0usize;

    for n in 0..len {
        output[n] = canceller.process(scenario.far[n], scenario.near[n]);
        if canceller.just_restarted() {
            restarts += 1;
            warn!("canceller restarted at sample {n}");
        }

        let end = n + 1;
        if end - reported == report_every || end == len {
            info!(
                "t={:.2}s erle {:.1} dB, mju {:.4}, eit {:.4}, errors {}",
                end as f32 / args.sample_rate as f32,
                erle_db(&scenario, &output, reported..end),
                canceller.mju(),
                canceller.eit(),
                canceller.error_count()
            );
            reported = end;
        }
    }

    let settle = len * 9 / 10;
    println!(
        "final erle {:.1} dB over the last {:.2}s, {restarts} restart(s)",
        erle_db(&scenario, &output, settle..len),
        (len - settle) as f32 / args.sample_rate as f32
    );

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        for (name, samples) in [
            ("far.wav", &scenario.far),
            ("near.wav", &scenario.near),
            ("out.wav", &output),
        ] {
            let path = dir.join(name);
            write_wav(&path, args.sample_rate, samples)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        info!("wrote far.wav, near.wav and out.wav to {}", dir.display());
    }
    Ok(())
}

fn generate(args: &Args, len: usize) -> Scenario {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let far: Vec<i16> = (0..len)
        .map(|n| match args.tone {
            Some(freq) => {
                let t = n as f32 / args.sample_rate as f32;
                (8000.0 * (2.0 * PI * freq * t).sin()) as i16
            }
            None => {
                let phase = PI * n as f32 / SYLLABLE_SAMPLES;
                let envelope = 0.2 + 0.8 * phase.sin().powi(2);
                (8000.0 * envelope * rng.random_range(-1.0f32..1.0)) as i16
            }
        })
        .collect();

    let echo: Vec<i16> = (0..len)
        .map(|n| match n.checked_sub(args.delay) {
            Some(src) => (args.gain * far[src] as f32) as i16,
            None => 0,
        })
        .collect();

    let talker_start = len / 2;
    let near = echo
        .iter()
        .enumerate()
        .map(|(n, &e)| {
            let talker = if args.double_talk && n >= talker_start {
                let t = n as f32 / args.sample_rate as f32;
                3000.0 * (2.0 * PI * 220.0 * t).sin()
            } else {
                0.0
            };
            let noise = rng.random_range(-20.0f32..20.0);
            (e as f32 + talker + noise).clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect();

    Scenario { far, near, echo }
}

/// Echo power over the echo left in the output across `range`.
///
/// Output sample `n` cancels near-end sample `n - HALF_FRAME`, and near-end
/// speech comes through at half amplitude, so the residual echo is the output
/// minus half the delayed local signal.
fn erle_db(scenario: &Scenario, output: &[i16], range: Range<usize>) -> f32 {
    let mut echo_power = 0.0f64;
    let mut residual_power = 0.0f64;
    for n in range.start.max(HALF_FRAME)..range.end {
        let echo = f64::from(scenario.echo[n - HALF_FRAME]);
        let local = f64::from(scenario.near[n - HALF_FRAME]) - echo;
        let residual = f64::from(output[n]) - 0.5 * local;
        echo_power += echo * echo;
        residual_power += residual * residual;
    }
    if residual_power == 0.0 {
        return f32::INFINITY;
    }
    (10.0 * (echo_power / residual_power).log10()) as f32
}

fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
