use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use clap::Parser;
use echo_fdnlms::{EchoCanceller, EngineConfig};
use log::{debug, info, warn};

const CHUNK_SIZE: usize = 4096;

/// Removes the echo of a far-end recording from a near-end recording.
///
/// Both inputs must be mono 16-bit PCM at the same sample rate. The output is
/// written at that rate and lags the near-end input by half an analysis frame.
#[derive(Parser, Debug)]
#[command(name = "aec-wav")]
struct Args {
    /// Far-end (loudspeaker) signal.
    far: PathBuf,
    /// Near-end (microphone) signal.
    near: PathBuf,
    /// Destination for the echo-cancelled signal.
    output: PathBuf,
    /// Adaptive filter length, in samples.
    #[arg(long, default_value_t = 1024)]
    tail: usize,
    /// Lower edge of the near-end band-pass, in Hz.
    #[arg(long, default_value_t = 50.0)]
    band_low: f32,
    /// Upper edge of the near-end band-pass, in Hz.
    #[arg(long, default_value_t = 5000.0)]
    band_high: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let (far, far_rate) = read_mono(&args.far)?;
    let (near, near_rate) = read_mono(&args.near)?;
    ensure!(
        far_rate == near_rate,
        "sample rates differ: far-end {far_rate} Hz, near-end {near_rate} Hz"
    );
    if far.len() != near.len() {
        warn!(
            "input lengths differ ({} vs {} samples), processing the shorter span",
            far.len(),
            near.len()
        );
    }
    let len = far.len().min(near.len());

    let config = EngineConfig::new(args.tail, far_rate as f32).with_band(args.band_low, args.band_high);
    let mut canceller = EchoCanceller::with_config(config).context("failed to build canceller")?;
    let settings = canceller.config();
    info!(
        "tail {} taps, band {} Hz .. {} Hz, mju cap {}, restart after {} overflow(s)",
        settings.tail_length,
        settings.band_low_hz,
        settings.band_high_hz,
        settings.mju_max,
        settings.restart_threshold
    );

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: far_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("failed to create {}", args.output.display()))?;

    let mut cleaned = [0i16; CHUNK_SIZE];
    let mut restarts = 0u32;
    for (far_chunk, near_chunk) in far[..len].chunks(CHUNK_SIZE).zip(near[..len].chunks(CHUNK_SIZE)) {
        let out = &mut cleaned[..far_chunk.len()];
        for ((slot, &x), &d) in out.iter_mut().zip(far_chunk).zip(near_chunk) {
            *slot = canceller.process(x, d);
            if canceller.just_restarted() {
                restarts += 1;
            }
        }
        for &sample in out.iter() {
            writer
                .write_sample(sample)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
        }
        debug!(
            "{} samples, mju {:.4}, eit {:.4}",
            canceller.total_samples(),
            canceller.mju(),
            canceller.eit()
        );
    }
    writer.finalize().context("failed to finalize output")?;

    info!(
        "cancelled {len} samples at {far_rate} Hz into {} ({restarts} restart(s))",
        args.output.display()
    );
    Ok(())
}

fn read_mono(path: &Path) -> Result<(Vec<i16>, u32)> {
    let reader =
        hound::WavReader::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        bail!(
            "{} must be mono 16-bit PCM (found {} channel(s), {} bits)",
            path.display(),
            spec.channels,
            spec.bits_per_sample
        );
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok((samples, spec.sample_rate))
}
