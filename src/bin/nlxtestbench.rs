//! Neuralynx UDP packet generator, for exercising a `Reader` processor
//! without real acquisition hardware.
//!
//! Grounded in `tools/nlxtestbench`: a single gaussian white-noise source
//! (`whitenoisesource.cpp`) streamed over UDP at a configurable rate,
//! rather than the original's interactive multi-source picker — this
//! bench only ever needs one source to drive a test graph.

use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use falcon::constants::NLX_SIGNAL_SAMPLING_FREQUENCY;
use tracing_subscriber::EnvFilter;

/// Command-line configuration for the test-bench packet generator.
#[derive(Parser, Debug)]
#[command(name = "nlxtestbench", about = "Streams synthetic Neuralynx UDP packets")]
struct Args {
    /// Destination address:port to stream packets to.
    #[arg(long, default_value = "127.0.0.1:26090")]
    target: String,

    /// Number of channels per packet.
    #[arg(long, default_value_t = 4)]
    nchannels: usize,

    /// Packet rate, in Hz.
    #[arg(long, default_value_t = NLX_SIGNAL_SAMPLING_FREQUENCY)]
    rate: f64,

    /// Number of packets to stream; 0 means stream indefinitely.
    #[arg(long, default_value_t = 0)]
    npackets: u64,

    /// Mean of the generated gaussian samples, in microvolts.
    #[arg(long, default_value_t = 0.0)]
    mean: f64,

    /// Standard deviation of the generated gaussian samples, in microvolts.
    #[arg(long, default_value_t = 50.0)]
    stdev: f64,

    /// Parallel-port bitfield to stamp on every packet, for exercising a
    /// reader's hardware-trigger gate.
    #[arg(long, default_value_t = 0)]
    port_bits: u32,
}

/// Samples one value from `Normal(mean, stdev)` via the Box-Muller transform.
fn gaussian_sample(rng: &mut impl rand::Rng, mean: f64, stdev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mean + z0 * stdev
}

/// Encodes one record in the wire layout `NlxRecord::from_network_buffer`
/// expects: `nchannels` little-endian i32 samples, a u32 port bitfield,
/// then a u64 microsecond timestamp.
fn encode_record(samples: &[i32], port_bits: u32, timestamp_us: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(samples.len() * 4 + 4 + 8);
    for s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf.extend_from_slice(&port_bits.to_le_bytes());
    buf.extend_from_slice(&timestamp_us.to_le_bytes());
    buf
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    if args.rate <= 0.0 {
        tracing::error!(rate = args.rate, "stream rate must be positive");
        return std::process::ExitCode::FAILURE;
    }

    let socket = match UdpSocket::bind("0.0.0.0:0") {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(%err, "failed to bind local socket");
            return std::process::ExitCode::FAILURE;
        }
    };
    if let Err(err) = socket.connect(&args.target) {
        tracing::error!(target = %args.target, %err, "failed to connect to target");
        return std::process::ExitCode::FAILURE;
    }

    tracing::info!(
        target = %args.target,
        nchannels = args.nchannels,
        rate = args.rate,
        npackets = args.npackets,
        "streaming synthetic Neuralynx packets (ctrl-c to stop)"
    );

    let period = Duration::from_secs_f64(1.0 / args.rate);
    let delta_us = (1_000_000.0 / args.rate).round() as u64;
    let unlimited = args.npackets == 0;
    let mut rng = rand::thread_rng();
    let mut timestamp_us: u64 = 0;
    let mut sent: u64 = 0;

    while unlimited || sent < args.npackets {
        let tick = Instant::now();

        let samples: Vec<i32> =
            (0..args.nchannels).map(|_| gaussian_sample(&mut rng, args.mean, args.stdev) as i32).collect();
        let buf = encode_record(&samples, args.port_bits, timestamp_us);

        if let Err(err) = socket.send(&buf) {
            tracing::warn!(%err, "failed to send packet");
        }

        timestamp_us += delta_us;
        sent += 1;
        if sent % 32_000 == 0 {
            tracing::info!(sent, "packets streamed");
        }

        let elapsed = tick.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        }
    }

    tracing::info!(sent, "streaming done");
    std::process::ExitCode::SUCCESS
}
