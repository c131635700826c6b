use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use hrv_link::simulation::load_trace;
use hrv_link::{
    describe, logging, FeedMode, HrvSummary, LiveCapture, SerialChannel, Session, SessionConfig,
};

/// How long the consumer waits for a sample before checking the producer.
const LIVE_POLL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "hrv-link", about = "Drive an HRV monitor over a serial port")]
struct Args {
    /// Serial port of the monitor (e.g., /dev/ttyACM0 or COM3)
    #[arg(short = 'c', long)]
    port: String,
    /// Baud rate (overrides the config file)
    #[arg(long)]
    baud: Option<u32>,
    /// ECG trace CSV fed to the device in simulation mode
    #[arg(short = 's', long)]
    samples: Option<PathBuf>,
    /// Feed the trace instead of waiting for the start button
    #[arg(long)]
    simulation: bool,
    /// Continuous mode: do not wait for the device to finish replaying the trace
    #[arg(long)]
    cm: bool,
    /// Print live telemetry until the device reports "Done data"
    #[arg(long)]
    live: bool,
    /// Where to write the collected measurements
    #[arg(long, default_value = "measurements.json")]
    output: PathBuf,
    /// JSON session configuration
    #[arg(long)]
    config: Option<PathBuf>,
    /// Give up on a button press after this many seconds (default: wait forever)
    #[arg(long, value_name = "SECS")]
    button_timeout: Option<u64>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    logging::init_rust_logging();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(secs) = args.button_timeout {
        config.button_timeout = Some(Duration::from_secs(secs));
    }

    let trace = if args.simulation {
        let Some(path) = &args.samples else {
            bail!("--simulation needs a trace file (--samples)");
        };
        let trace =
            load_trace(path).with_context(|| format!("loading trace {}", path.display()))?;
        println!("Loaded {} readings from {}", trace.len(), path.display());
        Some(trace)
    } else {
        None
    };

    let channel = SerialChannel::open(&args.port, config.baud_rate, config.poll_interval)
        .with_context(|| format!("opening {}", args.port))?;
    println!("Connected to {} at {} baud", args.port, config.baud_rate);
    let session = Session::new(channel, config);

    if args.live {
        run_live(session, trace.as_deref())
    } else {
        run_single(session, trace.as_deref(), &args)
    }
}

fn run_single(mut session: Session<SerialChannel>, trace: Option<&[f64]>, args: &Args) -> Result<()> {
    let mode = if args.cm {
        FeedMode::Continuous
    } else {
        FeedMode::SingleShot
    };
    if trace.is_none() {
        println!("Press the button to start monitoring, then again to stop.");
    }
    let measurements = session.run(trace, mode).context("monitoring session failed")?;

    measurements
        .write_json(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;
    println!("{}", HrvSummary::from_measurements(&measurements));
    println!("Measurements written to {}", args.output.display());
    Ok(())
}

fn run_live(mut session: Session<SerialChannel>, trace: Option<&[f64]>) -> Result<()> {
    if let Some(trace) = trace {
        session
            .simulate(trace, FeedMode::Continuous)
            .context("feeding trace")?;
    }

    let (capture, stream) = LiveCapture::spawn(session).context("starting live capture")?;
    println!("{:>8} {:>10} {:>8}", "index", "ecg", "bpm");
    while !(capture.is_finished() && stream.is_finished()) {
        if let Some(sample) = stream.recv_timeout(LIVE_POLL) {
            println!("{:>8} {:>10.3} {:>8.1}", sample.index, sample.ecg, sample.bpm);
        }
    }
    for sample in stream.drain() {
        println!("{:>8} {:>10.3} {:>8.1}", sample.index, sample.ecg, sample.bpm);
    }

    let (_session, outcome) = capture.join().context("live capture failed")?;
    info!("live capture finished: samples={}", outcome.samples);

    let stats = describe(&outcome.histogram.as_f64());
    println!("Samples: {} ({} skipped)", outcome.samples, outcome.skipped);
    println!("Histogram mean: {}", stats.mean);
    println!("Histogram std deviation: {}", stats.std_dev);
    Ok(())
}
