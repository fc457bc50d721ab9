//! Print the records published by a running sensors2shm.
//!
//! ```bash
//! read_sensors front_range floor_matrix --interval 0.5
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sensors2shm::telemetry::{Payload, TelemetryReader, TelemetryRecord};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "read_sensors")]
#[command(about = "Read sensors2shm telemetry channels", long_about = None)]
struct Args {
    /// Channel names to read
    #[arg(required = true)]
    channels: Vec<String>,

    /// Seconds between reads
    #[arg(long, default_value_t = 1.0)]
    interval: f64,

    /// Directory holding the shared-memory segments
    #[arg(long, default_value = "/dev/shm")]
    shm_dir: PathBuf,

    /// Read once and exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let readers = args
        .channels
        .iter()
        .map(|name| {
            TelemetryReader::open(&args.shm_dir, name)
                .with_context(|| format!("attaching to channel '{}'", name))
        })
        .collect::<Result<Vec<_>>>()?;
    let interval = Duration::try_from_secs_f64(args.interval).context("invalid --interval")?;

    loop {
        for reader in &readers {
            match reader.read() {
                Ok(record) => print_record(reader.name(), &record),
                Err(e) => eprintln!("{}: {}", reader.name(), e),
            }
        }
        if args.once {
            return Ok(());
        }
        println!();
        thread::sleep(interval);
    }
}

fn print_record(name: &str, record: &TelemetryRecord) {
    if record.is_empty() {
        println!("{}: no data yet", name);
        return;
    }
    let class = record
        .class()
        .map(|c| c.to_string())
        .unwrap_or_else(|| format!("class {}", record.sensor_class));

    match &record.payload {
        Payload::Single {
            distance_mm,
            status,
        } => println!(
            "{} [{} t={}]: {} mm (status {})",
            name, class, record.timestamp, distance_mm, status
        ),
        Payload::Matrix {
            distances,
            statuses,
        } => {
            println!(
                "{} [{} t={}] {} zones:",
                name, class, record.timestamp, record.resolution
            );
            let side = square_side(distances.len());
            match side {
                Some(side) => {
                    for (row, status_row) in distances.chunks(side).zip(statuses.chunks(side)) {
                        let cells: Vec<String> = row
                            .iter()
                            .zip(status_row)
                            .map(|(d, s)| format!("{:>5}/{:<3}", d, s))
                            .collect();
                        println!("  {}", cells.join(" "));
                    }
                }
                None => println!("  {:?}", distances),
            }
        }
    }
}

fn square_side(len: usize) -> Option<usize> {
    (1..=8).find(|side| side * side == len)
}
