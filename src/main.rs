use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use eogrec::{
    available_channels, list_ports, logging, record, Bitalino, DeviceConfig, Record,
};

#[derive(Parser, Debug)]
#[command(name = "eogrec", about = "Record EOG signals from a BITalino board")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    Ports,
    /// Print firmware version and battery level
    Info {
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Acquire samples into a record file
    Record {
        #[command(flatten)]
        device: DeviceArgs,
        /// Output record file
        #[arg(short, long)]
        output: PathBuf,
        /// Number of batches to read
        #[arg(long, default_value_t = 100)]
        batches: usize,
        /// Samples per batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },
    /// Print the samples stored in a record file
    Dump {
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct DeviceArgs {
    /// Serial port (e.g., /dev/rfcomm0)
    #[arg(short, long)]
    port: String,
    #[arg(short, long)]
    baud: Option<u32>,
    /// Sampling rate in Hz (1, 10, 100, 1000)
    #[arg(short, long)]
    rate: Option<u16>,
    /// Analog channel for the horizontal electrodes
    #[arg(long)]
    horizontal: Option<u8>,
    /// Analog channel for the vertical electrodes
    #[arg(long)]
    vertical: Option<u8>,
}

impl DeviceArgs {
    fn config(&self) -> DeviceConfig {
        let defaults = DeviceConfig::default();
        DeviceConfig {
            port: self.port.clone(),
            baud_rate: self.baud.unwrap_or(defaults.baud_rate),
            sampling_rate: self.rate.unwrap_or(defaults.sampling_rate),
            horizontal_channel: self.horizontal.unwrap_or(defaults.horizontal_channel),
            vertical_channel: self.vertical.unwrap_or(defaults.vertical_channel),
            ..defaults
        }
    }
}

fn main() {
    logging::init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    match Args::parse().command {
        Command::Ports => print_ports(),
        Command::Info { device } => print_info(&device.config()),
        Command::Record {
            device,
            output,
            batches,
            batch_size,
        } => acquire(&device.config(), &output, batches, batch_size),
        Command::Dump { file } => dump(&file),
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for port in ports {
        println!("Found port: {port}");
    }
    Ok(())
}

fn connect(config: &DeviceConfig) -> Result<Bitalino> {
    let mut device = Bitalino::open(config)
        .with_context(|| format!("Failed to connect to {}", config.port))?;
    device
        .initialize(config.horizontal_channel, config.vertical_channel)
        .context("Failed to initialize device")?;
    Ok(device)
}

fn print_info(config: &DeviceConfig) -> Result<()> {
    let mut device = connect(config)?;
    println!("Device: {}", Bitalino::NAME);
    println!("Version: {}", device.version()?);
    println!("Firmware: {:?}", device.firmware());
    println!("Battery: {}%", device.battery()?);
    println!("Channels: {:?}", available_channels());
    device.close();
    Ok(())
}

fn acquire(config: &DeviceConfig, output: &Path, batches: usize, batch_size: usize) -> Result<()> {
    let mut device = connect(config)?;
    let mut rec = Record::create(output)
        .with_context(|| format!("Failed to create record at {}", output.display()))?;

    println!(
        "Recording {} batches of {} samples at {}Hz...",
        batches,
        batch_size,
        device.sampling_rate().hz()
    );
    let acquired = record_batches(&mut device, &mut rec, batches, batch_size);
    device.close();
    acquired?;

    let count = rec.count();
    rec.close()?;
    println!("Wrote {} samples to {}", count, output.display());
    Ok(())
}

fn record_batches(
    device: &mut Bitalino,
    rec: &mut Record,
    batches: usize,
    batch_size: usize,
) -> Result<()> {
    device.start()?;
    for _ in 0..batches {
        let samples = device.read(batch_size)?;
        rec.add_samples(&samples)?;
    }
    device.stop()?;
    Ok(())
}

fn dump(file: &Path) -> Result<()> {
    let samples = record::read(file)
        .with_context(|| format!("Failed to read record {}", file.display()))?;
    for sample in samples {
        println!("{} {} {}", sample.index, sample.horizontal, sample.vertical);
    }
    Ok(())
}
