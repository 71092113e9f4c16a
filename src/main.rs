use std::process::exit;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::json;

use raindrop::logging;
use raindrop::{
    Channel, ConnectionSettings, DeviceStatus, Polarity, RainDrop, SerialTransport,
    TriggerSettings, TriggerSource, WaveFunction, WaveSettings,
};

/// Status polls before a capture is read anyway.
const READY_POLLS: usize = 16;
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "raindrop-cli", about = "Drive a RainDrop instrument over USB")]
struct Cli {
    /// Link baud rate applied after opening the port
    #[arg(long, default_value_t = 1_152_000)]
    baud: u32,
    /// Delay around supply voltage changes, in milliseconds
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices by serial number
    List,
    /// Print acquisition status and the device configuration
    Status(DeviceArg),
    /// Capture one or more traces and print them as JSON
    Capture(CaptureArgs),
    /// Program a power supply output
    Supply(SupplyArgs),
    /// Program a wave generator channel
    Wavegen(WavegenArgs),
}

#[derive(Args, Debug)]
struct DeviceArg {
    /// Device serial number (or serial port path)
    #[arg(short, long)]
    serial: String,
}

#[derive(Args, Debug)]
struct CaptureArgs {
    #[command(flatten)]
    device: DeviceArg,
    #[arg(short, long, value_enum, default_value_t = ChannelArg::A)]
    channel: ChannelArg,
    /// Sample rate in Hz
    #[arg(long, default_value_t = 1e6)]
    rate: f64,
    /// Samples per trace (power of two, 32..=2048)
    #[arg(long, default_value_t = 2048)]
    samples: usize,
    /// Expected signal amplitude in volts; selects the input range
    #[arg(long, default_value_t = 5.0)]
    amplitude: f64,
    /// Expected signal offset in volts
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset: f64,
    /// Trigger level in volts
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    level: f64,
    /// Traces blended into the result
    #[arg(long, default_value_t = 1)]
    averaging: usize,
    /// Number of captures; the last (averaged) one is printed
    #[arg(long, default_value_t = 1)]
    count: usize,
    /// Print statistics only, without samples
    #[arg(long)]
    summary: bool,
}

#[derive(Args, Debug)]
struct SupplyArgs {
    #[command(flatten)]
    device: DeviceArg,
    #[arg(short, long, value_enum)]
    polarity: PolarityArg,
    #[arg(long, allow_hyphen_values = true)]
    volts: f64,
    /// Turn the output on after programming it
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    /// Turn the output off
    #[arg(long)]
    disable: bool,
}

#[derive(Args, Debug)]
struct WavegenArgs {
    #[command(flatten)]
    device: DeviceArg,
    #[arg(short, long, value_enum)]
    channel: SingleChannelArg,
    #[arg(short, long, value_enum, default_value_t = FunctionArg::Sine)]
    function: FunctionArg,
    /// Frequency in Hz
    #[arg(long, default_value_t = 1e3)]
    frequency: f64,
    #[arg(long, default_value_t = 1.0)]
    amplitude: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    offset: f64,
    #[arg(long, default_value_t = 0.5)]
    symmetry: f64,
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    phase: f64,
    /// Leave the output disabled
    #[arg(long)]
    off: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelArg {
    A,
    B,
    Both,
}

impl ChannelArg {
    fn channels(self) -> &'static [Channel] {
        match self {
            ChannelArg::A => &[Channel::A],
            ChannelArg::B => &[Channel::B],
            ChannelArg::Both => &Channel::ALL,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SingleChannelArg {
    A,
    B,
}

impl From<SingleChannelArg> for Channel {
    fn from(arg: SingleChannelArg) -> Self {
        match arg {
            SingleChannelArg::A => Channel::A,
            SingleChannelArg::B => Channel::B,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolarityArg {
    Positive,
    Negative,
}

impl From<PolarityArg> for Polarity {
    fn from(arg: PolarityArg) -> Self {
        match arg {
            PolarityArg::Positive => Polarity::Positive,
            PolarityArg::Negative => Polarity::Negative,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FunctionArg {
    Direct,
    Sine,
    Square,
    Triangle,
    RampUp,
    RampDown,
    Noise,
    Pulse,
    Trapezium,
    SinePower,
}

impl From<FunctionArg> for WaveFunction {
    fn from(arg: FunctionArg) -> Self {
        match arg {
            FunctionArg::Direct => WaveFunction::Direct,
            FunctionArg::Sine => WaveFunction::Sine,
            FunctionArg::Square => WaveFunction::Square,
            FunctionArg::Triangle => WaveFunction::Triangle,
            FunctionArg::RampUp => WaveFunction::RampUp,
            FunctionArg::RampDown => WaveFunction::RampDown,
            FunctionArg::Noise => WaveFunction::Noise,
            FunctionArg::Pulse => WaveFunction::Pulse,
            FunctionArg::Trapezium => WaveFunction::Trapezium,
            FunctionArg::SinePower => WaveFunction::SinePower,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging();

    let settings = ConnectionSettings {
        baud_rate: cli.baud,
        settle_delay: Duration::from_millis(cli.settle_ms),
        ..ConnectionSettings::default()
    };
    let device = RainDrop::with_settings(Box::new(SerialTransport::new()), settings);

    match cli.command {
        Command::List => {
            let devices = device.list_devices().context("listing devices")?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
            Ok(())
        }
        Command::Status(args) => with_device(&device, &args.serial, status),
        Command::Capture(args) => with_device(&device, &args.device.serial, |d| capture(d, &args)),
        Command::Supply(args) => with_device(&device, &args.device.serial, |d| supply(d, &args)),
        Command::Wavegen(args) => with_device(&device, &args.device.serial, |d| wavegen(d, &args)),
    }
}

/// Connect, run `f`, and always disconnect afterwards.
fn with_device(
    device: &RainDrop,
    serial: &str,
    f: impl FnOnce(&RainDrop) -> Result<()>,
) -> Result<()> {
    device
        .connect(serial)
        .with_context(|| format!("connecting to {serial}"))?;
    let result = f(device);
    if let Err(e) = device.disconnect() {
        warn!("disconnect failed: {}", e);
    }
    result
}

fn status(device: &RainDrop) -> Result<()> {
    let status = device.status().context("reading status")?;
    let report = json!({
        "device": device.current_device(),
        "status": status,
        "calibration": device.calibration()?,
        "config": &*device.config(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn capture(device: &RainDrop, args: &CaptureArgs) -> Result<()> {
    if args.count == 0 {
        bail!("--count must be at least 1");
    }
    let channels = args.channel.channels();
    for ch in Channel::ALL {
        device
            .configure_oscilloscope_channel(ch, channels.contains(&ch), args.offset, args.amplitude)
            .with_context(|| format!("configuring channel {ch:?}"))?;
    }
    device
        .set_sample_rate(args.rate)
        .context("setting sample rate")?;
    device
        .set_buffer_size(args.samples)
        .context("setting buffer size")?;
    device.set_averaging(args.averaging)?;

    let source = match channels[0] {
        Channel::A => TriggerSource::DetectorAnalogInCh1,
        Channel::B => TriggerSource::DetectorAnalogInCh2,
    };
    device
        .configure_trigger(TriggerSettings {
            source,
            level: args.level,
            ..TriggerSettings::default()
        })
        .context("configuring trigger")?;

    let mut last = None;
    for i in 0..args.count {
        device.set_running(true)?;
        if !wait_until_done(device)? {
            warn!("capture {} not complete after {} polls, reading anyway", i, READY_POLLS);
        }
        last = Some(device.read_oscilloscope().context("reading traces")?);
    }
    device.set_running(false)?;

    let Some(acquisition) = last else {
        return Ok(());
    };
    if args.summary {
        let summary: Vec<_> = Channel::ALL
            .iter()
            .filter_map(|&ch| {
                acquisition.channel(ch).map(|t| {
                    json!({
                        "channel": ch,
                        "statistics": t.statistics,
                        "period": t.period,
                    })
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", serde_json::to_string(&acquisition)?);
    }
    Ok(())
}

fn wait_until_done(device: &RainDrop) -> Result<bool> {
    for _ in 0..READY_POLLS {
        if device.status()? == DeviceStatus::Done {
            return Ok(true);
        }
        thread::sleep(READY_POLL_INTERVAL);
    }
    Ok(false)
}

fn supply(device: &RainDrop, args: &SupplyArgs) -> Result<()> {
    let polarity = Polarity::from(args.polarity);
    if args.disable {
        device.set_supply_enabled(polarity, false)?;
    }
    device
        .set_supply_voltage(polarity, args.volts)
        .with_context(|| format!("setting {polarity:?} supply to {} V", args.volts))?;
    if args.enable {
        device.set_supply_enabled(polarity, true)?;
    }
    info!("{:?} supply programmed", polarity);
    println!(
        "{}",
        serde_json::to_string_pretty(&device.config().supply[polarity.index()])?
    );
    Ok(())
}

fn wavegen(device: &RainDrop, args: &WavegenArgs) -> Result<()> {
    let channel = Channel::from(args.channel);
    let settings = WaveSettings {
        function: args.function.into(),
        frequency: args.frequency,
        amplitude: args.amplitude,
        offset: args.offset,
        symmetry: args.symmetry,
        phase: args.phase,
    };
    device
        .configure_wave_generator(channel, settings)
        .context("configuring wave generator")?;
    device.set_wave_enabled(channel, !args.off)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&device.config().wave_generator[channel.index()])?
    );
    Ok(())
}
