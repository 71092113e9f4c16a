//! Frame codec for the RainDrop binary protocol.
//!
//! Every request is a single frame starting with `AA FF`, followed by a
//! subsystem opcode and an operation-specific suffix. Multi-byte fields are
//! big-endian. Encoding is pure: the same [`Command`] always yields the same
//! bytes, and each frame declares how many response bytes the instrument
//! sends back (zero for fire-and-forget frames).
//!
//! Only wire-encodability is checked here (field widths, power-of-two buffer
//! sizes and so on). Business rules such as supply voltage limits belong to
//! the orchestrator in [`crate::raindrop`].

use serde::Serialize;

use crate::errors::{DriverError, Result};

// ============================================================================
// Constants
// ============================================================================

const PREFIX: [u8; 2] = [0xAA, 0xFF];

const SUBSYSTEM_OSCILLOSCOPE: u8 = 0x01;
const SUBSYSTEM_WAVE_GENERATOR: u8 = 0x02;
const SUBSYSTEM_SUPPLY: u8 = 0x03;
const SUBSYSTEM_TRIGGER: u8 = 0x04;
const SUBSYSTEM_CALIBRATION: u8 = 0x06;

/// Oscilloscope sample clock tick (40 MHz).
const SAMPLE_TICK_SECS: f64 = 2.5e-8;

/// Wave generator DDS reference clock.
const DDS_CLOCK_HZ: f64 = 40e6;

/// Mid-scale code of the 12-bit ADC.
pub const ADC_MID_SCALE: i32 = 2048;

/// Size of the raw calibration response, including the leading status byte.
pub const CALIBRATION_RESPONSE_LEN: usize = 17;

/// Bytes returned by the status query; the status itself sits at offset 3.
pub const STATUS_RESPONSE_LEN: usize = 4;

pub const MIN_BUFFER_SIZE: usize = 32;
pub const MAX_BUFFER_SIZE: usize = 2048;

// ============================================================================
// Parameter types
// ============================================================================

/// One of the two channels of a dual-channel subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    /// Index into per-channel tables (A = 0, B = 1).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }

    fn wire(self) -> u8 {
        self.index() as u8
    }
}

/// Oscilloscope input range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Range {
    #[default]
    V5,
    V25,
}

impl Range {
    /// Full-scale voltage of the range.
    pub fn volts(self) -> f64 {
        match self {
            Range::V5 => 5.0,
            Range::V25 => 25.0,
        }
    }

    fn wire(self) -> u8 {
        match self {
            Range::V5 => 0x00,
            Range::V25 => 0x01,
        }
    }
}

/// Power supply output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const ALL: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Polarity::Positive => 0,
            Polarity::Negative => 1,
        }
    }
}

/// What happens when no trigger event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TriggerTimeout {
    /// Wait forever for a trigger.
    Forever,
    /// Capture anyway after the instrument's auto timeout.
    #[default]
    Auto,
}

/// Trigger source selector. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum TriggerSource {
    None = 0,
    #[default]
    DetectorAnalogInCh1 = 1,
    DetectorAnalogInCh2 = 2,
    AnalogOut1 = 3,
    AnalogOut2 = 4,
    DetectorDigitalIn = 5,
    DigitalOut = 6,
    Manual = 7,
    External1 = 8,
    External2 = 9,
    DigitalIn = 10,
}

impl TriggerSource {
    /// The oscilloscope channel whose analog detector this source listens to.
    pub fn analog_channel(self) -> Option<Channel> {
        match self {
            TriggerSource::DetectorAnalogInCh1 => Some(Channel::A),
            TriggerSource::DetectorAnalogInCh2 => Some(Channel::B),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum TriggerCondition {
    #[default]
    Rise = 0,
    Fall = 1,
    Edge = 2,
}

/// Wave generator function. Discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum WaveFunction {
    Direct = 0,
    #[default]
    Sine = 1,
    Square = 2,
    Triangle = 3,
    RampUp = 4,
    RampDown = 5,
    Noise = 6,
    Pulse = 7,
    Trapezium = 8,
    SinePower = 9,
    Custom = 10,
    Play = 31,
}

/// Acquisition state reported by the status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Ready,
    Armed,
    Done,
    /// Triggered and running share the same code.
    Running,
    Config,
    Prefill,
    Wait,
    Unknown(u8),
}

impl From<u8> for DeviceStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => DeviceStatus::Ready,
            1 => DeviceStatus::Armed,
            2 => DeviceStatus::Done,
            3 => DeviceStatus::Running,
            4 => DeviceStatus::Config,
            5 => DeviceStatus::Prefill,
            7 => DeviceStatus::Wait,
            other => DeviceStatus::Unknown(other),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OscilloscopeCommand {
    ChannelEnable { channel: Channel, enabled: bool },
    ChannelRange { channel: Channel, range: Range },
    SampleRate { hz: f64 },
    BufferSize { samples: usize },
    Run { running: bool },
    GetStatus,
    StopStatusStream,
    ReadChannel { channel: Channel, samples: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerCommand {
    Timeout(TriggerTimeout),
    Source(TriggerSource),
    /// `level` in volts, relative to the full scale of `range`.
    Level { level: f64, range: Range },
    Condition(TriggerCondition),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SupplyCommand {
    /// `code` is the calibrated DAC code from [`crate::calibration`].
    Voltage { polarity: Polarity, code: i16 },
    Enable { polarity: Polarity, enabled: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaveGenCommand {
    Function { channel: Channel, function: WaveFunction },
    Frequency { channel: Channel, hz: f64 },
    Amplitude { channel: Channel, code: u32 },
    Offset { channel: Channel, code: u32 },
    /// `symmetry` is a duty fraction in `0.0..=1.0`.
    Symmetry { channel: Channel, symmetry: f64 },
    /// Phase encoding is not known for the current firmware; the frame always
    /// carries a zero payload.
    Phase { channel: Channel, degrees: f64 },
    Enable { channel: Channel, enabled: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationCommand {
    Get,
}

/// Any request the instrument understands, grouped by subsystem.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Oscilloscope(OscilloscopeCommand),
    Trigger(TriggerCommand),
    Supply(SupplyCommand),
    WaveGen(WaveGenCommand),
    Calibration(CalibrationCommand),
}

impl From<OscilloscopeCommand> for Command {
    fn from(c: OscilloscopeCommand) -> Self {
        Command::Oscilloscope(c)
    }
}

impl From<TriggerCommand> for Command {
    fn from(c: TriggerCommand) -> Self {
        Command::Trigger(c)
    }
}

impl From<SupplyCommand> for Command {
    fn from(c: SupplyCommand) -> Self {
        Command::Supply(c)
    }
}

impl From<WaveGenCommand> for Command {
    fn from(c: WaveGenCommand) -> Self {
        Command::WaveGen(c)
    }
}

impl From<CalibrationCommand> for Command {
    fn from(c: CalibrationCommand) -> Self {
        Command::Calibration(c)
    }
}

/// An encoded request ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: Vec<u8>,
    response_len: usize,
}

impl CommandFrame {
    fn new(subsystem: u8, response_len: usize) -> Self {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&PREFIX);
        bytes.push(subsystem);
        Self {
            bytes,
            response_len,
        }
    }

    fn push(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of bytes the instrument answers with; zero means none are read.
    pub fn response_len(&self) -> usize {
        self.response_len
    }
}

/// Encode a command into its wire frame.
pub fn encode(command: &Command) -> Result<CommandFrame> {
    match command {
        Command::Oscilloscope(c) => encode_oscilloscope(c),
        Command::Trigger(c) => encode_trigger(c),
        Command::Supply(c) => Ok(encode_supply(c)),
        Command::WaveGen(c) => encode_wave_gen(c),
        Command::Calibration(CalibrationCommand::Get) => {
            Ok(CommandFrame::new(SUBSYSTEM_CALIBRATION, CALIBRATION_RESPONSE_LEN).push(&[0x01]))
        }
    }
}

fn encode_oscilloscope(command: &OscilloscopeCommand) -> Result<CommandFrame> {
    let frame = CommandFrame::new(SUBSYSTEM_OSCILLOSCOPE, 0);
    let frame = match *command {
        OscilloscopeCommand::ChannelEnable { channel, enabled } => {
            frame.push(&[0x07, channel.wire(), enabled as u8])
        }
        OscilloscopeCommand::ChannelRange { channel, range } => {
            frame.push(&[0x04, channel.wire(), range.wire()])
        }
        OscilloscopeCommand::SampleRate { hz } => {
            frame.push(&[0x05]).push(&sample_ticks(hz)?.to_be_bytes())
        }
        OscilloscopeCommand::BufferSize { samples } => {
            frame.push(&[0x06, buffer_size_code(samples)?])
        }
        OscilloscopeCommand::Run { running } => frame.push(&[0x08, running as u8]),
        OscilloscopeCommand::GetStatus => CommandFrame {
            response_len: STATUS_RESPONSE_LEN,
            ..frame
        }
        .push(&[0x09]),
        OscilloscopeCommand::StopStatusStream => frame.push(&[0x0A]),
        OscilloscopeCommand::ReadChannel { channel, samples } => {
            buffer_size_code(samples)?;
            let selector = match channel {
                Channel::A => 0x01,
                Channel::B => 0x02,
            };
            CommandFrame {
                response_len: 2 * samples,
                ..frame
            }
            .push(&[selector])
        }
    };
    Ok(frame)
}

fn encode_trigger(command: &TriggerCommand) -> Result<CommandFrame> {
    let frame = CommandFrame::new(SUBSYSTEM_TRIGGER, 0);
    let frame = match *command {
        TriggerCommand::Timeout(timeout) => {
            let mode = match timeout {
                TriggerTimeout::Forever => 0x00,
                TriggerTimeout::Auto => 0x01,
            };
            frame.push(&[0x04, mode])
        }
        TriggerCommand::Source(source) => frame.push(&[0x00, source as u8]),
        TriggerCommand::Level { level, range } => frame
            .push(&[0x03])
            .push(&trigger_level_code(level, range)?.to_be_bytes()),
        TriggerCommand::Condition(condition) => frame.push(&[0x02, condition as u8]),
    };
    Ok(frame)
}

fn encode_supply(command: &SupplyCommand) -> CommandFrame {
    let frame = CommandFrame::new(SUBSYSTEM_SUPPLY, 0);
    match *command {
        SupplyCommand::Voltage { polarity, code } => {
            let selector = match polarity {
                Polarity::Positive => 0x01,
                Polarity::Negative => 0x02,
            };
            frame
                .push(&[selector, 0x00, 0x00])
                .push(&code.to_be_bytes())
        }
        SupplyCommand::Enable { polarity, enabled } => {
            let negative = if polarity == Polarity::Negative { 2 } else { 0 };
            frame.push(&[0x00, negative + enabled as u8])
        }
    }
}

/// Wave generator frames carry the sub-function and channel before the payload.
fn encode_wave_gen(command: &WaveGenCommand) -> Result<CommandFrame> {
    let frame = CommandFrame::new(SUBSYSTEM_WAVE_GENERATOR, 0);
    let frame = match *command {
        WaveGenCommand::Function { channel, function } => {
            frame.push(&[0x00, channel.wire(), function as u8, 0xFF])
        }
        WaveGenCommand::Frequency { channel, hz } => frame
            .push(&[0x01, channel.wire()])
            .push(&frequency_code(hz)?.to_be_bytes())
            .push(&[0xFF]),
        WaveGenCommand::Amplitude { channel, code } => frame
            .push(&[0x02, channel.wire()])
            .push(&code.to_be_bytes())
            .push(&[0xFF]),
        WaveGenCommand::Offset { channel, code } => frame
            .push(&[0x03, channel.wire()])
            .push(&code.to_be_bytes()),
        WaveGenCommand::Symmetry { channel, symmetry } => {
            frame.push(&[0x04, channel.wire(), symmetry_code(symmetry)?])
        }
        WaveGenCommand::Phase { channel, .. } => frame
            .push(&[0x05, channel.wire()])
            .push(&0u32.to_be_bytes()),
        WaveGenCommand::Enable { channel, enabled } => {
            frame.push(&[0x0B, channel.wire(), enabled as u8])
        }
    };
    Ok(frame)
}

// ============================================================================
// Field encoders
// ============================================================================

/// Sample clock divider: `round(1 / f / 25 ns)`.
pub fn sample_ticks(hz: f64) -> Result<u32> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(DriverError::invalid(
            "sample rate",
            format!("{hz} Hz is not a positive frequency"),
        ));
    }
    let ticks = (1.0 / hz / SAMPLE_TICK_SECS).round();
    if ticks < 1.0 || ticks > u32::MAX as f64 {
        return Err(DriverError::invalid(
            "sample rate",
            format!("{hz} Hz does not fit the 32-bit clock divider"),
        ));
    }
    Ok(ticks as u32)
}

/// Buffer size byte: `log2(samples) - 5`.
pub fn buffer_size_code(samples: usize) -> Result<u8> {
    if !samples.is_power_of_two() || !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&samples) {
        return Err(DriverError::invalid(
            "buffer size",
            format!("{samples} is not a power of two in {MIN_BUFFER_SIZE}..={MAX_BUFFER_SIZE}"),
        ));
    }
    Ok((samples.trailing_zeros() - 5) as u8)
}

/// Trigger level relative to mid-scale: `2048 + round(level / range * 2048)`.
pub fn trigger_level_code(level: f64, range: Range) -> Result<u16> {
    let full_scale = range.volts();
    if !level.is_finite() || level.abs() > full_scale {
        return Err(DriverError::invalid(
            "trigger level",
            format!("{level} V is outside ±{full_scale} V"),
        ));
    }
    let code = ADC_MID_SCALE + (level / full_scale * ADC_MID_SCALE as f64).round() as i32;
    Ok(code as u16)
}

/// DDS tuning word: `round(f * 2^32 / 40 MHz)`.
pub fn frequency_code(hz: f64) -> Result<u32> {
    if !hz.is_finite() || hz < 0.0 {
        return Err(DriverError::invalid(
            "frequency",
            format!("{hz} Hz is not a valid frequency"),
        ));
    }
    let code = (hz * 4_294_967_296.0 / DDS_CLOCK_HZ).round();
    if code > u32::MAX as f64 {
        return Err(DriverError::invalid(
            "frequency",
            format!("{hz} Hz does not fit the 32-bit tuning word"),
        ));
    }
    Ok(code as u32)
}

/// Symmetry byte: `round(symmetry * 255)`.
pub fn symmetry_code(symmetry: f64) -> Result<u8> {
    if !(0.0..=1.0).contains(&symmetry) {
        return Err(DriverError::invalid(
            "symmetry",
            format!("{symmetry} is outside 0..=1"),
        ));
    }
    Ok((symmetry * 255.0).round() as u8)
}
