//! RainDrop instrument driver.
//!
//! [`RainDrop`] owns the connection lifecycle and a shadow copy of every
//! channel's configuration. Each setter validates its parameters, encodes the
//! matching frame(s), runs them through the [`CommandChannel`] and only then
//! records the new configuration. The shadow survives disconnects and is
//! pushed back to the instrument on the next connect, so a reconnect resumes
//! exactly where the previous session left off.
//!
//! All methods take `&self`; share the driver between threads with an `Arc`.
//! Exchanges are serialized by the channel lock, so concurrent callers simply
//! queue up behind each other. A setter's exchange and its shadow update are
//! separate steps: two threads racing on the same setting may leave the
//! shadow holding the value that was sent first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread;

use log::{debug, info, warn};
use serde::Serialize;

use crate::calibration::Calibration;
use crate::channel::CommandChannel;
use crate::errors::{DriverError, Result, StateError};
use crate::frame::{
    encode, CalibrationCommand, Channel, Command, DeviceStatus, OscilloscopeCommand, Polarity,
    Range, SupplyCommand, TriggerCommand, TriggerCondition, TriggerSource, TriggerTimeout,
    WaveFunction, WaveGenCommand, MAX_BUFFER_SIZE, STATUS_RESPONSE_LEN,
};
use crate::signal::{estimate_period, AverageBuffer, Statistics};
use crate::transport::{ConnectionSettings, Transport};

// ============================================================================
// Limits
// ============================================================================

const MIN_SAMPLE_RATE_HZ: f64 = 1.0;
const MAX_SAMPLE_RATE_HZ: f64 = 40e6;
const MAX_WAVE_FREQUENCY_HZ: f64 = 40e6;
const SUPPLY_MAX_VOLTS: f64 = 5.0;
const WAVE_MAX_VOLTS: f64 = 5.0;
/// Above this `|offset| + amplitude` an oscilloscope channel needs the 25 V range.
const SCOPE_5V_SPAN: f64 = 5.0;

// ============================================================================
// Shadow configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScopeChannelConfig {
    pub enabled: bool,
    pub range: Range,
    /// Display offset in volts.
    pub offset: f64,
    /// Display amplitude in volts.
    pub amplitude: f64,
}

impl Default for ScopeChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            range: Range::V5,
            offset: 0.0,
            amplitude: 5.0,
        }
    }
}

impl ScopeChannelConfig {
    pub fn uses_25v(&self) -> bool {
        self.range == Range::V25
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcquisitionConfig {
    pub sample_rate: f64,
    pub samples: usize,
    /// Number of traces blended by the rolling average (1 = none).
    pub averaging: usize,
    /// Host-side display timebase in seconds per division; never sent to the device.
    pub timebase: f64,
    pub running: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1e6,
            samples: MAX_BUFFER_SIZE,
            averaging: 1,
            timebase: 1e-3,
            running: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TriggerSettings {
    pub timeout: TriggerTimeout,
    pub source: TriggerSource,
    pub level: f64,
    pub condition: TriggerCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SupplyConfig {
    pub enabled: bool,
    pub voltage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WaveSettings {
    pub function: WaveFunction,
    pub frequency: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub symmetry: f64,
    pub phase: f64,
}

impl Default for WaveSettings {
    fn default() -> Self {
        Self {
            function: WaveFunction::Sine,
            frequency: 1e3,
            amplitude: 1.0,
            offset: 0.0,
            symmetry: 0.5,
            phase: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct WaveChannelConfig {
    pub settings: WaveSettings,
    pub enabled: bool,
}

/// Last commanded configuration of the whole instrument.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DeviceConfig {
    pub oscilloscope: [ScopeChannelConfig; 2],
    pub acquisition: AcquisitionConfig,
    pub trigger: TriggerSettings,
    pub supply: [SupplyConfig; 2],
    pub wave_generator: [WaveChannelConfig; 2],
}

impl DeviceConfig {
    /// Full scale used to encode the trigger level for the current source.
    pub fn trigger_range(&self) -> Range {
        self.range_for(self.trigger.source)
    }

    /// The trigger settings with the level clamped to the current source range.
    pub fn encodable_trigger(&self) -> TriggerSettings {
        let limit = self.trigger_range().volts();
        TriggerSettings {
            level: self.trigger.level.clamp(-limit, limit),
            ..self.trigger
        }
    }

    fn range_for(&self, source: TriggerSource) -> Range {
        source
            .analog_channel()
            .map(|ch| self.oscilloscope[ch.index()].range)
            .unwrap_or(Range::V5)
    }
}

// ============================================================================
// Acquisition results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelTrace {
    /// Calibrated (and averaged) samples in volts.
    pub samples: Vec<f64>,
    pub statistics: Statistics,
    /// Estimated signal period in seconds, 0 when none was found.
    pub period: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acquisition {
    pub a: Option<ChannelTrace>,
    pub b: Option<ChannelTrace>,
}

impl Acquisition {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelTrace> {
        match channel {
            Channel::A => self.a.as_ref(),
            Channel::B => self.b.as_ref(),
        }
    }
}

// ============================================================================
// Connection state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

enum Link {
    Disconnected,
    Connecting,
    Connected {
        serial: String,
        calibration: Calibration,
    },
}

/// Held while a supply voltage change is in progress.
struct SupplyAdjustGuard<'a>(&'a AtomicBool);

impl<'a> SupplyAdjustGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StateError::SupplyAdjusting)?;
        Ok(Self(flag))
    }
}

impl Drop for SupplyAdjustGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Driver
// ============================================================================

/// RainDrop instrument driver.
///
/// # Example
/// ```no_run
/// use raindrop::{Channel, RainDrop, SerialTransport};
///
/// let device = RainDrop::new(Box::new(SerialTransport::new()));
/// device.connect("RD12AB34")?;
/// device.set_buffer_size(1024)?;
/// device.configure_oscilloscope_channel(Channel::A, true, 0.0, 5.0)?;
/// device.set_running(true)?;
/// let acquisition = device.read_oscilloscope()?;
/// # Ok::<(), raindrop::DriverError>(())
/// ```
pub struct RainDrop {
    channel: CommandChannel,
    settings: ConnectionSettings,
    link: Mutex<Link>,
    shadow: RwLock<Arc<DeviceConfig>>,
    averages: Mutex<[AverageBuffer; 2]>,
    /// One flag for both polarities.
    adjusting_supply: AtomicBool,
}

impl RainDrop {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_settings(transport, ConnectionSettings::default())
    }

    pub fn with_settings(transport: Box<dyn Transport>, settings: ConnectionSettings) -> Self {
        Self {
            channel: CommandChannel::new(transport),
            settings,
            link: Mutex::new(Link::Disconnected),
            shadow: RwLock::new(Arc::new(DeviceConfig::default())),
            averages: Mutex::new([AverageBuffer::new(), AverageBuffer::new()]),
            adjusting_supply: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------------

    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.channel.list_devices()
    }

    /// Open the device with the given serial number and restore the shadow
    /// configuration on it.
    ///
    /// Any failure closes the transport again and returns the original error.
    pub fn connect(&self, serial: &str) -> Result<()> {
        {
            let mut link = self.link();
            if !matches!(*link, Link::Disconnected) {
                return Err(StateError::AlreadyConnected.into());
            }
            *link = Link::Connecting;
        }

        info!("connecting to {}", serial);
        let calibration = match self.establish(serial) {
            Ok(calibration) => calibration,
            Err(e) => {
                warn!("connect to {} failed: {}", serial, e);
                self.teardown();
                return Err(e);
            }
        };

        let mut link = self.link();
        if !matches!(*link, Link::Connecting) {
            // Disconnected while the session was being set up.
            return Err(StateError::NotConnected.into());
        }
        *link = Link::Connected {
            serial: serial.to_string(),
            calibration,
        };
        info!("connected to {}", serial);
        Ok(())
    }

    fn establish(&self, serial: &str) -> Result<Calibration> {
        self.channel.open(serial, &self.settings)?;
        let response = self.query(CalibrationCommand::Get)?;
        let calibration = Calibration::from_response(&response)?;
        debug!("calibration: {:?}", calibration.bytes());
        self.replay(&calibration)?;
        Ok(calibration)
    }

    /// Push the entire shadow configuration to the instrument.
    fn replay(&self, calibration: &Calibration) -> Result<()> {
        let config = self.config();

        for ch in Channel::ALL {
            self.apply_scope_channel(ch, &config.oscilloscope[ch.index()])?;
        }
        self.send(OscilloscopeCommand::SampleRate {
            hz: config.acquisition.sample_rate,
        })?;
        self.send(OscilloscopeCommand::BufferSize {
            samples: config.acquisition.samples,
        })?;
        let trigger = config.encodable_trigger();
        self.apply_trigger(&trigger, config.trigger_range())?;
        if trigger.level != config.trigger.level {
            warn!(
                "stored trigger level {} V restored as {} V",
                config.trigger.level, trigger.level
            );
            self.update(|c| c.trigger.level = trigger.level);
        }

        for polarity in Polarity::ALL {
            let supply = config.supply[polarity.index()];
            // Program the voltage with the output off, then restore the output.
            self.send(SupplyCommand::Enable {
                polarity,
                enabled: false,
            })?;
            self.send(SupplyCommand::Voltage {
                polarity,
                code: calibration.supply_code(polarity, supply.voltage),
            })?;
            if supply.enabled {
                self.send(SupplyCommand::Enable {
                    polarity,
                    enabled: true,
                })?;
            }
        }

        for ch in Channel::ALL {
            let wave = config.wave_generator[ch.index()];
            self.apply_wave(calibration, ch, &wave.settings)?;
            self.send(WaveGenCommand::Enable {
                channel: ch,
                enabled: wave.enabled,
            })?;
        }

        self.send(OscilloscopeCommand::Run {
            running: config.acquisition.running,
        })?;
        debug!("shadow configuration restored");
        Ok(())
    }

    fn teardown(&self) {
        if let Err(e) = self.channel.close() {
            warn!("closing transport failed: {}", e);
        }
        *self.link() = Link::Disconnected;
        self.reset_averages();
    }

    /// Close the connection. Safe to call when not connected.
    pub fn disconnect(&self) -> Result<()> {
        let was_open = self.channel.is_open();
        self.channel.close()?;
        *self.link() = Link::Disconnected;
        self.reset_averages();
        if was_open {
            info!("disconnected");
        }
        Ok(())
    }

    pub fn link_state(&self) -> LinkState {
        match *self.link() {
            Link::Disconnected => LinkState::Disconnected,
            Link::Connecting => LinkState::Connecting,
            Link::Connected { .. } => LinkState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    /// Serial number of the open device.
    pub fn current_device(&self) -> Option<String> {
        match &*self.link() {
            Link::Connected { serial, .. } => Some(serial.clone()),
            _ => None,
        }
    }

    /// Calibration vector of the open device.
    pub fn calibration(&self) -> Result<Calibration> {
        match &*self.link() {
            Link::Connected { calibration, .. } => Ok(*calibration),
            _ => Err(StateError::NotConnected.into()),
        }
    }

    /// Consistent snapshot of the shadow configuration.
    pub fn config(&self) -> Arc<DeviceConfig> {
        self.shadow
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------------
    // Oscilloscope
    // ------------------------------------------------------------------------

    pub fn set_oscilloscope_enabled(&self, channel: Channel, enabled: bool) -> Result<()> {
        self.send(OscilloscopeCommand::ChannelEnable { channel, enabled })?;
        self.update(|c| {
            let current = c.oscilloscope[channel.index()];
            c.oscilloscope[channel.index()] = ScopeChannelConfig { enabled, ..current };
        });
        Ok(())
    }

    pub fn set_oscilloscope_range(&self, channel: Channel, range: Range) -> Result<()> {
        self.send(OscilloscopeCommand::ChannelRange { channel, range })?;
        self.update(|c| {
            let current = c.oscilloscope[channel.index()];
            c.oscilloscope[channel.index()] = ScopeChannelConfig { range, ..current };
        });
        self.follow_trigger_range(channel)
    }

    /// Enable/disable a channel and pick its input range from the displayed
    /// window: the 25 V range is used when `|offset| + amplitude` exceeds 5 V.
    pub fn configure_oscilloscope_channel(
        &self,
        channel: Channel,
        enabled: bool,
        offset: f64,
        amplitude: f64,
    ) -> Result<()> {
        if !(amplitude > 0.0) || !amplitude.is_finite() {
            return Err(DriverError::invalid("amplitude", "must be positive"));
        }
        finite("offset", offset)?;

        let range = if offset.abs() + amplitude > SCOPE_5V_SPAN {
            Range::V25
        } else {
            Range::V5
        };
        let next = ScopeChannelConfig {
            enabled,
            range,
            offset,
            amplitude,
        };
        self.apply_scope_channel(channel, &next)?;
        self.update(|c| c.oscilloscope[channel.index()] = next);
        self.follow_trigger_range(channel)
    }

    /// Clamp the trigger level when `channel` feeds the trigger and its new
    /// range no longer covers the level.
    fn follow_trigger_range(&self, channel: Channel) -> Result<()> {
        let config = self.config();
        if config.trigger.source.analog_channel() != Some(channel) {
            return Ok(());
        }
        let trigger = config.encodable_trigger();
        if trigger.level == config.trigger.level {
            return Ok(());
        }
        let range = config.trigger_range();
        warn!(
            "trigger level {} V outside the {:?} range, clamped to {} V",
            config.trigger.level, range, trigger.level
        );
        self.send(TriggerCommand::Level {
            level: trigger.level,
            range,
        })?;
        self.update(|c| c.trigger.level = trigger.level);
        Ok(())
    }

    fn apply_scope_channel(&self, channel: Channel, config: &ScopeChannelConfig) -> Result<()> {
        self.send(OscilloscopeCommand::ChannelEnable {
            channel,
            enabled: config.enabled,
        })?;
        self.send(OscilloscopeCommand::ChannelRange {
            channel,
            range: config.range,
        })?;
        Ok(())
    }

    pub fn set_sample_rate(&self, hz: f64) -> Result<()> {
        check_range("sample rate", hz, MIN_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ)?;
        self.send(OscilloscopeCommand::SampleRate { hz })?;
        self.update(|c| c.acquisition.sample_rate = hz);
        Ok(())
    }

    /// Number of samples per capture; one of 32, 64, ..., 2048.
    pub fn set_buffer_size(&self, samples: usize) -> Result<()> {
        self.send(OscilloscopeCommand::BufferSize { samples })?;
        let previous = self.update(|c| std::mem::replace(&mut c.acquisition.samples, samples));
        if previous != samples {
            self.reset_averages();
        }
        Ok(())
    }

    /// Number of captures blended into each returned trace.
    pub fn set_averaging(&self, depth: usize) -> Result<()> {
        if depth == 0 {
            return Err(DriverError::invalid("averaging", "depth must be at least 1"));
        }
        let previous = self.update(|c| std::mem::replace(&mut c.acquisition.averaging, depth));
        if previous != depth {
            self.reset_averages();
        }
        Ok(())
    }

    pub fn set_timebase(&self, seconds: f64) -> Result<()> {
        if !(seconds > 0.0) || !seconds.is_finite() {
            return Err(DriverError::invalid("timebase", "must be positive"));
        }
        self.update(|c| c.acquisition.timebase = seconds);
        Ok(())
    }

    pub fn set_running(&self, running: bool) -> Result<()> {
        self.send(OscilloscopeCommand::Run { running })?;
        let previous = self.update(|c| std::mem::replace(&mut c.acquisition.running, running));
        if previous != running {
            self.reset_averages();
        }
        Ok(())
    }

    /// Query the acquisition state.
    ///
    /// The instrument keeps streaming status once asked, so the stream is
    /// stopped again before returning. Waiting for [`DeviceStatus::Done`] is
    /// up to the caller.
    pub fn status(&self) -> Result<DeviceStatus> {
        let response = self.query(OscilloscopeCommand::GetStatus)?;
        let code = *response
            .get(STATUS_RESPONSE_LEN - 1)
            .ok_or(DriverError::ShortRead {
                expected: STATUS_RESPONSE_LEN,
                received: response.len(),
            })?;
        self.send(OscilloscopeCommand::StopStatusStream)?;
        Ok(DeviceStatus::from(code))
    }

    /// Read, decode and analyse every enabled channel.
    pub fn read_oscilloscope(&self) -> Result<Acquisition> {
        let calibration = self.calibration()?;
        let config = self.config();
        if !config.oscilloscope.iter().any(|c| c.enabled) {
            return Err(StateError::NoChannelEnabled.into());
        }

        let mut traces = [None, None];
        for ch in Channel::ALL {
            if config.oscilloscope[ch.index()].enabled {
                traces[ch.index()] = Some(self.read_channel(&calibration, &config, ch)?);
            }
        }
        let [a, b] = traces;
        Ok(Acquisition { a, b })
    }

    fn read_channel(
        &self,
        calibration: &Calibration,
        config: &DeviceConfig,
        channel: Channel,
    ) -> Result<ChannelTrace> {
        let acquisition = config.acquisition;
        let raw = self.query(OscilloscopeCommand::ReadChannel {
            channel,
            samples: acquisition.samples,
        })?;
        let trim = calibration.scope_trim(channel, config.oscilloscope[channel.index()].range);
        let decoded = trim.decode(&raw);

        let samples = {
            let mut averages = self.averages();
            averages[channel.index()]
                .fold(&decoded, acquisition.averaging)
                .to_vec()
        };
        let statistics = Statistics::compute(&samples);
        let period = estimate_period(&samples, acquisition.sample_rate);
        debug!(
            "channel {:?}: {} samples, min={:.4} max={:.4} period={:.3e}s",
            channel,
            samples.len(),
            statistics.min,
            statistics.max,
            period
        );
        Ok(ChannelTrace {
            samples,
            statistics,
            period,
        })
    }

    // ------------------------------------------------------------------------
    // Trigger
    // ------------------------------------------------------------------------

    /// Send timeout, source, level and condition in one go.
    pub fn configure_trigger(&self, trigger: TriggerSettings) -> Result<()> {
        let range = self.config().range_for(trigger.source);
        self.apply_trigger(&trigger, range)?;
        self.update(|c| c.trigger = trigger);
        Ok(())
    }

    fn apply_trigger(&self, trigger: &TriggerSettings, range: Range) -> Result<()> {
        // Encode everything first so a bad level rejects the whole batch.
        let frames = [
            TriggerCommand::Timeout(trigger.timeout),
            TriggerCommand::Source(trigger.source),
            TriggerCommand::Level {
                level: trigger.level,
                range,
            },
            TriggerCommand::Condition(trigger.condition),
        ]
        .into_iter()
        .map(|c| encode(&c.into()))
        .collect::<Result<Vec<_>>>()?;
        for frame in &frames {
            self.channel.execute(frame)?;
        }
        Ok(())
    }

    pub fn set_trigger_timeout(&self, timeout: TriggerTimeout) -> Result<()> {
        self.send(TriggerCommand::Timeout(timeout))?;
        self.update(|c| c.trigger.timeout = timeout);
        Ok(())
    }

    pub fn set_trigger_source(&self, source: TriggerSource) -> Result<()> {
        self.send(TriggerCommand::Source(source))?;
        self.update(|c| c.trigger.source = source);
        Ok(())
    }

    /// Level in volts, within the range of the channel the source listens to.
    pub fn set_trigger_level(&self, level: f64) -> Result<()> {
        let range = self.config().trigger_range();
        self.send(TriggerCommand::Level { level, range })?;
        self.update(|c| c.trigger.level = level);
        Ok(())
    }

    pub fn set_trigger_condition(&self, condition: TriggerCondition) -> Result<()> {
        self.send(TriggerCommand::Condition(condition))?;
        self.update(|c| c.trigger.condition = condition);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Power supply
    // ------------------------------------------------------------------------

    pub fn set_supply_enabled(&self, polarity: Polarity, enabled: bool) -> Result<()> {
        self.send(SupplyCommand::Enable { polarity, enabled })?;
        self.update(|c| {
            let current = c.supply[polarity.index()];
            c.supply[polarity.index()] = SupplyConfig { enabled, ..current };
        });
        Ok(())
    }

    /// Change a supply output voltage.
    ///
    /// An enabled output is switched off, reprogrammed and switched back on,
    /// with a settle delay on either side of the new setpoint. Only one
    /// adjustment runs at a time across both polarities; a second one fails
    /// with [`StateError::SupplyAdjusting`].
    pub fn set_supply_voltage(&self, polarity: Polarity, volts: f64) -> Result<()> {
        match polarity {
            Polarity::Positive => check_range("voltage", volts, 0.0, SUPPLY_MAX_VOLTS)?,
            Polarity::Negative => check_range("voltage", volts, -SUPPLY_MAX_VOLTS, 0.0)?,
        }
        let calibration = self.calibration()?;
        let _guard = SupplyAdjustGuard::acquire(&self.adjusting_supply)?;

        let code = calibration.supply_code(polarity, volts);
        let was_enabled = self.config().supply[polarity.index()].enabled;
        if was_enabled {
            self.set_supply_enabled(polarity, false)?;
            thread::sleep(self.settings.settle_delay);
        }

        self.send(SupplyCommand::Voltage { polarity, code })?;
        self.update(|c| {
            let current = c.supply[polarity.index()];
            c.supply[polarity.index()] = SupplyConfig {
                voltage: volts,
                ..current
            };
        });
        debug!("{:?} supply set to {} V (code {})", polarity, volts, code);

        if was_enabled {
            thread::sleep(self.settings.settle_delay);
            self.set_supply_enabled(polarity, true)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Wave generator
    // ------------------------------------------------------------------------

    /// Send function, frequency, amplitude, offset, symmetry and phase.
    pub fn configure_wave_generator(&self, channel: Channel, settings: WaveSettings) -> Result<()> {
        let settings = validate_wave(settings)?;
        let calibration = self.calibration()?;
        self.apply_wave(&calibration, channel, &settings)?;
        self.update(|c| {
            let current = c.wave_generator[channel.index()];
            c.wave_generator[channel.index()] = WaveChannelConfig { settings, ..current };
        });
        Ok(())
    }

    fn apply_wave(
        &self,
        calibration: &Calibration,
        channel: Channel,
        settings: &WaveSettings,
    ) -> Result<()> {
        self.send(WaveGenCommand::Function {
            channel,
            function: settings.function,
        })?;
        self.send(WaveGenCommand::Frequency {
            channel,
            hz: settings.frequency,
        })?;
        self.apply_offset_and_amplitude(calibration, channel, settings.offset, settings.amplitude)?;
        self.send(WaveGenCommand::Symmetry {
            channel,
            symmetry: settings.symmetry,
        })?;
        self.send(WaveGenCommand::Phase {
            channel,
            degrees: settings.phase,
        })?;
        Ok(())
    }

    pub fn set_wave_function(&self, channel: Channel, function: WaveFunction) -> Result<()> {
        self.send(WaveGenCommand::Function { channel, function })?;
        self.update_wave(channel, |w| w.function = function);
        Ok(())
    }

    pub fn set_wave_frequency(&self, channel: Channel, hz: f64) -> Result<()> {
        check_wave_frequency(hz)?;
        self.send(WaveGenCommand::Frequency { channel, hz })?;
        self.update_wave(channel, |w| w.frequency = hz);
        Ok(())
    }

    /// The offset code depends on the amplitude, so both are always set together.
    pub fn set_wave_offset_and_amplitude(
        &self,
        channel: Channel,
        offset: f64,
        amplitude: f64,
    ) -> Result<()> {
        check_range("amplitude", amplitude, 0.0, WAVE_MAX_VOLTS)?;
        check_range("offset", offset, -WAVE_MAX_VOLTS, WAVE_MAX_VOLTS)?;
        let calibration = self.calibration()?;
        self.apply_offset_and_amplitude(&calibration, channel, offset, amplitude)?;
        self.update_wave(channel, |w| {
            w.offset = offset;
            w.amplitude = amplitude;
        });
        Ok(())
    }

    fn apply_offset_and_amplitude(
        &self,
        calibration: &Calibration,
        channel: Channel,
        offset: f64,
        amplitude: f64,
    ) -> Result<()> {
        self.send(WaveGenCommand::Amplitude {
            channel,
            code: calibration.wave_amplitude_code(channel, amplitude),
        })?;
        self.send(WaveGenCommand::Offset {
            channel,
            code: calibration.wave_offset_code(channel, offset, amplitude),
        })?;
        Ok(())
    }

    pub fn set_wave_symmetry(&self, channel: Channel, symmetry: f64) -> Result<()> {
        check_range("symmetry", symmetry, 0.0, 1.0)?;
        self.send(WaveGenCommand::Symmetry { channel, symmetry })?;
        self.update_wave(channel, |w| w.symmetry = symmetry);
        Ok(())
    }

    /// Phase in degrees, reduced modulo 360.
    ///
    /// The firmware's phase encoding is unknown; the frame is sent with a zero
    /// payload, so this currently has no effect on the output.
    pub fn set_wave_phase(&self, channel: Channel, degrees: f64) -> Result<()> {
        finite("phase", degrees)?;
        let degrees = degrees.rem_euclid(360.0);
        self.send(WaveGenCommand::Phase { channel, degrees })?;
        self.update_wave(channel, |w| w.phase = degrees);
        Ok(())
    }

    pub fn set_wave_enabled(&self, channel: Channel, enabled: bool) -> Result<()> {
        self.send(WaveGenCommand::Enable { channel, enabled })?;
        self.update(|c| {
            let current = c.wave_generator[channel.index()];
            c.wave_generator[channel.index()] = WaveChannelConfig { enabled, ..current };
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------------

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn averages(&self) -> MutexGuard<'_, [AverageBuffer; 2]> {
        self.averages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_averages(&self) {
        self.averages().iter_mut().for_each(AverageBuffer::reset);
    }

    fn send(&self, command: impl Into<Command>) -> Result<Option<Vec<u8>>> {
        let command = command.into();
        let frame = encode(&command)?;
        debug!("{:?}", command);
        self.channel.execute(&frame)
    }

    /// Send a command that declares a response and return it.
    fn query(&self, command: impl Into<Command>) -> Result<Vec<u8>> {
        Ok(self.send(command)?.unwrap_or_default())
    }

    /// Build the next snapshot from the current one and swap it in.
    ///
    /// Runs under the shadow write lock, so `f` sees the latest snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut DeviceConfig) -> R) -> R {
        let mut shadow = self.shadow.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = DeviceConfig::clone(&shadow);
        let result = f(&mut next);
        *shadow = Arc::new(next);
        result
    }

    fn update_wave(&self, channel: Channel, f: impl FnOnce(&mut WaveSettings)) {
        self.update(|c| {
            let mut next = c.wave_generator[channel.index()];
            f(&mut next.settings);
            c.wave_generator[channel.index()] = next;
        });
    }
}

fn finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DriverError::invalid(field, format!("{value} is not a number")))
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(DriverError::invalid(
            field,
            format!("{value} is outside {min}..={max}"),
        ))
    }
}

fn check_wave_frequency(hz: f64) -> Result<()> {
    if hz > 0.0 && hz < MAX_WAVE_FREQUENCY_HZ {
        Ok(())
    } else {
        Err(DriverError::invalid(
            "frequency",
            format!("{hz} Hz is outside (0, {MAX_WAVE_FREQUENCY_HZ})"),
        ))
    }
}

fn validate_wave(settings: WaveSettings) -> Result<WaveSettings> {
    check_wave_frequency(settings.frequency)?;
    check_range("amplitude", settings.amplitude, 0.0, WAVE_MAX_VOLTS)?;
    check_range("offset", settings.offset, -WAVE_MAX_VOLTS, WAVE_MAX_VOLTS)?;
    check_range("symmetry", settings.symmetry, 0.0, 1.0)?;
    finite("phase", settings.phase)?;
    Ok(WaveSettings {
        phase: settings.phase.rem_euclid(360.0),
        ..settings
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::transport::mock::{Call, MockTransport};

    const SETTLE: Duration = Duration::from_millis(20);

    fn calibration_response() -> Vec<u8> {
        let mut response = vec![0xEE];
        response.extend_from_slice(&[10, 20, 30, 40, 50, 60, 123, 130, 200, 210, 123, 100, 240, 250]);
        response.extend_from_slice(&[0, 0]);
        response
    }

    fn device(mock: &MockTransport) -> RainDrop {
        let settings = ConnectionSettings {
            settle_delay: SETTLE,
            ..ConnectionSettings::default()
        };
        RainDrop::with_settings(Box::new(mock.clone()), settings)
    }

    fn connected() -> (RainDrop, MockTransport) {
        let mock = MockTransport::new();
        let device = device(&mock);
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
        mock.clear_calls();
        (device, mock)
    }

    fn frame(command: impl Into<Command>) -> Vec<u8> {
        encode(&command.into()).unwrap().bytes().to_vec()
    }

    #[test]
    fn connect_reads_calibration_and_restores_shadow() {
        let mock = MockTransport::new();
        let device = device(&mock);
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();

        assert!(device.is_connected());
        assert_eq!(device.current_device().as_deref(), Some("RD0001"));
        assert_eq!(device.calibration().unwrap().bytes()[0], 10);

        let calls = mock.calls();
        assert_eq!(calls[0], Call::Open("RD0001".into()));
        assert_eq!(calls[1], Call::SetBitMode(0x00, 0x40));
        assert_eq!(calls[3], Call::SetBaudRate(1_152_000));
        assert_eq!(calls[4], Call::Purge);
        assert_eq!(calls[5], Call::Write(vec![0xAA, 0xFF, 0x06, 0x01]));
        assert_eq!(calls[6], Call::Read(17));

        let writes = mock.writes();
        assert!(writes.contains(&frame(OscilloscopeCommand::BufferSize { samples: 2048 })));
        assert!(writes.contains(&frame(SupplyCommand::Enable {
            polarity: Polarity::Negative,
            enabled: false
        })));
        assert_eq!(
            writes.last(),
            Some(&frame(OscilloscopeCommand::Run { running: false }))
        );
    }

    #[test]
    fn second_connect_is_rejected() {
        let (device, mock) = connected();
        let err = device.connect("RD0002").unwrap_err();
        assert_eq!(err.state(), Some(StateError::AlreadyConnected));
        assert!(mock.calls().is_empty());
        assert_eq!(device.current_device().as_deref(), Some("RD0001"));
    }

    #[test]
    fn failed_calibration_read_disconnects() {
        let mock = MockTransport::new();
        let device = device(&mock);
        mock.push_response(vec![0; 3]);
        let err = device.connect("RD0001").unwrap_err();

        assert!(matches!(
            err,
            DriverError::ShortRead {
                expected: 17,
                received: 3
            }
        ));
        assert_eq!(device.link_state(), LinkState::Disconnected);
        assert!(!mock.state.lock().unwrap().open);
        assert_eq!(mock.calls().last(), Some(&Call::Close));
    }

    #[test]
    fn failed_open_leaves_disconnected() {
        let mock = MockTransport::new();
        mock.state.lock().unwrap().fail_open = true;
        let device = device(&mock);
        assert!(matches!(
            device.connect("missing"),
            Err(DriverError::Transport(_))
        ));
        assert_eq!(device.link_state(), LinkState::Disconnected);
        // retry is possible after a failure
        mock.state.lock().unwrap().fail_open = false;
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
    }

    #[test]
    fn disconnect_is_safe_when_not_connected() {
        let mock = MockTransport::new();
        let device = device(&mock);
        device.disconnect().unwrap();
        device.disconnect().unwrap();
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn operations_require_connection() {
        let mock = MockTransport::new();
        let device = device(&mock);
        let err = device
            .set_oscilloscope_enabled(Channel::A, true)
            .unwrap_err();
        assert_eq!(err.state(), Some(StateError::NotConnected));
        let err = device.set_supply_voltage(Polarity::Positive, 1.0).unwrap_err();
        assert_eq!(err.state(), Some(StateError::NotConnected));
        assert_eq!(device.status().unwrap_err().state(), Some(StateError::NotConnected));
        assert!(!device.config().oscilloscope[0].enabled);
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn reconnect_replays_previous_configuration() {
        let (device, mock) = connected();
        device.set_oscilloscope_enabled(Channel::B, true).unwrap();
        device.set_buffer_size(256).unwrap();
        device.set_supply_enabled(Polarity::Positive, true).unwrap();
        device.disconnect().unwrap();
        assert!(device.config().oscilloscope[1].enabled);

        mock.clear_calls();
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
        let writes = mock.writes();
        assert!(writes.contains(&vec![0xAA, 0xFF, 0x01, 0x07, 0x01, 0x01]));
        assert!(writes.contains(&frame(OscilloscopeCommand::BufferSize { samples: 256 })));
        assert!(writes.contains(&frame(SupplyCommand::Enable {
            polarity: Polarity::Positive,
            enabled: true
        })));
    }

    #[test]
    fn hardware_failure_leaves_shadow_untouched() {
        let (device, mock) = connected();
        mock.state.lock().unwrap().short_write = Some(1);
        assert!(device.set_oscilloscope_enabled(Channel::A, true).is_err());
        assert!(!device.config().oscilloscope[0].enabled);

        mock.state.lock().unwrap().short_write = Some(2);
        assert!(device.set_sample_rate(250e3).is_err());
        assert_eq!(device.config().acquisition.sample_rate, 1e6);
    }

    #[test]
    fn configure_channel_picks_range() {
        let (device, mock) = connected();
        assert!(matches!(
            device.configure_oscilloscope_channel(Channel::A, true, 0.0, 0.0),
            Err(DriverError::InvalidParameter {
                field: "amplitude",
                ..
            })
        ));
        assert!(mock.writes().is_empty());

        device
            .configure_oscilloscope_channel(Channel::A, true, 3.0, 4.0)
            .unwrap();
        assert_eq!(
            mock.writes(),
            vec![
                vec![0xAA, 0xFF, 0x01, 0x07, 0x00, 0x01],
                vec![0xAA, 0xFF, 0x01, 0x04, 0x00, 0x01],
            ]
        );
        assert!(device.config().oscilloscope[0].uses_25v());

        device
            .configure_oscilloscope_channel(Channel::A, true, -1.0, 4.0)
            .unwrap();
        assert!(!device.config().oscilloscope[0].uses_25v());
    }

    #[test]
    fn trigger_level_follows_source_range() {
        let (device, mock) = connected();
        device
            .set_oscilloscope_range(Channel::A, Range::V25)
            .unwrap();
        device.set_trigger_level(20.0).unwrap();
        assert_eq!(device.config().trigger.level, 20.0);

        let settings = TriggerSettings {
            source: TriggerSource::DetectorAnalogInCh2,
            level: 20.0,
            ..TriggerSettings::default()
        };
        mock.clear_calls();
        assert!(device.configure_trigger(settings).is_err());
        assert!(mock.writes().is_empty());
        assert_eq!(device.config().trigger.source, TriggerSource::DetectorAnalogInCh1);

        let settings = TriggerSettings {
            level: 2.0,
            condition: TriggerCondition::Fall,
            ..settings
        };
        device.configure_trigger(settings).unwrap();
        assert_eq!(mock.writes().len(), 4);
        assert_eq!(device.config().trigger, settings);
    }

    #[test]
    fn supply_adjust_cycles_enabled_output() {
        let (device, mock) = connected();
        device.set_supply_enabled(Polarity::Positive, true).unwrap();
        mock.clear_calls();

        let start = Instant::now();
        device.set_supply_voltage(Polarity::Positive, 0.0).unwrap();
        assert!(start.elapsed() >= SETTLE * 2);

        let code = device
            .calibration()
            .unwrap()
            .supply_code(Polarity::Positive, 0.0);
        assert_eq!(
            mock.writes(),
            vec![
                vec![0xAA, 0xFF, 0x03, 0x00, 0x00],
                frame(SupplyCommand::Voltage {
                    polarity: Polarity::Positive,
                    code
                }),
                vec![0xAA, 0xFF, 0x03, 0x00, 0x01],
            ]
        );
        assert!(device.config().supply[0].enabled);
    }

    #[test]
    fn supply_adjust_on_disabled_output_sends_only_setpoint() {
        let (device, mock) = connected();
        device.set_supply_voltage(Polarity::Negative, -3.3).unwrap();
        assert_eq!(mock.writes().len(), 1);
        assert_eq!(device.config().supply[1].voltage, -3.3);

        assert!(matches!(
            device.set_supply_voltage(Polarity::Negative, 1.0),
            Err(DriverError::InvalidParameter {
                field: "voltage",
                ..
            })
        ));
        assert!(device.set_supply_voltage(Polarity::Positive, 5.5).is_err());
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn concurrent_supply_adjustments_are_rejected() {
        let mock = MockTransport::new();
        let settings = ConnectionSettings {
            settle_delay: Duration::from_millis(200),
            ..ConnectionSettings::default()
        };
        let device = Arc::new(RainDrop::with_settings(Box::new(mock.clone()), settings));
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
        device.set_supply_enabled(Polarity::Positive, true).unwrap();

        let worker = {
            let device = Arc::clone(&device);
            thread::spawn(move || device.set_supply_voltage(Polarity::Positive, 2.0))
        };
        thread::sleep(Duration::from_millis(50));
        // the guard is shared by both polarities
        let err = device
            .set_supply_voltage(Polarity::Negative, -1.0)
            .unwrap_err();
        assert_eq!(err.state(), Some(StateError::SupplyAdjusting));

        worker.join().unwrap().unwrap();
        device.set_supply_voltage(Polarity::Negative, -1.0).unwrap();
    }

    #[test]
    fn status_stops_the_stream() {
        let (device, mock) = connected();
        mock.push_response(vec![0, 0, 0, 2]);
        assert_eq!(device.status().unwrap(), DeviceStatus::Done);
        assert_eq!(
            mock.writes(),
            vec![vec![0xAA, 0xFF, 0x01, 0x09], vec![0xAA, 0xFF, 0x01, 0x0A]]
        );
    }

    fn raw_trace(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn read_requires_an_enabled_channel() {
        let (device, _mock) = connected();
        let err = device.read_oscilloscope().unwrap_err();
        assert_eq!(err.state(), Some(StateError::NoChannelEnabled));
    }

    #[test]
    fn read_decodes_enabled_channels() {
        let (device, mock) = connected();
        device.set_buffer_size(32).unwrap();
        device.set_oscilloscope_enabled(Channel::A, true).unwrap();

        let mut words = vec![0x0800u16; 16];
        words.extend(vec![0x0C00u16; 16]);
        mock.push_response(raw_trace(&words));
        let acquisition = device.read_oscilloscope().unwrap();
        assert!(acquisition.b.is_none());

        // channel A 5 V trims: offset 0, gain from byte 8
        let gain = 1.0 / (0.00048828125 * 200.0 + 0.19);
        let trace = acquisition.channel(Channel::A).unwrap();
        assert_eq!(trace.samples.len(), 32);
        assert_eq!(trace.statistics.min, 0.0);
        assert!((trace.statistics.max - 0.5 * gain).abs() < 1e-9);
        assert!((trace.statistics.mean - 0.25 * gain).abs() < 1e-9);
        assert_eq!(mock.calls().last(), Some(&Call::Read(64)));
    }

    #[test]
    fn averaging_resets_on_run_state_change() {
        let (device, mock) = connected();
        device.set_buffer_size(32).unwrap();
        device.set_averaging(4).unwrap();
        device.set_oscilloscope_enabled(Channel::A, true).unwrap();

        mock.push_response(raw_trace(&[0x0800; 32]));
        device.read_oscilloscope().unwrap();
        mock.push_response(raw_trace(&[0x0C00; 32]));
        let averaged = device.read_oscilloscope().unwrap().a.unwrap();
        let gain = 1.0 / (0.00048828125 * 200.0 + 0.19);
        assert!((averaged.samples[0] - 0.25 * gain).abs() < 1e-9);

        device.set_running(true).unwrap();
        mock.push_response(raw_trace(&[0x0C00; 32]));
        let fresh = device.read_oscilloscope().unwrap().a.unwrap();
        assert!((fresh.samples[0] - 0.5 * gain).abs() < 1e-9);
        assert!(device.set_averaging(0).is_err());
    }

    #[test]
    fn narrowing_source_range_clamps_trigger_level() {
        let (device, mock) = connected();
        device
            .set_oscilloscope_range(Channel::A, Range::V25)
            .unwrap();
        device.set_trigger_level(20.0).unwrap();

        // channel B does not feed the trigger
        mock.clear_calls();
        device.set_oscilloscope_range(Channel::B, Range::V5).unwrap();
        assert_eq!(mock.writes().len(), 1);
        assert_eq!(device.config().trigger.level, 20.0);

        mock.clear_calls();
        device
            .configure_oscilloscope_channel(Channel::A, true, 0.0, 2.0)
            .unwrap();
        assert_eq!(device.config().trigger.level, 5.0);
        assert_eq!(
            mock.writes().last(),
            Some(&frame(TriggerCommand::Level {
                level: 5.0,
                range: Range::V5
            }))
        );

        device.disconnect().unwrap();
        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
        assert_eq!(device.config().trigger.level, 5.0);
    }

    #[test]
    fn replay_clamps_stored_trigger_level() {
        let mock = MockTransport::new();
        let device = device(&mock);
        device.update(|c| c.trigger.level = -20.0);

        mock.push_response(calibration_response());
        device.connect("RD0001").unwrap();
        assert!(mock.writes().contains(&frame(TriggerCommand::Level {
            level: -5.0,
            range: Range::V5
        })));
        assert_eq!(device.config().trigger.level, -5.0);
    }

    fn read_a(device: &RainDrop, mock: &MockTransport, word: u16) -> f64 {
        mock.push_response(raw_trace(&[word; 32]));
        device.read_oscilloscope().unwrap().a.unwrap().samples[0]
    }

    fn averaging_device() -> (RainDrop, MockTransport, f64) {
        let (device, mock) = connected();
        device.set_buffer_size(32).unwrap();
        device.set_averaging(4).unwrap();
        device.set_oscilloscope_enabled(Channel::A, true).unwrap();
        let gain = 1.0 / (0.00048828125 * 200.0 + 0.19);
        (device, mock, gain)
    }

    #[test]
    fn repeated_run_keeps_average() {
        let (device, mock, gain) = averaging_device();
        device.set_running(true).unwrap();
        read_a(&device, &mock, 0x0800);
        device.set_running(true).unwrap();
        let sample = read_a(&device, &mock, 0x0C00);
        assert!((sample - 0.25 * gain).abs() < 1e-9);
    }

    #[test]
    fn averaging_depth_change_resets_average() {
        let (device, mock, gain) = averaging_device();
        read_a(&device, &mock, 0x0800);
        read_a(&device, &mock, 0x0C00);

        device.set_averaging(4).unwrap();
        let kept = read_a(&device, &mock, 0x0C00);
        assert!((kept - gain / 3.0).abs() < 1e-9);

        device.set_averaging(2).unwrap();
        let fresh = read_a(&device, &mock, 0x0C00);
        assert!((fresh - 0.5 * gain).abs() < 1e-9);
    }

    #[test]
    fn buffer_size_change_resets_average() {
        let (device, mock, gain) = averaging_device();
        read_a(&device, &mock, 0x0800);
        device.set_buffer_size(32).unwrap();
        let kept = read_a(&device, &mock, 0x0C00);
        assert!((kept - 0.25 * gain).abs() < 1e-9);

        // same trace length afterwards, so only the size change can reset
        device.set_buffer_size(64).unwrap();
        device.set_buffer_size(32).unwrap();
        let fresh = read_a(&device, &mock, 0x0C00);
        assert!((fresh - 0.5 * gain).abs() < 1e-9);
    }

    #[test]
    fn wave_generator_batch() {
        let (device, mock) = connected();
        let settings = WaveSettings {
            function: WaveFunction::Square,
            frequency: 10e6,
            amplitude: 2.0,
            offset: 1.0,
            symmetry: 0.25,
            phase: 450.0,
        };
        device.configure_wave_generator(Channel::B, settings).unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 6);
        assert_eq!(writes[0], vec![0xAA, 0xFF, 0x02, 0x00, 0x01, 0x02, 0xFF]);
        assert_eq!(&writes[1][3..5], &[0x01, 0x01]);
        assert_eq!(&writes[2][3..5], &[0x02, 0x01]);
        assert_eq!(&writes[3][3..5], &[0x03, 0x01]);
        assert_eq!(&writes[5][3..5], &[0x05, 0x01]);

        let stored = device.config().wave_generator[1];
        assert_eq!(stored.settings.phase, 90.0);
        assert!(!stored.enabled);

        mock.clear_calls();
        let bad = WaveSettings {
            symmetry: 1.5,
            ..settings
        };
        assert!(device.configure_wave_generator(Channel::A, bad).is_err());
        assert!(device.set_wave_frequency(Channel::A, 0.0).is_err());
        assert!(device.set_wave_offset_and_amplitude(Channel::A, 6.0, 1.0).is_err());
        assert!(mock.writes().is_empty());

        device.set_wave_enabled(Channel::B, true).unwrap();
        device.set_wave_phase(Channel::B, -90.0).unwrap();
        let stored = device.config().wave_generator[1];
        assert!(stored.enabled);
        assert_eq!(stored.settings.phase, 270.0);
    }

    #[test]
    fn host_side_settings_send_nothing() {
        let (device, mock) = connected();
        device.set_timebase(5e-3).unwrap();
        device.set_averaging(8).unwrap();
        assert!(device.set_timebase(0.0).is_err());
        assert!(mock.calls().is_empty());
        assert_eq!(device.config().acquisition.timebase, 5e-3);
        assert_eq!(device.config().acquisition.averaging, 8);
    }
}
