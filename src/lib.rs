//! RainDrop instrument driver.
//!
//! The RainDrop is a bench instrument combining a two-channel oscilloscope, a
//! dual-polarity power supply and a two-channel arbitrary wave generator
//! behind an FTDI USB-serial bridge. This crate speaks its binary command
//! protocol and exposes a thread-safe [`RainDrop`] handle.
//!
//! # Layers
//!
//! - [`frame`]: typed commands and their byte encoding
//! - [`transport`]: the byte pipe ([`SerialTransport`] or your own [`Transport`])
//! - [`channel`]: one request/response exchange at a time over the transport
//! - [`calibration`]: per-unit trims and voltage/code conversions
//! - [`signal`]: statistics, rolling average and period estimation of traces
//! - [`raindrop`]: connection lifecycle, shadow configuration and all operations
//!
//! # Logging
//!
//! The crate logs through the `log` facade. Binaries can call
//! [`logging::init_logging`], which reads `RAINDROP_LOG` (or `RUST_LOG`).

pub mod calibration;
pub mod channel;
mod errors;
pub mod frame;
pub mod logging;
pub mod raindrop;
pub mod signal;
pub mod transport;

pub use calibration::{Calibration, ScopeTrim};
pub use errors::*;
pub use frame::{
    Channel, DeviceStatus, Polarity, Range, TriggerCondition, TriggerSource, TriggerTimeout,
    WaveFunction,
};
pub use raindrop::{
    Acquisition, AcquisitionConfig, ChannelTrace, DeviceConfig, LinkState, RainDrop,
    ScopeChannelConfig, SupplyConfig, TriggerSettings, WaveChannelConfig, WaveSettings,
};
pub use signal::Statistics;
pub use transport::{ConnectionSettings, SerialTransport, Transport};
