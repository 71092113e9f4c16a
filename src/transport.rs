//! Byte transport underneath the command channel.
//!
//! The instrument sits behind an FTDI USB-serial bridge. [`Transport`] is the
//! small set of primitives the driver needs from it; [`SerialTransport`]
//! implements them on top of the `serialport` crate (the bridge's virtual COM
//! port), locating the device by its USB serial number.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info};
use serialport::{ClearBuffer, SerialPort, SerialPortType};

use crate::errors::{DriverError, Result};

/// Baud rate used to open the port before the connect sequence sets the real one.
const OPEN_BAUD_RATE: u32 = 115_200;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

const BAUD_RATE: u32 = 1_152_000;
const READ_TIMEOUT_MS: u64 = 1500;
const WRITE_TIMEOUT_MS: u64 = 500;
const BIT_MODE_SYNC_FIFO: u8 = 0x40;
const SETTLE_DELAY_MS: u64 = 200;

/// Link parameters applied on connect, plus the supply settle delay.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub bit_mask: u8,
    pub bit_mode: u8,
    /// Wait after disabling and before re-enabling a supply during a voltage change.
    pub settle_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(WRITE_TIMEOUT_MS),
            bit_mask: 0x00,
            bit_mode: BIT_MODE_SYNC_FIFO,
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }
}

/// Primitives offered by the USB-serial bridge.
pub trait Transport: Send {
    fn open(&mut self, serial: &str) -> Result<()>;
    /// Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    /// Discard anything pending in both directions.
    fn purge(&mut self) -> Result<()>;
    /// Returns how many bytes were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
    /// Read up to `n` bytes, returning early only on timeout.
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()>;
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;
    fn set_bit_mode(&mut self, mask: u8, mode: u8) -> Result<()>;
    fn list_devices(&self) -> Result<Vec<String>>;
}

/// [`Transport`] over the bridge's virtual serial port.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self {
            port: None,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| DriverError::Transport("port is not open".into()))
    }

    /// Resolve a USB serial number to a port path. A port path is accepted as-is.
    fn resolve(serial: &str) -> Result<String> {
        let ports = serialport::available_ports()?;
        ports
            .iter()
            .find_map(|p| match &p.port_type {
                SerialPortType::UsbPort(usb) if usb.serial_number.as_deref() == Some(serial) => {
                    Some(p.port_name.clone())
                }
                _ => None,
            })
            .or_else(|| {
                ports
                    .iter()
                    .find(|p| p.port_name == serial)
                    .map(|p| p.port_name.clone())
            })
            .ok_or_else(|| DriverError::Transport(format!("no device with serial {serial}")))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self, serial: &str) -> Result<()> {
        let path = Self::resolve(serial)?;
        let port = serialport::new(&path, OPEN_BAUD_RATE)
            .timeout(self.read_timeout)
            .open()?;
        info!("opened {} for device {}", path, serial);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(port) = self.port.take() {
            debug!("closing {:?}", port.name());
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn purge(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let write_timeout = self.write_timeout;
        let read_timeout = self.read_timeout;
        let port = self.port()?;
        // serialport has a single timeout; use the write one for this call.
        port.set_timeout(write_timeout)?;
        let written = match port.write(bytes) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => 0,
            Err(e) => return Err(e.into()),
        };
        port.flush()?;
        port.set_timeout(read_timeout)?;
        Ok(written)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.read_timeout;
        let port = self.port()?;
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() > deadline {
                break;
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<()> {
        self.read_timeout = read;
        self.write_timeout = write;
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(read)?;
        }
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.port()?.set_baud_rate(baud_rate)?;
        Ok(())
    }

    fn set_bit_mode(&mut self, mask: u8, mode: u8) -> Result<()> {
        // Bit modes belong to the vendor D2XX API; the virtual COM port driver
        // already runs the bridge in plain UART mode.
        self.port()?;
        debug!("bit mode mask={:#04x} mode={:#04x} left to the VCP driver", mask, mode);
        Ok(())
    }

    fn list_devices(&self) -> Result<Vec<String>> {
        let devices = serialport::available_ports()?
            .into_iter()
            .filter_map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => usb.serial_number,
                _ => None,
            })
            .collect();
        Ok(devices)
    }
}
