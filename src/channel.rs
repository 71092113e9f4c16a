//! Serialized request/response exchanges over the half-duplex transport.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::errors::{DriverError, Result, StateError};
use crate::frame::CommandFrame;
use crate::transport::{ConnectionSettings, Transport};

/// Owns the transport and allows one exchange in flight at a time.
///
/// Every call takes the same lock, so concurrent callers block until the
/// current exchange (purge, write, read) completes or times out.
pub struct CommandChannel {
    transport: Mutex<Box<dyn Transport>>,
}

impl CommandChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        // Each exchange starts with a purge, so a panicked holder leaves nothing behind.
        self.transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Send one frame and collect its response, if it declares one.
    pub fn execute(&self, frame: &CommandFrame) -> Result<Option<Vec<u8>>> {
        let mut transport = self.lock();
        if !transport.is_open() {
            return Err(StateError::NotConnected.into());
        }

        transport.purge()?;

        let bytes = frame.bytes();
        trace!("tx {:02X?}", bytes);
        let written = transport.write(bytes)?;
        if written != bytes.len() {
            return Err(DriverError::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }

        let expected = frame.response_len();
        if expected == 0 {
            return Ok(None);
        }

        let response = transport.read(expected)?;
        if response.len() != expected {
            return Err(DriverError::ShortRead {
                expected,
                received: response.len(),
            });
        }
        trace!("rx {} bytes", response.len());
        Ok(Some(response))
    }

    /// Open the transport and apply the link parameters.
    pub fn open(&self, serial: &str, settings: &ConnectionSettings) -> Result<()> {
        let mut transport = self.lock();
        transport.open(serial)?;
        transport.set_bit_mode(settings.bit_mask, settings.bit_mode)?;
        transport.set_timeouts(settings.read_timeout, settings.write_timeout)?;
        transport.set_baud_rate(settings.baud_rate)?;
        debug!(
            "link configured: baud={}, read_timeout={:?}",
            settings.baud_rate, settings.read_timeout
        );
        Ok(())
    }

    /// Close the transport; a no-op when it is not open.
    pub fn close(&self) -> Result<()> {
        let mut transport = self.lock();
        if transport.is_open() {
            transport.close()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    pub fn list_devices(&self) -> Result<Vec<String>> {
        self.lock().list_devices()
    }
}
