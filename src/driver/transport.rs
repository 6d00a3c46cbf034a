use super::{
    frame::{self, Request, Response},
    DriverError,
};
use crate::util::hex;
use log::{debug, trace};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::{io::Write, time::Duration};

/// Moves one request and its response over the bus
///
/// Implementations don't retry. A request nobody answers is a
/// [`DriverError::Timeout`], everything after [`close`][Transport::close] is
/// [`DriverError::Closed`].
///
/// `timeout` bounds the whole response, not each byte of it. [`RtuTransport`]
/// stops reading once it passed, but a read already waiting on the port can
/// still take up to another `timeout`, so an exchange is over after twice
/// `timeout` at the latest.
pub trait Transport: Send {
    fn exchange(&mut self, request: &Request, timeout: Duration) -> Result<Response, DriverError>;

    /// Releases the underlying line, calling it again does nothing
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

//

/// Line settings of the bus
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerialConfig {
    /// Path of the serial device, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    /// Initial read timeout, every exchange sets its own
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            timeout: Duration::from_secs(1),
        }
    }
}

//

/// Modbus RTU over a serial port
pub struct RtuTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl RtuTransport {
    /// Opens the port described by `config`
    ///
    /// # Errors
    /// Returns [`DriverError::Connection`] if the port can't be opened.
    ///
    /// # Examples
    /// ```no_run
    /// # use az_stepper_driver::{RtuTransport, SerialConfig};
    /// let transport = RtuTransport::open(&SerialConfig {
    ///     port: "/dev/ttyUSB1".to_string(),
    ///     ..SerialConfig::default()
    /// })
    /// .unwrap();
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self, DriverError> {
        let port = serialport::new(&config.port, config.baud_rate)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .data_bits(config.data_bits)
            .timeout(config.timeout)
            .open()
            .map_err(|source| DriverError::Connection {
                port: config.port.clone(),
                source,
            })?;
        debug!(
            "opened {} at {} baud, parity {:?}, stop bits {:?}",
            config.port, config.baud_rate, config.parity, config.stop_bits
        );
        Ok(Self {
            port: Some(port),
            name: config.port.clone(),
        })
    }

    /// Wraps an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        let name = port.name().unwrap_or_default();
        Self {
            port: Some(port),
            name,
        }
    }
}

impl Transport for RtuTransport {
    fn exchange(&mut self, request: &Request, timeout: Duration) -> Result<Response, DriverError> {
        let port = self.port.as_mut().ok_or(DriverError::Closed)?;
        if port.timeout() != timeout {
            port.set_timeout(timeout)?;
        }
        // whatever is still in there belongs to an earlier request
        port.clear(ClearBuffer::Input)?;
        let raw = request.encode();
        trace!("tx {}", hex(&raw));
        port.write_all(&raw)?;
        port.flush()?;
        let reply = frame::read_frame(port.as_mut(), request.address(), timeout)?;
        Response::decode(&reply)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl std::fmt::Debug for RtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RtuTransport {{ port: {}, open: {} }}",
            self.name,
            self.port.is_some()
        )
    }
}
