#[cfg(test)]
mod tests;

pub mod codec;
pub mod frame;
pub mod map;
pub mod motor;
pub mod parse;
pub mod scan;
pub mod timing;
pub mod transport;

use self::{
    codec::{split_u32, RegisterPair},
    frame::{DeviceAddress, ExceptionCode, Request},
    motor::Motor,
    parse::ParseError,
    scan::Scan,
    timing::{Clock, SystemClock, Timing},
    transport::{RtuTransport, SerialConfig, Transport},
};
use chrono::{DateTime, Local};
use log::{debug, info};
use num_traits::FromPrimitive;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display},
    io,
    ops::RangeInclusive,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;

// unfortunately, due to rustfmt not having the blank_lines_upper_bound feature
// stable yet, we gotta put comments in between the different sections. otherwise
// its just too much

//

/// Errors returned by any part of the driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// Thrown if an address outside of `1..=247` is used
    #[error("address must be 1 <= address <= 247, was {0}")]
    InvalidAddress(u8),
    /// Thrown if an argument doesn't fit into the register it is written to
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Thrown by [`Driver::open`] if the serial port couldn't be opened
    #[error("couldn't open {port}: {source}")]
    Connection {
        port: String,
        source: serialport::Error,
    },
    /// Thrown if a device didn't answer within the timeout
    #[error("device {0} didn't respond")]
    Timeout(DeviceAddress),
    /// Thrown if a response was damaged or didn't fit the request
    #[error("framing error: {0}")]
    Framing(#[from] FrameError),
    /// Thrown if a device answered with an exception response
    #[error("device {address} rejected the request with exception code {code}")]
    Device { address: DeviceAddress, code: u8 },
    /// Thrown if a register holds a value that has no meaning
    #[error("register 0x{register:04X} holds unexpected value {value}")]
    UnexpectedValue { register: u16, value: u32 },
    /// Thrown by a multi-step operation in [`Motor`], `step` is the step that
    /// failed. Steps before it were already carried out and aren't undone.
    #[error("{step} failed: {source}")]
    Step {
        step: SequenceStep,
        source: Box<DriverError>,
    },
    /// Thrown by [`Motor::change_id`] if the new id was written but couldn't be
    /// committed. The device may answer to either id until it's power cycled.
    #[error(
        "device {address} took id {new_id} but didn't commit it, power cycle required: {source}"
    )]
    UncommittedId {
        address: DeviceAddress,
        new_id: DeviceAddress,
        source: Box<DriverError>,
    },
    /// Thrown if the bus was already closed
    #[error("bus is closed")]
    Closed,
    /// Wrapper around [`io::Error`]
    #[error(transparent)]
    IoError(#[from] io::Error),
    /// Wrapper around [`serialport::Error`]
    #[error(transparent)]
    SerialPortError(#[from] serialport::Error),
}

impl DriverError {
    /// True if this is a timeout, also if it happened within a step
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Step { source, .. } | Self::UncommittedId { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Whether the device rejected the request with an exception, so it's
    /// there even though the operation failed
    pub fn device_answered(&self) -> bool {
        match self {
            Self::Device { .. } => true,
            Self::Step { source, .. } | Self::UncommittedId { source, .. } => {
                source.device_answered()
            }
            _ => false,
        }
    }

    /// The exception code of a [`DriverError::Device`], if it's a known one
    pub fn exception(&self) -> Option<ExceptionCode> {
        match self {
            Self::Device { code, .. } => ExceptionCode::from_u8(*code),
            Self::Step { source, .. } | Self::UncommittedId { source, .. } => source.exception(),
            _ => None,
        }
    }
}

/// Errors of a single response frame
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("crc mismatch, calculated 0x{expected:04X} but received 0x{received:04X}")]
    CrcMismatch { expected: u16, received: u16 },
    /// Holds how many bytes arrived
    #[error("frame ended after {0} bytes")]
    Truncated(usize),
    #[error("unknown function code 0x{0:02X}")]
    UnknownFunction(u8),
    #[error("expected a response from {expected}, got one from {received}")]
    UnexpectedAddress {
        expected: DeviceAddress,
        received: DeviceAddress,
    },
    #[error("expected function 0x{expected:02X}, got 0x{received:02X}")]
    UnexpectedFunction { expected: u8, received: u8 },
    #[error("write was echoed as {count} registers at 0x{register:04X}")]
    EchoMismatch { register: u16, count: u16 },
    #[error("expected {expected} registers, got {received}")]
    WrongLength { expected: u16, received: usize },
    #[error("{0}")]
    Malformed(ParseError<Vec<u8>>),
}

/// Names the step of a multi-step operation, see [`DriverError::Step`]
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum SequenceStep {
    DriveMethod,
    Speed,
    Distance,
    Trigger,
    PresetMethod,
    PresetVelocity,
    PresetPosition,
    Pulse,
    Maintain,
    ReadCommand,
    WriteCommand,
    WriteId,
    RotationDirection,
    Commit,
}

impl Display for SequenceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DriveMethod => "writing the drive method",
            Self::Speed => "writing the speed",
            Self::Distance => "writing the step distance",
            Self::Trigger => "writing the trigger",
            Self::PresetMethod => "writing the preset drive method",
            Self::PresetVelocity => "writing the preset velocity",
            Self::PresetPosition => "writing the preset position",
            Self::Pulse => "writing the start pulse",
            Self::Maintain => "writing the maintain command",
            Self::ReadCommand => "reading the command register",
            Self::WriteCommand => "writing the command register",
            Self::WriteId => "writing the device id",
            Self::RotationDirection => "writing the rotation direction",
            Self::Commit => "committing to non-volatile memory",
        };
        write!(f, "{}", s)
    }
}

pub(crate) trait StepResult<T> {
    fn step(self, step: SequenceStep) -> Result<T, DriverError>;
}

impl<T> StepResult<T> for Result<T, DriverError> {
    fn step(self, step: SequenceStep) -> Result<T, DriverError> {
        self.map_err(|source| DriverError::Step {
            step,
            source: Box::new(source),
        })
    }
}

//

/// Exclusive access to the bus, handed out by [`Driver::with_bus`]
///
/// Everything done with one `Bus` happens without any other request getting
/// in between, which is what multi-step operations rely on.
pub struct Bus {
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    timing: Timing,
}

impl Bus {
    fn exchange(&mut self, request: Request, timeout: Duration) -> Result<Vec<u16>, DriverError> {
        debug!("{}", request);
        let response = self.transport.exchange(&request, timeout)?;
        request.check(response)
    }

    pub fn read_registers(
        &mut self,
        address: DeviceAddress,
        register: u16,
        count: u16,
    ) -> Result<Vec<u16>, DriverError> {
        let request = Request::read(address, register, count)?;
        self.exchange(request, self.timing.exchange)
    }

    pub fn read_register(&mut self, address: DeviceAddress, register: u16) -> Result<u16, DriverError> {
        // check guarantees exactly one value
        Ok(self.read_registers(address, register, 1)?[0])
    }

    /// Reads a 32-bit value, upper word first
    pub fn read_pair(
        &mut self,
        address: DeviceAddress,
        register: u16,
    ) -> Result<RegisterPair, DriverError> {
        let values = self.read_registers(address, register, 2)?;
        Ok(RegisterPair::new(values[0], values[1]))
    }

    pub fn write_registers(
        &mut self,
        address: DeviceAddress,
        register: u16,
        values: &[u16],
    ) -> Result<(), DriverError> {
        let request = Request::write(address, register, values)?;
        self.exchange(request, self.timing.exchange).map(|_| ())
    }

    pub fn write_register(
        &mut self,
        address: DeviceAddress,
        register: u16,
        value: u16,
    ) -> Result<(), DriverError> {
        self.write_registers(address, register, &[value])
    }

    /// Writes a 32-bit value, upper word first
    pub fn write_pair(
        &mut self,
        address: DeviceAddress,
        register: u16,
        value: i32,
    ) -> Result<(), DriverError> {
        self.write_registers(address, register, &split_u32(value).registers())
    }

    /// Checks whether anything answers at `address` by reading its device id
    /// with the short probe timeout. An exception response counts as an answer.
    ///
    /// # Errors
    /// Only errors other than a timeout or an exception are returned, for
    /// example a damaged frame or a closed bus.
    pub fn probe(&mut self, address: DeviceAddress) -> Result<bool, DriverError> {
        let request = Request::read(address, map::DEVICE_ID, 2)?;
        match self.exchange(request, self.timing.probe_timeout) {
            Ok(_) | Err(DriverError::Device { .. }) => Ok(true),
            Err(DriverError::Timeout(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Waits for `duration` using the bus' clock
    pub fn settle(&self, duration: Duration) {
        self.clock.sleep(duration)
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }
}

impl Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus {{ transport: _, clock: _, timing: {:?}, open: {:?} }}",
            self.timing,
            self.transport.is_open()
        )
    }
}

//

// the registry is behind its own mutex so looking at it never waits on a
// running operation. the two locks are never held at the same time
struct InnerDriver {
    bus: Mutex<Bus>,
    known: Mutex<BTreeMap<DeviceAddress, DateTime<Local>>>,
    clock: Arc<dyn Clock>,
    timing: Timing,
}

impl InnerDriver {
    fn bus(&self) -> MutexGuard<'_, Bus> {
        // a panic while holding the bus doesn't leave it in a state the next
        // request couldn't deal with, every exchange starts by clearing the input
        self.bus.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn known(&self) -> MutexGuard<'_, BTreeMap<DeviceAddress, DateTime<Local>>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Represents a single RS-485 bus with drivers attached to it
///
/// The driver itself doesn't do much, to talk to a device a [`Motor`] is
/// needed, which can be obtained by calling [`motor`][Driver::motor].
/// Cloning a driver is cheap, all clones share the same bus and it can be sent
/// to and shared between threads. Operations from different threads are
/// carried out one after another, never interleaved.
///
/// Alongside the bus the driver keeps a registry of the addresses that
/// answered lately. It is purely informational, operations never consult it.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<InnerDriver>,
}

impl Driver {
    /// Returns a new driver using the default [`Timing`] and a clock that
    /// actually sleeps
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::with_timing(transport, Timing::default(), Arc::new(SystemClock))
    }

    pub fn with_timing<T: Transport + 'static>(
        transport: T,
        timing: Timing,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Driver {
            inner: Arc::new(InnerDriver {
                bus: Mutex::new(Bus {
                    transport: Box::new(transport),
                    clock: Arc::clone(&clock),
                    timing,
                }),
                known: Mutex::new(BTreeMap::new()),
                clock,
                timing,
            }),
        }
    }

    /// Opens the serial port described by `config` and returns a driver for it
    ///
    /// # Errors
    /// Returns [`DriverError::Connection`] if the port can't be opened.
    ///
    /// # Examples
    /// ```no_run
    /// # use az_stepper_driver::{Driver, SerialConfig};
    /// let driver = Driver::open(&SerialConfig::default()).unwrap();
    /// let m1 = driver.motor(1).unwrap();
    /// m1.excite().unwrap();
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self, DriverError> {
        Ok(Self::new(RtuTransport::open(config)?))
    }

    /// Runs `f` with exclusive access to the bus
    ///
    /// The bus stays locked until `f` returns, also if it returns an error or
    /// panics.
    pub fn with_bus<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce(&mut Bus) -> Result<T, DriverError>,
    {
        let mut bus = self.inner.bus();
        f(&mut bus)
    }

    /// Returns a motor of the given address
    ///
    /// Nothing is sent, it is not checked whether a device with that address
    /// exists. Any number of motors with the same address can exist.
    ///
    /// # Errors
    /// Will return a [`DriverError::InvalidAddress`] if the given address is
    /// out of bounds.
    pub fn motor(&self, address: u8) -> Result<Motor, DriverError> {
        Ok(Motor::new(self.clone(), DeviceAddress::new(address)?))
    }

    /// Returns a scan over `addresses`, nothing is sent until it's iterated
    ///
    /// # Errors
    /// Will return a [`DriverError::InvalidAddress`] if the range reaches
    /// outside of `1..=247`.
    ///
    /// # Examples
    /// ```no_run
    /// # use az_stepper_driver::{Driver, SerialConfig};
    /// let driver = Driver::open(&SerialConfig::default()).unwrap();
    /// for address in driver.scan(1..=16).unwrap() {
    ///     println!("found {}", address.unwrap());
    /// }
    /// ```
    pub fn scan(&self, addresses: RangeInclusive<u8>) -> Result<Scan, DriverError> {
        if addresses.is_empty() {
            return Ok(Scan::new(self.clone(), None));
        }
        let first = DeviceAddress::new(*addresses.start())?;
        let last = DeviceAddress::new(*addresses.end())?;
        Ok(Scan::new(self.clone(), Some((first, last))))
    }

    /// Addresses that answered lately with the time they last did, ascending
    pub fn known_devices(&self) -> Vec<(DeviceAddress, DateTime<Local>)> {
        self.inner.known().iter().map(|(a, t)| (*a, *t)).collect()
    }

    pub fn is_known(&self, address: DeviceAddress) -> bool {
        self.inner.known().contains_key(&address)
    }

    /// Removes `address` from the registry, returns whether it was in there
    pub fn forget(&self, address: DeviceAddress) -> bool {
        self.inner.known().remove(&address).is_some()
    }

    pub(crate) fn mark_seen(&self, address: DeviceAddress) {
        self.inner.known().insert(address, Local::now());
    }

    pub fn timing(&self) -> Timing {
        self.inner.timing
    }

    // waits without holding the bus
    pub(crate) fn pause(&self, duration: Duration) {
        self.inner.clock.sleep(duration)
    }

    /// Closes the bus, every operation afterwards fails with
    /// [`DriverError::Closed`]. Closing twice does nothing.
    ///
    /// Waits for a running operation to finish first.
    pub fn close(&self) {
        let mut bus = self.inner.bus();
        if bus.transport.is_open() {
            bus.transport.close();
            info!("bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.inner.bus().is_open()
    }
}

impl Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Driver {{ known: {:?} }}",
            self.inner.known().keys().collect::<Vec<_>>()
        )
    }
}
