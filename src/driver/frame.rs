#[cfg(test)]
mod tests;

use super::{
    parse::{parse_enum_value, ParseError},
    DriverError, FrameError,
};
use crate::util::{ensure, hex};
use crc::{Crc, CRC_16_MODBUS};
use log::trace;
use nom::{
    bytes::complete::take,
    multi::count,
    number::complete::{be_u16, be_u8},
    Finish, IResult, Parser,
};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::{
    fmt::Display,
    io::{ErrorKind, Read},
    time::{Duration, Instant},
};

pub(crate) const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Set in the function code of an exception response
pub(crate) const EXCEPTION_FLAG: u8 = 0x80;

/// Most registers a single read may ask for
pub const MAX_READ_COUNT: u16 = 125;
/// Most registers a single write may carry
pub const MAX_WRITE_COUNT: u16 = 123;

// address + function + byte count + 250 data bytes + crc
const MAX_FRAME: usize = 256;

// unfortunately, due to rustfmt not having the blank_lines_upper_bound feature
// stable yet, we gotta put comments in between the different sections. otherwise
// its just too much

//

/// Address of one driver on the bus
///
/// Only unicast addresses are valid, broadcast (0) and the reserved range
/// above 247 are rejected.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;

    /// # Errors
    /// Returns [`DriverError::InvalidAddress`] if `address` is outside of
    /// `1..=247`
    pub fn new(address: u8) -> Result<Self, DriverError> {
        ensure!(
            (Self::MIN..=Self::MAX).contains(&address),
            DriverError::InvalidAddress(address)
        );
        Ok(Self(address))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    fn parse(s: &[u8]) -> IResult<&[u8], Self, ParseError<&[u8]>> {
        parse_enum_value(s, be_u8::<_, ParseError<&[u8]>>, |a| {
            Self::new(a).ok()
        })
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = DriverError;

    fn try_from(address: u8) -> Result<Self, Self::Error> {
        Self::new(address)
    }
}

impl From<DeviceAddress> for u8 {
    fn from(a: DeviceAddress) -> Self {
        a.0
    }
}

impl Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//

/// The two function codes the drivers are spoken to with
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, FromPrimitive)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
    WriteMultipleRegisters = 0x10,
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", *self as u8)
    }
}

/// Codes a device can put in an exception response
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, FromPrimitive)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

impl Display for ExceptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "device failure",
            Self::Acknowledge => "acknowledge",
            Self::ServerDeviceBusy => "device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailed => "gateway target failed to respond",
        };
        write!(f, "{}", s)
    }
}

//

/// A single request frame
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Request {
    Read {
        address: DeviceAddress,
        register: u16,
        count: u16,
    },
    Write {
        address: DeviceAddress,
        register: u16,
        values: Vec<u16>,
    },
}

impl Request {
    /// # Errors
    /// Returns [`DriverError::InvalidArgument`] if `count` is 0 or bigger than
    /// [`MAX_READ_COUNT`]
    pub fn read(address: DeviceAddress, register: u16, count: u16) -> Result<Self, DriverError> {
        ensure!(
            count >= 1 && count <= MAX_READ_COUNT,
            DriverError::InvalidArgument("register count must be 1..=125")
        );
        Ok(Self::Read {
            address,
            register,
            count,
        })
    }

    /// # Errors
    /// Returns [`DriverError::InvalidArgument`] if `values` is empty or longer
    /// than [`MAX_WRITE_COUNT`]
    pub fn write(address: DeviceAddress, register: u16, values: &[u16]) -> Result<Self, DriverError> {
        ensure!(
            !values.is_empty() && values.len() <= usize::from(MAX_WRITE_COUNT),
            DriverError::InvalidArgument("register count must be 1..=123")
        );
        Ok(Self::Write {
            address,
            register,
            values: values.to_vec(),
        })
    }

    pub fn address(&self) -> DeviceAddress {
        match self {
            Self::Read { address, .. } | Self::Write { address, .. } => *address,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::Read { .. } => FunctionCode::ReadHoldingRegisters,
            Self::Write { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    pub fn register(&self) -> u16 {
        match self {
            Self::Read { register, .. } | Self::Write { register, .. } => *register,
        }
    }

    /// Encodes the request into a complete frame, crc included
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(MAX_FRAME);
        frame.push(self.address().get());
        frame.push(self.function() as u8);
        match self {
            Self::Read {
                register, count, ..
            } => {
                frame.extend_from_slice(&register.to_be_bytes());
                frame.extend_from_slice(&count.to_be_bytes());
            }
            Self::Write {
                register, values, ..
            } => {
                frame.extend_from_slice(&register.to_be_bytes());
                frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
                frame.push((values.len() * 2) as u8);
                values
                    .iter()
                    .for_each(|v| frame.extend_from_slice(&v.to_be_bytes()));
            }
        }
        let crc = CRC_MODBUS.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Checks whether `response` answers this request and returns the register
    /// values it carried. A write answer carries no values, so an empty `Vec`
    /// is returned for it.
    ///
    /// # Errors
    /// An exception response for this request's function is returned as
    /// [`DriverError::Device`], anything that doesn't fit the request as
    /// [`DriverError::Framing`].
    pub fn check(&self, response: Response) -> Result<Vec<u16>, DriverError> {
        ensure!(
            response.address() == self.address(),
            DriverError::Framing(FrameError::UnexpectedAddress {
                expected: self.address(),
                received: response.address(),
            })
        );
        match (self, response) {
            (_, Response::Exception { function, code, .. }) => {
                ensure!(
                    function == self.function(),
                    DriverError::Framing(FrameError::UnexpectedFunction {
                        expected: self.function() as u8,
                        received: function as u8 | EXCEPTION_FLAG,
                    })
                );
                Err(DriverError::Device {
                    address: self.address(),
                    code,
                })
            }
            (Self::Read { count, .. }, Response::Read { values, .. }) => {
                ensure!(
                    values.len() == usize::from(*count),
                    DriverError::Framing(FrameError::WrongLength {
                        expected: *count,
                        received: values.len(),
                    })
                );
                Ok(values)
            }
            (
                Self::Write {
                    register, values, ..
                },
                Response::Write {
                    register: echoed_register,
                    count: echoed_count,
                    ..
                },
            ) => {
                ensure!(
                    *register == echoed_register && usize::from(echoed_count) == values.len(),
                    DriverError::Framing(FrameError::EchoMismatch {
                        register: echoed_register,
                        count: echoed_count,
                    })
                );
                Ok(Vec::new())
            }
            (_, response) => Err(DriverError::Framing(FrameError::UnexpectedFunction {
                expected: self.function() as u8,
                received: response.function() as u8,
            })),
        }
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read {
                address,
                register,
                count,
            } => write!(f, "read {}@0x{:04X} from {}", count, register, address),
            Self::Write {
                address,
                register,
                values,
            } => write!(f, "write {:04X?}@0x{:04X} to {}", values, register, address),
        }
    }
}

//

/// A single response frame, crc already stripped
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Response {
    Read {
        address: DeviceAddress,
        values: Vec<u16>,
    },
    /// Echo of the written register and count
    Write {
        address: DeviceAddress,
        register: u16,
        count: u16,
    },
    Exception {
        address: DeviceAddress,
        /// Function code of the failed request, without the exception flag
        function: FunctionCode,
        code: u8,
    },
}

impl Response {
    pub fn address(&self) -> DeviceAddress {
        match self {
            Self::Read { address, .. }
            | Self::Write { address, .. }
            | Self::Exception { address, .. } => *address,
        }
    }

    pub fn function(&self) -> FunctionCode {
        match self {
            Self::Read { .. } => FunctionCode::ReadHoldingRegisters,
            Self::Write { .. } => FunctionCode::WriteMultipleRegisters,
            Self::Exception { function, .. } => *function,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    pub(crate) fn parse(s: &[u8]) -> IResult<&[u8], Self, ParseError<&[u8]>> {
        let (s, address) = DeviceAddress::parse(s)?;
        let (s, fc) = be_u8::<_, ParseError<&[u8]>>(s)?;
        if fc & EXCEPTION_FLAG != 0 {
            let function = FunctionCode::from_u8(fc & !EXCEPTION_FLAG)
                .ok_or(nom::Err::Error(ParseError::InvalidValue))?;
            return be_u8::<_, ParseError<&[u8]>>
                .map(|code| Self::Exception {
                    address,
                    function,
                    code,
                })
                .parse(s);
        }
        match FunctionCode::from_u8(fc) {
            Some(FunctionCode::ReadHoldingRegisters) => {
                let (s, n) = be_u8::<_, ParseError<&[u8]>>(s)?;
                let (s, data) = take::<_, _, ParseError<&[u8]>>(n)(s)?;
                if data.len() % 2 != 0 {
                    return Err(nom::Err::Error(ParseError::InvalidValue));
                }
                let (_, values) = count(be_u16::<_, ParseError<&[u8]>>, data.len() / 2)(data)?;
                Ok((s, Self::Read { address, values }))
            }
            Some(FunctionCode::WriteMultipleRegisters) => {
                let (s, register) = be_u16::<_, ParseError<&[u8]>>(s)?;
                let (s, count) = be_u16::<_, ParseError<&[u8]>>(s)?;
                Ok((
                    s,
                    Self::Write {
                        address,
                        register,
                        count,
                    },
                ))
            }
            None => Err(nom::Err::Error(ParseError::InvalidValue)),
        }
    }

    /// Decodes a complete frame as returned by [`read_frame`]
    ///
    /// # Errors
    /// Returns [`DriverError::Framing`] if the crc doesn't match, the function
    /// code is unknown or the body doesn't parse completely.
    pub fn decode(raw: &[u8]) -> Result<Self, DriverError> {
        // address, function, at least one byte and the crc
        ensure!(
            raw.len() >= 5,
            DriverError::Framing(FrameError::Truncated(raw.len()))
        );
        let (body, crc) = raw.split_at(raw.len() - 2);
        let expected = CRC_MODBUS.checksum(body);
        let received = u16::from_le_bytes([crc[0], crc[1]]);
        ensure!(
            expected == received,
            DriverError::Framing(FrameError::CrcMismatch { expected, received })
        );
        ensure!(
            FunctionCode::from_u8(body[1] & !EXCEPTION_FLAG).is_some(),
            DriverError::Framing(FrameError::UnknownFunction(body[1]))
        );
        let (rem, response) = Self::parse(body)
            .finish()
            .map_err(|e| DriverError::Framing(FrameError::Malformed(e.into())))?;
        ensure!(
            rem.is_empty(),
            DriverError::Framing(FrameError::Malformed(ParseError::NonEmptyRemainder))
        );
        Ok(response)
    }
}

//

/// Reads exactly one response frame from `port`
///
/// How many bytes belong to the frame is derived from the function code and,
/// for reads, the byte count. `port` is expected to time out on its own.
///
/// The whole frame has to be there within `timeout`, no further read is
/// started after that. A read that is already waiting still ends only with the
/// port's own timeout, so a device trickling bytes can stretch this to
/// `timeout` plus one port timeout at most.
///
/// # Errors
/// If nothing at all arrives, [`DriverError::Timeout`] is returned. If the
/// frame stops halfway or isn't complete in time, it's a
/// [`FrameError::Truncated`]. Unknown function codes are rejected before
/// reading any further.
pub fn read_frame<R: Read + ?Sized>(
    port: &mut R,
    address: DeviceAddress,
    timeout: Duration,
) -> Result<Vec<u8>, DriverError> {
    let deadline = Instant::now() + timeout;
    let mut frame = Vec::with_capacity(MAX_FRAME);
    fill(port, &mut frame, 2, address, deadline)?;
    let fc = frame[1];
    let rest = if fc & EXCEPTION_FLAG != 0 {
        // code + crc
        3
    } else {
        match FunctionCode::from_u8(fc) {
            Some(FunctionCode::ReadHoldingRegisters) => {
                fill(port, &mut frame, 1, address, deadline)?;
                usize::from(frame[2]) + 2
            }
            // register + count + crc
            Some(FunctionCode::WriteMultipleRegisters) => 6,
            None => return Err(DriverError::Framing(FrameError::UnknownFunction(fc))),
        }
    };
    fill(port, &mut frame, rest, address, deadline)?;
    trace!("rx {}", hex(&frame));
    Ok(frame)
}

// appends exactly n bytes to frame
fn fill<R: Read + ?Sized>(
    port: &mut R,
    frame: &mut Vec<u8>,
    n: usize,
    address: DeviceAddress,
    deadline: Instant,
) -> Result<(), DriverError> {
    let mut filled = frame.len();
    frame.resize(filled + n, 0);
    while filled < frame.len() {
        if filled > 0 && Instant::now() >= deadline {
            return Err(silence(filled, address));
        }
        match port.read(&mut frame[filled..]) {
            Ok(0) => return Err(silence(filled, address)),
            Ok(k) => filled += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return Err(silence(filled, address))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn silence(received: usize, address: DeviceAddress) -> DriverError {
    if received == 0 {
        DriverError::Timeout(address)
    } else {
        DriverError::Framing(FrameError::Truncated(received))
    }
}
