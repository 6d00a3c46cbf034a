//! Conversions between register contents and the values they stand for.
//!
//! Everything in here is pure, nothing talks to the bus. 32-bit quantities are
//! split into two registers, upper word first, and signed values use two's
//! complement over the full 32 bits.


use super::{map, DriverError};
use crate::util::ensure;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt::Display;

// unfortunately, due to rustfmt not having the blank_lines_upper_bound feature
// stable yet, we gotta put comments in between the different sections. otherwise
// its just too much

//

/// One 32-bit quantity spread over two consecutive registers
///
/// # Examples
/// ```
/// # use az_stepper_driver::{join_registers, split_u32, RegisterPair};
/// let pair = split_u32(-1000);
/// assert_eq!(pair, RegisterPair::new(0xFFFF, 0xFC18));
/// assert_eq!(join_registers(pair.high, pair.low), -1000);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default)]
pub struct RegisterPair {
    /// Upper 16 bits, sent first
    pub high: u16,
    /// Lower 16 bits
    pub low: u16,
}

impl RegisterPair {
    pub fn new(high: u16, low: u16) -> Self {
        Self { high, low }
    }

    /// The unsigned 32-bit value, `(high << 16) | low`
    pub fn combined(&self) -> u32 {
        (u32::from(self.high) << 16) | u32::from(self.low)
    }

    /// The signed 32-bit value
    pub fn value(&self) -> i32 {
        join_registers(self.high, self.low)
    }

    /// The registers in the order they go on the wire
    pub fn registers(&self) -> [u16; 2] {
        [self.high, self.low]
    }

    /// Builds a pair from the first two values of a register read
    pub fn from_registers(registers: &[u16]) -> Option<Self> {
        match registers {
            [high, low] => Some(Self::new(*high, *low)),
            _ => None,
        }
    }
}

impl From<i32> for RegisterPair {
    fn from(value: i32) -> Self {
        split_u32(value)
    }
}

impl Display for RegisterPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[0x{:04X}, 0x{:04X}] = 0x{:08X}",
            self.high,
            self.low,
            self.combined()
        )
    }
}

/// Splits `value` into its upper and lower 16 bits. Negative values are
/// reinterpreted as unsigned first, so `-1` becomes `[0xFFFF, 0xFFFF]`.
pub fn split_u32(value: i32) -> RegisterPair {
    let value = value as u32;
    RegisterPair {
        high: ((value >> 16) & 0xFFFF) as u16,
        low: (value & 0xFFFF) as u16,
    }
}

/// Joins two registers into a signed 32-bit value, anything above
/// `0x7FFFFFFF` comes out negative
pub fn join_registers(high: u16, low: u16) -> i32 {
    ((u32::from(high) << 16) | u32::from(low)) as i32
}

//

/// Selects one of the 64 operation data entries of a driver
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default, PartialOrd, Ord)]
pub struct DataNumber(u8);

impl DataNumber {
    /// Highest data number the 6 bit field can hold
    pub const MAX: u8 = map::DATA_NO_MASK as u8;

    /// # Errors
    /// Returns [`DriverError::InvalidArgument`] if `no` doesn't fit into 6 bits
    pub fn new(no: u8) -> Result<Self, DriverError> {
        ensure!(
            no <= Self::MAX,
            DriverError::InvalidArgument("data number must be 0..=63")
        );
        Ok(Self(no))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl From<PresetSlot> for DataNumber {
    fn from(slot: PresetSlot) -> Self {
        Self(slot as u8)
    }
}

impl TryFrom<u8> for DataNumber {
    type Error = DriverError;

    fn try_from(no: u8) -> Result<Self, Self::Error> {
        Self::new(no)
    }
}

impl Display for DataNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//

/// Contents of the `COMMAND_1` register
///
/// Only C-ON, STOP, START and the data number are represented, every other bit
/// is dropped by [`decode`][CommandWord::decode].
///
/// # Examples
/// ```
/// # use az_stepper_driver::{CommandWord, DataNumber};
/// let pulse = CommandWord {
///     data_no: DataNumber::new(1).unwrap(),
///     c_on: true,
///     stop: false,
///     start: true,
/// };
/// assert_eq!(pulse.encode(), 0x0121);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default)]
pub struct CommandWord {
    /// Bits 8-13
    pub data_no: DataNumber,
    /// Bit 5, excitation
    pub c_on: bool,
    /// Bit 4
    pub stop: bool,
    /// Bit 0, starts the operation selected by `data_no` on its rising edge
    pub start: bool,
}

impl CommandWord {
    pub fn encode(&self) -> u16 {
        encode_command(self.data_no, self.c_on, self.stop, self.start)
    }

    pub fn decode(word: u16) -> Self {
        Self {
            data_no: DataNumber(((word >> map::DATA_NO_SHIFT) & map::DATA_NO_MASK) as u8),
            c_on: word & map::C_ON != 0,
            stop: word & map::STOP != 0,
            start: word & map::START != 0,
        }
    }
}

impl From<CommandWord> for u16 {
    fn from(c: CommandWord) -> Self {
        c.encode()
    }
}

impl Display for CommandWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.encode())
    }
}

pub fn encode_command(data_no: DataNumber, c_on: bool, stop: bool, start: bool) -> u16 {
    let mut word = (u16::from(data_no.0) & map::DATA_NO_MASK) << map::DATA_NO_SHIFT;
    if c_on {
        word |= map::C_ON;
    }
    if stop {
        word |= map::STOP;
    }
    if start {
        word |= map::START;
    }
    word
}

//

/// Live driver state from `STATUS_1` and `STATUS_2`
///
/// A default (all `false`) status does not mean the motor is safe, it usually
/// means the status couldn't be read, see [`StatusReading`].
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, Default)]
pub struct StatusWord {
    /// Driver can accept an operation
    pub ready: bool,
    /// Motor is moving
    pub moving: bool,
    /// START as the driver saw it
    pub start: bool,
    pub alarm: bool,
    /// Motor is excited
    pub enabled: bool,
    /// Raw `STATUS_1`
    pub word1: u16,
    /// Raw `STATUS_2`
    pub word2: u16,
}

pub fn decode_status(word1: u16, word2: u16) -> StatusWord {
    StatusWord {
        ready: word1 & map::READY != 0,
        moving: word1 & map::MOVE != 0,
        start: word1 & map::START_ECHO != 0,
        alarm: word1 & map::ALARM != 0,
        enabled: word2 & map::ENABLE != 0,
        word1,
        word2,
    }
}

impl Display for StatusWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ready={} move={} start={} alarm={} enable={} (0x{:04X}, 0x{:04X})",
            self.ready, self.moving, self.start, self.alarm, self.enabled, self.word1, self.word2
        )
    }
}

/// Result of [`Motor::read_status`][super::motor::Motor::read_status]
///
/// If reading failed, `status` has every flag cleared and `error` says why.
/// Always check `error` before trusting the flags.
#[derive(Debug)]
pub struct StatusReading {
    pub status: StatusWord,
    pub error: Option<DriverError>,
}

impl StatusReading {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<StatusWord, DriverError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.status),
        }
    }
}

//

/// How a target position is interpreted, used by direct drive and the preset
/// tables alike
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, FromPrimitive)]
pub enum DriveMethod {
    /// Relative to the current position
    Increment = 0,
    Absolute = 1,
}

impl Display for DriveMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

//

#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, FromPrimitive)]
pub enum RotationDirection {
    /// Counterclockwise for positive positions
    Ccw = 0,
    /// Clockwise for positive positions
    Cw = 1,
}

impl Display for RotationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

//

/// The preset motion tables this crate knows the registers of
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, FromPrimitive)]
pub enum PresetSlot {
    One = 1,
    Two = 2,
}

/// Register addresses of one preset slot
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub struct PresetRegisters {
    /// Single register
    pub drive_method: u16,
    /// Register pair
    pub velocity: u16,
    /// Register pair
    pub position: u16,
}

impl PresetSlot {
    pub fn registers(self) -> PresetRegisters {
        match self {
            PresetSlot::One => PresetRegisters {
                drive_method: map::PRESET_1_DRIVE_METHOD,
                velocity: map::PRESET_1_VELOCITY,
                position: map::PRESET_1_POSITION,
            },
            PresetSlot::Two => PresetRegisters {
                drive_method: map::PRESET_2_DRIVE_METHOD,
                velocity: map::PRESET_2_VELOCITY,
                position: map::PRESET_2_POSITION,
            },
        }
    }
}

impl TryFrom<u8> for PresetSlot {
    type Error = DriverError;

    fn try_from(slot: u8) -> Result<Self, Self::Error> {
        PresetSlot::from_u8(slot).ok_or(DriverError::InvalidArgument("preset slot must be 1 or 2"))
    }
}

impl Display for PresetSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// One entry of a preset motion table
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub struct MotionPreset {
    pub method: DriveMethod,
    pub velocity: i32,
    pub position: i32,
}
