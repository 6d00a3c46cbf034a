//! Register addresses and bit masks of the AZ-series drivers
//!
//! Values that span two registers are stored upper word first, see
//! [`RegisterPair`][super::codec::RegisterPair].

macro_rules! makereg {
    ($($name:ident, $val:literal),*) => {
        $(pub const $name: u16 = $val;)*
    };
}

// registers in the order they appear in the register map
#[rustfmt::skip]
makereg!(
    COMMAND_1, 0x001E,
    STATUS_1, 0x0020,
    STATUS_2, 0x0021,
    DIRECT_DRIVE_METHOD, 0x005A,
    DIRECT_DRIVE_STEP, 0x005C,
    DIRECT_DRIVE_SPEED, 0x005E,
    DIRECT_DRIVE_TRIGGER, 0x0066,
    CONFIGURATION_EXECUTE, 0x018C,
    NV_COMMIT, 0x0192,
    ROTATION_DIRECTION, 0x0384,
    PRESET_1_POSITION, 0x0402,
    PRESET_2_POSITION, 0x0404,
    PRESET_1_VELOCITY, 0x0502,
    PRESET_2_VELOCITY, 0x0504,
    PRESET_1_DRIVE_METHOD, 0x0601,
    PRESET_2_DRIVE_METHOD, 0x0602,
    DEVICE_ID, 0x1380
);

// COMMAND_1
pub const C_ON: u16 = 0x20;
pub const STOP: u16 = 0x10;
pub const START: u16 = 0x01;
pub const DATA_NO_MASK: u16 = 0x3F;
pub const DATA_NO_SHIFT: u16 = 8;

// STATUS_1
pub const READY: u16 = 0x20;
pub const MOVE: u16 = 0x04;
pub const START_ECHO: u16 = 0x01;
pub const ALARM: u16 = 0x80;

// STATUS_2
pub const ENABLE: u16 = 0x02;

/// Written to [`DIRECT_DRIVE_TRIGGER`], goes on the wire as `[0xFFFF, 0xFFFB]`
pub const TRIGGER_INITIALIZE: i32 = -5;
/// Written to [`DIRECT_DRIVE_TRIGGER`] to start a direct-drive motion with the
/// current method, speed and step
pub const TRIGGER_MOTION: i32 = 1;
/// Written to [`NV_COMMIT`] and [`CONFIGURATION_EXECUTE`]
pub const EXECUTE: i32 = 1;
