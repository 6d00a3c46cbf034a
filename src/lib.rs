//! Rust driver for AZ-series stepper motor drivers connected over Modbus RTU.
//! Only reading holding registers (0x03) and writing multiple registers (0x10)
//! are used, which is all the drivers need for direct drive, preset motion
//! tables, excitation, status and changing their device id.
//!
//! # Usage
//! Each RS-485 port with connected drivers gets its own [`Driver`]. A [`Motor`]
//! for a single device can then be obtained by calling [`Driver::motor`]. Every
//! method of a [`Motor`] sends its requests right away and blocks until the
//! device answered. Operations consisting of multiple writes, like
//! [`start`][Motor::start] or [`direct_drive`][Motor::direct_drive], hold the
//! bus for their whole duration, so a [`Driver`] can be shared between threads
//! without requests of different operations getting mixed up.
//!
//! Which addresses are populated can be found out with [`Driver::scan`].
//!
//! # Examples
//! ```no_run
//! # use az_stepper_driver::{DataNumber, DriveMethod, Driver, MotionPreset, PresetSlot, SerialConfig};
//! let driver = Driver::open(&SerialConfig {
//!     port: "/dev/ttyUSB0".to_string(),
//!     ..SerialConfig::default()
//! })
//! .unwrap();
//! let m1 = driver.motor(1).unwrap();
//!
//! m1.preset(
//!     PresetSlot::One,
//!     &MotionPreset {
//!         method: DriveMethod::Increment,
//!         velocity: 2000,
//!         position: 15000,
//!     },
//! )
//! .unwrap();
//! m1.excite().unwrap();
//! m1.start(PresetSlot::One).unwrap();
//!
//! let status = m1.read_status().into_result().unwrap();
//! println!("moving: {}", status.moving);
//! ```
//!

mod driver;
pub(crate) mod util;

pub use driver::{
    codec::*,
    frame::{DeviceAddress, ExceptionCode, FunctionCode, Request, Response},
    map,
    motor::Motor,
    parse::ParseError,
    scan::Scan,
    timing::{Clock, SystemClock, Timing},
    transport::{RtuTransport, SerialConfig, Transport},
    Bus, Driver, DriverError, FrameError, SequenceStep,
};
