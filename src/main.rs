//! Command line access to the drivers on one bus
//!
//! ```bash
//! azbus --port /dev/ttyUSB0 scan --to 16
//! azbus drive 1 --speed 2000 --step -15000
//! AZBUS_PORT=/dev/ttyUSB1 azbus status 1
//! ```
//!
//! Set `RUST_LOG=debug` to see every request, `RUST_LOG=trace` for the raw frames.

use anyhow::{Context, Result};
use az_stepper_driver::{
    DataNumber, DriveMethod, Driver, MotionPreset, PresetSlot, RotationDirection, RtuTransport,
    SerialConfig, SystemClock, Timing,
};
use clap::{Parser, Subcommand, ValueEnum};
use serialport::{DataBits, Parity, StopBits};
use std::{sync::Arc, time::Duration};

#[derive(Parser)]
#[command(name = "azbus")]
#[command(about = "Controls AZ-series stepper drivers over Modbus RTU", long_about = None)]
struct Cli {
    /// Serial device the bus is connected to
    #[arg(long, env = "AZBUS_PORT", default_value = "/dev/ttyUSB0")]
    port: String,

    #[arg(long, default_value_t = 115200)]
    baud: u32,

    #[arg(long, value_enum, default_value_t = ParityArg::Even)]
    parity: ParityArg,

    #[arg(long, value_enum, default_value_t = StopBitsArg::One)]
    stop_bits: StopBitsArg,

    /// Response timeout of normal requests
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Response timeout while scanning
    #[arg(long, default_value_t = 100)]
    probe_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the addresses that answer
    Scan {
        #[arg(long, default_value_t = 1)]
        from: u8,
        #[arg(long, default_value_t = 247)]
        to: u8,
    },

    /// Print the status registers
    Status { id: u8 },

    /// Put one or more drivers into direct-drive mode
    Init {
        #[arg(required = true)]
        ids: Vec<u8>,
    },

    /// Move using direct drive
    Drive {
        id: u8,
        #[arg(long, value_enum, default_value_t = MethodArg::Increment)]
        method: MethodArg,
        #[arg(long, allow_negative_numbers = true)]
        speed: i32,
        #[arg(long, allow_negative_numbers = true)]
        step: i32,
    },

    /// Write a preset motion table entry
    Preset {
        id: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,
        #[arg(long, value_enum, default_value_t = MethodArg::Increment)]
        method: MethodArg,
        #[arg(long, allow_negative_numbers = true)]
        velocity: i32,
        #[arg(long, allow_negative_numbers = true)]
        position: i32,
    },

    /// Read a preset motion table entry
    ReadPreset {
        id: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        slot: u8,
    },

    /// Start the operation stored under a data number
    Start {
        id: u8,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=63))]
        data_no: u8,
    },

    Stop { id: u8 },

    /// Turn on excitation
    Excite { id: u8 },

    /// Give a driver a new address and commit it
    ChangeId { id: u8, new_id: u8 },

    /// Read the device id register
    Id { id: u8 },

    /// Set and commit the rotation direction
    Direction {
        id: u8,
        #[arg(value_enum)]
        direction: DirectionArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ParityArg {
    #[value(name = "none")]
    Off,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(p: ParityArg) -> Self {
        match p {
            ParityArg::Off => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StopBitsArg {
    One,
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(s: StopBitsArg) -> Self {
        match s {
            StopBitsArg::One => StopBits::One,
            StopBitsArg::Two => StopBits::Two,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Increment,
    Absolute,
}

impl From<MethodArg> for DriveMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Increment => DriveMethod::Increment,
            MethodArg::Absolute => DriveMethod::Absolute,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DirectionArg {
    Ccw,
    Cw,
}

impl From<DirectionArg> for RotationDirection {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Ccw => RotationDirection::Ccw,
            DirectionArg::Cw => RotationDirection::Cw,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = SerialConfig {
        port: cli.port.clone(),
        baud_rate: cli.baud,
        parity: cli.parity.into(),
        stop_bits: cli.stop_bits.into(),
        data_bits: DataBits::Eight,
        timeout: Duration::from_millis(cli.timeout_ms),
    };
    let timing = Timing {
        exchange: Duration::from_millis(cli.timeout_ms),
        probe_timeout: Duration::from_millis(cli.probe_timeout_ms),
        ..Timing::default()
    };
    let transport = RtuTransport::open(&config)?;
    let driver = Driver::with_timing(transport, timing, Arc::new(SystemClock));

    let res = run(&driver, cli.command);
    driver.close();
    res
}

fn run(driver: &Driver, command: Commands) -> Result<()> {
    match command {
        Commands::Scan { from, to } => {
            let mut found = 0;
            for address in driver.scan(from..=to)? {
                match address {
                    Ok(a) => {
                        println!("{}", a);
                        found += 1;
                    }
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            println!("{} device(s) found", found);
        }
        Commands::Status { id } => {
            let status = driver
                .motor(id)?
                .read_status()
                .into_result()
                .with_context(|| format!("reading status of {}", id))?;
            println!("{}", status);
        }
        Commands::Init { ids } => {
            for id in ids {
                driver
                    .motor(id)?
                    .initialize()
                    .with_context(|| format!("initializing {}", id))?;
                println!("{} initialized", id);
            }
        }
        Commands::Drive {
            id,
            method,
            speed,
            step,
        } => {
            driver
                .motor(id)?
                .direct_drive(method.into(), speed, step)
                .with_context(|| format!("direct drive of {}", id))?;
            println!("{} moving", id);
        }
        Commands::Preset {
            id,
            slot,
            method,
            velocity,
            position,
        } => {
            let preset = MotionPreset {
                method: method.into(),
                velocity,
                position,
            };
            driver
                .motor(id)?
                .preset(PresetSlot::try_from(slot)?, &preset)
                .with_context(|| format!("writing preset {} of {}", slot, id))?;
            println!("preset {} of {} written", slot, id);
        }
        Commands::ReadPreset { id, slot } => {
            let preset = driver
                .motor(id)?
                .read_preset(PresetSlot::try_from(slot)?)
                .with_context(|| format!("reading preset {} of {}", slot, id))?;
            println!(
                "method {:?}, velocity {}, position {}",
                preset.method, preset.velocity, preset.position
            );
        }
        Commands::Start { id, data_no } => {
            driver
                .motor(id)?
                .start(DataNumber::new(data_no)?)
                .with_context(|| format!("starting {} on {}", data_no, id))?;
            println!("{} started {}", id, data_no);
        }
        Commands::Stop { id } => {
            driver
                .motor(id)?
                .stop()
                .with_context(|| format!("stopping {}", id))?;
            println!("{} stopped", id);
        }
        Commands::Excite { id } => {
            driver
                .motor(id)?
                .excite()
                .with_context(|| format!("exciting {}", id))?;
            println!("{} excited", id);
        }
        Commands::ChangeId { id, new_id } => {
            let new_id = driver
                .motor(id)?
                .change_id(new_id)
                .with_context(|| format!("changing id of {}", id))?;
            println!("{} is now {}", id, new_id);
        }
        Commands::Id { id } => {
            let pair = driver
                .motor(id)?
                .read_device_id()
                .with_context(|| format!("reading id of {}", id))?;
            println!("{}", pair);
        }
        Commands::Direction { id, direction } => {
            let direction = RotationDirection::from(direction);
            driver
                .motor(id)?
                .set_rotation_direction(direction)
                .with_context(|| format!("setting rotation direction of {}", id))?;
            println!("rotation direction of {} set to {:?}", id, direction);
        }
    }
    Ok(())
}
