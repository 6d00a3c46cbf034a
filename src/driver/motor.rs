use super::{
    codec::{
        decode_status, encode_command, CommandWord, DataNumber, DriveMethod, MotionPreset,
        PresetSlot, RegisterPair, RotationDirection, StatusReading, StatusWord,
    },
    frame::DeviceAddress,
    map, Bus, Driver, DriverError, SequenceStep, StepResult,
};
use log::{debug, info, warn};
use num_traits::FromPrimitive;

/// Controls a single driver on the bus
///
/// Every method sends its whole sequence of requests while holding the bus, so
/// operations from other threads can't get in between. All methods block until
/// the last request was answered and all settle delays are over.
///
/// Multi-step operations don't undo anything on failure. The returned
/// [`DriverError::Step`] names the step that failed, everything before it was
/// carried out.
///
/// A motor is just an address and a handle to the bus. It can be cloned and
/// sent to other threads freely.
#[derive(Debug, Clone)]
pub struct Motor {
    driver: Driver,
    address: DeviceAddress,
}

impl Motor {
    pub(super) fn new(driver: Driver, address: DeviceAddress) -> Self {
        Motor { driver, address }
    }

    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    // runs f on the bus, the device counts as seen if it answered at all
    fn run<T, F>(&self, f: F) -> Result<T, DriverError>
    where
        F: FnOnce(&mut Bus, DeviceAddress) -> Result<T, DriverError>,
    {
        let res = self.driver.with_bus(|bus| f(bus, self.address));
        match &res {
            Ok(_) => self.driver.mark_seen(self.address),
            Err(e) => {
                if e.device_answered() {
                    self.driver.mark_seen(self.address);
                }
                warn!("device {}: {}", self.address, e);
            }
        }
        res
    }

    /// Puts the driver into direct-drive mode
    pub fn initialize(&self) -> Result<(), DriverError> {
        info!("initializing {}", self.address);
        self.run(|bus, a| bus.write_pair(a, map::DIRECT_DRIVE_TRIGGER, map::TRIGGER_INITIALIZE))
    }

    /// Moves the motor by `step` with `speed`, interpreted according to `method`
    ///
    /// The trigger is written last, so the motion only starts once all
    /// parameters went through.
    pub fn direct_drive(&self, method: DriveMethod, speed: i32, step: i32) -> Result<(), DriverError> {
        info!(
            "direct drive {}: method {}, speed {}, step {}",
            self.address, method, speed, step
        );
        self.run(|bus, a| {
            bus.write_pair(a, map::DIRECT_DRIVE_METHOD, method as i32)
                .step(SequenceStep::DriveMethod)?;
            bus.write_pair(a, map::DIRECT_DRIVE_SPEED, speed)
                .step(SequenceStep::Speed)?;
            bus.write_pair(a, map::DIRECT_DRIVE_STEP, step)
                .step(SequenceStep::Distance)?;
            bus.write_pair(a, map::DIRECT_DRIVE_TRIGGER, map::TRIGGER_MOTION)
                .step(SequenceStep::Trigger)
        })
    }

    /// Writes a preset motion table entry, it's carried out by
    /// [`start`][Motor::start]ing the matching data number
    pub fn preset(&self, slot: PresetSlot, preset: &MotionPreset) -> Result<(), DriverError> {
        info!(
            "preset {} slot {}: method {}, velocity {}, position {}",
            self.address, slot, preset.method, preset.velocity, preset.position
        );
        let regs = slot.registers();
        self.run(|bus, a| {
            bus.write_register(a, regs.drive_method, preset.method as u16)
                .step(SequenceStep::PresetMethod)?;
            bus.write_pair(a, regs.velocity, preset.velocity)
                .step(SequenceStep::PresetVelocity)?;
            bus.write_pair(a, regs.position, preset.position)
                .step(SequenceStep::PresetPosition)
        })
    }

    /// Reads a preset motion table entry back
    ///
    /// # Errors
    /// Returns [`DriverError::UnexpectedValue`] if the drive method register
    /// holds neither increment nor absolute.
    pub fn read_preset(&self, slot: PresetSlot) -> Result<MotionPreset, DriverError> {
        let regs = slot.registers();
        self.run(|bus, a| {
            let raw = bus.read_register(a, regs.drive_method)?;
            let method = DriveMethod::from_u16(raw).ok_or(DriverError::UnexpectedValue {
                register: regs.drive_method,
                value: u32::from(raw),
            })?;
            let velocity = bus.read_pair(a, regs.velocity)?.value();
            let position = bus.read_pair(a, regs.position)?.value();
            Ok(MotionPreset {
                method,
                velocity,
                position,
            })
        })
    }

    /// Starts the operation stored under `data_no`
    ///
    /// START only acts on its rising edge, so it's written once together with
    /// C-ON and, after the settle delay, cleared again while C-ON stays set.
    pub fn start(&self, data_no: impl Into<DataNumber>) -> Result<(), DriverError> {
        let data_no = data_no.into();
        let pulse = encode_command(data_no, true, false, true);
        let maintain = encode_command(data_no, true, false, false);
        info!("starting data number {} on {}", data_no, self.address);
        self.run(|bus, a| {
            bus.write_register(a, map::COMMAND_1, pulse)
                .step(SequenceStep::Pulse)?;
            bus.settle(bus.timing().dependent_write);
            bus.write_register(a, map::COMMAND_1, maintain)
                .step(SequenceStep::Maintain)
        })
    }

    /// Excites the motor by setting C-ON, every other bit of the command
    /// register is left as it is
    pub fn excite(&self) -> Result<(), DriverError> {
        info!("exciting {}", self.address);
        self.run(|bus, a| {
            let current = bus
                .read_register(a, map::COMMAND_1)
                .step(SequenceStep::ReadCommand)?;
            if current & 0x00FF & !map::C_ON != 0 {
                debug!(
                    "command register of {} has low bits set: 0x{:04X}, keeping them",
                    a, current
                );
            }
            bus.write_register(a, map::COMMAND_1, current | map::C_ON)
                .step(SequenceStep::WriteCommand)
        })
    }

    /// Stops the motor, the motor stays excited
    pub fn stop(&self) -> Result<(), DriverError> {
        info!("stopping {}", self.address);
        let word = encode_command(DataNumber::default(), true, true, false);
        self.run(|bus, a| bus.write_register(a, map::COMMAND_1, word))
    }

    pub fn read_command(&self) -> Result<CommandWord, DriverError> {
        self.run(|bus, a| bus.read_register(a, map::COMMAND_1))
            .map(CommandWord::decode)
    }

    /// Reads both status registers
    ///
    /// This never fails outright. If a register couldn't be read, the returned
    /// status has every flag cleared and the error is stored next to it, so a
    /// failed read can't be mistaken for a real all-clear.
    ///
    /// # Examples
    /// ```no_run
    /// # use az_stepper_driver::{Driver, SerialConfig};
    /// let driver = Driver::open(&SerialConfig::default()).unwrap();
    /// let status = driver.motor(1).unwrap().read_status().into_result().unwrap();
    /// if status.alarm {
    ///     println!("alarm: 0x{:04X}", status.word1);
    /// }
    /// ```
    pub fn read_status(&self) -> StatusReading {
        let res = self.run(|bus, a| {
            let word1 = bus.read_register(a, map::STATUS_1)?;
            let word2 = bus.read_register(a, map::STATUS_2)?;
            Ok(decode_status(word1, word2))
        });
        match res {
            Ok(status) => StatusReading {
                status,
                error: None,
            },
            Err(e) => StatusReading {
                status: StatusWord::default(),
                error: Some(e),
            },
        }
    }

    /// Gives the device a new address and commits it to non-volatile memory
    ///
    /// Afterwards this motor still points at the old address, use the returned
    /// one to get a new motor. The old address is removed from the registry in
    /// any case and the new one isn't added, it has to be confirmed by
    /// [`probe`][Motor::probe] or a scan first.
    ///
    /// # Errors
    /// If the id couldn't be written, [`DriverError::Step`] is returned. If it
    /// was written but the commit failed, [`DriverError::UncommittedId`] is
    /// returned and the device has to be power cycled.
    pub fn change_id(&self, new_id: u8) -> Result<DeviceAddress, DriverError> {
        let new_id = DeviceAddress::new(new_id)?;
        info!("changing id of {} to {}", self.address, new_id);
        let res = self.driver.with_bus(|bus| {
            bus.write_registers(self.address, map::DEVICE_ID, &[0, u16::from(new_id.get())])
                .step(SequenceStep::WriteId)?;
            bus.settle(bus.timing().dependent_write);
            commit(bus, self.address).map_err(|source| DriverError::UncommittedId {
                address: self.address,
                new_id,
                source: Box::new(source),
            })
        });
        self.driver.forget(self.address);
        match res {
            Ok(()) => {
                info!("{} is now {}", self.address, new_id);
                Ok(new_id)
            }
            Err(e) => {
                warn!("changing id of {} failed: {}", self.address, e);
                Err(e)
            }
        }
    }

    /// Reads the device id register
    pub fn read_device_id(&self) -> Result<RegisterPair, DriverError> {
        self.run(|bus, a| bus.read_pair(a, map::DEVICE_ID))
    }

    /// Checks whether anything answers at this address, using the short probe
    /// timeout
    pub fn probe(&self) -> Result<bool, DriverError> {
        let present = self.driver.with_bus(|bus| bus.probe(self.address))?;
        if present {
            self.driver.mark_seen(self.address);
        } else {
            self.driver.forget(self.address);
        }
        Ok(present)
    }

    /// Sets which way positive positions turn the motor and commits it
    pub fn set_rotation_direction(&self, direction: RotationDirection) -> Result<(), DriverError> {
        info!("setting rotation direction of {} to {}", self.address, direction);
        self.run(|bus, a| {
            bus.write_pair(a, map::ROTATION_DIRECTION, direction as i32)
                .step(SequenceStep::RotationDirection)?;
            bus.settle(bus.timing().dependent_write);
            commit(bus, a).step(SequenceStep::Commit)
        })
    }

    /// Commits everything written so far to non-volatile memory
    pub fn commit(&self) -> Result<(), DriverError> {
        info!("committing {}", self.address);
        self.run(commit)
    }

    /// Makes the driver apply configuration parameters that were written
    pub fn execute_configuration(&self) -> Result<(), DriverError> {
        info!("executing configuration of {}", self.address);
        self.run(|bus, a| bus.write_pair(a, map::CONFIGURATION_EXECUTE, map::EXECUTE))
    }
}

// settles afterwards even if the reply got lost, the driver may be writing its
// memory anyway and doesn't answer reliably meanwhile
fn commit(bus: &mut Bus, address: DeviceAddress) -> Result<(), DriverError> {
    let res = bus.write_pair(address, map::NV_COMMIT, map::EXECUTE);
    bus.settle(bus.timing().nv_commit);
    res
}
