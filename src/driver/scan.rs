use super::{frame::DeviceAddress, Driver, DriverError};
use log::{debug, trace};
use std::iter::FusedIterator;

/// Probes a range of addresses one after another, returned by
/// [`Driver::scan`]
///
/// Nothing is sent until the scan is iterated. Every address that answers,
/// even with an exception, is yielded in ascending order, silent ones are
/// skipped. Errors other than silence are yielded too and the scan goes on
/// with the next address, except for [`DriverError::Closed`] after which it
/// ends.
///
/// The bus is only held for a single probe at a time, other operations can
/// run in between. There is a pause of [`Timing::probe_interval`] between
/// two probes.
///
/// A range of `n` addresses where nothing answers therefore takes at most
/// `n * (probe_timeout + probe_interval)`, and a bit less since there is no
/// pause before the first probe.
///
/// [`Timing::probe_interval`]: super::timing::Timing::probe_interval
#[derive(Debug, Clone)]
pub struct Scan {
    driver: Driver,
    next: Option<u8>,
    last: u8,
    probed: bool,
}

impl Scan {
    pub(super) fn new(driver: Driver, range: Option<(DeviceAddress, DeviceAddress)>) -> Self {
        let (next, last) = match range {
            Some((first, last)) => (Some(first.get()), last.get()),
            None => (None, 0),
        };
        Scan {
            driver,
            next,
            last,
            probed: false,
        }
    }

    fn probe(&mut self, address: DeviceAddress) -> Result<bool, DriverError> {
        if self.probed {
            self.driver.pause(self.driver.timing().probe_interval);
        }
        self.probed = true;
        let present = self.driver.with_bus(|bus| bus.probe(address))?;
        if present {
            debug!("found device at {}", address);
            self.driver.mark_seen(address);
        } else {
            trace!("nothing at {}", address);
            self.driver.forget(address);
        }
        Ok(present)
    }
}

impl Iterator for Scan {
    type Item = Result<DeviceAddress, DriverError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.next?;
            self.next = if current < self.last {
                Some(current + 1)
            } else {
                None
            };
            let address = match DeviceAddress::new(current) {
                Ok(a) => a,
                Err(e) => return Some(Err(e)),
            };
            match self.probe(address) {
                Ok(true) => return Some(Ok(address)),
                Ok(false) => continue,
                Err(DriverError::Closed) => {
                    self.next = None;
                    return Some(Err(DriverError::Closed));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            Some(next) => (0, Some(usize::from(self.last - next) + 1)),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for Scan {}
