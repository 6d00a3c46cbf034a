use super::{
    codec::{DataNumber, DriveMethod},
    frame::{DeviceAddress, Request, Response},
    map,
    timing::{Clock, Timing},
    transport::Transport,
    Driver, DriverError,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

// unfortunately, due to rustfmt not having the blank_lines_upper_bound feature
// stable yet, we gotta put comments in between the different sections. otherwise
// its just too much

//

// answers every request like a healthy device would and records it. panics if
// two exchanges overlap
#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<Request>>>,
    in_flight: Arc<AtomicBool>,
    // None means every address answers
    present: Option<Vec<u8>>,
    closed: bool,
}

impl Recorder {
    fn answering(addresses: &[u8]) -> Self {
        Recorder {
            present: Some(addresses.to_vec()),
            ..Default::default()
        }
    }

    fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }
}

impl Transport for Recorder {
    fn exchange(&mut self, request: &Request, _: Duration) -> Result<Response, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        assert!(
            !self.in_flight.swap(true, Ordering::SeqCst),
            "two exchanges at the same time"
        );
        self.log.lock().unwrap().push(request.clone());
        thread::yield_now();
        let answers = self
            .present
            .as_ref()
            .map_or(true, |p| p.contains(&request.address().get()));
        let res = if answers {
            Ok(match request {
                Request::Read { address, count, .. } => Response::Read {
                    address: *address,
                    values: vec![0; usize::from(*count)],
                },
                Request::Write {
                    address,
                    register,
                    values,
                } => Response::Write {
                    address: *address,
                    register: *register,
                    count: values.len() as u16,
                },
            })
        } else {
            Err(DriverError::Timeout(request.address()))
        };
        self.in_flight.store(false, Ordering::SeqCst);
        res
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_open(&self) -> bool {
        !self.closed
    }
}

#[derive(Default)]
struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

fn driver(transport: Recorder) -> (Driver, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::default());
    let driver = Driver::with_timing(transport, Timing::default(), clock.clone());
    (driver, clock)
}

fn addr(a: u8) -> DeviceAddress {
    DeviceAddress::new(a).unwrap()
}

fn write(address: u8, register: u16, values: &[u16]) -> Request {
    Request::write(addr(address), register, values).unwrap()
}

//

#[test]
fn motor_address_bounds() {
    let (driver, _) = driver(Recorder::default());
    assert!(matches!(driver.motor(0), Err(DriverError::InvalidAddress(0))));
    assert!(matches!(
        driver.motor(248),
        Err(DriverError::InvalidAddress(248))
    ));
    assert_eq!(driver.motor(247).unwrap().address().get(), 247);
}

#[test]
fn start_two_writes() {
    let recorder = Recorder::default();
    let (driver, clock) = driver(recorder.clone());
    driver
        .motor(1)
        .unwrap()
        .start(DataNumber::new(1).unwrap())
        .unwrap();
    assert_eq!(
        recorder.requests(),
        vec![
            write(1, map::COMMAND_1, &[0x0121]),
            write(1, map::COMMAND_1, &[0x0120]),
        ]
    );
    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![Duration::from_millis(100)]
    );
}

#[test]
fn change_id_commits() {
    let recorder = Recorder::default();
    let (driver, clock) = driver(recorder.clone());
    let m3 = driver.motor(3).unwrap();
    m3.initialize().unwrap();
    assert!(driver.is_known(addr(3)));

    let new_id = m3.change_id(5).unwrap();

    assert_eq!(new_id, addr(5));
    assert_eq!(
        recorder.requests()[1..],
        [
            write(3, map::DEVICE_ID, &[0, 5]),
            write(3, map::NV_COMMIT, &[0, 1]),
        ]
    );
    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![Duration::from_millis(100), Duration::from_millis(500)]
    );
    assert!(!driver.is_known(addr(3)));
    assert!(!driver.is_known(addr(5)));
}

#[test]
fn change_id_invalid() {
    let recorder = Recorder::default();
    let (driver, _) = driver(recorder.clone());
    assert!(matches!(
        driver.motor(3).unwrap().change_id(0),
        Err(DriverError::InvalidAddress(0))
    ));
    assert!(recorder.requests().is_empty());
}

//

#[test]
fn registry() {
    let (driver, _) = driver(Recorder::answering(&[2, 7]));
    driver.motor(7).unwrap().stop().unwrap();
    driver.motor(2).unwrap().stop().unwrap();
    assert!(driver.motor(4).unwrap().stop().unwrap_err().is_timeout());

    let known: Vec<_> = driver
        .known_devices()
        .into_iter()
        .map(|(a, _)| a.get())
        .collect();
    assert_eq!(known, vec![2, 7]);
    assert!(driver.forget(addr(7)));
    assert!(!driver.forget(addr(7)));
    assert!(!driver.is_known(addr(7)));
}

#[test]
fn probe() {
    let (driver, _) = driver(Recorder::answering(&[9]));
    assert!(driver.motor(9).unwrap().probe().unwrap());
    assert!(!driver.motor(10).unwrap().probe().unwrap());
    assert!(driver.is_known(addr(9)));
    assert!(!driver.is_known(addr(10)));
}

//

#[test]
fn close() {
    let (driver, _) = driver(Recorder::default());
    let m1 = driver.motor(1).unwrap();
    assert!(!driver.is_closed());
    driver.close();
    driver.close();
    assert!(driver.is_closed());
    assert!(matches!(m1.initialize(), Err(DriverError::Closed)));
    assert!(m1.read_status().error.is_some());
}

#[test]
fn poisoned_bus_recovers() {
    let (driver, _) = driver(Recorder::default());
    let d = driver.clone();
    let res = thread::spawn(move || {
        d.with_bus(|_| -> Result<(), DriverError> { panic!("boom") })
    })
    .join();
    assert!(res.is_err());
    driver.motor(1).unwrap().stop().unwrap();
}

#[test]
fn operations_dont_interleave() {
    let recorder = Recorder::default();
    let (driver, _) = driver(recorder.clone());
    let handles: Vec<_> = (1..=8)
        .map(|a| {
            let m = driver.motor(a).unwrap();
            thread::spawn(move || {
                for _ in 0..5 {
                    m.direct_drive(DriveMethod::Increment, 1000, -200).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let requests = recorder.requests();
    assert_eq!(requests.len(), 8 * 5 * 4);
    // every direct drive is four writes to one address, trigger last
    for chunk in requests.chunks(4) {
        let a = chunk[0].address();
        assert!(chunk.iter().all(|r| r.address() == a));
        assert_eq!(chunk[0].register(), map::DIRECT_DRIVE_METHOD);
        assert_eq!(chunk[3].register(), map::DIRECT_DRIVE_TRIGGER);
    }
}

//

#[test]
fn scan_finds_answering() {
    let (driver, clock) = driver(Recorder::answering(&[2, 4]));
    let found: Vec<_> = driver
        .scan(1..=5)
        .unwrap()
        .map(|a| a.unwrap().get())
        .collect();
    assert_eq!(found, vec![2, 4]);
    // no pause before the first probe
    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![Duration::from_millis(50); 4]
    );
    assert!(driver.is_known(addr(2)));
    assert!(driver.is_known(addr(4)));
}

#[test]
fn scan_is_lazy_and_restartable() {
    let recorder = Recorder::answering(&[1]);
    let (driver, _) = driver(recorder.clone());
    let scan = driver.scan(1..=3).unwrap();
    assert!(recorder.requests().is_empty());
    assert_eq!(scan.size_hint(), (0, Some(3)));
    assert_eq!(scan.clone().count(), 1);
    assert_eq!(scan.count(), 1);
    assert_eq!(recorder.requests().len(), 6);
}

#[test]
fn scan_bounds() {
    let (driver, _) = driver(Recorder::default());
    assert!(matches!(
        driver.scan(0..=3),
        Err(DriverError::InvalidAddress(0))
    ));
    assert!(matches!(
        driver.scan(240..=250),
        Err(DriverError::InvalidAddress(250))
    ));
    #[allow(clippy::reversed_empty_ranges)]
    let mut empty = driver.scan(5..=3).unwrap();
    assert!(empty.next().is_none());
}

#[test]
fn scan_stops_when_closed() {
    let (driver, _) = driver(Recorder::default());
    driver.close();
    let mut scan = driver.scan(1..=3).unwrap();
    assert!(matches!(scan.next(), Some(Err(DriverError::Closed))));
    assert!(scan.next().is_none());
}
