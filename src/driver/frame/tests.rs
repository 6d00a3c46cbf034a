use super::{read_frame, DeviceAddress, FunctionCode, Request, Response};
use crate::driver::{DriverError, FrameError};
use az_stepper_driver_test::{self as mock, Interface};
use std::{
    io::Read,
    thread,
    time::{Duration, Instant},
};

const TIMEOUT: Duration = Duration::from_millis(100);

// unfortunately, due to rustfmt not having the blank_lines_upper_bound feature
// stable yet, we gotta put comments in between the different sections. otherwise
// its just too much

//

fn addr(a: u8) -> DeviceAddress {
    DeviceAddress::new(a).unwrap()
}

#[test]
fn address_bounds() {
    assert!(matches!(
        DeviceAddress::new(0),
        Err(DriverError::InvalidAddress(0))
    ));
    assert!(matches!(
        DeviceAddress::new(248),
        Err(DriverError::InvalidAddress(248))
    ));
    assert_eq!(DeviceAddress::new(1).unwrap().get(), 1);
    assert_eq!(DeviceAddress::new(247).unwrap().get(), 247);
}

//

#[test]
fn encode_read() {
    let r = Request::read(addr(1), 0x0000, 10).unwrap();
    assert_eq!(
        r.encode(),
        [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]
    );
}

#[test]
fn encode_write_pair() {
    let r = Request::write(addr(1), 0x0066, &[0xFFFF, 0xFFFB]).unwrap();
    assert_eq!(
        r.encode(),
        [0x01, 0x10, 0x00, 0x66, 0x00, 0x02, 0x04, 0xFF, 0xFF, 0xFF, 0xFB, 0x75, 0xFA]
    );
}

#[test]
fn encode_matches_mock_builders() {
    let r = Request::write(addr(7), 0x1380, &[0, 3]).unwrap();
    assert_eq!(r.encode(), mock::write_request(7, 0x1380, &[0, 3]));
    let r = Request::read(addr(200), 0x0020, 1).unwrap();
    assert_eq!(r.encode(), mock::read_request(200, 0x0020, 1));
}

#[test]
fn request_bounds() {
    assert!(Request::read(addr(1), 0, 0).is_err());
    assert!(Request::read(addr(1), 0, 126).is_err());
    assert!(Request::write(addr(1), 0, &[]).is_err());
    assert!(Request::write(addr(1), 0, &[0; 124]).is_err());
    assert!(Request::write(addr(1), 0, &[0; 123]).is_ok());
}

//

#[test]
fn decode_read() {
    let raw = [0x01, 0x03, 0x04, 0x00, 0x00, 0x13, 0x88, 0xF7, 0x65];
    let r = Response::decode(&raw).unwrap();
    assert_eq!(
        r,
        Response::Read {
            address: addr(1),
            values: vec![0, 5000],
        }
    );
}

#[test]
fn decode_write_echo() {
    let raw = [0x01, 0x10, 0x00, 0x66, 0x00, 0x02, 0xA1, 0xD7];
    let r = Response::decode(&raw).unwrap();
    assert_eq!(
        r,
        Response::Write {
            address: addr(1),
            register: 0x0066,
            count: 2,
        }
    );
}

#[test]
fn decode_exception() {
    let raw = [0x01, 0x83, 0x02, 0xC0, 0xF1];
    let r = Response::decode(&raw).unwrap();
    assert!(r.is_exception());
    assert_eq!(
        r,
        Response::Exception {
            address: addr(1),
            function: FunctionCode::ReadHoldingRegisters,
            code: 2,
        }
    );
}

#[test]
fn decode_bad_crc() {
    let raw = [0x01, 0x83, 0x02, 0xC0, 0xF2];
    assert!(matches!(
        Response::decode(&raw),
        Err(DriverError::Framing(FrameError::CrcMismatch {
            expected: 0xF1C0,
            received: 0xF2C0
        }))
    ));
}

#[test]
fn decode_unknown_function() {
    let raw = mock::with_crc(&[0x01, 0x06, 0x00, 0x01]);
    assert!(matches!(
        Response::decode(&raw),
        Err(DriverError::Framing(FrameError::UnknownFunction(0x06)))
    ));
}

#[test]
fn decode_short() {
    assert!(matches!(
        Response::decode(&[0x01, 0x03]),
        Err(DriverError::Framing(FrameError::Truncated(2)))
    ));
}

#[test]
fn decode_trailing_bytes() {
    let raw = mock::with_crc(&[0x01, 0x10, 0x00, 0x66, 0x00, 0x02, 0x00]);
    assert!(matches!(
        Response::decode(&raw),
        Err(DriverError::Framing(FrameError::Malformed(_)))
    ));
}

#[test]
fn decode_odd_byte_count() {
    let raw = mock::with_crc(&[0x01, 0x03, 0x03, 0x00, 0x00, 0x01]);
    assert!(matches!(
        Response::decode(&raw),
        Err(DriverError::Framing(FrameError::Malformed(_)))
    ));
}

#[test]
fn decode_broadcast_address() {
    let raw = mock::write_reply(0, 0x0066, 2);
    assert!(matches!(
        Response::decode(&raw),
        Err(DriverError::Framing(FrameError::Malformed(_)))
    ));
}

//

#[test]
fn check_read() {
    let req = Request::read(addr(3), 0x0020, 2).unwrap();
    let res = Response::Read {
        address: addr(3),
        values: vec![0x20, 0x02],
    };
    assert_eq!(req.check(res).unwrap(), vec![0x20, 0x02]);
}

#[test]
fn check_read_wrong_length() {
    let req = Request::read(addr(3), 0x0020, 2).unwrap();
    let res = Response::Read {
        address: addr(3),
        values: vec![0x20],
    };
    assert!(matches!(
        req.check(res),
        Err(DriverError::Framing(FrameError::WrongLength {
            expected: 2,
            received: 1
        }))
    ));
}

#[test]
fn check_write_echo_mismatch() {
    let req = Request::write(addr(3), 0x005A, &[0, 1]).unwrap();
    let res = Response::Write {
        address: addr(3),
        register: 0x005C,
        count: 2,
    };
    assert!(matches!(
        req.check(res),
        Err(DriverError::Framing(FrameError::EchoMismatch { .. }))
    ));
}

#[test]
fn check_other_address() {
    let req = Request::read(addr(3), 0x0020, 1).unwrap();
    let res = Response::Read {
        address: addr(4),
        values: vec![0],
    };
    assert!(matches!(
        req.check(res),
        Err(DriverError::Framing(FrameError::UnexpectedAddress { .. }))
    ));
}

#[test]
fn check_exception() {
    let req = Request::write(addr(9), 0x1380, &[0, 2]).unwrap();
    let res = Response::Exception {
        address: addr(9),
        function: FunctionCode::WriteMultipleRegisters,
        code: 3,
    };
    match req.check(res) {
        Err(DriverError::Device { address, code }) => {
            assert_eq!(address.get(), 9);
            assert_eq!(code, 3);
        }
        other => panic!("expected device error, got {:?}", other),
    }
}

#[test]
fn check_wrong_function() {
    let req = Request::read(addr(9), 0x1380, 2).unwrap();
    let res = Response::Write {
        address: addr(9),
        register: 0x1380,
        count: 2,
    };
    assert!(matches!(
        req.check(res),
        Err(DriverError::Framing(FrameError::UnexpectedFunction { .. }))
    ));
}

//

#[test]
fn read_frame_read_reply() {
    let reply = mock::read_reply(1, &[0xFFFF, 0xFFFB]);
    let mut iface = Interface::new();
    iface.add_read(&reply);
    let frame = read_frame(&mut iface, addr(1), TIMEOUT).unwrap();
    assert_eq!(frame, reply);
    assert!(iface.is_empty());
}

#[test]
fn read_frame_leaves_next_frame() {
    let first = mock::write_reply(1, 0x001E, 1);
    let second = mock::exception_reply(1, 0x03, 2);
    let mut iface = Interface::new();
    iface.add_read(&first);
    iface.add_read(&second);
    assert_eq!(read_frame(&mut iface, addr(1), TIMEOUT).unwrap(), first);
    assert_eq!(read_frame(&mut iface, addr(1), TIMEOUT).unwrap(), second);
}

#[test]
fn read_frame_silence() {
    let mut iface = Interface::new();
    assert!(matches!(
        read_frame(&mut iface, addr(5), TIMEOUT),
        Err(DriverError::Timeout(a)) if a.get() == 5
    ));
}

#[test]
fn read_frame_truncated() {
    let reply = mock::read_reply(1, &[1, 2]);
    let mut iface = Interface::new();
    iface.add_read(&reply[..5]);
    assert!(matches!(
        read_frame(&mut iface, addr(1), TIMEOUT),
        Err(DriverError::Framing(FrameError::Truncated(5)))
    ));
}

#[test]
fn read_frame_unknown_function() {
    let mut iface = Interface::new();
    iface.add_read(&[0x01, 0x2B, 0x00]);
    assert!(matches!(
        read_frame(&mut iface, addr(1), TIMEOUT),
        Err(DriverError::Framing(FrameError::UnknownFunction(0x2B)))
    ));
}

// hands out one byte at a time, each after a pause
struct Trickle {
    bytes: Vec<u8>,
    pause: Duration,
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.bytes.is_empty() || buf.is_empty() {
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        thread::sleep(self.pause);
        buf[0] = self.bytes.remove(0);
        Ok(1)
    }
}

#[test]
fn read_frame_whole_reply_within_timeout() {
    let reply = mock::read_reply(1, &[1, 2]);
    let mut port = Trickle {
        bytes: reply.clone(),
        pause: Duration::from_millis(30),
    };
    let start = Instant::now();
    let res = read_frame(&mut port, addr(1), Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_millis(30) * reply.len() as u32);
    match res {
        Err(DriverError::Framing(FrameError::Truncated(n))) => assert!(n < reply.len()),
        other => panic!("expected a truncated frame, got {:?}", other),
    }

    // fast enough
    let mut port = Trickle {
        bytes: reply.clone(),
        pause: Duration::from_millis(1),
    };
    assert_eq!(read_frame(&mut port, addr(1), Duration::from_secs(5)).unwrap(), reply);
}
