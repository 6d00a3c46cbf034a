
use crc::{Crc, CRC_16_MODBUS};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

const READ_HOLDING_REGISTERS: u8 = 0x03;
const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

// used to mock a serial port to test the stepper driver
// the idea is that every expected write carries the reply the bus would give
// to it. the reply only becomes readable once the whole write went through, so
// a request that gets no reply times out instead of eating the reply meant for
// the next request. reading with nothing available returns TimedOut, like a
// real port with a timeout does. if the content written doesn't match what was
// expected we panic.
//
// don't be alarmed if you think it's slow or inefficient or anything, it doesn't
// need to be fast nor pretty nor efficient, its just for testing. it needs to be
// easy
#[derive(Default)]
struct State {
    read: Vec<u8>,
    exchanges: VecDeque<(Vec<u8>, Option<Vec<u8>>)>,
    written: usize,
    timeouts: Vec<Duration>,
    timeout: Duration,
}

#[derive(Clone, Default)]
pub struct Interface {
    state: Arc<Mutex<State>>,
}

/// Appends the Modbus CRC to `body`
pub fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&CRC_MODBUS.checksum(body).to_le_bytes());
    frame
}

/// Builds a read holding registers request
pub fn read_request(address: u8, register: u16, count: u16) -> Vec<u8> {
    let mut body = vec![address, READ_HOLDING_REGISTERS];
    body.extend_from_slice(&register.to_be_bytes());
    body.extend_from_slice(&count.to_be_bytes());
    with_crc(&body)
}

/// Builds a write multiple registers request
pub fn write_request(address: u8, register: u16, values: &[u16]) -> Vec<u8> {
    let mut body = vec![address, WRITE_MULTIPLE_REGISTERS];
    body.extend_from_slice(&register.to_be_bytes());
    body.extend_from_slice(&(values.len() as u16).to_be_bytes());
    body.push((values.len() * 2) as u8);
    values
        .iter()
        .for_each(|v| body.extend_from_slice(&v.to_be_bytes()));
    with_crc(&body)
}

/// Builds the reply to a read holding registers request
pub fn read_reply(address: u8, values: &[u16]) -> Vec<u8> {
    let mut body = vec![address, READ_HOLDING_REGISTERS, (values.len() * 2) as u8];
    values
        .iter()
        .for_each(|v| body.extend_from_slice(&v.to_be_bytes()));
    with_crc(&body)
}

/// Builds the reply to a write multiple registers request
pub fn write_reply(address: u8, register: u16, count: u16) -> Vec<u8> {
    let mut body = vec![address, WRITE_MULTIPLE_REGISTERS];
    body.extend_from_slice(&register.to_be_bytes());
    body.extend_from_slice(&count.to_be_bytes());
    with_crc(&body)
}

/// Builds an exception reply
pub fn exception_reply(address: u8, function: u8, code: u8) -> Vec<u8> {
    with_crc(&[address, function | 0x80, code])
}

impl Read for Interface {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        let q = &mut state.read;
        if q.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read was empty"));
        }
        let n = buf.len().min(q.len());
        buf[..n].copy_from_slice(&q[..n]);
        q.drain(..n);
        Ok(n)
    }
}

impl Write for Interface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let expected = match state.exchanges.front() {
            Some((e, _)) => e,
            None => panic!("write was empty, tried to write {:02X?}", buf),
        };
        if !expected[state.written..].starts_with(buf) {
            panic!(
                "write didn't start with {:02X?}, write was {:02X?}",
                buf,
                &expected[state.written..]
            )
        }
        let complete = state.written + buf.len() == expected.len();
        state.written += buf.len();
        if complete {
            state.written = 0;
            if let Some((_, Some(reply))) = state.exchanges.pop_front() {
                state.read.extend_from_slice(&reply);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Interface {
    pub fn new() -> Self {
        Interface::default()
    }

    /// Makes `buf` readable right away
    pub fn add_read(&mut self, buf: &[u8]) {
        self.state.lock().unwrap().read.extend_from_slice(buf)
    }

    /// Expects `buf` to be written, nothing is sent back
    pub fn add_write(&mut self, buf: &[u8]) {
        self.add_exchange(buf, None)
    }

    /// Expects `request` to be written, afterwards `reply` becomes readable
    pub fn add_exchange(&mut self, request: &[u8], reply: Option<&[u8]>) {
        self.state
            .lock()
            .unwrap()
            .exchanges
            .push_back((request.to_vec(), reply.map(|r| r.to_vec())));
    }

    /// Expects a register write which the device acknowledges
    pub fn add_write_echo(&mut self, address: u8, register: u16, values: &[u16]) {
        self.add_exchange(
            &write_request(address, register, values),
            Some(&write_reply(address, register, values.len() as u16)),
        );
    }

    /// Expects a register read which the device answers with `values`
    pub fn add_read_reply(&mut self, address: u8, register: u16, values: &[u16]) {
        self.add_exchange(
            &read_request(address, register, values.len() as u16),
            Some(&read_reply(address, values)),
        );
    }

    /// Expects a register read nobody answers
    pub fn add_read_silence(&mut self, address: u8, register: u16, count: u16) {
        self.add_write(&read_request(address, register, count));
    }

    /// Expects a register write nobody answers
    pub fn add_write_silence(&mut self, address: u8, register: u16, values: &[u16]) {
        self.add_write(&write_request(address, register, values));
    }

    /// Expects a register write the device rejects with exception `code`
    pub fn add_write_exception(&mut self, address: u8, register: u16, values: &[u16], code: u8) {
        self.add_exchange(
            &write_request(address, register, values),
            Some(&exception_reply(address, WRITE_MULTIPLE_REGISTERS, code)),
        );
    }

    /// Expects a register read the device rejects with exception `code`
    pub fn add_read_exception(&mut self, address: u8, register: u16, count: u16, code: u8) {
        self.add_exchange(
            &read_request(address, register, count),
            Some(&exception_reply(address, READ_HOLDING_REGISTERS, code)),
        );
    }

    /// True once everything expected was written and everything readable was read
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.read.is_empty() && state.exchanges.is_empty()
    }

    /// All timeouts that were set on this port, oldest first
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().timeouts.clone()
    }
}

// only the timeout actually does something, the rest just pretends to be the
// line settings of the bus
impl SerialPort for Interface {
    fn name(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        Ok(115200)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        Ok(DataBits::Eight)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        Ok(FlowControl::None)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        Ok(Parity::Even)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        Ok(StopBits::One)
    }

    fn timeout(&self) -> Duration {
        self.state.lock().unwrap().timeout
    }

    fn set_baud_rate(&mut self, _: u32) -> serialport::Result<()> {
        Ok(())
    }

    fn set_data_bits(&mut self, _: DataBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_flow_control(&mut self, _: FlowControl) -> serialport::Result<()> {
        Ok(())
    }

    fn set_parity(&mut self, _: Parity) -> serialport::Result<()> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _: StopBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.timeout = timeout;
        state.timeouts.push(timeout);
        Ok(())
    }

    fn write_request_to_send(&mut self, _: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, _: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        Ok(true)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        Ok(self.state.lock().unwrap().read.len() as u32)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        Ok(0)
    }

    // the scripted replies must survive the driver flushing stale input before
    // each request, so this is a no-op
    fn clear(&self, _: ClearBuffer) -> serialport::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        Ok(Box::new(self.clone()))
    }

    fn set_break(&self) -> serialport::Result<()> {
        Ok(())
    }

    fn clear_break(&self) -> serialport::Result<()> {
        Ok(())
    }
}
