//! Scriptable adapters for host tests.

use std::boxed::Box;
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use crate::config::LinkBuffer;
use crate::discovery::{DeviceMatch, Target};
use crate::error::{Error, Result};
use crate::link::{Negotiated, Peer, Transport, TransportKind};
use crate::server::{Peripheral, ServerState};

/// A fresh ring that lives for the rest of the test binary.
pub fn leak_buffer() -> &'static LinkBuffer {
    Box::leak(Box::new(LinkBuffer::new()))
}

#[derive(Default)]
struct TransportState {
    link_up: bool,
    fail: Option<Error>,
    writes_before_failure: Option<usize>,
    writes: Vec<Vec<u8>>,
    rssi: Option<i8>,
    scans: usize,
    closes: usize,
}

/// Client-role adapter double. Clones share state, so a test keeps one
/// handle while the session owns another.
#[derive(Clone)]
pub struct MockTransport {
    kind: TransportKind,
    max_payload: usize,
    state: Rc<RefCell<TransportState>>,
}

impl MockTransport {
    pub fn new(kind: TransportKind, max_payload: usize) -> Self {
        Self {
            kind,
            max_payload,
            state: Rc::new(RefCell::new(TransportState::default())),
        }
    }

    /// Fail the establishment stage that reports `err`.
    pub fn fail_with(&self, err: Error) {
        self.state.borrow_mut().fail = Some(err);
    }

    pub fn succeed(&self) {
        self.state.borrow_mut().fail = None;
    }

    /// Accept `n` more writes, then reject every following one.
    pub fn fail_write_after(&self, n: usize) {
        self.state.borrow_mut().writes_before_failure = Some(n);
    }

    pub fn set_link_up(&self, up: bool) {
        self.state.borrow_mut().link_up = up;
    }

    pub fn set_rssi(&self, rssi: Option<i8>) {
        self.state.borrow_mut().rssi = rssi;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }

    pub fn scans(&self) -> usize {
        self.state.borrow().scans
    }

    pub fn closes(&self) -> usize {
        self.state.borrow().closes
    }

    fn stage(&self, err: Error) -> Result<()> {
        match self.state.borrow().fail {
            Some(e) if e == err => Err(e),
            _ => Ok(()),
        }
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn scan(&mut self, target: &Target) -> Result<Peer> {
        self.state.borrow_mut().scans += 1;
        self.stage(Error::DeviceNotFound)?;
        let name = match target.matcher {
            DeviceMatch::Name(name) => name,
            _ => "peer",
        };
        Ok(Peer::new(name, [0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]))
    }

    async fn open(&mut self, _peer: &Peer) -> Result<Negotiated> {
        self.stage(Error::ConnectTimeout)?;
        self.state.borrow_mut().link_up = true;
        Ok(match self.kind {
            TransportKind::ClassicSerial => Negotiated::Baud(crate::config::SERIAL_BAUD),
            _ => Negotiated::Mtu((self.max_payload + 3) as u16),
        })
    }

    async fn discover(&mut self) -> Result<()> {
        self.stage(Error::ServiceMissing)
    }

    async fn subscribe(&mut self) -> Result<()> {
        self.stage(Error::SubscriptionFailed)
    }

    fn is_link_up(&self) -> bool {
        self.state.borrow().link_up
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        match st.writes_before_failure {
            Some(0) => return Err(Error::WriteFailed),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        st.writes.push(chunk.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        let mut st = self.state.borrow_mut();
        st.link_up = false;
        st.closes += 1;
    }

    async fn read_rssi(&mut self) -> Option<i8> {
        self.state.borrow().rssi
    }
}

struct PeripheralState {
    state: ServerState,
    advertise_calls: usize,
    fail_notify: bool,
    notifications: Vec<Vec<u8>>,
    rssi: Option<i8>,
}

/// Server-role adapter double.
#[derive(Clone)]
pub struct MockPeripheral {
    max_payload: usize,
    state: Rc<RefCell<PeripheralState>>,
}

impl MockPeripheral {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            state: Rc::new(RefCell::new(PeripheralState {
                state: ServerState::Stopped,
                advertise_calls: 0,
                fail_notify: false,
                notifications: Vec::new(),
                rssi: None,
            })),
        }
    }

    /// Simulate a central connecting.
    pub fn connect_app(&self) {
        self.state.borrow_mut().state = ServerState::Connected;
    }

    /// Simulate the central going away without re-advertising.
    pub fn drop_app(&self) {
        self.state.borrow_mut().state = ServerState::Stopped;
    }

    pub fn fail_notify(&self, fail: bool) {
        self.state.borrow_mut().fail_notify = fail;
    }

    pub fn set_rssi(&self, rssi: Option<i8>) {
        self.state.borrow_mut().rssi = rssi;
    }

    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.state.borrow().notifications.clone()
    }

    pub fn advertise_calls(&self) -> usize {
        self.state.borrow().advertise_calls
    }
}

impl Peripheral for MockPeripheral {
    async fn advertise(&mut self) -> Result<()> {
        let mut st = self.state.borrow_mut();
        st.advertise_calls += 1;
        if st.state == ServerState::Stopped {
            st.state = ServerState::Advertising;
        }
        Ok(())
    }

    fn state(&self) -> ServerState {
        self.state.borrow().state
    }

    fn max_payload(&self) -> usize {
        self.max_payload
    }

    async fn notify(&mut self, chunk: &[u8]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.fail_notify {
            return Err(Error::WriteFailed);
        }
        st.notifications.push(chunk.to_vec());
        Ok(())
    }

    async fn read_rssi(&mut self) -> Option<i8> {
        self.state.borrow().rssi
    }
}
