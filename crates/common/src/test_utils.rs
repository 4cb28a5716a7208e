//! In-memory transport doubles for channel tests
//!
//! `MockLink` is the shared backing store: tests push raw bytes into it and
//! inspect what the channel wrote, while `MockConnector` hands the channel
//! fresh `MockTransport` views over the same link on every connect.

use crate::error::{Error, Result};
use crate::transport::{Connector, StateSink, Transport};
use protocol::ConnectionState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scriptable in-memory peer shared by a test and the transports it hands out
#[derive(Default)]
pub struct MockLink {
    incoming: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    fail_sends: AtomicBool,
    fail_next_receive: AtomicBool,
    connect_count: AtomicUsize,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue bytes for the channel's receiver to read
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.incoming
            .lock()
            .expect("incoming lock poisoned")
            .push_back(bytes.to_vec());
    }

    /// Everything the channel has written, in write order
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    /// Make every subsequent send fail (or succeed again)
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make the next receive fail as a transport fault
    pub fn trip_receive(&self) {
        self.fail_next_receive.store(true, Ordering::SeqCst);
    }

    /// How many times a connector over this link has connected
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

/// One connection's view of a [`MockLink`]
pub struct MockTransport {
    link: Arc<MockLink>,
    closed: AtomicBool,
}

impl Transport for MockTransport {
    fn send(&self, data: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport closed".to_string()));
        }
        if self.link.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transport("simulated send failure".to_string()));
        }
        self.link
            .sent
            .lock()
            .expect("sent lock poisoned")
            .push(data.to_vec());
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport closed".to_string()));
        }
        if self.link.fail_next_receive.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport("simulated receive failure".to_string()));
        }
        let next = self
            .link
            .incoming
            .lock()
            .expect("incoming lock poisoned")
            .pop_front();
        match next {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                // Idle; a real bulk read would block for the timeout
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`MockTransport`]s over one shared link
pub struct MockConnector {
    link: Arc<MockLink>,
    reconnects: bool,
    permission_prompt: bool,
    fail_first: AtomicBool,
}

impl MockConnector {
    pub fn new(link: Arc<MockLink>) -> Self {
        Self {
            link,
            reconnects: true,
            permission_prompt: false,
            fail_first: AtomicBool::new(false),
        }
    }

    /// Behave like the accessory role: no automatic reconnect
    pub fn without_reconnect(mut self) -> Self {
        self.reconnects = false;
        self
    }

    /// Emit `PermissionRequested` before producing the transport
    pub fn with_permission_prompt(mut self) -> Self {
        self.permission_prompt = true;
        self
    }

    /// Fail the first connect attempt, succeed afterwards
    pub fn failing_first(self) -> Self {
        self.fail_first.store(true, Ordering::SeqCst);
        self
    }
}

impl Connector for MockConnector {
    fn connect(&mut self, sink: StateSink<'_>) -> Result<Box<dyn Transport>> {
        sink(ConnectionState::Searching);
        if self.fail_first.swap(false, Ordering::SeqCst) {
            return Err(Error::NotFound);
        }
        if self.permission_prompt {
            sink(ConnectionState::PermissionRequested);
        }
        self.link.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            link: Arc::clone(&self.link),
            closed: AtomicBool::new(false),
        }))
    }

    fn reconnects(&self) -> bool {
        self.reconnects
    }
}
