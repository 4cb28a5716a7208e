//! Role-agnostic message channel
//!
//! Owns one frame decoder, one FIFO send queue, and three worker threads:
//! sender, receiver, and reconnect supervisor. USB transfers block the
//! calling thread, so the workers are OS threads rather than cooperative
//! tasks; they communicate through the send queue, an internal event queue,
//! and the shared transport slot.
//!
//! Shared-state discipline: the send queue is the only state touched by more
//! than one worker and every enqueue/dequeue is a single mutex-guarded
//! operation. Exactly one transport is live at a time; the supervisor closes
//! the old handle and waits for the workers to drop their references before
//! opening a new one. Cancellation is cooperative: `dispose()` sets the stop
//! flag, wakes everyone, and joins all three workers before releasing the
//! transport.

use crate::error::{Error, Result};
use crate::transport::{Connector, Transport};
use async_channel::{Receiver, Sender, TryRecvError};
use bytes::Bytes;
use protocol::{ConnectionState, FrameDecoder, ProtocolError, encode_frame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and sizing knobs for one channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bound on each blocking bulk read; expiry is the normal idle condition
    pub receive_timeout: Duration,
    /// Pause after a failed send or receive before the worker loops again
    pub send_retry_delay: Duration,
    /// Initial delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Cap for the doubled delay on repeated reconnect failure
    pub reconnect_delay_max: Duration,
    /// Effective payload bound shared by both roles
    pub max_payload: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(100),
            send_retry_delay: Duration::from_millis(250),
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            max_payload: protocol::MAX_PAYLOAD_LEN,
        }
    }
}

/// Inbound events dispatched into the channel's state transition loop
///
/// Platform notifications (detach broadcasts, permission results) enter the
/// channel as events rather than as OS-specific callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Caller asked for a connect; one attempt, outcome on the state stream
    ConnectRequested,
    /// Caller asked for an orderly disconnect
    DisconnectRequested,
    /// A worker hit a transport fault on the tagged transport generation
    ConnectionLost { generation: u64 },
    /// Platform reported the accessory was unplugged
    AccessoryDetached,
    /// Channel is being disposed
    Shutdown,
}

/// State shared by the channel handle and its workers
struct Inner {
    config: ChannelConfig,
    /// Pending outgoing frames, FIFO, unbounded
    queue: Mutex<VecDeque<Bytes>>,
    queue_cv: Condvar,
    /// The single live transport, if any
    transport: Mutex<Option<Arc<dyn Transport>>>,
    /// Bumped on every install so workers can spot a replaced transport
    generation: AtomicU64,
    state: Mutex<ConnectionState>,
    state_subs: Mutex<Vec<Sender<ConnectionState>>>,
    message_subs: Mutex<Vec<Sender<String>>>,
    stopping: AtomicBool,
    events: Sender<ChannelEvent>,
}

impl Inner {
    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn signal(&self, event: ChannelEvent) {
        // Fails only once the supervisor is gone, which means we are
        // shutting down anyway.
        let _ = self.events.try_send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut current = self.state.lock().expect("state lock poisoned");
            if *current == next {
                return;
            }
            *current = next;
        }
        debug!(state = %next, "connection state changed");
        let mut subs = self.state_subs.lock().expect("state subscriber lock poisoned");
        subs.retain(|tx| tx.try_send(next).is_ok());
    }

    fn publish_message(&self, text: String) {
        let mut subs = self
            .message_subs
            .lock()
            .expect("message subscriber lock poisoned");
        subs.retain(|tx| tx.try_send(text.clone()).is_ok());
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().expect("transport lock poisoned").clone()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn install_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock().expect("transport lock poisoned") = Some(transport);
        self.generation.fetch_add(1, Ordering::SeqCst);
        // Wake the sender in case traffic queued up while disconnected
        self.queue_cv.notify_all();
    }

    /// Close and release the live transport, if any
    ///
    /// Waits (bounded) for the sender and receiver to drop their references
    /// so the device handle is fully released before any reopen.
    fn teardown_transport(&self) {
        let taken = self.transport.lock().expect("transport lock poisoned").take();
        let Some(transport) = taken else { return };

        transport.close();
        let weak = Arc::downgrade(&transport);
        drop(transport);

        let deadline = Instant::now() + Duration::from_secs(1);
        while weak.strong_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if weak.strong_count() > 0 {
            warn!("transport still referenced after teardown wait");
        }
    }
}

/// Duplex message channel over one transport
///
/// Construct with a role-specific [`Connector`]; the channel emits decoded
/// UTF-8 messages and connection-state transitions on subscriber streams and
/// accepts text for asynchronous transmission.
pub struct MessageChannel {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageChannel {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self::with_config(connector, ChannelConfig::default())
    }

    pub fn with_config(connector: Box<dyn Connector>, config: ChannelConfig) -> Self {
        let (event_tx, event_rx) = async_channel::unbounded();

        let inner = Arc::new(Inner {
            config,
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            transport: Mutex::new(None),
            generation: AtomicU64::new(0),
            state: Mutex::new(ConnectionState::Disconnected),
            state_subs: Mutex::new(Vec::new()),
            message_subs: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
            events: event_tx,
        });

        let mut workers = Vec::with_capacity(3);

        let sender_inner = Arc::clone(&inner);
        workers.push(
            thread::Builder::new()
                .name("channel-sender".to_string())
                .spawn(move || run_sender(sender_inner))
                .expect("failed to spawn sender worker"),
        );

        let receiver_inner = Arc::clone(&inner);
        workers.push(
            thread::Builder::new()
                .name("channel-receiver".to_string())
                .spawn(move || run_receiver(receiver_inner))
                .expect("failed to spawn receiver worker"),
        );

        let supervisor_inner = Arc::clone(&inner);
        workers.push(
            thread::Builder::new()
                .name("channel-supervisor".to_string())
                .spawn(move || run_supervisor(supervisor_inner, connector, event_rx))
                .expect("failed to spawn supervisor worker"),
        );

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Request a connect; the outcome arrives on the state stream
    pub fn connect(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.signal(ChannelEvent::ConnectRequested);
        Ok(())
    }

    /// Request an orderly disconnect; queued messages are retained
    pub fn disconnect(&self) -> Result<()> {
        self.ensure_live()?;
        self.inner.signal(ChannelEvent::DisconnectRequested);
        Ok(())
    }

    /// Dispatch a platform detach notification into the channel
    pub fn notify_detached(&self) {
        self.inner.signal(ChannelEvent::AccessoryDetached);
    }

    /// Encode and enqueue a message; transmission is asynchronous
    ///
    /// Fails only when the channel is disposed or the payload exceeds the
    /// shared payload bound; whether to truncate instead is the caller's
    /// decision.
    pub fn send(&self, text: &str) -> Result<()> {
        self.ensure_live()?;

        let payload = text.as_bytes();
        if payload.len() > self.inner.config.max_payload {
            return Err(Error::Protocol(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: self.inner.config.max_payload,
            }));
        }
        let frame = encode_frame(payload)?;

        self.inner
            .queue
            .lock()
            .expect("queue lock poisoned")
            .push_back(frame);
        self.inner.queue_cv.notify_one();
        Ok(())
    }

    /// Decoded messages, in wire completion order, from subscription onward
    pub fn subscribe_messages(&self) -> Receiver<String> {
        let (tx, rx) = async_channel::unbounded();
        self.inner
            .message_subs
            .lock()
            .expect("message subscriber lock poisoned")
            .push(tx);
        rx
    }

    /// State transitions, replaying the current state to the new subscriber
    pub fn subscribe_state(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = async_channel::unbounded();
        let current = *self.inner.state.lock().expect("state lock poisoned");
        let _ = tx.try_send(current);
        self.inner
            .state_subs
            .lock()
            .expect("state subscriber lock poisoned")
            .push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().expect("state lock poisoned")
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop all workers and release the transport; idempotent
    pub fn dispose(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing message channel");
        self.inner.signal(ChannelEvent::Shutdown);
        self.inner.queue_cv.notify_all();

        let handles = {
            let mut workers = self.workers.lock().expect("worker lock poisoned");
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            if handle.join().is_err() {
                warn!("channel worker panicked during shutdown");
            }
        }

        // All workers have observed the stop request; the handle can be
        // released without racing an in-flight transfer.
        self.inner.teardown_transport();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.stopping() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Sender worker: drains the queue one frame at a time
///
/// A frame is removed only after a confirmed full write; a transient failure
/// requeues it at the tail, which preserves at-least-once delivery at the
/// cost of a possible out-of-order retry.
fn run_sender(inner: Arc<Inner>) {
    debug!("sender worker started");
    loop {
        if inner.stopping() {
            break;
        }

        let frame = {
            let mut queue = inner.queue.lock().expect("queue lock poisoned");
            while queue.is_empty() && !inner.stopping() {
                let (guard, _) = inner
                    .queue_cv
                    .wait_timeout(queue, Duration::from_millis(200))
                    .expect("queue lock poisoned");
                queue = guard;
            }
            if inner.stopping() {
                break;
            }
            // Hold queued traffic while disconnected so it goes out in
            // original order after the next connect
            if inner.current_transport().is_some() {
                queue.pop_front()
            } else {
                None
            }
        };

        let Some(frame) = frame else {
            thread::sleep(Duration::from_millis(50));
            continue;
        };

        let generation = inner.current_generation();
        let Some(transport) = inner.current_transport() else {
            // Transport vanished between the check and the pop; nothing was
            // written, so the frame keeps its place at the head.
            inner
                .queue
                .lock()
                .expect("queue lock poisoned")
                .push_front(frame);
            continue;
        };

        if let Err(e) = transport.send(&frame) {
            warn!("send failed, message requeued: {e}");
            drop(transport);
            inner
                .queue
                .lock()
                .expect("queue lock poisoned")
                .push_back(frame);
            inner.signal(ChannelEvent::ConnectionLost { generation });
            thread::sleep(inner.config.send_retry_delay);
        }
    }
    debug!("sender worker stopped");
}

/// Receiver worker: bounded-timeout reads fed byte-by-byte into the decoder
///
/// Frame-local faults are absorbed here: framing errors discard one frame,
/// invalid UTF-8 drops one message. Only transport faults escalate.
fn run_receiver(inner: Arc<Inner>) {
    debug!("receiver worker started");
    let mut decoder = FrameDecoder::new(inner.config.max_payload);
    let mut generation = 0u64;

    loop {
        if inner.stopping() {
            break;
        }

        let Some(transport) = inner.current_transport() else {
            if decoder.is_mid_frame() {
                decoder.reset();
            }
            thread::sleep(Duration::from_millis(50));
            continue;
        };

        let current = inner.current_generation();
        if current != generation {
            // Replaced transport; parse state from the old stream is void
            decoder.reset();
            generation = current;
        }

        match transport.receive(inner.config.receive_timeout) {
            // Idle timeout, loop again
            Ok(None) => {}
            Ok(Some(bytes)) => {
                for byte in bytes {
                    match decoder.push(byte) {
                        Ok(Some(payload)) => match String::from_utf8(payload.to_vec()) {
                            Ok(text) => {
                                debug!(len = text.len(), "message received");
                                inner.publish_message(text);
                            }
                            Err(e) => warn!("dropping message with invalid UTF-8: {e}"),
                        },
                        Ok(None) => {}
                        Err(e) => warn!("framing error, frame discarded: {e}"),
                    }
                }
            }
            Err(e) => {
                warn!("receive failed: {e}");
                drop(transport);
                inner.signal(ChannelEvent::ConnectionLost { generation });
                thread::sleep(inner.config.send_retry_delay);
            }
        }
    }
    debug!("receiver worker stopped");
}

/// Reconnect supervisor: owns the transport lifecycle
///
/// Consumes [`ChannelEvent`]s; on a loss it fully tears down the old
/// transport before any reconnect attempt, and backs off with a doubling
/// delay (capped) on repeated failure, indefinitely, until dispose. Roles
/// whose platform redelivers the device (`reconnects() == false`) settle in
/// `Disconnected` instead of retrying.
fn run_supervisor(
    inner: Arc<Inner>,
    mut connector: Box<dyn Connector>,
    events: Receiver<ChannelEvent>,
) {
    debug!("reconnect supervisor started");
    loop {
        if inner.stopping() {
            break;
        }
        let Ok(event) = events.recv_blocking() else {
            break;
        };

        match event {
            ChannelEvent::Shutdown => break,

            ChannelEvent::ConnectRequested => {
                if inner.current_transport().is_some() {
                    debug!("connect requested while connected, ignoring");
                    continue;
                }
                // Single attempt; an explicit connect failure is surfaced as
                // the Error state and not retried.
                attempt_connect(&inner, connector.as_mut());
            }

            ChannelEvent::DisconnectRequested => {
                inner.teardown_transport();
                inner.set_state(ConnectionState::Disconnected);
            }

            ChannelEvent::AccessoryDetached => {
                info!("accessory detached");
                inner.teardown_transport();
                inner.set_state(ConnectionState::Disconnected);
            }

            ChannelEvent::ConnectionLost { generation } => {
                // Stale signals from a worker racing a finished teardown or
                // an already-replaced transport are dropped here.
                if inner.current_transport().is_none()
                    || generation != inner.current_generation()
                {
                    continue;
                }
                warn!("connection lost");
                inner.teardown_transport();
                inner.set_state(ConnectionState::Disconnected);
                if connector.reconnects() {
                    reconnect_loop(&inner, connector.as_mut(), &events);
                }
            }
        }
    }
    debug!("reconnect supervisor stopped");
}

fn attempt_connect(inner: &Arc<Inner>, connector: &mut dyn Connector) -> bool {
    let sink_inner = Arc::clone(inner);
    let sink = move |state: ConnectionState| sink_inner.set_state(state);

    match connector.connect(&sink) {
        Ok(transport) => {
            inner.install_transport(Arc::from(transport));
            inner.set_state(ConnectionState::Connected);
            info!("transport connected");
            true
        }
        Err(e) => {
            warn!("connect failed: {e}");
            inner.set_state(ConnectionState::Error);
            false
        }
    }
}

/// Retry connects with doubling delay until success, dispose, or disconnect
fn reconnect_loop(
    inner: &Arc<Inner>,
    connector: &mut dyn Connector,
    events: &Receiver<ChannelEvent>,
) {
    let mut delay = inner.config.reconnect_delay;
    loop {
        if inner.stopping() {
            return;
        }
        if attempt_connect(inner, connector) {
            return;
        }

        // Sleep out the backoff in slices so dispose and disconnect stay
        // responsive mid-retry
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if inner.stopping() {
                return;
            }
            match events.try_recv() {
                Ok(ChannelEvent::Shutdown) => return,
                Ok(ChannelEvent::DisconnectRequested) => {
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
                // Caller asked again; retry without waiting out the delay
                Ok(ChannelEvent::ConnectRequested) => break,
                Ok(_) => {}
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Closed) => return,
            }
            thread::sleep(Duration::from_millis(20));
        }

        delay = (delay * 2).min(inner.config.reconnect_delay_max);
    }
}
