//! Byte stream ownership and request/response correlation for the receiver.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::ubx::messages::CLASS_CFG;
use crate::ubx::registry::Purpose;
use crate::ubx::{Frame, FrameDecoder, FrameError, Message, Registry, RegistryError};

/// gpsd command switching a client connection to raw receiver bytes.
pub const GPSD_RAW_WATCH: &str = r#"?WATCH={"enable":true,"raw":2}"#;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Limit for opening the stream and for the first inbound bytes.
    pub connect_timeout: Duration,
    /// Limit for an answer to one poll or set.
    pub request_timeout: Duration,
    /// Receiver thread read timeout; bounds how long a stop request takes.
    pub read_timeout: Duration,
    /// Pause before the next connect attempt after a failure.
    pub backoff: Duration,
    /// Consecutive failed status polls before the link counts as lost.
    pub max_failures: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_millis(250),
            backoff: Duration::from_secs(3),
            max_failures: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connecting to {target} failed")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("no data from {target} within {timeout:?}")]
    NoData { target: String, timeout: Duration },
    #[error("receiver link is down")]
    LinkDown,
    #[error("writing to receiver failed")]
    Write(#[source] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Independent read and write halves of one byte stream.
pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens byte streams to the receiver.
pub trait Connector: Send + Sync {
    /// Human readable endpoint, used in logs and errors.
    fn target(&self) -> String;

    fn connect(&self, config: &TransportConfig) -> io::Result<Connection>;
}

/// TCP endpoint such as gpsd or ser2net, optionally primed with a command.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub addr: String,
    pub watch_command: Option<String>,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            watch_command: None,
        }
    }

    pub fn with_watch_command(mut self, command: impl Into<String>) -> Self {
        self.watch_command = Some(command.into());
        self
    }
}

impl Connector for TcpConnector {
    fn target(&self) -> String {
        self.addr.clone()
    }

    fn connect(&self, config: &TransportConfig) -> io::Result<Connection> {
        let mut last_err = None;
        let mut stream = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let stream = match (stream, last_err) {
            (Some(stream), _) => stream,
            (None, Some(err)) => return Err(err),
            (None, None) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} resolves to no address", self.addr),
                ));
            }
        };
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.set_nodelay(true)?;

        let mut writer = stream.try_clone()?;
        if let Some(command) = &self.watch_command {
            writer.write_all(command.as_bytes())?;
            writer.flush()?;
        }
        Ok(Connection {
            reader: Box::new(stream),
            writer: Box::new(writer),
        })
    }
}

/// Directly attached receiver on a serial device.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub path: String,
    pub baud_rate: u32,
}

impl Connector for SerialConnector {
    fn target(&self) -> String {
        format!("{} @ {}", self.path, self.baud_rate)
    }

    fn connect(&self, config: &TransportConfig) -> io::Result<Connection> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(config.read_timeout)
            .open()?;
        let writer = port.try_clone()?;
        Ok(Connection {
            reader: Box::new(port),
            writer: Box::new(writer),
        })
    }
}

/// Request/response operations on a UBX link.
///
/// Failures (dead link, timeout, unexpected answer) surface as `None` or
/// `false`, never as errors.
pub trait UbxLink: Send + Sync {
    /// Send `frame` and wait for the status message with the same class and id.
    fn poll(&self, frame: &Frame) -> Option<Message>;

    /// Send `frame` and wait for ACK-ACK (`true`) or ACK-NAK (`false`).
    fn set(&self, frame: &Frame) -> Option<bool>;

    /// Send `frame` without waiting for anything.
    fn send(&self, frame: &Frame) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Response,
    Ack,
}

// Answers still outstanding for one (class, id). A CFG poll waits for both.
struct Pending {
    response: bool,
    ack: bool,
    slot: SyncSender<Message>,
}

// State shared between the request side and the receiver thread of one connection.
struct Shared {
    registry: Arc<Registry>,
    pending: Mutex<HashMap<(u8, u8), Pending>>,
    alive: AtomicBool,
    stop: AtomicBool,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<(u8, u8), Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, frame: &Frame) {
        let message = match self.registry.decode_frame(frame) {
            Ok(message) => message,
            Err(RegistryError::UnknownMessage { class, id }) => {
                trace!("ignoring unregistered frame {class:#04x}/{id:#04x}");
                return;
            }
            Err(err) => {
                warn!("dropping frame: {err}");
                return;
            }
        };

        let (key, expect) = match &message {
            Message::AckAck(ack) => ((ack.class, ack.id), Expect::Ack),
            Message::AckNak(nak) => ((nak.class, nak.id), Expect::Ack),
            // Empty frames are requests, not answers.
            Message::Poll { .. } => return,
            _ => (frame.key(), Expect::Response),
        };

        let mut pending = self.pending();
        let Some(entry) = pending.get_mut(&key) else {
            trace!("unsolicited {}", message.name());
            return;
        };
        let outstanding = match expect {
            Expect::Response => &mut entry.response,
            Expect::Ack => &mut entry.ack,
        };
        if !*outstanding {
            trace!("unsolicited {}", message.name());
            return;
        }
        *outstanding = false;
        // The waiter may already have timed out.
        let _ = entry.slot.try_send(message);
        if !entry.response && !entry.ack {
            pending.remove(&key);
        }
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // Dropping the slots wakes every waiter immediately.
        self.pending().clear();
    }
}

fn receive_loop(mut reader: Box<dyn Read + Send>, shared: Arc<Shared>, first_data: SyncSender<()>) {
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0_u8; 4096];
    let mut frames = Vec::new();
    let mut seen_data = false;

    while !shared.stop.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                info!("receiver stream closed");
                break;
            }
            Ok(size) => {
                if !seen_data {
                    seen_data = true;
                    let _ = first_data.try_send(());
                }
                decoder.push_bytes(&buffer[..size], &mut frames);
                for result in frames.drain(..) {
                    match result {
                        Ok(frame) => shared.dispatch(&frame),
                        Err(err) => warn!("{err}"),
                    }
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!("reading from receiver failed: {err}");
                break;
            }
        }
    }
    shared.mark_dead();
    debug!("receiver thread done");
}

struct Link {
    writer: Box<dyn Write + Send>,
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
}

impl Link {
    fn close(mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take()
            && handle.join().is_err()
        {
            warn!("receiver thread panicked");
        }
        self.shared.mark_dead();
    }
}

/// UBX transport over a reconnectable byte stream.
///
/// One receiver thread per connection decodes inbound frames and resolves
/// pending requests. All round trips are serialized by an exclusive lock
/// that spans sending the request and waiting for its answer.
pub struct UbxTransport {
    connector: Box<dyn Connector>,
    config: TransportConfig,
    registry: Arc<Registry>,
    link: Mutex<Option<Link>>,
    request_lock: Mutex<()>,
}

impl UbxTransport {
    pub fn new(connector: Box<dyn Connector>, config: TransportConfig) -> Self {
        Self {
            connector,
            config,
            registry: Arc::new(Registry::with_defaults()),
            link: Mutex::new(None),
            request_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn target(&self) -> String {
        self.connector.target()
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open the stream and wait for the first inbound bytes.
    pub fn connect(&self) -> Result<(), TransportError> {
        self.disconnect();

        let target = self.connector.target();
        let connection = self
            .connector
            .connect(&self.config)
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        let shared = Arc::new(Shared {
            registry: Arc::clone(&self.registry),
            pending: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
            stop: AtomicBool::new(false),
        });
        let (first_tx, first_rx): (SyncSender<()>, Receiver<()>) = mpsc::sync_channel(1);
        let shared_for_thread = Arc::clone(&shared);
        let reader = connection.reader;
        let receiver = thread::Builder::new()
            .name("ubx-receiver".to_string())
            .spawn(move || receive_loop(reader, shared_for_thread, first_tx))
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        let link = Link {
            writer: connection.writer,
            shared,
            receiver: Some(receiver),
        };

        match first_rx.recv_timeout(self.config.connect_timeout) {
            Ok(()) => {
                info!("connected to {target}");
                *self.link() = Some(link);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                link.close();
                Err(TransportError::NoData {
                    target,
                    timeout: self.config.connect_timeout,
                })
            }
        }
    }

    /// Stop the receiver thread and release the stream.
    pub fn disconnect(&self) {
        let link = self.link().take();
        if let Some(link) = link {
            link.close();
            info!("disconnected from {}", self.connector.target());
        }
    }

    pub fn is_link_up(&self) -> bool {
        self.link()
            .as_ref()
            .is_some_and(|link| link.shared.alive.load(Ordering::SeqCst))
    }

    fn write(&self, frame: &Frame) -> Result<Arc<Shared>, TransportError> {
        let bytes = frame.to_bytes()?;
        let mut guard = self.link();
        let link = guard.as_mut().ok_or(TransportError::LinkDown)?;
        if !link.shared.alive.load(Ordering::SeqCst) {
            return Err(TransportError::LinkDown);
        }
        let written = link.writer.write_all(&bytes).and_then(|_| link.writer.flush());
        if let Err(err) = written {
            link.shared.mark_dead();
            return Err(TransportError::Write(err));
        }
        Ok(Arc::clone(&link.shared))
    }

    // CFG polls are answered with the status message followed by an ACK.
    fn poll_is_acknowledged(&self, frame: &Frame) -> bool {
        frame.class == CLASS_CFG
            && self
                .registry
                .schema_for(frame.class, frame.id, frame.payload.len())
                .is_some_and(|schema| schema.purpose == Purpose::Poll)
    }

    /// Send `frame` and collect its answers until all arrived or the request times out.
    ///
    /// The pending entry stays registered until the trailing ACK of a CFG poll
    /// is in, so it cannot be taken for the answer to a later set.
    fn request(&self, frame: &Frame, expect: Expect) -> Option<Message> {
        let _exclusive = self
            .request_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let shared = {
            let guard = self.link();
            Arc::clone(&guard.as_ref()?.shared)
        };
        let mut awaiting_response = expect == Expect::Response;
        let mut awaiting_ack = expect == Expect::Ack || self.poll_is_acknowledged(frame);
        let (slot, answers) = mpsc::sync_channel(2);
        shared.pending().insert(
            frame.key(),
            Pending {
                response: awaiting_response,
                ack: awaiting_ack,
                slot,
            },
        );

        if let Err(err) = self.write(frame) {
            debug!("request {:#04x}/{:#04x} not sent: {err}", frame.class, frame.id);
            shared.pending().remove(&frame.key());
            return None;
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let mut answer = None;
        while awaiting_response || awaiting_ack {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match answers.recv_timeout(remaining) {
                Ok(message @ (Message::AckAck(_) | Message::AckNak(_))) => {
                    awaiting_ack = false;
                    let rejected = matches!(message, Message::AckNak(_));
                    if expect == Expect::Ack {
                        answer = Some(message);
                    } else if rejected && awaiting_response {
                        debug!("poll {:#04x}/{:#04x} rejected", frame.class, frame.id);
                        break;
                    }
                }
                Ok(message) => {
                    awaiting_response = false;
                    answer = Some(message);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if answer.is_none() {
                        debug!("no answer to {:#04x}/{:#04x}", frame.class, frame.id);
                    } else {
                        debug!("no acknowledgement for poll {:#04x}/{:#04x}", frame.class, frame.id);
                    }
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        shared.pending().remove(&frame.key());
        answer
    }
}

impl UbxLink for UbxTransport {
    fn poll(&self, frame: &Frame) -> Option<Message> {
        self.request(frame, Expect::Response)
    }

    fn set(&self, frame: &Frame) -> Option<bool> {
        match self.request(frame, Expect::Ack)? {
            Message::AckAck(_) => Some(true),
            Message::AckNak(_) => Some(false),
            _ => None,
        }
    }

    fn send(&self, frame: &Frame) -> bool {
        let _exclusive = self
            .request_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.write(frame) {
            Ok(_) => true,
            Err(err) => {
                debug!("send {:#04x}/{:#04x} failed: {err}", frame.class, frame.id);
                false
            }
        }
    }
}

impl Drop for UbxTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
