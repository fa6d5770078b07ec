//! Position feed from the gpsd JSON protocol.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::state::StateStore;
use crate::worker::Task;

pub const WATCH_JSON: &str = r#"?WATCH={"enable":true,"json":true}"#;

// Reports queued between the socket thread and the reader.
const REPORT_BACKLOG: usize = 64;

// Longest report kept. A partial line beyond this is dropped up to its newline.
const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub addr: String,
    pub connect_timeout: Duration,
    /// Silence after which the connection counts as lost.
    pub report_timeout: Duration,
    pub read_timeout: Duration,
    pub backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:2947".to_string(),
            connect_timeout: Duration::from_secs(3),
            report_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_millis(250),
            backoff: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "class")]
enum Report {
    #[serde(rename = "TPV")]
    Tpv(Tpv),
    #[serde(rename = "SKY")]
    Sky(Sky),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    status: Option<u8>,
    lon: Option<f64>,
    lat: Option<f64>,
    speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Sky {
    pdop: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Fix {
    #[default]
    #[serde(rename = "No Fix")]
    NoFix,
    #[serde(rename = "2D")]
    Fix2D,
    #[serde(rename = "3D")]
    Fix3D,
    #[serde(rename = "3D DGPS")]
    Fix3DDgps,
}

impl Fix {
    // gpsd status 2 means DGPS corrected.
    fn from_report(mode: u8, status: Option<u8>) -> Self {
        match (mode, status) {
            (3, Some(2)) => Fix::Fix3DDgps,
            (3, _) => Fix::Fix3D,
            (2, _) => Fix::Fix2D,
            _ => Fix::NoFix,
        }
    }
}

/// Published under `gnss-pos`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub fix: Fix,
    pub lon: f64,
    pub lat: f64,
    pub speed: f64,
    pub pdop: f64,
}

// Socket side of one gpsd connection; hands complete lines to the reader.
struct Client {
    lines: Receiver<String>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Client {
    fn connect(config: &ReaderConfig) -> io::Result<Self> {
        let addr = config
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, config.addr.clone()))?;
        let mut stream = TcpStream::connect_timeout(&addr, config.connect_timeout)?;
        stream.set_read_timeout(Some(config.read_timeout))?;
        stream.write_all(WATCH_JSON.as_bytes())?;

        let (tx, lines) = mpsc::sync_channel(REPORT_BACKLOG);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("gpsd-receiver".to_string())
            .spawn(move || read_lines(stream, tx, stop_for_thread))?;
        Ok(Self {
            lines,
            stop,
            handle,
        })
    }

    fn close(self) {
        let Client {
            lines,
            stop,
            handle,
        } = self;
        stop.store(true, Ordering::SeqCst);
        // A receiver thread blocked on a full backlog wakes up once this side is gone.
        drop(lines);
        if handle.join().is_err() {
            warn!("gpsd receiver thread panicked");
        }
    }
}

// Splits a byte stream into trimmed, non-empty lines of bounded length.
struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
    // Set while the rest of an oversized line is still arriving.
    discarding: bool,
}

impl LineBuffer {
    fn new(max_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_len,
            discarding: false,
        }
    }

    fn push(&mut self, bytes: &[u8], out: &mut Vec<String>) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                out.push(line);
            }
        }
        if self.pending.len() > self.max_len {
            if !self.discarding {
                warn!("dropping gpsd line longer than {} bytes", self.max_len);
            }
            self.pending.clear();
            self.discarding = true;
        }
    }
}

fn read_lines(mut stream: TcpStream, tx: SyncSender<String>, stop: Arc<AtomicBool>) {
    let mut buffer = vec![0_u8; 8192];
    let mut splitter = LineBuffer::new(MAX_LINE_LEN);
    let mut lines = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        match stream.read(&mut buffer) {
            Ok(0) => {
                info!("gpsd closed the connection");
                break;
            }
            Ok(size) => {
                splitter.push(&buffer[..size], &mut lines);
                for line in lines.drain(..) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {}
            Err(err) => {
                warn!("reading from gpsd failed: {err}");
                break;
            }
        }
    }
    debug!("gpsd receiver done");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Init,
    Connected,
    Timeout,
}

/// Follows gpsd and publishes the latest position under `gnss-pos`.
pub struct PositionReader {
    config: ReaderConfig,
    store: Arc<StateStore>,
    state: ReaderState,
    client: Option<Client>,
    retry_at: Option<Instant>,
    last_report: Instant,
    fix: Fix,
    speed: f64,
    pdop: f64,
}

impl PositionReader {
    pub fn new(config: ReaderConfig, store: Arc<StateStore>) -> Self {
        Self {
            config,
            store,
            state: ReaderState::Init,
            client: None,
            retry_at: None,
            last_report: Instant::now(),
            fix: Fix::NoFix,
            speed: 0.0,
            pdop: 0.0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    fn transition(&mut self, next: ReaderState) {
        if self.state != next {
            info!("gpsd: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Apply one line of gpsd output. Returns the position if one was published.
    pub fn handle_line(&mut self, line: &str) -> Option<Position> {
        let report = match serde_json::from_str::<Report>(line) {
            Ok(report) => report,
            Err(err) => {
                warn!("could not decode JSON data from gpsd, discarding: {err}");
                return None;
            }
        };
        match report {
            // PDOP is only remembered; it goes out with the next TPV.
            Report::Sky(sky) => {
                if let Some(pdop) = sky.pdop {
                    self.pdop = pdop;
                }
                None
            }
            Report::Tpv(tpv) => {
                self.fix = Fix::from_report(tpv.mode, tpv.status);
                if let Some(speed) = tpv.speed {
                    self.speed = speed;
                }
                // A TPV without coordinates must not publish a 0/0 position.
                let (Some(lon), Some(lat)) = (tpv.lon, tpv.lat) else {
                    return None;
                };
                let pos = Position {
                    fix: self.fix,
                    lon,
                    lat,
                    speed: self.speed,
                    pdop: self.pdop,
                };
                self.store.publish("gnss-pos", pos);
                Some(pos)
            }
            Report::Other => None,
        }
    }

    fn init(&mut self) {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return;
        }
        debug!("trying to connect to gpsd at {}", self.config.addr);
        match Client::connect(&self.config) {
            Ok(client) => {
                info!("gpsd connected");
                self.client = Some(client);
                self.retry_at = None;
                self.last_report = Instant::now();
                self.transition(ReaderState::Connected);
            }
            Err(err) => {
                warn!("cannot connect to gpsd, is it running? {err}");
                self.retry_at = Some(Instant::now() + self.config.backoff);
            }
        }
    }

    fn connected(&mut self) {
        let Some(client) = &self.client else {
            self.transition(ReaderState::Timeout);
            return;
        };
        let mut lines = Vec::new();
        let mut lost = false;
        match client.lines.recv_timeout(self.config.read_timeout * 4) {
            Ok(line) => lines.push(line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => lost = true,
        }
        loop {
            match client.lines.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    lost = true;
                    break;
                }
            }
        }

        if !lines.is_empty() {
            self.last_report = Instant::now();
        }
        for line in &lines {
            self.handle_line(line);
        }
        if lost || self.last_report.elapsed() >= self.config.report_timeout {
            warn!("gpsd timeout, maybe connection is lost");
            self.transition(ReaderState::Timeout);
        }
    }

    fn timeout(&mut self) {
        warn!("connection to gpsd lost");
        self.store.remove("gnss-pos");
        if let Some(client) = self.client.take() {
            client.close();
        }
        self.transition(ReaderState::Init);
    }
}

impl Task for PositionReader {
    fn name(&self) -> &str {
        "gps-reader"
    }

    fn period(&self) -> Duration {
        match self.state {
            ReaderState::Connected => Duration::ZERO,
            _ => Duration::from_secs(1),
        }
    }

    fn tick(&mut self) {
        match self.state {
            ReaderState::Init => self.init(),
            ReaderState::Connected => self.connected(),
            ReaderState::Timeout => self.timeout(),
        }
    }

    fn shutdown(&mut self) {
        if let Some(client) = self.client.take() {
            client.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;

    fn reader() -> (PositionReader, Arc<StateStore>) {
        let store = Arc::new(StateStore::new());
        (
            PositionReader::new(ReaderConfig::default(), Arc::clone(&store)),
            store,
        )
    }

    #[test]
    fn tpv_without_coordinates_publishes_nothing() {
        let (mut reader, store) = reader();
        assert_eq!(
            reader.handle_line(r#"{"class":"TPV","mode":3,"lat":48.1}"#),
            None
        );
        assert_eq!(reader.handle_line(r#"{"class":"TPV","mode":3,"lon":11.5}"#), None);
        assert_eq!(store.get("gnss-pos"), None);
    }

    #[test]
    fn tpv_with_coordinates_publishes_position() {
        let (mut reader, store) = reader();
        reader.handle_line(r#"{"class":"SKY","pdop":1.8}"#);
        let pos = reader
            .handle_line(r#"{"class":"TPV","mode":3,"status":2,"lon":11.5,"lat":48.1,"speed":4.2}"#)
            .unwrap();
        assert_eq!(pos.fix, Fix::Fix3DDgps);
        assert_eq!(
            store.get("gnss-pos"),
            Some(json!({"fix": "3D DGPS", "lon": 11.5, "lat": 48.1, "speed": 4.2, "pdop": 1.8}))
        );
    }

    #[test]
    fn speed_is_kept_when_missing() {
        let (mut reader, _) = reader();
        reader.handle_line(r#"{"class":"TPV","mode":2,"lon":1.0,"lat":2.0,"speed":3.0}"#);
        let pos = reader
            .handle_line(r#"{"class":"TPV","mode":1,"lon":1.0,"lat":2.0}"#)
            .unwrap();
        assert_eq!(pos.fix, Fix::NoFix);
        assert_eq!(pos.speed, 3.0);
    }

    #[test]
    fn malformed_and_foreign_reports_are_ignored() {
        let (mut reader, store) = reader();
        assert_eq!(reader.handle_line("{not json"), None);
        assert_eq!(reader.handle_line(r#"{"class":"VERSION","release":"3.22"}"#), None);
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn oversized_partial_line_is_dropped() {
        let mut splitter = LineBuffer::new(16);
        let mut out = Vec::new();
        splitter.push(b"{\"class\":\"SKY\"}\n{\"class\":\"TPV\",", &mut out);
        assert_eq!(out, vec![r#"{"class":"SKY"}"#.to_string()]);
        assert!(splitter.pending.len() <= 16);

        splitter.push(&[b'x'; 40], &mut out);
        assert!(splitter.pending.is_empty());
        splitter.push(&[b'x'; 40], &mut out);
        assert!(splitter.pending.is_empty());

        splitter.push(b"tail}\n\n{\"class\":\"SKY\"}\n", &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], r#"{"class":"SKY"}"#);
    }

    #[test]
    fn shutdown_returns_with_full_backlog() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut watch = [0_u8; 64];
            conn.read(&mut watch).unwrap();
            for _ in 0..500 {
                conn.write_all(b"{\"class\":\"SKY\",\"pdop\":1.5}\n").unwrap();
            }
            // Holds the connection until the client goes away.
            let mut rest = [0_u8; 64];
            while matches!(conn.read(&mut rest), Ok(n) if n > 0) {}
        });

        let config = ReaderConfig {
            addr,
            read_timeout: Duration::from_millis(50),
            ..ReaderConfig::default()
        };
        let mut reader = PositionReader::new(config, Arc::new(StateStore::new()));
        reader.tick();
        assert_eq!(reader.state(), ReaderState::Connected);
        thread::sleep(Duration::from_millis(300));

        let started = Instant::now();
        reader.shutdown();
        assert!(started.elapsed() < Duration::from_secs(3));
        server.join().unwrap();
    }

    #[test]
    fn reads_positions_from_socket_and_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut watch = [0_u8; 64];
            let n = conn.read(&mut watch).unwrap();
            assert!(watch[..n].starts_with(b"?WATCH="));
            conn.write_all(b"{\"class\":\"VERSION\"}\n{\"class\":\"TPV\",\"mode\":2,")
                .unwrap();
            conn.write_all(b"\"lon\":9.0,\"lat\":47.0}\n").unwrap();
            thread::sleep(Duration::from_millis(600));
        });

        let store = Arc::new(StateStore::new());
        let config = ReaderConfig {
            addr,
            report_timeout: Duration::from_millis(300),
            read_timeout: Duration::from_millis(50),
            ..ReaderConfig::default()
        };
        let mut reader = PositionReader::new(config, Arc::clone(&store));
        reader.tick();
        assert_eq!(reader.state(), ReaderState::Connected);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get("gnss-pos").is_none() && Instant::now() < deadline {
            reader.tick();
        }
        assert_eq!(store.get("gnss-pos").unwrap()["fix"], json!("2D"));

        while reader.state() == ReaderState::Connected && Instant::now() < deadline {
            reader.tick();
        }
        assert_eq!(reader.state(), ReaderState::Timeout);
        reader.tick();
        assert_eq!(reader.state(), ReaderState::Init);
        assert_eq!(store.get("gnss-pos"), None);
        server.join().unwrap();
    }
}
