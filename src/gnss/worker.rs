use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::json;

use super::driver::Gnss;
use super::transport::UbxTransport;
use crate::state::StateStore;
use crate::worker::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Init,
    Setup,
    Connected,
    Timeout,
}

/// Receiver facade shared between the worker and other callers.
pub type SharedGnss = Arc<Mutex<Gnss<UbxTransport>>>;

// ESF-STATUS is polled on ticks where `tick % 10 == 3`.
const STATUS_EVERY: u64 = 10;
const STATUS_OFFSET: u64 = 3;

/// Keeps the receiver connected and publishes its state.
///
/// Publishes `gnss` (version, port and NMEA settings) once per connection
/// and `gnss-state` (fusion summary) while connected. The facade is locked
/// per step, so setters called through the same [`SharedGnss`] interleave
/// with the status polling.
pub struct GnssWorker {
    gnss: SharedGnss,
    store: Arc<StateStore>,
    state: LinkState,
    ticks: u64,
    failures: u32,
    retry_at: Option<Instant>,
}

impl GnssWorker {
    pub fn new(gnss: SharedGnss, store: Arc<StateStore>) -> Self {
        Self {
            gnss,
            store,
            state: LinkState::Init,
            ticks: 0,
            failures: 0,
            retry_at: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn gnss(&self) -> MutexGuard<'_, Gnss<UbxTransport>> {
        self.gnss.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            info!("gnss: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn init(&mut self) {
        if self.retry_at.is_some_and(|at| Instant::now() < at) {
            return;
        }
        let transport = Arc::clone(self.gnss().link());
        match transport.connect() {
            Ok(()) => {
                self.retry_at = None;
                self.transition(LinkState::Setup);
            }
            Err(err) => {
                warn!("cannot reach receiver: {err}");
                self.retry_at = Some(Instant::now() + transport.config().backoff);
            }
        }
    }

    fn setup(&mut self) {
        let (version, uart, nmea) = {
            let mut gnss = self.gnss();
            gnss.reset_cache();
            (gnss.version(), gnss.uart_settings(), gnss.nmea_protocol())
        };
        info!("receiver version: {version:?}");
        self.store.publish(
            "gnss",
            json!({
                "version": version,
                "uart": uart,
                "nmea-protocol": nmea,
            }),
        );
        self.ticks = 0;
        self.failures = 0;
        self.transition(LinkState::Connected);
    }

    fn connected(&mut self) {
        if !self.gnss().link().is_link_up() {
            warn!("receiver link lost");
            self.transition(LinkState::Timeout);
            return;
        }
        if self.ticks % STATUS_EVERY == STATUS_OFFSET {
            let esf = self.gnss().read_esf_status();
            match esf {
                Some(esf) => {
                    self.failures = 0;
                    self.store.publish("gnss-state", json!({ "esf-status": esf }));
                }
                None => {
                    self.failures += 1;
                    warn!("receiver status poll failed ({} in a row)", self.failures);
                    let max_failures = self.gnss().link().config().max_failures;
                    if self.failures >= max_failures {
                        self.transition(LinkState::Timeout);
                        return;
                    }
                }
            }
        }
        self.ticks += 1;
    }

    fn timeout(&mut self) {
        {
            let mut gnss = self.gnss();
            gnss.link().disconnect();
            gnss.reset_cache();
        }
        self.store.remove("gnss-state");
        self.transition(LinkState::Init);
    }
}

impl Task for GnssWorker {
    fn name(&self) -> &str {
        "gnss"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn tick(&mut self) {
        match self.state {
            LinkState::Init => self.init(),
            LinkState::Setup => self.setup(),
            LinkState::Connected => self.connected(),
            LinkState::Timeout => self.timeout(),
        }
    }

    fn shutdown(&mut self) {
        self.gnss().link().disconnect();
        self.store.remove("gnss-state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnss::transport::{TcpConnector, TransportConfig};
    use crate::ubx::UbxMessage;
    use crate::ubx::frame::{self, FrameDecoder};
    use crate::ubx::messages::{AckAck, DynamicModel};
    use std::io::{self, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn quick_config() -> TransportConfig {
        TransportConfig {
            connect_timeout: Duration::from_millis(300),
            request_timeout: Duration::from_millis(50),
            read_timeout: Duration::from_millis(20),
            backoff: Duration::from_secs(60),
            max_failures: 3,
        }
    }

    fn shared(addr: &str) -> SharedGnss {
        let transport = UbxTransport::new(Box::new(TcpConnector::new(addr)), quick_config());
        Arc::new(Mutex::new(Gnss::new(Arc::new(transport))))
    }

    fn worker(addr: &str, store: &Arc<StateStore>) -> GnssWorker {
        GnssWorker::new(shared(addr), Arc::clone(store))
    }

    // Answers ESF-STATUS and CFG-NAV5 and keeps the dynamic model it was given.
    // Returns the number of status polls seen.
    fn answering_receiver() -> (String, thread::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
            conn.write_all(b"$GNTXT\r\n").unwrap();
            let ack = AckAck {
                class: 0x06,
                id: 0x24,
            }
            .to_frame()
            .unwrap()
            .to_bytes()
            .unwrap();

            let mut decoder = FrameDecoder::new();
            let mut frames = Vec::new();
            let mut buffer = [0_u8; 512];
            let mut model = 0_u8;
            let mut status_polls = 0;
            loop {
                match conn.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => decoder.push_bytes(&buffer[..n], &mut frames),
                    Err(err)
                        if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                    {
                        continue;
                    }
                    Err(_) => break,
                }
                for request in frames.drain(..) {
                    let request = request.unwrap();
                    match (request.class, request.id, request.payload.len()) {
                        (0x10, 0x10, 0) => {
                            status_polls += 1;
                            conn.write_all(&frame::encode(0x10, 0x10, &[0; 16]).unwrap())
                                .unwrap();
                        }
                        (0x06, 0x24, 0) => {
                            let mut nav5 = [0_u8; 36];
                            nav5[2] = model;
                            conn.write_all(&frame::encode(0x06, 0x24, &nav5).unwrap())
                                .unwrap();
                            conn.write_all(&ack).unwrap();
                        }
                        (0x06, 0x24, 36) => {
                            model = request.payload[2];
                            conn.write_all(&ack).unwrap();
                        }
                        _ => {}
                    }
                }
            }
            status_polls
        });
        (addr, handle)
    }

    #[test]
    fn unreachable_receiver_backs_off_in_init() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let store = Arc::new(StateStore::new());
        let mut worker = worker(&addr, &store);

        worker.tick();
        assert_eq!(worker.state(), LinkState::Init);
        assert!(worker.retry_at.is_some());
        // Still inside the backoff window, no new attempt.
        let retry_at = worker.retry_at;
        worker.tick();
        assert_eq!(worker.retry_at, retry_at);
        assert!(store.get("gnss").is_none());
    }

    #[test]
    fn silent_receiver_cycles_through_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"$GNTXT\r\n").unwrap();
            thread::sleep(Duration::from_millis(600));
        });

        let store = Arc::new(StateStore::new());
        store.publish("gnss-state", json!({"esf-status": {}}));
        let mut worker = worker(&addr, &store);

        worker.tick();
        assert_eq!(worker.state(), LinkState::Setup);
        worker.tick();
        assert_eq!(worker.state(), LinkState::Connected);
        let published = store.get("gnss").unwrap();
        assert_eq!(published["version"]["swVersion"], "n/a");
        assert_eq!(published["nmea-protocol"], "0.0");

        // Ticks 0..=2 do not poll; 3, 13 and 23 fail.
        for _ in 0..24 {
            if worker.state() != LinkState::Connected {
                break;
            }
            worker.tick();
        }
        assert_eq!(worker.state(), LinkState::Timeout);
        worker.tick();
        assert_eq!(worker.state(), LinkState::Init);
        assert!(store.get("gnss-state").is_none());
        server.join().unwrap();
    }

    #[test]
    fn setters_interleave_with_status_polling() {
        let (addr, server) = answering_receiver();
        let store = Arc::new(StateStore::new());
        let gnss = shared(&addr);
        let mut worker = GnssWorker::new(Arc::clone(&gnss), Arc::clone(&store));
        let ticker = thread::spawn(move || {
            for _ in 0..40 {
                worker.tick();
                thread::sleep(Duration::from_millis(5));
            }
            worker
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.get("gnss").is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        for model in [
            DynamicModel::Automotive,
            DynamicModel::Portable,
            DynamicModel::Automotive,
        ] {
            let outcome = gnss.lock().unwrap().set_dynamic_model(model);
            assert_eq!(outcome, format!("Dynamic model set to {model}"));
        }

        let worker = ticker.join().unwrap();
        assert_eq!(worker.state(), LinkState::Connected);
        assert!(store.get("gnss-state").is_some());
        assert_eq!(
            gnss.lock().unwrap().dynamic_model(),
            Some(DynamicModel::Automotive)
        );

        gnss.lock().unwrap().link().disconnect();
        assert!(server.join().unwrap() >= 3);
    }
}
