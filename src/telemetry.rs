//! Telemetry producer and uploader built on the transmit queue.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::queue::TransmitQueue;
use crate::state::StateStore;
use crate::worker::Task;

pub const EARTH_RADIUS_M: f64 = 6_371.0e3;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub queue_capacity: usize,
    /// Minimum movement before a new position is queued.
    pub min_distance_m: f64,
    /// A position is queued on every n-th tick even when stationary.
    pub force_position_every: u64,
    pub state_every: u64,
    pub upload_every: u64,
    pub upload_offset: u64,
    pub batch_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 300,
            min_distance_m: 1.5,
            force_position_every: 60,
            state_every: 15,
            upload_every: 30,
            upload_offset: 5,
            batch_size: 100,
        }
    }
}

/// Great circle distance in meters between two points given in radians.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;
    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Moves interesting store entries into the transmit queue.
pub struct Collector {
    store: Arc<StateStore>,
    queue: Arc<TransmitQueue<Value>>,
    config: TelemetryConfig,
    ticks: u64,
    // (lat, lon) in radians of the last queued position
    last: (f64, f64),
}

impl Collector {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<TransmitQueue<Value>>,
        config: TelemetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            config,
            ticks: 0,
            last: (0.0, 0.0),
        }
    }

    fn position(&mut self, force: bool) {
        let Some(pos) = self.store.get("gnss-pos") else {
            return;
        };
        let (Some(lon), Some(lat)) = (pos["lon"].as_f64(), pos["lat"].as_f64()) else {
            return;
        };
        let (lat, lon) = (lat.to_radians(), lon.to_radians());
        let moved = haversine(self.last.0, self.last.1, lat, lon);
        if force || moved > self.config.min_distance_m {
            debug!("queueing position, moved {moved:.1} m");
            self.queue.add(pos);
            self.last = (lat, lon);
        }
    }

    fn fusion_state(&self) {
        if let Some(state) = self.store.get("gnss-state") {
            self.queue.add(state);
        }
    }
}

impl Task for Collector {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn tick(&mut self) {
        let force = self.ticks % self.config.force_position_every == 0;
        self.position(force);
        if self.ticks % self.config.state_every == 0 {
            self.fusion_state();
        }
        self.ticks += 1;
    }
}

/// Destination for serialized telemetry batches.
pub trait Uploader: Send {
    fn upload(&mut self, payload: &[u8]) -> io::Result<()>;
}

/// Appends each batch as one JSON line to a local file.
#[derive(Debug, Clone)]
pub struct SpoolUploader {
    path: PathBuf,
}

impl SpoolUploader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Uploader for SpoolUploader {
    fn upload(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(payload)?;
        file.write_all(b"\n")?;
        file.flush()
    }
}

/// Drains the transmit queue into an [`Uploader`], at least once.
///
/// Entries leave the queue only after the uploader accepted them. The
/// outcome is published under `things`.
pub struct Publisher<U> {
    store: Arc<StateStore>,
    queue: Arc<TransmitQueue<Value>>,
    uploader: U,
    config: TelemetryConfig,
    ticks: u64,
    bytes: u64,
}

impl<U: Uploader> Publisher<U> {
    pub fn new(
        store: Arc<StateStore>,
        queue: Arc<TransmitQueue<Value>>,
        uploader: U,
        config: TelemetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            uploader,
            config,
            ticks: 0,
            bytes: 0,
        }
    }

    /// Queue the current backlog size and upload one batch.
    pub fn upload(&mut self) {
        self.queue
            .add(json!({ "tb-qsize": self.queue.num_entries() }));

        let batch = self.queue.first_entries(self.config.batch_size);
        if batch.is_empty() {
            return;
        }
        let payload = match serde_json::to_vec(&batch) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("cannot serialize telemetry batch: {err}");
                return;
            }
        };

        let state = match self.uploader.upload(&payload) {
            Ok(()) => {
                self.queue.remove_first(batch.len());
                self.bytes += payload.len() as u64;
                info!("uploaded {} telemetry entries", batch.len());
                "connected"
            }
            Err(err) => {
                warn!("telemetry upload failed, keeping {} entries: {err}", batch.len());
                "failed"
            }
        };
        self.store
            .publish("things", json!({ "state": state, "bytes": self.bytes }));
    }
}

impl<U: Uploader + 'static> Task for Publisher<U> {
    fn name(&self) -> &str {
        "uploader"
    }

    fn period(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn tick(&mut self) {
        if self.ticks % self.config.upload_every == self.config.upload_offset {
            self.upload();
        }
        self.ticks += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        batches: Arc<Mutex<Vec<Value>>>,
        fail: bool,
    }

    impl Recorder {
        fn batches(&self) -> Vec<Value> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl Uploader for Recorder {
        fn upload(&mut self, payload: &[u8]) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::other("offline"));
            }
            self.batches
                .lock()
                .unwrap()
                .push(serde_json::from_slice(payload).unwrap());
            Ok(())
        }
    }

    fn setup() -> (Arc<StateStore>, Arc<TransmitQueue<Value>>) {
        (
            Arc::new(StateStore::new()),
            Arc::new(TransmitQueue::new(100).unwrap()),
        )
    }

    #[test]
    fn haversine_of_one_degree_latitude() {
        let d = haversine(0.0, 0.0, 1.0_f64.to_radians(), 0.0);
        assert!((d - 111_195.0).abs() < 1.0, "{d}");
        assert_eq!(haversine(0.5, 0.5, 0.5, 0.5), 0.0);
    }

    #[test]
    fn position_is_queued_when_moved_or_forced() {
        let (store, queue) = setup();
        let config = TelemetryConfig {
            force_position_every: 3,
            state_every: 100,
            ..TelemetryConfig::default()
        };
        let mut collector = Collector::new(Arc::clone(&store), Arc::clone(&queue), config);

        collector.tick();
        assert_eq!(queue.num_entries(), 0);

        store.publish("gnss-pos", json!({"fix": "3D", "lon": 11.5, "lat": 48.1}));
        // Tick 1: far from the origin, queued.
        collector.tick();
        assert_eq!(queue.num_entries(), 1);
        // Tick 2: not moved, not forced.
        collector.tick();
        assert_eq!(queue.num_entries(), 1);
        // Tick 3: forced.
        collector.tick();
        assert_eq!(queue.num_entries(), 2);

        // About 11 m north.
        store.publish("gnss-pos", json!({"fix": "3D", "lon": 11.5, "lat": 48.1001}));
        collector.tick();
        assert_eq!(queue.num_entries(), 3);
    }

    #[test]
    fn fusion_state_is_queued_periodically() {
        let (store, queue) = setup();
        store.publish("gnss-state", json!({"esf-status": {"fusion": "fusion"}}));
        let config = TelemetryConfig {
            state_every: 2,
            ..TelemetryConfig::default()
        };
        let mut collector = Collector::new(store, Arc::clone(&queue), config);
        for _ in 0..4 {
            collector.tick();
        }
        assert_eq!(queue.num_entries(), 2);
    }

    #[test]
    fn successful_upload_removes_batch() {
        let (store, queue) = setup();
        queue.add(json!({"a": 1}));
        queue.add(json!({"b": 2}));
        let recorder = Recorder::default();
        let mut publisher = Publisher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            recorder.clone(),
            TelemetryConfig::default(),
        );
        publisher.upload();

        assert_eq!(queue.num_entries(), 0);
        let batches = recorder.batches();
        let batch = batches[0].as_array().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0]["values"], json!({"a": 1}));
        assert_eq!(batch[2]["values"], json!({"tb-qsize": 2}));
        assert!(batch[2]["ts"].is_i64());
        assert_eq!(
            store.get("things"),
            Some(json!({"state": "connected", "bytes": publisher.bytes}))
        );
    }

    #[test]
    fn failed_upload_keeps_entries() {
        let (store, queue) = setup();
        queue.add(json!({"a": 1}));
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut publisher = Publisher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            recorder,
            TelemetryConfig::default(),
        );
        publisher.upload();
        assert_eq!(queue.num_entries(), 2);
        assert_eq!(
            store.get("things"),
            Some(json!({"state": "failed", "bytes": 0}))
        );
    }

    #[test]
    fn upload_runs_on_offset_tick() {
        let (store, queue) = setup();
        let config = TelemetryConfig {
            upload_every: 4,
            upload_offset: 2,
            ..TelemetryConfig::default()
        };
        let recorder = Recorder::default();
        let mut publisher = Publisher::new(store, Arc::clone(&queue), recorder.clone(), config);
        publisher.tick();
        publisher.tick();
        assert!(recorder.batches().is_empty());
        publisher.tick();
        assert_eq!(recorder.batches().len(), 1);
    }

    #[test]
    fn spool_appends_json_lines() {
        let path = std::env::temp_dir().join(format!("vcu-spool-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut spool = SpoolUploader::new(&path);
        spool.upload(b"[1]").unwrap();
        spool.upload(b"[2]").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1]\n[2]\n");
        std::fs::remove_file(&path).unwrap();
    }
}
