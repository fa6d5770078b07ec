use crate::args::RunArgs;
use crate::shared::lock::LockGuard;
use crate::shared::signal::install_ctrlc_handler;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vcu_gateway::gnss::{Gnss, GnssWorker, SharedGnss, UbxTransport};
use vcu_gateway::gpsd::PositionReader;
use vcu_gateway::queue::TransmitQueue;
use vcu_gateway::state::StateStore;
use vcu_gateway::telemetry::{Collector, Publisher, SpoolUploader};
use vcu_gateway::worker::Worker;

const MAIN_LOOP_TICK: Duration = Duration::from_millis(200);
const STATE_DUMP_EVERY: Duration = Duration::from_secs(60);

// Public run command entrypoint.
// One process, one worker thread per concern, all sharing the state store.
pub fn run_mode(args: RunArgs) -> Result<()> {
    let running = install_ctrlc_handler()?;
    let _lock = LockGuard::acquire(&args.lock_file)?;

    let store = Arc::new(StateStore::new());
    let telemetry = args.to_telemetry_config();
    let queue = Arc::new(
        TransmitQueue::new(telemetry.queue_capacity)
            .with_context(|| format!("invalid queue capacity: {}", telemetry.queue_capacity))?,
    );
    debug!("transmit queue holds up to {} entries", queue.capacity());

    let connector = args.gnss.connector();
    info!("GNSS receiver at {}", connector.target());
    let transport = Arc::new(UbxTransport::new(
        connector,
        args.gnss.to_transport_config(),
    ));
    let gnss: SharedGnss = Arc::new(Mutex::new(Gnss::new(transport)));

    let workers = vec![
        Worker::spawn(GnssWorker::new(Arc::clone(&gnss), Arc::clone(&store)))
            .context("starting gnss worker failed")?,
        Worker::spawn(PositionReader::new(
            args.to_reader_config(),
            Arc::clone(&store),
        ))
        .context("starting gpsd reader failed")?,
        Worker::spawn(Collector::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            telemetry.clone(),
        ))
        .context("starting telemetry collector failed")?,
        Worker::spawn(Publisher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            SpoolUploader::new(&args.spool_file),
            telemetry,
        ))
        .context("starting telemetry uploader failed")?,
    ];
    info!(
        "gateway running with {} workers, spooling to {}",
        workers.len(),
        args.spool_file.display()
    );

    let mut last_dump = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(MAIN_LOOP_TICK);
        if last_dump.elapsed() >= STATE_DUMP_EVERY {
            last_dump = Instant::now();
            debug!(
                "state {} queued={}",
                serde_json::Value::Object(store.get_all().into_iter().collect()),
                queue.num_entries()
            );
        }
    }

    // Runs before the gnss worker disconnects; holding the facade pauses its polling.
    if args.save_state_on_exit {
        let outcome = gnss
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .save_state();
        info!("saving receiver state on exit: {outcome}");
    }

    // Signal every worker first so they wind down in parallel.
    for worker in &workers {
        worker.request_stop();
    }
    let timeout = Duration::from_secs(args.shutdown_timeout_secs);
    for worker in workers {
        // Worker::stop reports a timeout itself.
        worker.stop(timeout);
    }

    let pending = queue.num_entries();
    if pending > 0 {
        warn!("{pending} telemetry entries not uploaded");
    }
    info!("gateway stopped");
    Ok(())
}
