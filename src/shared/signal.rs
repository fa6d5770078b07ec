use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// Returns a run flag cleared by Ctrl-C or SIGTERM.
pub fn install_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if running_for_signal.swap(false, Ordering::SeqCst) {
            info!("shutdown requested");
        }
    })
    .context("installing Ctrl-C handler failed")?;
    Ok(running)
}
