//! Firmware loader worker.
//!
//! The baseband phone needs its layer-1 firmware pushed over the serial
//! link before any scanner can talk to it. The loader process waits for
//! the user to press the phone's power button, prints a sentinel line
//! once the download finishes, and must be kept alive for the whole
//! session (killing it resets the phone).

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info};

use super::line_source::LineSource;
use super::pch::warmup_wait;
use super::ScanEvent;

/// Drive the loader until the stop flag is raised.
///
/// Emits [`ScanEvent::FirmwareWaiting`] once the warm-up elapses (the
/// loader is now waiting for the power button) and
/// [`ScanEvent::FirmwareLoaded`] once the sentinel line appears. The
/// source is polled until shutdown so the loader process stays alive.
pub fn run_firmware_loader(
    mut source: Box<dyn LineSource>,
    sentinel: &str,
    warmup: Duration,
    events: Sender<ScanEvent>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) -> Result<()> {
    // The serial link needs a moment after spawn before the loader is
    // actually listening for the power button.
    if !warmup_wait(warmup, poll_interval, &stop) {
        source.kill();
        return Ok(());
    }
    let _ = events.blocking_send(ScanEvent::FirmwareWaiting);
    info!("firmware loader running, waiting for the phone's power button");

    let mut loaded = false;
    while !stop.load(Ordering::SeqCst) {
        let Some(line) = source.poll_line(poll_interval)? else {
            continue;
        };
        debug!(line = %line, "loader");
        if !loaded && line.contains(sentinel) {
            loaded = true;
            info!("firmware download finished");
            let _ = events.blocking_send(ScanEvent::FirmwareLoaded);
        }
    }
    source.kill();
    Ok(())
}
