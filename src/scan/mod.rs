//! Scanner process supervision.
//!
//! Three kinds of worker share one baseband device: the sweep scanner,
//! the paging-channel scanner, and the firmware loader. Sweep and PCH
//! are mutually exclusive (both retune the radio); PCH requests queue up
//! and run strictly one at a time. Workers are plain threads that post
//! [`ScanEvent`]s into the control loop's channel and honor a shared
//! stop flag.

pub mod firmware;
pub mod line_source;
pub mod pch;
pub mod sweep;

use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{error, info};

use crate::config::ScannerConfig;
use crate::models::Station;
use line_source::{LineSource, ProcessLineSource};
use pch::{PchOutcome, PchParams};

/// Everything the workers report back to the control loop.
#[derive(Debug)]
pub enum ScanEvent {
    /// One fully parsed base station block from the sweep scanner.
    Station(Box<Station>),
    /// A paging-channel scan finished (possibly degraded). Cancelled
    /// scans report nothing.
    PchDone { arfcn: u16, outcome: PchOutcome },
    /// The firmware loader is up and waiting for the power button.
    FirmwareWaiting,
    /// The firmware download completed; scanners may start.
    FirmwareLoaded,
    /// A worker died with an error instead of finishing.
    WorkerFailed { worker: String, error: String },
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn alive(&self) -> bool {
        !self.handle.is_finished()
    }

    fn stop_and_join(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

/// Supervisor for the scanner worker threads.
pub struct ScanController {
    config: ScannerConfig,
    events: Sender<ScanEvent>,
    sweep: Option<Worker>,
    firmware: Option<Worker>,
    pch: Option<Worker>,
    pch_queue: VecDeque<u16>,
}

impl ScanController {
    pub fn new(config: ScannerConfig, events: Sender<ScanEvent>) -> Self {
        Self {
            config,
            events,
            sweep: None,
            firmware: None,
            pch: None,
            pch_queue: VecDeque::new(),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Drop handles of workers that already ran to completion.
    fn reap(&mut self) {
        for slot in [&mut self.sweep, &mut self.firmware, &mut self.pch] {
            if slot.as_ref().is_some_and(|w| !w.alive()) {
                if let Some(w) = slot.take() {
                    let _ = w.handle.join();
                }
            }
        }
    }

    pub fn sweep_active(&mut self) -> bool {
        self.reap();
        self.sweep.is_some()
    }

    pub fn pch_active(&mut self) -> bool {
        self.reap();
        self.pch.is_some() || !self.pch_queue.is_empty()
    }

    pub fn pch_queue_len(&self) -> usize {
        self.pch_queue.len()
    }

    /// Start the sweep scanner. Refused while any PCH work is pending;
    /// both scanners retune the same radio.
    pub fn start_sweep(&mut self) -> Result<()> {
        if self.sweep_active() {
            bail!("sweep scan is already running");
        }
        if self.pch_active() {
            bail!("PCH scans are pending; the radio is busy");
        }

        let command = self.config.scan_command.clone();
        let events = self.events.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let poll = self.poll_interval();

        let handle = std::thread::spawn(move || {
            let run = || -> Result<()> {
                let source = ProcessLineSource::spawn(&command)?;
                sweep::run_sweep(Box::new(source), events.clone(), stop_flag, poll);
                Ok(())
            };
            if let Err(err) = run() {
                error!("sweep worker failed: {err:#}");
                let _ = events.blocking_send(ScanEvent::WorkerFailed {
                    worker: "sweep".to_string(),
                    error: format!("{err:#}"),
                });
            }
        });
        self.sweep = Some(Worker { stop, handle });
        info!("sweep scan started");
        Ok(())
    }

    pub fn stop_sweep(&mut self) {
        if let Some(worker) = self.sweep.take() {
            worker.stop_and_join();
            info!("sweep scan stopped");
        }
    }

    /// Queue a paging-channel scan for one ARFCN. Scans run strictly one
    /// at a time in arrival order.
    pub fn enqueue_pch(&mut self, arfcn: u16) -> Result<()> {
        if self.sweep_active() {
            bail!("sweep scan is running; stop it before scanning the paging channel");
        }
        self.pch_queue.push_back(arfcn);
        self.reap();
        if self.pch.is_none() {
            self.start_next_pch();
        }
        Ok(())
    }

    /// Advance the queue after a `PchDone` or PCH `WorkerFailed` event.
    ///
    /// The worker posts its event before the thread exits, so the handle
    /// may still look alive here; it is joined unconditionally instead of
    /// waiting for `reap`, which would strand the rest of the queue.
    pub fn on_pch_done(&mut self) {
        if let Some(worker) = self.pch.take() {
            let _ = worker.handle.join();
        }
        self.start_next_pch();
    }

    fn start_next_pch(&mut self) {
        let Some(arfcn) = self.pch_queue.pop_front() else {
            return;
        };

        let mut command = self.config.pch_command.clone();
        command.push("-a".to_string());
        command.push(arfcn.to_string());

        let params = PchParams {
            warmup: Duration::from_secs(self.config.warmup_secs),
            timeout: Duration::from_secs(self.config.pch_timeout_secs),
            poll_interval: self.poll_interval(),
            retries: self.config.pch_retries,
        };
        let events = self.events.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::spawn(move || {
            let spawner = move || -> Result<Box<dyn LineSource>> {
                Ok(Box::new(ProcessLineSource::spawn(&command)?) as Box<dyn LineSource>)
            };
            match pch::run_pch_scan(arfcn, &spawner, params, &stop_flag) {
                Ok(Some(outcome)) => {
                    let _ = events.blocking_send(ScanEvent::PchDone { arfcn, outcome });
                }
                Ok(None) => {}
                Err(err) => {
                    error!("PCH worker for ARFCN {arfcn} failed: {err:#}");
                    let _ = events.blocking_send(ScanEvent::WorkerFailed {
                        worker: format!("pch {arfcn}"),
                        error: format!("{err:#}"),
                    });
                }
            }
        });
        self.pch = Some(Worker { stop, handle });
    }

    /// Start the firmware loader; it stays up until shutdown.
    pub fn start_firmware(&mut self) -> Result<()> {
        self.reap();
        if self.firmware.is_some() {
            bail!("firmware loader is already running");
        }

        let command = self.config.firmware_command.clone();
        let sentinel = self.config.firmware_sentinel.clone();
        let warmup = Duration::from_secs(self.config.warmup_secs);
        let events = self.events.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let poll = self.poll_interval();

        let handle = std::thread::spawn(move || {
            let run = || -> Result<()> {
                let source = ProcessLineSource::spawn(&command)?;
                firmware::run_firmware_loader(
                    Box::new(source),
                    &sentinel,
                    warmup,
                    events.clone(),
                    stop_flag,
                    poll,
                )
            };
            if let Err(err) = run() {
                error!("firmware loader failed: {err:#}");
                let _ = events.blocking_send(ScanEvent::WorkerFailed {
                    worker: "firmware".to_string(),
                    error: format!("{err:#}"),
                });
            }
        });
        self.firmware = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stop every worker and drop queued PCH requests.
    pub fn shutdown(&mut self) {
        self.pch_queue.clear();
        for worker in [self.sweep.take(), self.pch.take(), self.firmware.take()]
            .into_iter()
            .flatten()
        {
            worker.stop_and_join();
        }
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_with_pch_timeout(
        pch_timeout_secs: u64,
    ) -> (ScanController, tokio::sync::mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let config = ScannerConfig {
            scan_command: vec!["sleep".to_string(), "5".to_string()],
            pch_command: vec!["sleep".to_string(), "5".to_string()],
            firmware_command: vec!["sleep".to_string(), "5".to_string()],
            warmup_secs: 0,
            pch_timeout_secs,
            pch_retries: 0,
            poll_interval_ms: 10,
            ..ScannerConfig::default()
        };
        (ScanController::new(config, tx), rx)
    }

    fn controller() -> (ScanController, tokio::sync::mpsc::Receiver<ScanEvent>) {
        controller_with_pch_timeout(5)
    }

    fn recv_within(
        rx: &mut tokio::sync::mpsc::Receiver<ScanEvent>,
        deadline: Duration,
    ) -> Option<ScanEvent> {
        let until = std::time::Instant::now() + deadline;
        loop {
            if let Ok(event) = rx.try_recv() {
                return Some(event);
            }
            if std::time::Instant::now() >= until {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn sweep_and_pch_exclude_each_other() {
        let (mut ctl, _rx) = controller();
        ctl.start_sweep().unwrap();
        assert!(ctl.enqueue_pch(17).is_err());

        ctl.stop_sweep();
        ctl.enqueue_pch(17).unwrap();
        assert!(ctl.start_sweep().is_err());
        ctl.shutdown();
    }

    #[test]
    fn pch_requests_queue_behind_the_running_scan() {
        let (mut ctl, _rx) = controller();
        ctl.enqueue_pch(17).unwrap();
        ctl.enqueue_pch(23).unwrap();
        ctl.enqueue_pch(42).unwrap();

        // One running, two waiting.
        assert_eq!(ctl.pch_queue_len(), 2);
        assert!(ctl.pch_active());
        ctl.shutdown();
        assert_eq!(ctl.pch_queue_len(), 0);
    }

    #[test]
    fn queue_advances_even_while_the_finished_worker_is_winding_down() {
        // A zero timeout completes each scan as soon as polling starts,
        // so PchDone arrives while the worker thread may still be alive.
        let (mut ctl, mut rx) = controller_with_pch_timeout(0);
        ctl.enqueue_pch(17).unwrap();
        ctl.enqueue_pch(23).unwrap();

        let first = recv_within(&mut rx, Duration::from_secs(5)).unwrap();
        assert!(matches!(first, ScanEvent::PchDone { arfcn: 17, .. }));

        // Handling the event immediately must hand the radio to ARFCN 23.
        ctl.on_pch_done();
        let second = recv_within(&mut rx, Duration::from_secs(5)).unwrap();
        assert!(matches!(second, ScanEvent::PchDone { arfcn: 23, .. }));

        ctl.on_pch_done();
        assert!(!ctl.pch_active());
        ctl.shutdown();
    }

    #[test]
    fn double_sweep_start_is_refused() {
        let (mut ctl, _rx) = controller();
        ctl.start_sweep().unwrap();
        assert!(ctl.start_sweep().is_err());
        ctl.shutdown();
    }
}
