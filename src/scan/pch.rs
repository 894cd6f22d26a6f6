//! Paging-channel scan: a bounded state machine over one ARFCN.
//!
//! The PCH scanner locks onto the target cell and dumps paging requests
//! and immediate assignments. A cell that pages but assigns non-hopping
//! channels (or nothing at all) is behaving like a catcher. The scanner
//! sometimes fails to sync (`result=255`); it is then killed and respawned
//! until the retry budget runs out.

use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::line_source::{LineSource, SpawnLineSource};
use crate::models::PchStats;

/// Substring marking a paging request line.
const PAGING_MARKER: &str = "Paging";
/// Substring marking an immediate assignment line.
const ASSIGNMENT_MARKER: &str = "IMM";
/// Marks a hopping-channel assignment within an assignment line.
const HOP_MARKER: &str = "HOP";
/// Sync-failure signature that makes a respawn worthwhile.
const FAILURE_SENTINEL: &str = "result=255";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PchState {
    Starting,
    Polling,
    RetryPending,
    Complete,
    Failed,
}

/// Timing and budget knobs for one scan.
#[derive(Debug, Clone, Copy)]
pub struct PchParams {
    pub warmup: Duration,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub retries: u32,
}

/// Outcome of a finished (not cancelled) scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PchOutcome {
    pub stats: PchStats,
    /// True when the scanner never recovered sync; the counters are
    /// whatever was gathered before giving up.
    pub degraded: bool,
}

fn identity_token(line: &str) -> Option<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN.get_or_init(|| Regex::new(r"M\(([^)]*)\)").unwrap());
    re.captures(line).map(|c| c[1].to_string())
}

/// Wait out the subprocess warm-up while honoring the stop flag.
pub(super) fn warmup_wait(warmup: Duration, poll: Duration, stop: &AtomicBool) -> bool {
    let until = Instant::now() + warmup;
    while Instant::now() < until {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(poll.min(until.saturating_duration_since(Instant::now())));
    }
    true
}

/// Run the scan state machine to completion.
///
/// `Ok(None)` means the scan was cancelled; nothing may be emitted for it.
/// Respawns never exceed `params.retries`; the wall clock bounds the whole
/// scan including retries.
pub fn run_pch_scan(
    arfcn: u16,
    spawner: &dyn SpawnLineSource,
    params: PchParams,
    stop: &AtomicBool,
) -> Result<Option<PchOutcome>> {
    let mut stats = PchStats::default();
    let mut identities: HashSet<String> = HashSet::new();
    let mut retries_left = params.retries;
    let mut source: Option<Box<dyn LineSource>> = None;
    let mut state = PchState::Starting;
    let deadline = Instant::now() + params.timeout;

    info!("PCH scan of ARFCN {arfcn} starting (budget {} retries)", params.retries);

    loop {
        if stop.load(Ordering::SeqCst) {
            if let Some(mut s) = source.take() {
                s.kill();
            }
            debug!("PCH scan of ARFCN {arfcn} cancelled");
            return Ok(None);
        }

        match state {
            PchState::Starting => {
                source = Some(spawner.spawn()?);
                if !warmup_wait(params.warmup, params.poll_interval, stop) {
                    continue; // stop flag; handled at loop head
                }
                state = PchState::Polling;
            }
            PchState::Polling => {
                if Instant::now() >= deadline {
                    state = PchState::Complete;
                    continue;
                }
                let line = match source.as_mut() {
                    Some(s) => s.poll_line(params.poll_interval)?,
                    None => None,
                };
                let Some(line) = line else {
                    continue;
                };

                if line.contains(PAGING_MARKER) {
                    stats.pagings += 1;
                    if let Some(token) = identity_token(&line) {
                        identities.insert(token);
                    }
                } else if line.contains(ASSIGNMENT_MARKER) {
                    if line.contains(HOP_MARKER) {
                        stats.assignments_hopping += 1;
                    } else {
                        stats.assignments_non_hopping += 1;
                    }
                } else if line.contains(FAILURE_SENTINEL) {
                    if retries_left > 0 {
                        state = PchState::RetryPending;
                    } else {
                        warn!("PCH scan of ARFCN {arfcn}: sync failed, retry budget spent");
                        state = PchState::Failed;
                    }
                }
            }
            PchState::RetryPending => {
                if let Some(mut s) = source.take() {
                    s.kill();
                }
                retries_left -= 1;
                debug!("PCH scan of ARFCN {arfcn}: respawning scanner ({retries_left} retries left)");
                state = PchState::Starting;
            }
            PchState::Complete | PchState::Failed => {
                if let Some(mut s) = source.take() {
                    s.kill();
                }
                stats.distinct_identities = identities.len() as u32;
                let degraded = state == PchState::Failed;
                info!(
                    "PCH scan of ARFCN {arfcn} done: {} pagings, {} hopping / {} non-hopping assignments{}",
                    stats.pagings,
                    stats.assignments_hopping,
                    stats.assignments_non_hopping,
                    if degraded { " (degraded)" } else { "" }
                );
                return Ok(Some(PchOutcome { stats, degraded }));
            }
        }
    }
}
