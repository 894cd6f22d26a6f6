//! Sweep-scan protocol decoding.
//!
//! The sweep scanner prints one block per discovered cell: a start marker,
//! fixed-order `Key: value` lines, the raw neighbor-bitmap octets, the SI
//! captures, and an end marker. Blocks that never complete or miss the
//! marker are dropped; a bad field inside a block only leaves that field
//! at its default.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

use super::line_source::LineSource;
use super::ScanEvent;
use crate::models::Station;
use crate::si::{decode_neighbours, Band};

pub const BLOCK_START: &str = "[cell]";
pub const BLOCK_END: &str = "[end]";

/// Incremental decoder for the sweep line protocol.
#[derive(Default)]
pub struct BlockParser {
    collecting: bool,
    lines: Vec<String>,
}

impl BlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; yields a station when a block closes cleanly.
    pub fn push_line(&mut self, line: &str) -> Option<Station> {
        let line = line.trim_end();
        if line == BLOCK_START {
            if self.collecting {
                debug!("Unterminated block dropped ({} lines)", self.lines.len());
            }
            self.collecting = true;
            self.lines.clear();
            return None;
        }
        if !self.collecting {
            return None;
        }
        if line == BLOCK_END {
            self.collecting = false;
            let block = std::mem::take(&mut self.lines);
            return parse_block(&block);
        }
        self.lines.push(line.to_string());
        None
    }
}

fn field<'a>(lines: &'a [String], index: usize, key: &str) -> Option<&'a str> {
    lines
        .get(index)
        .and_then(|l| l.strip_prefix(key))
        .map(str::trim)
}

/// Decode one complete block into a station. Short blocks yield `None`.
pub fn parse_block(lines: &[String]) -> Option<Station> {
    // Country, Provider, ARFCN, Cell ID, LAC, BSIC, rxlev, bitmap,
    // SI1, SI3, SI4, SI2, SI2ter, SI2bis.
    if lines.len() < 14 {
        return None;
    }

    let arfcn = field(lines, 2, "ARFCN:")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let bsic = field(lines, 5, "BSIC:").unwrap_or("").to_string();

    let mut station = Station::new(arfcn, bsic);
    station.last_seen = Utc::now();
    station.first_seen = station.last_seen;

    if let Some(country) = field(lines, 0, "Country:") {
        station.country = country.to_string();
    }
    if let Some(provider) = field(lines, 1, "Provider:") {
        station.provider = provider.to_string();
    }
    if let Some(cell_id) = field(lines, 3, "Cell ID:").and_then(|v| v.parse().ok()) {
        station.cell_id = cell_id;
    }
    if let Some(lac) = field(lines, 4, "LAC:").and_then(|v| v.parse().ok()) {
        station.lac = lac;
    }
    if let Some(rxlev) = field(lines, 6, "rxlev:").and_then(|v| v.parse().ok()) {
        station.rxlev = rxlev;
    }

    station.si.neighbour_bitmap = lines[7].clone();
    station.neighbours = decode_neighbours(&station.si.neighbour_bitmap, Band::Gsm900);

    if let Some(si1) = field(lines, 8, "SI1:") {
        station.si.si1 = si1.to_string();
    }
    if let Some(si3) = field(lines, 9, "SI3:") {
        station.si.si3 = si3.to_string();
    }
    if let Some(si4) = field(lines, 10, "SI4:") {
        station.si.si4 = si4.to_string();
    }
    if let Some(si2) = field(lines, 11, "SI2:") {
        station.si.si2 = si2.to_string();
    }
    if let Some(si2ter) = field(lines, 12, "SI2ter:") {
        station.si.si2ter = si2ter.to_string();
    }
    if let Some(si2bis) = field(lines, 13, "SI2bis:") {
        station.si.si2bis = si2bis.to_string();
    }

    Some(station)
}

/// Sweep worker loop: decode blocks off the line source and push stations
/// into the event channel until stopped.
pub fn run_sweep(
    mut source: Box<dyn LineSource>,
    events: Sender<ScanEvent>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let mut parser = BlockParser::new();

    while !stop.load(Ordering::SeqCst) {
        let line = match source.poll_line(poll_interval) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!("Sweep scanner read failed: {e:#}");
                break;
            }
        };

        if let Some(station) = parser.push_line(&line) {
            if events
                .blocking_send(ScanEvent::Station(Box::new(station)))
                .is_err()
            {
                break;
            }
        }
    }

    source.kill();
    debug!("Sweep worker stopped");
}
