//! Rules backed by external data: remote lookup results, the area
//! database, and paging-channel scans.

use super::{find, Rule, RuleContext};
use crate::models::{LookupStatus, RuleVerdict, Station, StationIdentity};

/// Derives a verdict from the station's remote-lookup status.
pub struct CellIdDatabaseRule {
    active: bool,
}

impl CellIdDatabaseRule {
    pub fn new() -> Self {
        Self { active: false }
    }
}

impl Rule for CellIdDatabaseRule {
    fn id(&self) -> &'static str {
        "CellID Database"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn check(
        &mut self,
        identity: &StationIdentity,
        snapshot: &[Station],
        _ctx: &RuleContext,
    ) -> RuleVerdict {
        let Some(station) = find(identity, snapshot) else {
            return RuleVerdict::Ignore;
        };
        match station.lookup_status {
            LookupStatus::NotLookedUp => RuleVerdict::Ignore,
            LookupStatus::Confirmed => RuleVerdict::Ok,
            _ => RuleVerdict::Critical,
        }
    }
}

/// Checks the current RX level against the historical range recorded in
/// the area database, widened by the configured tolerance.
pub struct LocationAreaDatabaseRule {
    active: bool,
}

impl LocationAreaDatabaseRule {
    pub fn new() -> Self {
        Self { active: false }
    }
}

impl Rule for LocationAreaDatabaseRule {
    fn id(&self) -> &'static str {
        "Location Area Database"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn check(
        &mut self,
        identity: &StationIdentity,
        snapshot: &[Station],
        ctx: &RuleContext,
    ) -> RuleVerdict {
        let Some(cache) = ctx.cache else {
            return RuleVerdict::Ignore;
        };
        let Some(station) = find(identity, snapshot) else {
            return RuleVerdict::Ignore;
        };
        let Some(entry) = cache.get(station.cell_id) else {
            return RuleVerdict::Ignore;
        };

        let tolerance = ctx.config.cache_rx_tolerance;
        let low = entry.rx_min as f64 - tolerance * (entry.rx_min as f64).abs();
        let high = entry.rx_max as f64 + tolerance * (entry.rx_max as f64).abs();
        let rx = station.rxlev as f64;

        if rx >= low && rx <= high {
            RuleVerdict::Ok
        } else {
            RuleVerdict::Critical
        }
    }
}

/// Interprets the paging-channel counters of a completed PCH scan.
///
/// Non-hopping immediate assignments are the strongest catcher signature:
/// real networks in this band assign hopping channels. A silent paging
/// channel is suspicious too.
pub struct PchRule {
    active: bool,
}

impl PchRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for PchRule {
    fn id(&self) -> &'static str {
        "PCH Scan"
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn check(
        &mut self,
        identity: &StationIdentity,
        snapshot: &[Station],
        ctx: &RuleContext,
    ) -> RuleVerdict {
        let Some(station) = find(identity, snapshot) else {
            return RuleVerdict::Ignore;
        };
        if !station.pch_scan_done {
            return RuleVerdict::Ignore;
        }
        if station.assignments_non_hopping > 0 {
            return RuleVerdict::Critical;
        }
        if station.pagings >= ctx.config.min_pagings
            && station.assignments_hopping >= ctx.config.min_assignments
        {
            RuleVerdict::Ok
        } else {
            RuleVerdict::Critical
        }
    }
}
