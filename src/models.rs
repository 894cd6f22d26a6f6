use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::si::SystemInfo;

/// Outcome of a single heuristic check against one station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleVerdict {
    Ok,
    Warning,
    Critical,
    /// Insufficient data; excluded from aggregation. Never a pass.
    Ignore,
}

impl RuleVerdict {
    /// Severity rank for worst-of reductions. `Ignore` has no rank.
    pub fn severity(self) -> Option<u8> {
        match self {
            RuleVerdict::Ok => Some(0),
            RuleVerdict::Warning => Some(1),
            RuleVerdict::Critical => Some(2),
            RuleVerdict::Ignore => None,
        }
    }
}

impl fmt::Display for RuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleVerdict::Ok => write!(f, "Ok"),
            RuleVerdict::Warning => write!(f, "Warning"),
            RuleVerdict::Critical => write!(f, "Critical"),
            RuleVerdict::Ignore => write!(f, "Ignore"),
        }
    }
}

/// Where a geolocation result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LookupProvider {
    #[default]
    None,
    Google,
    OpenCellId,
    Local,
}

impl fmt::Display for LookupProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupProvider::None => write!(f, "None"),
            LookupProvider::Google => write!(f, "Google"),
            LookupProvider::OpenCellId => write!(f, "Open Cell ID"),
            LookupProvider::Local => write!(f, "Local"),
        }
    }
}

/// Status of the remote cell-id lookup for a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LookupStatus {
    Confirmed,
    Approximated,
    Error,
    #[default]
    NotLookedUp,
    NotInDb,
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStatus::Confirmed => write!(f, "Confirmed"),
            LookupStatus::Approximated => write!(f, "Approximated"),
            LookupStatus::Error => write!(f, "Error"),
            LookupStatus::NotLookedUp => write!(f, "Not looked up"),
            LookupStatus::NotInDb => write!(f, "Not in DB"),
        }
    }
}

/// Result of one remote lookup pass for a station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupResult {
    pub status: LookupStatus,
    pub provider: LookupProvider,
    pub latitude: f64,
    pub longitude: f64,
}

impl LookupResult {
    pub fn not_in_db(provider: LookupProvider) -> Self {
        Self {
            status: LookupStatus::NotInDb,
            provider,
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

/// Counters gathered by one paging-channel scan of an ARFCN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PchStats {
    pub pagings: u32,
    pub assignments_hopping: u32,
    pub assignments_non_hopping: u32,
    /// Distinct mobile-identity tokens seen in pagings. Diagnostic only.
    pub distinct_identities: u32,
}

/// Key under which repeated sightings of a cell are merged.
///
/// ARFCN alone is ambiguous for co-channel cells; the BSIC disambiguates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationIdentity {
    pub arfcn: u16,
    pub bsic: String,
}

impl fmt::Display for StationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.arfcn, self.bsic)
    }
}

/// One observed GSM cell, merged across sightings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub country: String,
    pub provider: String,
    pub arfcn: u16,
    pub cell_id: u32,
    pub lac: u32,
    pub bsic: String,
    pub rxlev: i32,

    /// Raw system-information captures as emitted by the scanner.
    pub si: SystemInfo,
    /// Neighbor ARFCNs decoded from the SI bitmap. Pure function of `si`.
    pub neighbours: Vec<u16>,

    pub sightings: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,

    pub pagings: u32,
    pub assignments_hopping: u32,
    pub assignments_non_hopping: u32,
    pub pch_scan_done: bool,

    pub latitude: f64,
    pub longitude: f64,
    pub lookup_status: LookupStatus,
    pub lookup_provider: LookupProvider,

    /// Per-rule verdicts from the most recent evaluation pass.
    pub rule_results: BTreeMap<String, RuleVerdict>,
    pub evaluation: RuleVerdict,
    pub explanation: String,
    pub evaluated_by: String,
}

impl Station {
    pub fn new(arfcn: u16, bsic: String) -> Self {
        let now = Utc::now();
        Self {
            country: String::new(),
            provider: String::new(),
            arfcn,
            cell_id: 0,
            lac: 0,
            bsic,
            rxlev: 0,
            si: SystemInfo::default(),
            neighbours: Vec::new(),
            sightings: 1,
            first_seen: now,
            last_seen: now,
            pagings: 0,
            assignments_hopping: 0,
            assignments_non_hopping: 0,
            pch_scan_done: false,
            latitude: 0.0,
            longitude: 0.0,
            lookup_status: LookupStatus::NotLookedUp,
            lookup_provider: LookupProvider::None,
            rule_results: BTreeMap::new(),
            evaluation: RuleVerdict::Ignore,
            explanation: String::new(),
            evaluated_by: String::new(),
        }
    }

    pub fn identity(&self) -> StationIdentity {
        StationIdentity {
            arfcn: self.arfcn,
            bsic: self.bsic.clone(),
        }
    }

    /// Merge a fresh sighting of the same cell into this record.
    ///
    /// Volatile broadcast fields are replaced; counters and lookup results
    /// accumulated through other paths are kept.
    pub fn merge_sighting(&mut self, other: &Station) {
        self.country = other.country.clone();
        self.provider = other.provider.clone();
        self.cell_id = other.cell_id;
        self.lac = other.lac;
        self.rxlev = other.rxlev;
        self.si = other.si.clone();
        self.neighbours = other.neighbours.clone();
        self.sightings += 1;
        self.last_seen = other.last_seen;
    }

    pub fn apply_pch(&mut self, stats: &PchStats) {
        self.pagings = stats.pagings;
        self.assignments_hopping = stats.assignments_hopping;
        self.assignments_non_hopping = stats.assignments_non_hopping;
        self.pch_scan_done = true;
    }

    pub fn apply_lookup(&mut self, result: &LookupResult) {
        self.latitude = result.latitude;
        self.longitude = result.longitude;
        self.lookup_status = result.status;
        self.lookup_provider = result.provider;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_volatile_fields_and_counts_sightings() {
        let mut first = Station::new(42, "32,1".into());
        first.lac = 21013;
        first.rxlev = -80;

        let mut second = Station::new(42, "32,1".into());
        second.lac = 21099;
        second.rxlev = -60;
        second.provider = "T-Mobile".into();

        first.merge_sighting(&second);
        assert_eq!(first.sightings, 2);
        assert_eq!(first.lac, 21099);
        assert_eq!(first.rxlev, -60);
        assert_eq!(first.provider, "T-Mobile");
    }

    #[test]
    fn merge_keeps_pch_and_lookup_state() {
        let mut station = Station::new(13, "12,3".into());
        station.apply_pch(&PchStats {
            pagings: 9,
            assignments_hopping: 2,
            assignments_non_hopping: 0,
            distinct_identities: 4,
        });
        station.apply_lookup(&LookupResult {
            status: LookupStatus::Confirmed,
            provider: LookupProvider::Google,
            latitude: 50.77,
            longitude: 6.08,
        });

        let update = Station::new(13, "12,3".into());
        station.merge_sighting(&update);

        assert!(station.pch_scan_done);
        assert_eq!(station.pagings, 9);
        assert_eq!(station.lookup_status, LookupStatus::Confirmed);
    }

    #[test]
    fn verdict_severity_ordering() {
        assert!(RuleVerdict::Critical.severity() > RuleVerdict::Warning.severity());
        assert!(RuleVerdict::Warning.severity() > RuleVerdict::Ok.severity());
        assert_eq!(RuleVerdict::Ignore.severity(), None);
    }
}
