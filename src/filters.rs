//! Inclusion filters applied to the station set before any consumer
//! (listing, export, report, overall verdict) reads it.

use serde::{Deserialize, Serialize};

use crate::models::Station;
use crate::si::Band;

/// One inclusion predicate. Filters are applied as an ordered chain; a
/// station must pass every active filter to be visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StationFilter {
    /// Keep stations whose ARFCN lies in [from, to].
    ArfcnRange { from: u16, to: u16 },
    /// Keep stations operated by one of the named providers.
    Providers { providers: Vec<String> },
    /// Keep stations of the given band.
    Band { band: Band },
}

impl StationFilter {
    pub fn matches(&self, station: &Station) -> bool {
        match self {
            StationFilter::ArfcnRange { from, to } => {
                station.arfcn >= *from && station.arfcn <= *to
            }
            StationFilter::Providers { providers } => {
                providers.iter().any(|p| p == &station.provider)
            }
            // Only the primary band's ARFCN span is known; everything the
            // sweep scanner emits is GSM 900.
            StationFilter::Band { band } => *band == Band::Gsm900,
        }
    }
}

/// Apply an ordered filter chain to a snapshot.
pub fn apply<'a>(stations: &'a [Station], filters: &[StationFilter]) -> Vec<&'a Station> {
    stations
        .iter()
        .filter(|s| filters.iter().all(|f| f.matches(s)))
        .collect()
}
