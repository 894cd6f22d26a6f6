//! CSV export and the per-station text report.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::models::Station;

const CSV_COLUMNS: [&str; 13] = [
    "Country",
    "Provider",
    "ARFCN",
    "rxlev",
    "BSIC",
    "LAC",
    "Cell ID",
    "Evaluation",
    "Latitude",
    "Longitude",
    "DB Status",
    "DB Provider",
    "Neighbours",
];

/// Render the station set as CSV with the configured delimiter.
///
/// The BSIC itself contains a comma (`ncc,bcc`), so it is exported with
/// `/` instead to keep rows parseable with naive splitting.
pub fn render_csv(stations: &[&Station], delimiter: &str) -> String {
    let mut out = CSV_COLUMNS.join(delimiter);
    out.push('\n');
    for station in stations {
        let neighbours = station
            .neighbours
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let row = [
            station.country.clone(),
            station.provider.clone(),
            station.arfcn.to_string(),
            station.rxlev.to_string(),
            station.bsic.replace(',', "/"),
            station.lac.to_string(),
            station.cell_id.to_string(),
            station.evaluation.to_string(),
            station.latitude.to_string(),
            station.longitude.to_string(),
            station.lookup_status.to_string(),
            station.lookup_provider.to_string(),
            neighbours,
        ];
        out.push_str(&row.join(delimiter));
        out.push('\n');
    }
    out
}

pub fn write_csv(path: &Path, stations: &[&Station], delimiter: &str) -> Result<()> {
    std::fs::write(path, render_csv(stations, delimiter))
        .with_context(|| format!("writing CSV export to {}", path.display()))
}

/// Multi-line report for one station, shown by `btsmon show`.
pub fn station_report(station: &Station) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Station {} (BSIC {})", station.arfcn, station.bsic);
    let _ = writeln!(
        out,
        "  {} / {}  cell {}  LAC {}  rx {} dBm  seen {}x",
        station.country,
        station.provider,
        station.cell_id,
        station.lac,
        station.rxlev,
        station.sightings
    );
    if !station.neighbours.is_empty() {
        let list = station
            .neighbours
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(out, "  neighbours: {list}");
    }
    if station.pch_scan_done {
        let _ = writeln!(
            out,
            "  paging channel: {} pagings, {} hopping / {} non-hopping assignments",
            station.pagings, station.assignments_hopping, station.assignments_non_hopping
        );
    }
    let _ = writeln!(
        out,
        "  location: {} via {} ({:.5}, {:.5})",
        station.lookup_status, station.lookup_provider, station.latitude, station.longitude
    );
    if !station.rule_results.is_empty() {
        let _ = writeln!(out, "  rules:");
        for (rule, verdict) in &station.rule_results {
            let _ = writeln!(out, "    {rule}: {verdict}");
        }
    }
    let _ = writeln!(
        out,
        "  verdict: {} ({}): {}",
        station.evaluation, station.evaluated_by, station.explanation
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LookupProvider, LookupResult, LookupStatus, RuleVerdict};

    fn station() -> Station {
        let mut s = Station::new(42, "32,1".into());
        s.country = "Germany".into();
        s.provider = "T-Mobile".into();
        s.cell_id = 51213;
        s.lac = 21013;
        s.rxlev = -74;
        s.neighbours = vec![17, 19, 24];
        s.evaluation = RuleVerdict::Ok;
        s.evaluated_by = "conservative".into();
        s.explanation = "all rules passed".into();
        s
    }

    #[test]
    fn csv_header_and_bsic_escaping() {
        let s = station();
        let csv = render_csv(&[&s], ", ");
        let mut lines = csv.lines();

        assert_eq!(
            lines.next().unwrap(),
            "Country, Provider, ARFCN, rxlev, BSIC, LAC, Cell ID, Evaluation, \
             Latitude, Longitude, DB Status, DB Provider, Neighbours"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("32/1"));
        assert!(row.contains("17 19 24"));
        assert!(!row.contains("32,1"));
    }

    #[test]
    fn csv_respects_configured_delimiter() {
        let s = station();
        let csv = render_csv(&[&s], ";");
        assert!(csv.starts_with("Country;Provider;ARFCN"));
        assert!(csv.contains("Germany;T-Mobile;42"));
    }

    #[test]
    fn report_lists_rule_verdicts_and_final_evaluation() {
        let mut s = station();
        s.rule_results
            .insert("Provider Check".into(), RuleVerdict::Ok);
        s.rule_results
            .insert("LAC Change".into(), RuleVerdict::Critical);
        s.apply_lookup(&LookupResult {
            status: LookupStatus::Confirmed,
            provider: LookupProvider::Google,
            latitude: 50.77643,
            longitude: 6.08342,
        });

        let report = station_report(&s);
        assert!(report.contains("LAC Change: Critical"));
        assert!(report.contains("Provider Check: Ok"));
        assert!(report.contains("Confirmed via Google"));
        assert!(report.contains("verdict: Ok (conservative)"));
    }
}
