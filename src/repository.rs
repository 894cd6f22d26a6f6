//! Canonical, deduplicated set of observed stations.
//!
//! Owned by the control thread; acquisition workers feed it through the
//! event channel, never directly. Every mutation is followed by a full
//! evaluation pass over a stable snapshot.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::cache::LocationCache;
use crate::config::RulesConfig;
use crate::eval::Evaluator;
use crate::filters::{self, StationFilter};
use crate::models::{LookupResult, PchStats, RuleVerdict, Station, StationIdentity};
use crate::rules::{Rule, RuleContext};

#[derive(Default)]
pub struct StationRepository {
    stations: BTreeMap<StationIdentity, Station>,
}

impl StationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh sighting, merging with an existing record of the
    /// same identity.
    pub fn add(&mut self, station: Station) {
        let identity = station.identity();
        match self.stations.get_mut(&identity) {
            Some(existing) => {
                existing.merge_sighting(&station);
                debug!(
                    "Merged sighting {} of {} ({})",
                    existing.sightings, identity, existing.provider
                );
            }
            None => {
                info!("New station {} ({})", identity, station.provider);
                self.stations.insert(identity, station);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, identity: &StationIdentity) -> Option<&Station> {
        self.stations.get(identity)
    }

    /// Stable copy of the station set, ordered by identity.
    pub fn snapshot(&self) -> Vec<Station> {
        self.stations.values().cloned().collect()
    }

    /// Snapshot restricted by the given filter chain.
    pub fn filtered(&self, filter_chain: &[StationFilter]) -> Vec<Station> {
        let snapshot = self.snapshot();
        filters::apply(&snapshot, filter_chain)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Apply a completed PCH scan to every station on that ARFCN.
    pub fn record_pch(&mut self, arfcn: u16, stats: &PchStats) -> usize {
        let mut updated = 0;
        for station in self.stations.values_mut() {
            if station.arfcn == arfcn {
                station.apply_pch(stats);
                updated += 1;
            }
        }
        debug!("PCH result for ARFCN {arfcn} applied to {updated} stations");
        updated
    }

    /// Store a remote-lookup outcome on one station.
    pub fn apply_lookup(&mut self, identity: &StationIdentity, result: &LookupResult) {
        if let Some(station) = self.stations.get_mut(identity) {
            station.apply_lookup(result);
        }
    }

    /// Run every active rule against every station and aggregate.
    ///
    /// The pass works on a snapshot taken up front, so rules see one
    /// consistent set even though verdicts are written back incrementally.
    /// Safe to re-run any number of times; delta rules memoize by sighting
    /// counter.
    pub fn evaluate(
        &mut self,
        rules: &mut [Box<dyn Rule>],
        evaluator: &Evaluator,
        config: &RulesConfig,
        cache: Option<&LocationCache>,
    ) {
        let snapshot = self.snapshot();
        let ctx = RuleContext { config, cache };

        for station in &snapshot {
            let identity = station.identity();
            let mut results: BTreeMap<String, RuleVerdict> = BTreeMap::new();
            for rule in rules.iter_mut() {
                if !rule.is_active() {
                    continue;
                }
                let verdict = rule.check(&identity, &snapshot, &ctx);
                results.insert(rule.id().to_string(), verdict);
            }

            let evaluation = evaluator.evaluate(&results);
            if let Some(target) = self.stations.get_mut(&identity) {
                target.rule_results = results;
                target.evaluation = evaluation.verdict;
                target.explanation = evaluation.explanation;
                target.evaluated_by = evaluator.id().to_string();
            }
        }
    }

    /// Worst final verdict across the filtered view, for the status line.
    pub fn overall_verdict(&self, filter_chain: &[StationFilter]) -> RuleVerdict {
        let mut overall = RuleVerdict::Ignore;
        for station in self.filtered(filter_chain) {
            match station.evaluation {
                RuleVerdict::Critical => return RuleVerdict::Critical,
                RuleVerdict::Warning => overall = RuleVerdict::Warning,
                RuleVerdict::Ok if overall == RuleVerdict::Ignore => {
                    overall = RuleVerdict::Ok;
                }
                _ => {}
            }
        }
        overall
    }

    /// Persist the station set as a JSON project file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stations: Vec<&Station> = self.stations.values().collect();
        let json = serde_json::to_string_pretty(&stations)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to save project: {}", path.as_ref().display()))?;
        info!(
            "Project with {} stations saved to {}",
            stations.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Replace the whole station set from a JSON project file. The caller
    /// re-evaluates afterwards.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project: {}", path.as_ref().display()))?;
        let stations: Vec<Station> = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse project: {}", path.as_ref().display()))?;

        self.stations.clear();
        for station in stations {
            self.stations.insert(station.identity(), station);
        }
        info!(
            "Project with {} stations loaded from {}",
            self.stations.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluatorConfig;
    use crate::models::PchStats;
    use crate::rules::default_rules;
    use crate::si::encode_neighbours;

    fn sighting(arfcn: u16, bsic: &str, provider: &str, cell_id: u32, lac: u32) -> Station {
        let mut s = Station::new(arfcn, bsic.into());
        s.country = "Germany".into();
        s.provider = provider.into();
        s.cell_id = cell_id;
        s.lac = lac;
        s.rxlev = -70;
        s
    }

    #[test]
    fn add_merges_by_identity() {
        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        // Same ARFCN, different BSIC: a distinct co-channel cell.
        repo.add(sighting(13, "30,7", "O2", 2, 50000));

        assert_eq!(repo.len(), 2);
        let id = StationIdentity {
            arfcn: 13,
            bsic: "32,1".into(),
        };
        assert_eq!(repo.get(&id).unwrap().sightings, 2);
    }

    #[test]
    fn record_pch_hits_every_station_on_the_arfcn() {
        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(sighting(13, "30,7", "O2", 2, 50000));
        repo.add(sighting(14, "31,2", "O2", 3, 50000));

        let stats = PchStats {
            pagings: 5,
            assignments_hopping: 1,
            assignments_non_hopping: 0,
            distinct_identities: 3,
        };
        assert_eq!(repo.record_pch(13, &stats), 2);

        let untouched = StationIdentity {
            arfcn: 14,
            bsic: "31,2".into(),
        };
        assert!(!repo.get(&untouched).unwrap().pch_scan_done);
    }

    #[test]
    fn evaluation_is_stored_on_every_station() {
        let config = RulesConfig::default();
        let mut rules = default_rules(&config);
        let evaluator =
            Evaluator::new("conservative", &EvaluatorConfig::default().groups).unwrap();

        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(sighting(20, "30,7", "Fakenet", 2, 21014));

        repo.evaluate(&mut rules, &evaluator, &config, None);

        let rogue = StationIdentity {
            arfcn: 20,
            bsic: "30,7".into(),
        };
        let station = repo.get(&rogue).unwrap();
        assert_eq!(station.evaluation, RuleVerdict::Critical);
        assert_eq!(station.evaluated_by, "Conservative");
        assert!(!station.rule_results.is_empty());
        assert_eq!(
            station.rule_results.get("Provider Check"),
            Some(&RuleVerdict::Critical)
        );
    }

    #[test]
    fn unknown_provider_stays_critical_whatever_else_happens() {
        let config = RulesConfig::default();
        let mut rules = default_rules(&config);
        let evaluator =
            Evaluator::new("conservative", &EvaluatorConfig::default().groups).unwrap();

        let mut repo = StationRepository::new();
        let mut rogue = sighting(20, "30,7", "Fakenet", 2, 21014);
        rogue.si.neighbour_bitmap = encode_neighbours(&[13]);
        rogue.neighbours = vec![13];
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(rogue);

        for _ in 0..3 {
            repo.evaluate(&mut rules, &evaluator, &config, None);
            let station = repo
                .get(&StationIdentity {
                    arfcn: 20,
                    bsic: "30,7".into(),
                })
                .unwrap();
            assert_eq!(station.evaluation, RuleVerdict::Critical);
        }
    }

    #[test]
    fn lac_change_scenario_is_idempotent_across_replays() {
        let config = RulesConfig::default();
        let mut rules = default_rules(&config);
        let evaluator =
            Evaluator::new("conservative", &EvaluatorConfig::default().groups).unwrap();

        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.evaluate(&mut rules, &evaluator, &config, None);

        let id = StationIdentity {
            arfcn: 13,
            bsic: "32,1".into(),
        };
        assert_eq!(
            repo.get(&id).unwrap().rule_results.get("LAC Change"),
            Some(&RuleVerdict::Ignore)
        );

        // Replay without new data: still the memoized Ignore.
        repo.evaluate(&mut rules, &evaluator, &config, None);
        assert_eq!(
            repo.get(&id).unwrap().rule_results.get("LAC Change"),
            Some(&RuleVerdict::Ignore)
        );

        // Second sighting with a hopped LAC advances the counter.
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21099));
        repo.evaluate(&mut rules, &evaluator, &config, None);
        assert_eq!(
            repo.get(&id).unwrap().rule_results.get("LAC Change"),
            Some(&RuleVerdict::Critical)
        );

        // And replays stay pinned to that verdict.
        repo.evaluate(&mut rules, &evaluator, &config, None);
        assert_eq!(
            repo.get(&id).unwrap().rule_results.get("LAC Change"),
            Some(&RuleVerdict::Critical)
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join("btsmon-project-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stations.json");

        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(sighting(20, "30,7", "O2", 2, 50000));
        repo.save(&path).unwrap();

        let mut loaded = StationRepository::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let id = StationIdentity {
            arfcn: 13,
            bsic: "32,1".into(),
        };
        assert_eq!(loaded.get(&id).unwrap().provider, "T-Mobile");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn overall_verdict_is_worst_of_filtered_view() {
        let mut config = RulesConfig::default();
        // No neighbourhood data in this fixture.
        config
            .active
            .insert("Neighbourhood Structure".to_string(), false);
        let mut rules = default_rules(&config);
        let evaluator =
            Evaluator::new("conservative", &EvaluatorConfig::default().groups).unwrap();

        let mut repo = StationRepository::new();
        repo.add(sighting(13, "32,1", "T-Mobile", 1, 21013));
        repo.add(sighting(900, "30,7", "Fakenet", 2, 50000));
        repo.evaluate(&mut rules, &evaluator, &config, None);

        assert_eq!(repo.overall_verdict(&[]), RuleVerdict::Critical);

        // Filter the rogue out and the picture clears.
        let filters = vec![StationFilter::ArfcnRange { from: 0, to: 100 }];
        assert_ne!(repo.overall_verdict(&filters), RuleVerdict::Critical);
    }
}
