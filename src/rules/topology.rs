//! Relational rules: each consults the whole station snapshot.

use super::{find, Rule, RuleContext};
use crate::models::{RuleVerdict, Station, StationIdentity};

/// Critical when another station in the set broadcasts the same cell id.
pub struct UniqueCellIdRule {
    active: bool,
}

impl UniqueCellIdRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for UniqueCellIdRule {
    fn id(&self) -> &'static str {
        "Unique CellID"
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
        let duplicated = snapshot
            .iter()
            .any(|other| other.identity() != *identity && other.cell_id == station.cell_id);
        if duplicated {
            RuleVerdict::Critical
        } else {
            RuleVerdict::Ok
        }
    }
}

/// Critical when the station's LAC deviates from the median LAC of its
/// provider by more than the configured fraction of that median.
pub struct LacMedianRule {
    active: bool,
}

impl LacMedianRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for LacMedianRule {
    fn id(&self) -> &'static str {
        "LAC Median Deviation"
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

        let mut lacs: Vec<u32> = snapshot
            .iter()
            .filter(|s| s.provider == station.provider)
            .map(|s| s.lac)
            .collect();
        if lacs.len() < 2 {
            return RuleVerdict::Ignore;
        }
        lacs.sort_unstable();

        let median = if lacs.len() % 2 == 1 {
            lacs[lacs.len() / 2] as f64
        } else {
            (lacs[lacs.len() / 2 - 1] as f64 + lacs[lacs.len() / 2] as f64) / 2.0
        };

        let band = ctx.config.lac_median_tolerance * median;
        let deviation = (station.lac as f64 - median).abs();
        if deviation > band {
            RuleVerdict::Critical
        } else {
            RuleVerdict::Ok
        }
    }
}

/// Checks that the station is embedded in a plausible neighborhood graph.
///
/// Three tiers: Critical when the decoded neighbor set is empty or no
/// declared neighbor (nor any neighbor-of-neighbor path) is visible in the
/// set; Ok only on mutual confirmation, meaning a declared neighbor is
/// present and some same-provider station lists this station in turn;
/// Warning for everything in between (indirect-only evidence, or a visible
/// neighbor without an inbound same-provider edge).
pub struct NeighbourhoodStructureRule {
    active: bool,
}

impl NeighbourhoodStructureRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for NeighbourhoodStructureRule {
    fn id(&self) -> &'static str {
        "Neighbourhood Structure"
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

        if station.neighbours.is_empty() {
            return RuleVerdict::Critical;
        }

        let others = || snapshot.iter().filter(|s| s.identity() != *identity);

        let direct = others().any(|s| station.neighbours.contains(&s.arfcn));
        let inbound = others()
            .any(|s| s.provider == station.provider && s.neighbours.contains(&station.arfcn));
        // Neighbor-of-neighbor: some visible station declares a neighbor we
        // also declare.
        let indirect =
            others().any(|s| s.neighbours.iter().any(|n| station.neighbours.contains(n)));

        if direct {
            if inbound {
                RuleVerdict::Ok
            } else {
                RuleVerdict::Warning
            }
        } else if indirect {
            RuleVerdict::Warning
        } else {
            RuleVerdict::Critical
        }
    }
}

/// Critical when a visible declared neighbor belongs to another provider.
/// Real cells only advertise their own network's frequencies.
pub struct PureNeighbourhoodRule {
    active: bool,
}

impl PureNeighbourhoodRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for PureNeighbourhoodRule {
    fn id(&self) -> &'static str {
        "Pure Neighbourhood"
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

        let impure = snapshot.iter().any(|other| {
            other.identity() != *identity
                && station.neighbours.contains(&other.arfcn)
                && other.provider != station.provider
        });
        if impure {
            RuleVerdict::Critical
        } else {
            RuleVerdict::Ok
        }
    }
}

/// Compares how many declared neighbors have actually been seen against a
/// configured threshold: values >= 1 are an absolute count, values in
/// (0, 1) a fraction of the declared set, negative disables the rule.
pub struct DiscoveredNeighboursRule {
    active: bool,
}

impl DiscoveredNeighboursRule {
    pub fn new() -> Self {
        Self { active: false }
    }
}

impl Rule for DiscoveredNeighboursRule {
    fn id(&self) -> &'static str {
        "Discovered Neighbourhoods"
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
        let threshold = ctx.config.neighbour_threshold;
        if threshold < 0.0 {
            return RuleVerdict::Ignore;
        }
        let Some(station) = find(identity, snapshot) else {
            return RuleVerdict::Ignore;
        };
        if station.neighbours.is_empty() {
            return RuleVerdict::Ignore;
        }

        let confirmed = station
            .neighbours
            .iter()
            .filter(|n| snapshot.iter().any(|s| s.arfcn == **n))
            .count() as f64;

        let required = if threshold >= 1.0 {
            threshold
        } else {
            threshold * station.neighbours.len() as f64
        };

        if confirmed >= required {
            RuleVerdict::Ok
        } else {
            RuleVerdict::Warning
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::rules::testutil::{station, with_neighbours};

    fn ctx(config: &RulesConfig) -> RuleContext<'_> {
        RuleContext {
            config,
            cache: None,
        }
    }

    #[test]
    fn duplicate_cell_id_is_critical() {
        let config = RulesConfig::default();
        let mut rule = UniqueCellIdRule::new();

        let a = station(10, "T-Mobile", 5000, 21013);
        let b = station(11, "T-Mobile", 5000, 21013);
        let id = a.identity();
        let snapshot = vec![a, b];
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Critical);
    }

    #[test]
    fn unique_cell_id_is_ok() {
        let config = RulesConfig::default();
        let mut rule = UniqueCellIdRule::new();
        let a = station(10, "T-Mobile", 5000, 21013);
        let b = station(11, "T-Mobile", 5001, 21013);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn lac_median_needs_two_samples() {
        let config = RulesConfig::default();
        let mut rule = LacMedianRule::new();
        let a = station(10, "T-Mobile", 1, 21013);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a], &ctx(&config)), RuleVerdict::Ignore);
    }

    #[test]
    fn lac_far_from_provider_median_is_critical() {
        let config = RulesConfig::default(); // tolerance 0.05
        let mut rule = LacMedianRule::new();

        let a = station(10, "T-Mobile", 1, 21013);
        let b = station(11, "T-Mobile", 2, 21020);
        let rogue = station(12, "T-Mobile", 3, 45000);
        let rogue_id = rogue.identity();
        let ok_id = a.identity();
        let snapshot = vec![a, b, rogue];

        assert_eq!(
            rule.check(&rogue_id, &snapshot, &ctx(&config)),
            RuleVerdict::Critical
        );
        assert_eq!(rule.check(&ok_id, &snapshot, &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn lac_median_ignores_other_providers() {
        let config = RulesConfig::default();
        let mut rule = LacMedianRule::new();
        let a = station(10, "T-Mobile", 1, 21013);
        let b = station(11, "O2", 2, 99999);
        let id = a.identity();
        // Only one T-Mobile sample.
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Ignore);
    }

    #[test]
    fn empty_neighbour_set_is_critical() {
        let config = RulesConfig::default();
        let mut rule = NeighbourhoodStructureRule::new();
        let a = station(10, "T-Mobile", 1, 21013);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a], &ctx(&config)), RuleVerdict::Critical);
    }

    #[test]
    fn mutual_confirmation_is_ok() {
        let config = RulesConfig::default();
        let mut rule = NeighbourhoodStructureRule::new();

        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[11]);
        let b = with_neighbours(station(11, "T-Mobile", 2, 21013), &[10]);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn visible_neighbour_without_inbound_edge_is_warning() {
        let config = RulesConfig::default();
        let mut rule = NeighbourhoodStructureRule::new();

        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[11]);
        let b = with_neighbours(station(11, "T-Mobile", 2, 21013), &[99]);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Warning);
    }

    #[test]
    fn indirect_only_relation_is_warning() {
        let config = RulesConfig::default();
        let mut rule = NeighbourhoodStructureRule::new();

        // a and b both declare 50, which is not itself visible; neither
        // declares the other.
        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[50]);
        let b = with_neighbours(station(11, "T-Mobile", 2, 21013), &[50]);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Warning);
    }

    #[test]
    fn isolated_station_with_unseen_neighbours_is_critical() {
        let config = RulesConfig::default();
        let mut rule = NeighbourhoodStructureRule::new();

        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[50, 51]);
        let b = with_neighbours(station(11, "T-Mobile", 2, 21013), &[99]);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Critical);
    }

    #[test]
    fn foreign_provider_neighbour_is_critical() {
        let config = RulesConfig::default();
        let mut rule = PureNeighbourhoodRule::new();

        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[11]);
        let b = station(11, "O2", 2, 50000);
        let id = a.identity();
        assert_eq!(rule.check(&id, &[a, b], &ctx(&config)), RuleVerdict::Critical);
    }

    #[test]
    fn discovered_neighbours_threshold_modes() {
        let mut config = RulesConfig::default();
        let mut rule = DiscoveredNeighboursRule::new();

        let a = with_neighbours(station(10, "T-Mobile", 1, 21013), &[11, 12, 13, 14]);
        let b = station(11, "T-Mobile", 2, 21013);
        let c = station(12, "T-Mobile", 3, 21013);
        let id = a.identity();
        let snapshot = vec![a, b, c];

        // Negative disables.
        config.neighbour_threshold = -1.0;
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Ignore);

        // Absolute count: 2 of 4 seen.
        config.neighbour_threshold = 2.0;
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Ok);
        config.neighbour_threshold = 3.0;
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Warning);

        // Fraction of the declared set.
        config.neighbour_threshold = 0.5;
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Ok);
        config.neighbour_threshold = 0.75;
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Warning);
    }
}
