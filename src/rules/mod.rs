//! Heuristic checks run against every station on each evaluation pass.
//!
//! Each rule inspects one station in the context of the full station
//! snapshot and yields a [`RuleVerdict`]. Rules that need continuity across
//! passes (the delta rules) keep per-identity memos and must stay stable
//! when replayed without new data. A rule that cannot decide returns
//! `Ignore`; no rule failure ever aborts the pass.

mod db;
mod delta;
mod mapping;
mod topology;

pub use db::{CellIdDatabaseRule, LocationAreaDatabaseRule, PchRule};
pub use delta::{LacChangeRule, RxChangeRule};
pub use mapping::{ArfcnMappingRule, CountryMappingRule, LacMappingRule, ProviderRule};
pub use topology::{
    DiscoveredNeighboursRule, LacMedianRule, NeighbourhoodStructureRule, PureNeighbourhoodRule,
    UniqueCellIdRule,
};

use crate::cache::LocationCache;
use crate::config::RulesConfig;
use crate::models::{RuleVerdict, Station, StationIdentity};

/// Read-only inputs shared by all rules during one pass.
pub struct RuleContext<'a> {
    pub config: &'a RulesConfig,
    pub cache: Option<&'a LocationCache>,
}

pub trait Rule: Send {
    /// Stable identifier, used as the verdict-map key and in group config.
    fn id(&self) -> &'static str;

    fn is_active(&self) -> bool;

    fn set_active(&mut self, active: bool);

    fn check(
        &mut self,
        identity: &StationIdentity,
        snapshot: &[Station],
        ctx: &RuleContext,
    ) -> RuleVerdict;
}

/// Locate the checked station inside the snapshot.
pub(crate) fn find<'a>(identity: &StationIdentity, snapshot: &'a [Station]) -> Option<&'a Station> {
    snapshot
        .iter()
        .find(|s| s.arfcn == identity.arfcn && s.bsic == identity.bsic)
}

/// Build the full ordered rule set, applying per-rule active flags from
/// configuration on top of the built-in defaults.
pub fn default_rules(config: &RulesConfig) -> Vec<Box<dyn Rule>> {
    let mut rules: Vec<Box<dyn Rule>> = vec![
        Box::new(ProviderRule::new()),
        Box::new(CountryMappingRule::new()),
        Box::new(ArfcnMappingRule::new()),
        Box::new(LacMappingRule::new()),
        Box::new(UniqueCellIdRule::new()),
        Box::new(LacMedianRule::new()),
        Box::new(LacChangeRule::new()),
        Box::new(RxChangeRule::new()),
        Box::new(NeighbourhoodStructureRule::new()),
        Box::new(PureNeighbourhoodRule::new()),
        Box::new(DiscoveredNeighboursRule::new()),
        Box::new(CellIdDatabaseRule::new()),
        Box::new(LocationAreaDatabaseRule::new()),
        Box::new(PchRule::new()),
    ];

    for rule in &mut rules {
        if let Some(&active) = config.active.get(rule.id()) {
            rule.set_active(active);
        }
    }
    rules
}
