//! Rules checking a station against the configured provider tables.

use super::{find, Rule, RuleContext};
use crate::models::{RuleVerdict, Station, StationIdentity};

/// Critical unless the provider is on the configured allow-list.
pub struct ProviderRule {
    active: bool,
}

impl ProviderRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for ProviderRule {
    fn id(&self) -> &'static str {
        "Provider Check"
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
        if ctx
            .config
            .provider_whitelist
            .iter()
            .any(|p| p == &station.provider)
        {
            RuleVerdict::Ok
        } else {
            RuleVerdict::Critical
        }
    }
}

/// Critical when the observed country differs from the provider's home
/// country, or the provider has no configured home country at all.
pub struct CountryMappingRule {
    active: bool,
}

impl CountryMappingRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for CountryMappingRule {
    fn id(&self) -> &'static str {
        "Country Provider Mapping"
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
        match ctx.config.provider_country.get(&station.provider) {
            Some(home) if home == &station.country => RuleVerdict::Ok,
            _ => RuleVerdict::Critical,
        }
    }
}

/// Critical unless the ARFCN falls inside a configured range for the
/// provider.
pub struct ArfcnMappingRule {
    active: bool,
}

impl ArfcnMappingRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for ArfcnMappingRule {
    fn id(&self) -> &'static str {
        "ARFCN Mapping"
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
        match ctx.config.arfcn_mapping.get(&station.provider) {
            Some(ranges)
                if ranges
                    .iter()
                    .any(|&(low, high)| station.arfcn >= low && station.arfcn <= high) =>
            {
                RuleVerdict::Ok
            }
            _ => RuleVerdict::Critical,
        }
    }
}

/// Critical unless the LAC falls inside a configured range for the provider.
pub struct LacMappingRule {
    active: bool,
}

impl LacMappingRule {
    pub fn new() -> Self {
        Self { active: true }
    }
}

impl Rule for LacMappingRule {
    fn id(&self) -> &'static str {
        "LAC Mapping"
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
        match ctx.config.lac_mapping.get(&station.provider) {
            Some(ranges)
                if ranges
                    .iter()
                    .any(|&(low, high)| station.lac >= low && station.lac <= high) =>
            {
                RuleVerdict::Ok
            }
            _ => RuleVerdict::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::rules::testutil::station;

    fn ctx(config: &RulesConfig) -> RuleContext<'_> {
        RuleContext {
            config,
            cache: None,
        }
    }

    #[test]
    fn unknown_provider_is_always_critical() {
        let config = RulesConfig::default();
        let mut rule = ProviderRule::new();
        let s = station(42, "NotANetwork", 1, 21013);
        let id = s.identity();
        let snapshot = vec![s];

        // Repeated checks stay critical no matter what else is in the set.
        for _ in 0..3 {
            assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Critical);
        }
    }

    #[test]
    fn whitelisted_provider_is_ok() {
        let config = RulesConfig::default();
        let mut rule = ProviderRule::new();
        let s = station(42, "T-Mobile", 1, 21013);
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn country_mismatch_is_critical() {
        let config = RulesConfig::default();
        let mut rule = CountryMappingRule::new();

        let mut s = station(42, "T-Mobile", 1, 21013);
        s.country = "Austria".into();
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Critical);

        let s = station(42, "T-Mobile", 1, 21013);
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn unmapped_provider_country_is_critical() {
        let config = RulesConfig::default();
        let mut rule = CountryMappingRule::new();
        let s = station(42, "NotANetwork", 1, 21013);
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Critical);
    }

    #[test]
    fn arfcn_range_bounds_are_inclusive() {
        let mut config = RulesConfig::default();
        config
            .arfcn_mapping
            .insert("T-Mobile".into(), vec![(10, 20), (50, 60)]);
        let mut rule = ArfcnMappingRule::new();

        for (arfcn, expected) in [
            (10, RuleVerdict::Ok),
            (20, RuleVerdict::Ok),
            (55, RuleVerdict::Ok),
            (9, RuleVerdict::Critical),
            (21, RuleVerdict::Critical),
        ] {
            let s = station(arfcn, "T-Mobile", 1, 21013);
            let id = s.identity();
            assert_eq!(rule.check(&id, &[s], &ctx(&config)), expected, "arfcn {arfcn}");
        }
    }

    #[test]
    fn lac_outside_all_ranges_is_critical() {
        let config = RulesConfig::default();
        let mut rule = LacMappingRule::new();

        let s = station(42, "T-Mobile", 1, 23000);
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Critical);

        let s = station(42, "T-Mobile", 1, 21500);
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Ok);
    }
}
