//! Delta rules: compare a station against its own previous sighting.
//!
//! Evaluation passes replay on every repository mutation, so these rules
//! memoize per identity: a pass that brings no new sighting for a station
//! must return the verdict of the last pass that did, not re-derive one.

use std::collections::HashMap;

use super::{find, Rule, RuleContext};
use crate::models::{RuleVerdict, Station, StationIdentity};

struct Memo<T> {
    last_value: T,
    at_sightings: u64,
    verdict: RuleVerdict,
}

/// Critical when a cell changes its location area code between sightings.
/// A legitimate cell keeps its LAC; catchers often get it wrong.
pub struct LacChangeRule {
    active: bool,
    memos: HashMap<StationIdentity, Memo<u32>>,
}

impl LacChangeRule {
    pub fn new() -> Self {
        Self {
            active: true,
            memos: HashMap::new(),
        }
    }
}

impl Rule for LacChangeRule {
    fn id(&self) -> &'static str {
        "LAC Change"
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

        match self.memos.get_mut(identity) {
            None => {
                self.memos.insert(
                    identity.clone(),
                    Memo {
                        last_value: station.lac,
                        at_sightings: station.sightings,
                        verdict: RuleVerdict::Ignore,
                    },
                );
                RuleVerdict::Ignore
            }
            Some(memo) if station.sightings == memo.at_sightings => memo.verdict,
            Some(memo) => {
                let verdict = if station.lac == memo.last_value {
                    RuleVerdict::Ok
                } else {
                    RuleVerdict::Critical
                };
                memo.last_value = station.lac;
                memo.at_sightings = station.sightings;
                memo.verdict = verdict;
                verdict
            }
        }
    }
}

/// Warning when the RX level jumps outside a tolerance band around the
/// previous sighting's level. A catcher close by tends to be much louder
/// than the cell it impersonates.
pub struct RxChangeRule {
    active: bool,
    memos: HashMap<StationIdentity, Memo<i32>>,
}

impl RxChangeRule {
    pub fn new() -> Self {
        Self {
            active: true,
            memos: HashMap::new(),
        }
    }
}

impl Rule for RxChangeRule {
    fn id(&self) -> &'static str {
        "RX Change"
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

        match self.memos.get_mut(identity) {
            None => {
                self.memos.insert(
                    identity.clone(),
                    Memo {
                        last_value: station.rxlev,
                        at_sightings: station.sightings,
                        verdict: RuleVerdict::Ignore,
                    },
                );
                RuleVerdict::Ignore
            }
            Some(memo) if station.sightings == memo.at_sightings => memo.verdict,
            Some(memo) => {
                let band = ctx.config.rx_change_tolerance * memo.last_value.abs() as f64;
                let delta = (station.rxlev - memo.last_value).abs() as f64;
                let verdict = if delta <= band {
                    RuleVerdict::Ok
                } else {
                    RuleVerdict::Warning
                };
                memo.last_value = station.rxlev;
                memo.at_sightings = station.sightings;
                memo.verdict = verdict;
                verdict
            }
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
    fn lac_change_first_sighting_is_ignore_and_stays_ignore() {
        let config = RulesConfig::default();
        let mut rule = LacChangeRule::new();
        let s = station(13, "T-Mobile", 1, 21013);
        let id = s.identity();
        let snapshot = vec![s];

        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Ignore);
        // Replay without a new sighting: memoized verdict, not a fresh one.
        assert_eq!(rule.check(&id, &snapshot, &ctx(&config)), RuleVerdict::Ignore);
    }

    #[test]
    fn lac_change_flags_only_when_counter_advances() {
        let config = RulesConfig::default();
        let mut rule = LacChangeRule::new();

        let mut s = station(13, "T-Mobile", 1, 21013);
        let id = s.identity();
        rule.check(&id, &[s.clone()], &ctx(&config));

        // Second sighting, changed LAC.
        s.lac = 21099;
        s.sightings = 2;
        assert_eq!(
            rule.check(&id, &[s.clone()], &ctx(&config)),
            RuleVerdict::Critical
        );

        // Replays at the same counter keep the memoized verdict.
        for _ in 0..4 {
            assert_eq!(
                rule.check(&id, &[s.clone()], &ctx(&config)),
                RuleVerdict::Critical
            );
        }

        // Third sighting with a stable LAC recovers.
        s.sightings = 3;
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Ok);
    }

    #[test]
    fn rx_change_respects_tolerance_band() {
        let config = RulesConfig::default(); // 0.05
        let mut rule = RxChangeRule::new();

        let mut s = station(13, "T-Mobile", 1, 21013);
        s.rxlev = -80;
        let id = s.identity();
        assert_eq!(rule.check(&id, &[s.clone()], &ctx(&config)), RuleVerdict::Ignore);

        // -80 +- 4 is fine.
        s.rxlev = -83;
        s.sightings = 2;
        assert_eq!(rule.check(&id, &[s.clone()], &ctx(&config)), RuleVerdict::Ok);

        // A 30 dB jump is not.
        s.rxlev = -53;
        s.sightings = 3;
        assert_eq!(
            rule.check(&id, &[s.clone()], &ctx(&config)),
            RuleVerdict::Warning
        );

        // Idempotent on replay.
        assert_eq!(rule.check(&id, &[s], &ctx(&config)), RuleVerdict::Warning);
    }

    #[test]
    fn unknown_identity_is_ignore() {
        let config = RulesConfig::default();
        let mut rule = LacChangeRule::new();
        let id = StationIdentity {
            arfcn: 99,
            bsic: "x".into(),
        };
        assert_eq!(rule.check(&id, &[], &ctx(&config)), RuleVerdict::Ignore);
    }
}
