//! btsmon - GSM base station monitor and IMSI-catcher detector.
//!
//! Feeds scanner subprocess output through a heuristic rule engine to
//! judge whether any visible cell behaves like a rogue base station.

pub mod cache;
pub mod cli;
pub mod config;
pub mod eval;
pub mod export;
pub mod filters;
pub mod lookup;
pub mod models;
pub mod repository;
pub mod rules;
pub mod scan;
pub mod si;

use anyhow::{Context, Result};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use cache::LocationCache;
use config::Config;
use eval::Evaluator;
use filters::StationFilter;
use lookup::CellLookup;
use models::{LookupStatus, PchStats, RuleVerdict, Station};
use repository::StationRepository;
use rules::Rule;
use scan::{ScanController, ScanEvent};

/// The application core: configuration, station set, rule engine and the
/// lookup/cache plumbing around them. Everything the CLI and the daemon
/// do goes through here.
pub struct Btsmon {
    pub config: Config,
    pub repository: StationRepository,
    cache: Option<LocationCache>,
    lookup: CellLookup,
    rules: Vec<Box<dyn Rule>>,
    evaluator: Evaluator,
}

impl Btsmon {
    pub fn new(config: Config) -> Result<Self> {
        let evaluator = Evaluator::new(&config.evaluator.kind, &config.evaluator.groups)
            .context("configured evaluator is not usable")?;
        let rules = rules::default_rules(&config.rules);
        let lookup = CellLookup::new(config.lookup.clone(), config.general.database_dir.clone())?;
        let cache = match config.area_database_path() {
            Some(path) => Some(
                LocationCache::open(&path)
                    .with_context(|| format!("opening area database {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self {
            config,
            repository: StationRepository::new(),
            cache,
            lookup,
            rules,
            evaluator,
        })
    }

    /// Merge one sweep result and re-run the rules.
    pub fn add_station(&mut self, station: Station) {
        self.repository.add(station);
        self.trigger_evaluation();
    }

    /// Run every active rule over the current station set and store the
    /// aggregated verdicts.
    pub fn trigger_evaluation(&mut self) {
        self.repository.evaluate(
            &mut self.rules,
            &self.evaluator,
            &self.config.rules,
            self.cache.as_ref(),
        );
    }

    /// Fold PCH counters into the stations on that ARFCN.
    pub fn record_pch(&mut self, arfcn: u16, stats: &PchStats) -> usize {
        let touched = self.repository.record_pch(arfcn, stats);
        if touched > 0 {
            self.trigger_evaluation();
        } else {
            warn!("PCH scan finished for ARFCN {arfcn} but no station is on it");
        }
        touched
    }

    /// Select the named location and open (or create) its area database.
    pub fn set_location(&mut self, location: &str) -> Result<()> {
        self.config.general.location = location.to_string();
        let path = self
            .config
            .area_database_path()
            .context("location name is empty")?;
        self.cache = Some(
            LocationCache::open(&path)
                .with_context(|| format!("opening area database {}", path.display()))?,
        );
        info!("location set to '{location}'");
        Ok(())
    }

    /// Write every station currently known into the location's area
    /// database. RX spans only ever widen.
    pub fn commit_to_area_database(&mut self) -> Result<usize> {
        let cache = self
            .cache
            .as_ref()
            .context("no location selected; use set-location first")?;
        let snapshot = self.repository.snapshot();
        let written = cache.upsert_all(snapshot.iter())?;
        info!("committed {written} stations to the area database");
        Ok(written)
    }

    /// Geolocate every station that is not already confirmed, then
    /// re-evaluate. Returns how many lookups ran.
    pub async fn run_lookups(&mut self) -> Result<usize> {
        let pending: Vec<Station> = self
            .repository
            .snapshot()
            .into_iter()
            .filter(|s| s.lookup_status != LookupStatus::Confirmed)
            .collect();

        let mut ran = 0;
        for station in &pending {
            let result = self.lookup.locate(station).await;
            self.repository.apply_lookup(&station.identity(), &result);
            ran += 1;
        }
        if ran > 0 {
            self.trigger_evaluation();
        }
        Ok(ran)
    }

    pub fn overall_verdict(&self, filter_chain: &[StationFilter]) -> RuleVerdict {
        self.repository.overall_verdict(filter_chain)
    }

    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let snapshot = self.repository.snapshot();
        let refs: Vec<&Station> = snapshot.iter().collect();
        export::write_csv(path, &refs, &self.config.general.export_delimiter)
    }

    pub fn save_project<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.repository.save(path)
    }

    pub fn load_project<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.repository.load(path)?;
        self.trigger_evaluation();
        Ok(())
    }
}

/// Long-running scan session: workers post [`ScanEvent`]s, the loop folds
/// them into the core, shutdown drains everything.
pub struct Daemon {
    core: Btsmon,
    controller: ScanController,
    events: mpsc::Receiver<ScanEvent>,
    shutdown: mpsc::Receiver<()>,
}

impl Daemon {
    /// Build the daemon; the returned sender requests shutdown.
    pub fn new(config: Config) -> Result<(Self, mpsc::Sender<()>)> {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let controller = ScanController::new(config.scanner.clone(), event_tx);
        let core = Btsmon::new(config)?;
        Ok((
            Self {
                core,
                controller,
                events: event_rx,
                shutdown: shutdown_rx,
            },
            shutdown_tx,
        ))
    }

    pub fn core(&mut self) -> &mut Btsmon {
        &mut self.core
    }

    pub fn controller(&mut self) -> &mut ScanController {
        &mut self.controller
    }

    pub async fn run(mut self) -> Result<Btsmon> {
        info!("btsmon daemon running");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(ev) => self.handle_event(ev),
                        None => break,
                    }
                }
                _ = self.shutdown.recv() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }
        self.controller.shutdown();
        // Drain events the workers posted while stopping.
        while let Ok(ev) = self.events.try_recv() {
            self.handle_event(ev);
        }
        Ok(self.core)
    }

    fn handle_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Station(station) => {
                let identity = station.identity();
                self.core.add_station(*station);
                if let Some(s) = self.core.repository.get(&identity) {
                    info!(
                        "station {identity}: {} ({} sightings)",
                        s.evaluation, s.sightings
                    );
                }
            }
            ScanEvent::PchDone { arfcn, outcome } => {
                if outcome.degraded {
                    warn!("PCH scan of ARFCN {arfcn} finished degraded");
                }
                self.core.record_pch(arfcn, &outcome.stats);
                self.controller.on_pch_done();
            }
            ScanEvent::FirmwareWaiting => {
                info!("firmware loader ready; press the phone's power button");
            }
            ScanEvent::FirmwareLoaded => {
                info!("firmware loaded; scanners may start");
            }
            ScanEvent::WorkerFailed { worker, error } => {
                error!("{worker} worker failed: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.general.database_dir = std::env::temp_dir().join("btsmon-core-test");
        config
    }

    fn sighting(arfcn: u16, provider: &str, lac: u32) -> Station {
        let mut s = Station::new(arfcn, "32,1".into());
        s.country = "Germany".into();
        s.provider = provider.into();
        s.lac = lac;
        s.cell_id = u32::from(arfcn) * 100;
        s.rxlev = -70;
        s
    }

    #[test]
    fn add_station_evaluates_immediately() {
        let mut core = Btsmon::new(test_config()).unwrap();
        core.add_station(sighting(42, "BogusNet", 21500));

        let station = core
            .repository
            .get(&models::StationIdentity {
                arfcn: 42,
                bsic: "32,1".into(),
            })
            .unwrap();
        // Unknown provider trips the allow-list rule.
        assert_eq!(station.evaluation, RuleVerdict::Critical);
    }

    #[test]
    fn record_pch_on_unknown_arfcn_touches_nothing() {
        let mut core = Btsmon::new(test_config()).unwrap();
        core.add_station(sighting(42, "T-Mobile", 21500));
        let touched = core.record_pch(999, &PchStats::default());
        assert_eq!(touched, 0);
    }

    #[tokio::test]
    async fn daemon_folds_station_events_and_stops() {
        let (daemon, shutdown) = Daemon::new(test_config()).unwrap();
        let handle = tokio::spawn(daemon.run());
        shutdown.send(()).await.unwrap();
        let core = handle.await.unwrap().unwrap();
        assert!(core.repository.is_empty());
    }
}
