use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::export::station_report;
use crate::filters::StationFilter;
use crate::models::{RuleVerdict, StationIdentity};
use crate::scan::{ScanController, ScanEvent};
use crate::{Btsmon, Daemon};

#[derive(Parser)]
#[command(name = "btsmon")]
#[command(author, version, about = "GSM base station monitor and IMSI-catcher detector")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sweep scanner and evaluate stations as they appear
    Monitor {
        /// Location name; opens that location's area database
        #[arg(short, long)]
        location: Option<String>,

        /// Project file to load before and save after the session
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Also run the firmware loader
        #[arg(short, long)]
        firmware: bool,

        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Scan the paging channel of one or more ARFCNs
    Pch {
        /// Target ARFCNs
        #[arg(required = true)]
        arfcn: Vec<u16>,

        /// Project file to fold the counters into
        #[arg(short, long)]
        project: PathBuf,
    },

    /// Run the firmware loader until Ctrl+C
    Firmware,

    /// List stations from a project file
    Show {
        /// Project file
        project: PathBuf,

        /// Only stations of these providers
        #[arg(long, value_delimiter = ',')]
        providers: Vec<String>,

        /// Lower ARFCN bound
        #[arg(long)]
        arfcn_from: Option<u16>,

        /// Upper ARFCN bound
        #[arg(long)]
        arfcn_to: Option<u16>,

        /// Full report for one station (ARFCN,BSIC e.g. "42,32,1")
        #[arg(long)]
        detail: Option<String>,
    },

    /// Geolocate stations via the configured web services
    Lookup {
        /// Project file
        project: PathBuf,
    },

    /// Write the station set into the location's area database
    Commit {
        /// Project file
        project: PathBuf,

        /// Location name
        location: String,
    },

    /// Export a project as CSV
    Export {
        /// Project file
        project: PathBuf,

        /// Output CSV path
        output: PathBuf,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Table row for station listing
#[derive(Tabled)]
struct StationRow {
    #[tabled(rename = "ARFCN")]
    arfcn: u16,
    #[tabled(rename = "BSIC")]
    bsic: String,
    #[tabled(rename = "Provider")]
    provider: String,
    #[tabled(rename = "LAC")]
    lac: u32,
    #[tabled(rename = "Cell ID")]
    cell_id: u32,
    #[tabled(rename = "rx")]
    rxlev: i32,
    #[tabled(rename = "Seen")]
    sightings: u64,
    #[tabled(rename = "Lookup")]
    lookup: String,
    #[tabled(rename = "Evaluation")]
    evaluation: String,
}

fn colored_verdict(verdict: RuleVerdict) -> String {
    match verdict {
        RuleVerdict::Ok => verdict.to_string().green().to_string(),
        RuleVerdict::Warning => verdict.to_string().yellow().to_string(),
        RuleVerdict::Critical => verdict.to_string().red().bold().to_string(),
        RuleVerdict::Ignore => verdict.to_string().dimmed().to_string(),
    }
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Monitor {
            location,
            project,
            firmware,
            duration,
        } => cmd_monitor(config, location, project, firmware, duration).await,
        Commands::Pch { arfcn, project } => cmd_pch(config, arfcn, project).await,
        Commands::Firmware => cmd_firmware(config).await,
        Commands::Show {
            project,
            providers,
            arfcn_from,
            arfcn_to,
            detail,
        } => cmd_show(config, project, providers, arfcn_from, arfcn_to, detail),
        Commands::Lookup { project } => cmd_lookup(config, project).await,
        Commands::Commit { project, location } => cmd_commit(config, project, location),
        Commands::Export { project, output } => cmd_export(config, project, output),
        Commands::GenConfig { output } => cmd_gen_config(output),
    }
}

fn build_filters(
    providers: Vec<String>,
    arfcn_from: Option<u16>,
    arfcn_to: Option<u16>,
) -> Vec<StationFilter> {
    let mut filters = Vec::new();
    if !providers.is_empty() {
        filters.push(StationFilter::Providers { providers });
    }
    if arfcn_from.is_some() || arfcn_to.is_some() {
        filters.push(StationFilter::ArfcnRange {
            from: arfcn_from.unwrap_or(0),
            to: arfcn_to.unwrap_or(u16::MAX),
        });
    }
    filters
}

async fn cmd_monitor(
    config: Config,
    location: Option<String>,
    project: Option<PathBuf>,
    firmware: bool,
    duration: Option<u64>,
) -> Result<()> {
    let (mut daemon, shutdown) = Daemon::new(config)?;

    if let Some(location) = &location {
        daemon.core().set_location(location)?;
    }
    if let Some(path) = &project {
        if path.exists() {
            daemon.core().load_project(path)?;
        }
    }
    if firmware {
        daemon.controller().start_firmware()?;
    }
    daemon.controller().start_sweep()?;

    println!("Monitoring; press Ctrl+C to stop");

    let timer_shutdown = shutdown.clone();
    if let Some(secs) = duration {
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            let _ = timer_shutdown.send(()).await;
        });
    }
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(()).await;
        }
    });

    let core = daemon.run().await?;

    let snapshot = core.repository.snapshot();
    print_station_table(&snapshot.iter().collect::<Vec<_>>());
    println!(
        "Overall: {}",
        colored_verdict(core.overall_verdict(&[]))
    );

    if let Some(path) = &project {
        core.save_project(path)?;
        println!("Project saved to {}", path.display());
    }
    Ok(())
}

async fn cmd_pch(config: Config, arfcns: Vec<u16>, project: PathBuf) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let mut controller = ScanController::new(config.scanner.clone(), event_tx);
    let mut core = Btsmon::new(config)?;
    core.load_project(&project)?;

    for arfcn in &arfcns {
        controller.enqueue_pch(*arfcn)?;
    }

    let mut remaining = arfcns.len();
    while remaining > 0 {
        let event = tokio::select! {
            ev = event_rx.recv() => ev,
            _ = tokio::signal::ctrl_c() => {
                println!("\nCancelled");
                break;
            }
        };
        match event {
            Some(ScanEvent::PchDone { arfcn, outcome }) => {
                remaining -= 1;
                let touched = core.record_pch(arfcn, &outcome.stats);
                let note = if outcome.degraded { " (degraded)" } else { "" };
                println!(
                    "ARFCN {arfcn}: {} pagings, {} hopping / {} non-hopping assignments{note}, {} stations updated",
                    outcome.stats.pagings,
                    outcome.stats.assignments_hopping,
                    outcome.stats.assignments_non_hopping,
                    touched
                );
                controller.on_pch_done();
            }
            Some(ScanEvent::WorkerFailed { worker, error }) => {
                remaining -= 1;
                eprintln!("{} {worker}: {error}", "Failed:".red().bold());
                controller.on_pch_done();
            }
            Some(_) => {}
            None => break,
        }
    }
    controller.shutdown();

    core.save_project(&project)?;
    println!("Project saved to {}", project.display());
    Ok(())
}

async fn cmd_firmware(config: Config) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(16);
    let mut controller = ScanController::new(config.scanner.clone(), event_tx);
    controller.start_firmware()?;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(ScanEvent::FirmwareWaiting) => {
                    println!("Loader ready; press the phone's power button");
                }
                Some(ScanEvent::FirmwareLoaded) => {
                    println!("{}", "Firmware loaded".green().bold());
                    println!("Keep this running while scanning; Ctrl+C to stop");
                }
                Some(ScanEvent::WorkerFailed { error, .. }) => {
                    anyhow::bail!("firmware loader failed: {error}");
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    controller.shutdown();
    Ok(())
}

fn cmd_show(
    config: Config,
    project: PathBuf,
    providers: Vec<String>,
    arfcn_from: Option<u16>,
    arfcn_to: Option<u16>,
    detail: Option<String>,
) -> Result<()> {
    let mut core = Btsmon::new(config)?;
    core.load_project(&project)?;

    if let Some(spec) = detail {
        let (arfcn, bsic) = spec
            .split_once(',')
            .context("detail spec must be ARFCN,BSIC")?;
        let identity = StationIdentity {
            arfcn: arfcn.trim().parse().context("invalid ARFCN")?,
            bsic: bsic.trim().to_string(),
        };
        let station = core
            .repository
            .get(&identity)
            .with_context(|| format!("no station {identity}"))?;
        print!("{}", station_report(station));
        return Ok(());
    }

    let filters = build_filters(providers, arfcn_from, arfcn_to);
    let stations = core.repository.filtered(&filters);
    if stations.is_empty() {
        println!("No stations");
        return Ok(());
    }
    print_station_table(&stations.iter().collect::<Vec<_>>());
    println!(
        "Overall: {}",
        colored_verdict(core.overall_verdict(&filters))
    );
    Ok(())
}

async fn cmd_lookup(config: Config, project: PathBuf) -> Result<()> {
    let mut core = Btsmon::new(config)?;
    core.load_project(&project)?;

    println!("Looking up {} stations...", core.repository.len());
    let ran = core.run_lookups().await?;
    println!("{ran} lookups completed");

    for station in core.repository.snapshot() {
        println!(
            "  {}: {} via {}",
            station.identity(),
            station.lookup_status,
            station.lookup_provider
        );
    }
    core.save_project(&project)?;
    Ok(())
}

fn cmd_commit(config: Config, project: PathBuf, location: String) -> Result<()> {
    let mut core = Btsmon::new(config)?;
    core.load_project(&project)?;
    core.set_location(&location)?;
    let written = core.commit_to_area_database()?;
    println!(
        "{} {written} stations to area database '{location}'",
        "Committed".green().bold()
    );
    Ok(())
}

fn cmd_export(config: Config, project: PathBuf, output: PathBuf) -> Result<()> {
    let mut core = Btsmon::new(config)?;
    core.load_project(&project)?;
    core.export_csv(&output)?;
    println!("Exported {} stations to {}", core.repository.len(), output.display());
    Ok(())
}

fn cmd_gen_config(output: Option<PathBuf>) -> Result<()> {
    let config = Config::default();
    let toml_str = toml::to_string_pretty(&config)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &toml_str)?;
            println!("Configuration written to {}", path.display());
        }
        None => {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn print_station_table(stations: &[&crate::models::Station]) {
    let rows: Vec<StationRow> = stations
        .iter()
        .map(|s| StationRow {
            arfcn: s.arfcn,
            bsic: s.bsic.clone(),
            provider: s.provider.clone(),
            lac: s.lac,
            cell_id: s.cell_id,
            rxlev: s.rxlev,
            sightings: s.sightings,
            lookup: s.lookup_status.to_string(),
            evaluation: colored_verdict(s.evaluation),
        })
        .collect();
    println!("{}", Table::new(rows));
}
