//! Remote geolocation of observed cells.
//!
//! Ordered fallback chain per station: the Google mobile-maps binary
//! endpoint, then OpenCellID over HTTP, then a presence check against a
//! local area database. The first Confirmed or Approximated result wins.
//! Transport failures degrade to a status on the station and never
//! propagate.

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use reqwest::Client;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::LocationCache;
use crate::config::LookupConfig;
use crate::models::{LookupProvider, LookupResult, LookupStatus, Station};

const GOOGLE_HOST: &str = "www.google.com:80";
const GOOGLE_DEVICE: &str = "Motorola C123";
/// Accuracy radius (meters) beyond which an OpenCellID hit is only an
/// approximation.
const OPENCELLID_RANGE_LIMIT: u32 = 10_000;

pub struct CellLookup {
    config: LookupConfig,
    database_dir: PathBuf,
    client: Client,
}

impl CellLookup {
    pub fn new(config: LookupConfig, database_dir: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("btsmon/0.3")
            .build()?;

        Ok(Self {
            config,
            database_dir,
            client,
        })
    }

    /// Run the fallback chain for one station. Returns the winning result,
    /// or the last attempt's degraded status when nothing confirmed.
    pub async fn locate(&self, station: &Station) -> LookupResult {
        let mut last = LookupResult {
            status: LookupStatus::NotLookedUp,
            provider: LookupProvider::None,
            latitude: 0.0,
            longitude: 0.0,
        };

        if self.config.use_google {
            debug!("Looking up cell {} via Google", station.cell_id);
            last = match self.lookup_google(station).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Google lookup failed for cell {}: {e:#}", station.cell_id);
                    LookupResult {
                        status: LookupStatus::Error,
                        provider: LookupProvider::Google,
                        latitude: 0.0,
                        longitude: 0.0,
                    }
                }
            };
            if last.status == LookupStatus::Confirmed {
                return last;
            }
        }

        if self.config.use_opencellid {
            debug!("Looking up cell {} via OpenCellID", station.cell_id);
            last = match self.lookup_opencellid(station).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        "OpenCellID lookup failed for cell {}: {e:#}",
                        station.cell_id
                    );
                    LookupResult {
                        status: LookupStatus::Error,
                        provider: LookupProvider::OpenCellId,
                        latitude: 0.0,
                        longitude: 0.0,
                    }
                }
            };
            if matches!(
                last.status,
                LookupStatus::Confirmed | LookupStatus::Approximated
            ) {
                return last;
            }
        }

        if self.config.use_local {
            debug!("Looking up cell {} in local database", station.cell_id);
            last = match self.lookup_local(station.cell_id) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Local lookup failed for cell {}: {e:#}", station.cell_id);
                    LookupResult {
                        status: LookupStatus::Error,
                        provider: LookupProvider::Local,
                        latitude: 0.0,
                        longitude: 0.0,
                    }
                }
            };
        }

        last
    }

    async fn lookup_google(&self, station: &Station) -> Result<LookupResult> {
        let country_code = self
            .config
            .country_codes
            .get(&station.country)
            .ok_or_else(|| anyhow!("no ISO code for country '{}'", station.country))?
            .clone();
        let request = build_google_request(&country_code, station.cell_id, station.lac);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        // Raw-socket binary protocol; run it off the async threads.
        let body = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            use std::net::ToSocketAddrs;
            let addr = GOOGLE_HOST
                .to_socket_addrs()?
                .next()
                .context("failed to resolve lookup host")?;
            let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;

            let header = format!(
                "POST /glm/mmap HTTP/1.0\r\nHost: www.google.com\r\n\
                 Content-Type: application/binary\r\nContent-Length: {}\r\n\r\n",
                request.len()
            );
            stream.write_all(header.as_bytes())?;
            stream.write_all(&request)?;

            let mut response = Vec::new();
            stream.read_to_end(&mut response)?;

            let split = response
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .context("malformed HTTP response")?;
            Ok(response[split + 4..].to_vec())
        })
        .await??;

        parse_google_reply(&body)
    }

    async fn lookup_opencellid(&self, station: &Station) -> Result<LookupResult> {
        let mcc = self
            .config
            .mcc
            .get(&station.country)
            .ok_or_else(|| anyhow!("no MCC for country '{}'", station.country))?;
        let mnc = self
            .config
            .mnc
            .get(&station.provider)
            .ok_or_else(|| anyhow!("no MNC for provider '{}'", station.provider))?;

        let url = format!(
            "http://www.opencellid.org/cell/get?key={}&mnc={}&mcc={}&lac={}&cellid={}",
            self.config.opencellid_key, mnc, mcc, station.lac, station.cell_id
        );
        let body = self.client.get(&url).send().await?.text().await?;
        Ok(parse_opencellid_response(&body))
    }

    fn lookup_local(&self, cell_id: u32) -> Result<LookupResult> {
        let path = self
            .database_dir
            .join(format!("{}.db", self.config.local_database));
        if !path.exists() {
            return Ok(LookupResult {
                status: LookupStatus::Error,
                provider: LookupProvider::Local,
                latitude: 0.0,
                longitude: 0.0,
            });
        }

        let cache = LocationCache::open(&path)?;
        if cache.contains_persisted(cell_id)? {
            // Presence only; the local table carries no coordinates.
            Ok(LookupResult {
                status: LookupStatus::Confirmed,
                provider: LookupProvider::Local,
                latitude: 0.0,
                longitude: 0.0,
            })
        } else {
            Ok(LookupResult::not_in_db(LookupProvider::Local))
        }
    }
}

/// Assemble the packed big-endian request of the mobile-maps protocol.
pub fn build_google_request(country_code: &str, cell_id: u32, lac: u32) -> Vec<u8> {
    fn put_str(buf: &mut Vec<u8>, s: &str, width: usize) {
        buf.extend_from_slice(&(s.len() as i16).to_be_bytes());
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(width, 0);
        buf.extend_from_slice(&bytes);
    }

    let mut buf = Vec::with_capacity(80);
    buf.extend_from_slice(&21i16.to_be_bytes());
    buf.extend_from_slice(&0i64.to_be_bytes());
    put_str(&mut buf, country_code, 2);
    put_str(&mut buf, GOOGLE_DEVICE, 13);
    put_str(&mut buf, "1.3.1", 5);
    put_str(&mut buf, "Web", 3);
    buf.push(27);
    buf.extend_from_slice(&0i32.to_be_bytes());
    buf.extend_from_slice(&0i32.to_be_bytes());
    buf.extend_from_slice(&3i32.to_be_bytes());
    buf.extend_from_slice(&0i16.to_be_bytes());
    buf.extend_from_slice(&(cell_id as i32).to_be_bytes());
    buf.extend_from_slice(&(lac as i32).to_be_bytes());
    for _ in 0..4 {
        buf.extend_from_slice(&0i32.to_be_bytes());
    }
    buf
}

/// Decode the packed reply: header, error code, then lat/lon in
/// microdegrees.
pub fn parse_google_reply(body: &[u8]) -> Result<LookupResult> {
    if body.len() < 15 {
        return Err(anyhow!("reply too short: {} bytes", body.len()));
    }
    let error_code = i32::from_be_bytes(body[3..7].try_into()?);
    let latitude = i32::from_be_bytes(body[7..11].try_into()?) as f64 / 1_000_000.0;
    let longitude = i32::from_be_bytes(body[11..15].try_into()?) as f64 / 1_000_000.0;

    if error_code != 0 || latitude == 0.0 || longitude == 0.0 {
        return Ok(LookupResult::not_in_db(LookupProvider::Google));
    }

    Ok(LookupResult {
        status: LookupStatus::Confirmed,
        provider: LookupProvider::Google,
        latitude,
        longitude,
    })
}

/// Pull status, coordinates and accuracy radius out of an OpenCellID
/// response body.
pub fn parse_opencellid_response(body: &str) -> LookupResult {
    static STAT: OnceLock<Regex> = OnceLock::new();
    static FIELDS: OnceLock<Regex> = OnceLock::new();
    let stat_re = STAT.get_or_init(|| Regex::new(r#"stat="([^"]+)""#).unwrap());
    let fields_re = FIELDS.get_or_init(|| {
        Regex::new(r#"lat="(\d+\.\d+)".*lon="(\d+\.\d+)".*range="(\d+)""#).unwrap()
    });

    let stat = stat_re.captures(body).map(|c| c[1].to_string());
    if stat.as_deref() != Some("ok") {
        return LookupResult {
            status: LookupStatus::Error,
            provider: LookupProvider::OpenCellId,
            latitude: 0.0,
            longitude: 0.0,
        };
    }

    let Some(captures) = fields_re.captures(body) else {
        return LookupResult {
            status: LookupStatus::Error,
            provider: LookupProvider::OpenCellId,
            latitude: 0.0,
            longitude: 0.0,
        };
    };

    let latitude: f64 = captures[1].parse().unwrap_or(0.0);
    let longitude: f64 = captures[2].parse().unwrap_or(0.0);
    let range: u32 = captures[3].parse().unwrap_or(0);

    if latitude == 0.0 || longitude == 0.0 {
        return LookupResult::not_in_db(LookupProvider::OpenCellId);
    }

    let status = if range > OPENCELLID_RANGE_LIMIT {
        LookupStatus::Approximated
    } else {
        LookupStatus::Confirmed
    };
    LookupResult {
        status,
        provider: LookupProvider::OpenCellId,
        latitude,
        longitude,
    }
}
