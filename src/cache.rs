//! Historical RX-range cache ("area database").
//!
//! One SQLite file per surveyed location, mirrored into memory on open.
//! Reads during rule evaluation hit the in-memory index only; writes go to
//! both the index and the durable table in the same call.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::models::Station;

/// One row of the area database.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub cell_id: u32,
    pub country: String,
    pub provider: String,
    pub arfcn: u16,
    pub bsic: String,
    pub lac: u32,
    pub rx_min: i32,
    pub rx_max: i32,
    pub sightings: u64,
}

/// Persistent store of per-cell RX-level ranges with an in-memory index.
#[derive(Clone)]
pub struct LocationCache {
    conn: Arc<Mutex<Connection>>,
    index: Arc<Mutex<HashMap<u32, CacheEntry>>>,
}

impl LocationCache {
    /// Open or create the cache at the given path and build the index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open area database: {}", path.as_ref().display()))?;

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            index: Arc::new(Mutex::new(HashMap::new())),
        };

        cache.init_schema()?;
        cache.refresh()?;
        info!("Area database opened: {}", path.as_ref().display());
        Ok(cache)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            index: Arc::new(Mutex::new(HashMap::new())),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS basestations (
                cellid INTEGER,
                country TEXT,
                provider TEXT,
                arfcn INTEGER,
                bsic TEXT,
                lac INTEGER,
                rxmin INTEGER,
                rxmax INTEGER,
                sightings INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_basestations_cellid ON basestations(cellid);
            "#,
        )?;
        Ok(())
    }

    /// Rebuild the in-memory index from the table. Called on open and after
    /// external writes to the same file.
    pub fn refresh(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT cellid, country, provider, arfcn, bsic, lac, rxmin, rxmax, sightings
             FROM basestations",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CacheEntry {
                cell_id: row.get(0)?,
                country: row.get(1)?,
                provider: row.get(2)?,
                arfcn: row.get(3)?,
                bsic: row.get(4)?,
                lac: row.get(5)?,
                rx_min: row.get(6)?,
                rx_max: row.get(7)?,
                sightings: row.get(8)?,
            })
        })?;

        let mut index = self.index.lock().unwrap();
        index.clear();
        for row in rows {
            let entry = row?;
            index.insert(entry.cell_id, entry);
        }
        debug!("Area database index rebuilt: {} cells", index.len());
        Ok(())
    }

    /// Look up a cell in the in-memory index. I/O-free; a missing row is a
    /// plain miss.
    pub fn get(&self, cell_id: u32) -> Option<CacheEntry> {
        self.index.lock().unwrap().get(&cell_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a station or widen its existing row.
    ///
    /// The [rxmin, rxmax] interval only ever widens and sightings only ever
    /// grow, regardless of input order.
    pub fn upsert(&self, station: &Station) -> Result<()> {
        let existing = self.get(station.cell_id);

        let entry = match existing {
            Some(old) => {
                let entry = CacheEntry {
                    rx_min: old.rx_min.min(station.rxlev),
                    rx_max: old.rx_max.max(station.rxlev),
                    sightings: old.sightings + 1,
                    ..old
                };
                let conn = self.conn.lock().unwrap();
                conn.execute(
                    "UPDATE basestations SET rxmin = ?1, rxmax = ?2, sightings = ?3
                     WHERE cellid = ?4",
                    params![entry.rx_min, entry.rx_max, entry.sightings, entry.cell_id],
                )?;
                entry
            }
            None => {
                let entry = CacheEntry {
                    cell_id: station.cell_id,
                    country: station.country.clone(),
                    provider: station.provider.clone(),
                    arfcn: station.arfcn,
                    bsic: station.bsic.clone(),
                    lac: station.lac,
                    rx_min: station.rxlev,
                    rx_max: station.rxlev,
                    sightings: 1,
                };
                let conn = self.conn.lock().unwrap();
                conn.execute(
                    "INSERT INTO basestations VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        entry.cell_id,
                        entry.country,
                        entry.provider,
                        entry.arfcn,
                        entry.bsic,
                        entry.lac,
                        entry.rx_min,
                        entry.rx_max,
                        entry.sightings,
                    ],
                )?;
                entry
            }
        };

        self.index.lock().unwrap().insert(entry.cell_id, entry);
        Ok(())
    }

    /// Commit a batch of stations to the area database.
    pub fn upsert_all<'a, I>(&self, stations: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Station>,
    {
        let mut count = 0;
        for station in stations {
            self.upsert(station)?;
            count += 1;
        }
        Ok(count)
    }

    /// True if the given cell has a row. Used by the local lookup provider.
    pub fn contains(&self, cell_id: u32) -> bool {
        self.get(cell_id).is_some()
    }

    /// Durable-store presence check, bypassing the index. Lets the lookup
    /// chain consult a database file other than the active location's.
    pub fn contains_persisted(&self, cell_id: u32) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT cellid FROM basestations WHERE cellid = ?1 LIMIT 1",
                params![cell_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(cell_id: u32, rxlev: i32) -> Station {
        let mut s = Station::new(42, "32,1".into());
        s.cell_id = cell_id;
        s.country = "Germany".into();
        s.provider = "T-Mobile".into();
        s.lac = 21013;
        s.rxlev = rxlev;
        s
    }

    #[test]
    fn insert_then_widen() {
        let cache = LocationCache::open_memory().unwrap();
        cache.upsert(&station(900, -70)).unwrap();

        let entry = cache.get(900).unwrap();
        assert_eq!(entry.rx_min, -70);
        assert_eq!(entry.rx_max, -70);
        assert_eq!(entry.sightings, 1);

        cache.upsert(&station(900, -85)).unwrap();
        cache.upsert(&station(900, -55)).unwrap();

        let entry = cache.get(900).unwrap();
        assert_eq!(entry.rx_min, -85);
        assert_eq!(entry.rx_max, -55);
        assert_eq!(entry.sightings, 3);
    }

    #[test]
    fn span_and_sightings_never_shrink() {
        let cache = LocationCache::open_memory().unwrap();
        let levels = [-60, -80, -60, -70, -90, -40, -65, -65];

        let mut last_span = 0;
        let mut last_sightings = 0;
        for rx in levels {
            cache.upsert(&station(7, rx)).unwrap();
            let entry = cache.get(7).unwrap();
            let span = entry.rx_max - entry.rx_min;
            assert!(span >= last_span);
            assert!(entry.sightings > last_sightings);
            assert!(entry.rx_min <= entry.rx_max);
            last_span = span;
            last_sightings = entry.sightings;
        }
    }

    #[test]
    fn refresh_rebuilds_index_from_table() {
        let cache = LocationCache::open_memory().unwrap();
        cache.upsert(&station(1, -60)).unwrap();
        cache.upsert(&station(2, -70)).unwrap();

        cache.index.lock().unwrap().clear();
        assert!(cache.get(1).is_none());

        cache.refresh().unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(2).unwrap().rx_min, -70);
    }

    #[test]
    fn missing_cell_is_a_miss() {
        let cache = LocationCache::open_memory().unwrap();
        assert!(cache.get(12345).is_none());
        assert!(!cache.contains(12345));
        assert!(!cache.contains_persisted(12345).unwrap());
    }
}
