use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::aggregate::FacilityGroup;
use crate::model::FacilityType;

/// Connection parameters for the store, fixed at construction.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    pub ready_attempts: u32,
    pub ready_interval: Duration,
}

pub fn connect(cfg: &DbConfig) -> Result<Connection> {
    if let Some(dir) = cfg.path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(&cfg.path)
        .with_context(|| format!("Failed to open {:?}", cfg.path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Poll the store until `SELECT 1` succeeds, up to `ready_attempts` times.
pub fn wait_for_db(cfg: &DbConfig) -> Result<Connection> {
    for attempt in 1..=cfg.ready_attempts {
        match connect(cfg).and_then(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(conn)
        }) {
            Ok(conn) => {
                info!("Database ready: {:?}", cfg.path);
                return Ok(conn);
            }
            Err(e) => {
                warn!(
                    "Waiting for database ({}/{})... {:#}",
                    attempt, cfg.ready_attempts, e
                );
                if attempt < cfg.ready_attempts {
                    std::thread::sleep(cfg.ready_interval);
                }
            }
        }
    }
    bail!(
        "Database {:?} not ready after {} attempts",
        cfg.path,
        cfg.ready_attempts
    )
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    let types = FacilityType::ALL
        .iter()
        .map(|t| format!("'{}'", t.as_str()))
        .collect::<Vec<_>>()
        .join(",");

    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS facilities (
            id                    INTEGER PRIMARY KEY,
            source                TEXT NOT NULL,
            source_key            TEXT NOT NULL,
            facility_name         TEXT NOT NULL,
            type                  TEXT NOT NULL CHECK(type IN ({types})),
            street                TEXT,
            postal_code           TEXT,
            city                  TEXT,
            phone                 TEXT,
            latitude              REAL,
            longitude             REAL,
            wheelchair_accessible BOOLEAN,
            UNIQUE(source, source_key)
        );
        CREATE INDEX IF NOT EXISTS idx_facilities_type ON facilities(type);

        CREATE TABLE IF NOT EXISTS doctors (
            id          INTEGER PRIMARY KEY,
            facility_id INTEGER NOT NULL REFERENCES facilities(id) ON DELETE CASCADE,
            source      TEXT NOT NULL,
            source_key  TEXT NOT NULL,
            first_name  TEXT,
            last_name   TEXT,
            name        TEXT NOT NULL,
            specialty   TEXT,
            UNIQUE(facility_id, source_key)
        );
        CREATE INDEX IF NOT EXISTS idx_doctors_facility ON doctors(facility_id);
        CREATE INDEX IF NOT EXISTS idx_doctors_name ON doctors(last_name, first_name, name);
        "
    ))?;
    Ok(())
}

// ── Reconciliation ──

const UPSERT_FACILITY: &str = "
    INSERT INTO facilities
      (source, source_key, facility_name, type, street, postal_code, city,
       phone, latitude, longitude, wheelchair_accessible)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT (source, source_key) DO UPDATE SET
      facility_name = excluded.facility_name,
      type = excluded.type,
      street = excluded.street,
      postal_code = excluded.postal_code,
      city = excluded.city,
      phone = excluded.phone,
      latitude = excluded.latitude,
      longitude = excluded.longitude,
      wheelchair_accessible = excluded.wheelchair_accessible
    RETURNING id";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub facilities: usize,
    pub doctors_removed: usize,
    pub doctors_inserted: usize,
}

/// Write one source run: upsert each facility, then replace its doctors.
///
/// Everything happens in a single transaction; an error anywhere leaves the
/// previously committed state untouched.
pub fn reconcile(conn: &Connection, groups: &[FacilityGroup]) -> Result<ReconcileStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = ReconcileStats::default();
    {
        let mut upsert = tx.prepare(UPSERT_FACILITY)?;
        let mut delete = tx.prepare("DELETE FROM doctors WHERE facility_id = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO doctors (facility_id, source, source_key, first_name, last_name, name, specialty)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for group in groups {
            let f = &group.facility;
            let facility_id: i64 = upsert.query_row(
                rusqlite::params![
                    f.source,
                    f.source_key,
                    f.name,
                    f.facility_type.as_str(),
                    f.street,
                    f.postal_code,
                    f.city,
                    f.phone,
                    f.latitude,
                    f.longitude,
                    f.wheelchair_accessible,
                ],
                |row| row.get(0),
            )?;
            stats.facilities += 1;

            stats.doctors_removed += delete.execute([facility_id])?;

            for d in group.doctors.values() {
                stats.doctors_inserted += insert.execute(rusqlite::params![
                    facility_id,
                    d.source,
                    d.source_key,
                    d.first_name,
                    d.last_name,
                    d.name,
                    d.specialty,
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(stats)
}

// ── Inspection ──

pub struct SourceStats {
    pub source: String,
    pub facilities: usize,
    pub doctors: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Vec<SourceStats>> {
    let mut stmt = conn.prepare(
        "SELECT f.source, COUNT(DISTINCT f.id), COUNT(d.id)
         FROM facilities f
         LEFT JOIN doctors d ON d.facility_id = f.id
         GROUP BY f.source
         ORDER BY f.source",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SourceStats {
                source: row.get(0)?,
                facilities: row.get(1)?,
                doctors: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct DoctorListRow {
    pub id: i64,
    pub name: String,
    pub specialty: Option<String>,
    pub facility_id: i64,
    pub facility_name: String,
    pub facility_type: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub phone: String,
}

pub fn fetch_doctors(
    conn: &Connection,
    source: Option<&str>,
    limit: usize,
) -> Result<Vec<DoctorListRow>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.name, d.specialty, f.id, f.facility_name, f.type,
                COALESCE(f.street,''), COALESCE(f.postal_code,''),
                COALESCE(f.city,''), COALESCE(f.phone,'')
         FROM doctors d
         JOIN facilities f ON f.id = d.facility_id
         WHERE ?1 IS NULL OR d.source = ?1
         ORDER BY d.last_name, d.first_name, d.name
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![source, limit as i64], |row| {
            Ok(DoctorListRow {
                id: row.get(0)?,
                name: row.get(1)?,
                specialty: row.get(2)?,
                facility_id: row.get(3)?,
                facility_name: row.get(4)?,
                facility_type: row.get(5)?,
                street: row.get(6)?,
                postal_code: row.get(7)?,
                city: row.get(8)?,
                phone: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct FacilityListRow {
    pub id: i64,
    pub source: String,
    pub name: String,
    pub facility_type: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub wheelchair_accessible: Option<bool>,
    pub doctor_count: usize,
}

pub fn fetch_facilities(
    conn: &Connection,
    source: Option<&str>,
    facility_type: Option<FacilityType>,
    limit: usize,
) -> Result<Vec<FacilityListRow>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.source, f.facility_name, f.type,
                COALESCE(f.street,''), COALESCE(f.postal_code,''), COALESCE(f.city,''),
                f.latitude, f.longitude, f.wheelchair_accessible,
                (SELECT COUNT(*) FROM doctors d WHERE d.facility_id = f.id)
         FROM facilities f
         WHERE (?1 IS NULL OR f.source = ?1)
           AND (?2 IS NULL OR f.type = ?2)
         ORDER BY f.postal_code, f.facility_name
         LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(
            rusqlite::params![source, facility_type.map(|t| t.as_str()), limit as i64],
            |row| {
                Ok(FacilityListRow {
                    id: row.get(0)?,
                    source: row.get(1)?,
                    name: row.get(2)?,
                    facility_type: row.get(3)?,
                    street: row.get(4)?,
                    postal_code: row.get(5)?,
                    city: row.get(6)?,
                    latitude: row.get(7)?,
                    longitude: row.get(8)?,
                    wheelchair_accessible: row.get(9)?,
                    doctor_count: row.get(10)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
