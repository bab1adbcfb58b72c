use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use shared::types::{ActivityRecord, ServiceIdentity, ServiceInfo, ServiceRecord, ServiceStatus};
use crate::error::{RegistryError, RegistryResult};
use crate::store::catalog::{self, VersionTagCatalog};
use crate::store::{RegistryStore, ServiceKey};

const SELECT_SERVICE: &str = "SELECT s.id, s.name, s.version, s.app_url, s.health_check_url,
        s.description, s.status, t.tag_name, s.last_start_time, s.last_stop_time
 FROM service s JOIN version_tag t ON t.id = s.version_tag_id";

/// SQLite-backed store. Multi-step operations run in IMMEDIATE transactions.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to configure database")?;

        // AUTOINCREMENT keeps ids of deleted services from being handed out again.
        // last_activity.service_id has no cascading foreign key: rows outlive
        // the service they point to.
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS version_tag (
                id       INTEGER PRIMARY KEY AUTOINCREMENT,
                tag_name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS service (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                name             TEXT NOT NULL,
                version          TEXT NOT NULL,
                app_url          TEXT NOT NULL,
                health_check_url TEXT NOT NULL,
                description      TEXT NOT NULL,
                status           TEXT NOT NULL DEFAULT 'DOWN' CHECK (status IN ('UP', 'DOWN')),
                version_tag_id   INTEGER NOT NULL REFERENCES version_tag(id),
                last_start_time  TEXT,
                last_stop_time   TEXT,
                UNIQUE (name, version)
            );

            CREATE TABLE IF NOT EXISTS last_activity (
                service_id         INTEGER PRIMARY KEY,
                last_activity_time TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert any tag names not yet present. Existing tags keep their ids.
    pub fn seed_catalog<I, S>(&self, tag_names: I) -> RegistryResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for name in tag_names {
            inserted += tx.execute(
                "INSERT OR IGNORE INTO version_tag (tag_name) VALUES (?1)",
                params![name.as_ref()],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Snapshot of the version tag table
    pub fn catalog(&self) -> RegistryResult<VersionTagCatalog> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, tag_name FROM version_tag")?;
        let entries = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VersionTagCatalog::from_entries(entries))
    }

    fn lock(&self) -> RegistryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::storage("connection lock poisoned"))
    }

    fn fetch(conn: &Connection, key: &ServiceKey) -> rusqlite::Result<Option<ServiceRecord>> {
        match key {
            ServiceKey::Id(id) => conn
                .query_row(
                    &format!("{} WHERE s.id = ?1", SELECT_SERVICE),
                    params![id],
                    Self::row_to_record,
                )
                .optional(),
            ServiceKey::Identity(identity) => conn
                .query_row(
                    &format!("{} WHERE s.name = ?1 AND s.version = ?2", SELECT_SERVICE),
                    params![&identity.name, &identity.version],
                    Self::row_to_record,
                )
                .optional(),
        }
    }

    /// Helper to convert a database row to ServiceRecord
    fn row_to_record(row: &rusqlite::Row) -> Result<ServiceRecord, rusqlite::Error> {
        let status_str: String = row.get(6)?;
        let status = ServiceStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown status {}", status_str).into(),
            )
        })?;

        Ok(ServiceRecord {
            id: row.get(0)?,
            identity: ServiceIdentity {
                name: row.get(1)?,
                version: row.get(2)?,
            },
            app_url: row.get(3)?,
            health_check_url: row.get(4)?,
            description: row.get(5)?,
            status,
            version_tag: row.get(7)?,
            last_start_time: parse_optional_time(row, 8)?,
            last_stop_time: parse_optional_time(row, 9)?,
        })
    }
}

fn parse_time(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}

fn parse_optional_time(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    row.get::<_, Option<String>>(idx)?
        .map(|value| parse_time(idx, &value))
        .transpose()
}

fn upsert_activity(conn: &Connection, service_id: i64, at: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO last_activity (service_id, last_activity_time) VALUES (?1, ?2)
         ON CONFLICT(service_id) DO UPDATE SET
            last_activity_time = excluded.last_activity_time",
        params![service_id, at.to_rfc3339()],
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl RegistryStore for SqliteStore {
    fn create(&self, info: &ServiceInfo) -> RegistryResult<ServiceRecord> {
        let identity = info.identity();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let tag_id = catalog::resolve_tag(&tx, &info.version_tag)?;

        if Self::fetch(&tx, &ServiceKey::Identity(identity.clone()))?.is_some() {
            return Err(RegistryError::DuplicateIdentity(identity));
        }

        tx.execute(
            r#"
            INSERT INTO service (
                name, version, app_url, health_check_url, description, status, version_tag_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                &info.name,
                &info.version,
                &info.app_url,
                &info.health_check_url,
                &info.description,
                ServiceStatus::Down.as_str(),
                tag_id,
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::DuplicateIdentity(identity.clone())
            } else {
                e.into()
            }
        })?;

        let id = tx.last_insert_rowid();
        let record = Self::fetch(&tx, &ServiceKey::Id(id))?
            .ok_or_else(|| RegistryError::storage("inserted service could not be read back"))?;
        tx.commit()?;

        Ok(record)
    }

    fn update(&self, key: &ServiceKey, info: &ServiceInfo) -> RegistryResult<ServiceRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::fetch(&tx, key)?.ok_or_else(|| RegistryError::not_found(key))?;
        let given = info.identity();
        if existing.identity != given {
            return Err(RegistryError::IdentityMismatch {
                existing: existing.identity,
                given,
            });
        }

        let tag_id = catalog::resolve_tag(&tx, &info.version_tag)?;

        tx.execute(
            "UPDATE service
             SET app_url = ?1, health_check_url = ?2, description = ?3, version_tag_id = ?4
             WHERE id = ?5",
            params![
                &info.app_url,
                &info.health_check_url,
                &info.description,
                tag_id,
                existing.id,
            ],
        )?;

        let record = Self::fetch(&tx, &ServiceKey::Id(existing.id))?
            .ok_or_else(|| RegistryError::not_found(key))?;
        tx.commit()?;

        Ok(record)
    }

    fn get(&self, key: &ServiceKey) -> RegistryResult<Option<ServiceRecord>> {
        let conn = self.lock()?;
        Ok(Self::fetch(&conn, key)?)
    }

    fn get_all(&self) -> RegistryResult<Vec<ServiceRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(SELECT_SERVICE)?;

        let services = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(services)
    }

    fn resolve_address(&self, identity: &ServiceIdentity) -> RegistryResult<String> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT app_url FROM service WHERE name = ?1 AND version = ?2",
            params![&identity.name, &identity.version],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| RegistryError::not_found(identity))
    }

    fn delete(&self, key: &ServiceKey) -> RegistryResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::fetch(&tx, key)?.ok_or_else(|| RegistryError::not_found(key))?;
        tx.execute("DELETE FROM service WHERE id = ?1", params![existing.id])?;
        tx.commit()?;

        Ok(())
    }

    fn set_status(
        &self,
        key: &ServiceKey,
        status: ServiceStatus,
        at: DateTime<Utc>,
    ) -> RegistryResult<ServiceRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = Self::fetch(&tx, key)?.ok_or_else(|| RegistryError::not_found(key))?;
        let sql = match status {
            ServiceStatus::Up => "UPDATE service SET status = ?1, last_start_time = ?2 WHERE id = ?3",
            ServiceStatus::Down => "UPDATE service SET status = ?1, last_stop_time = ?2 WHERE id = ?3",
        };
        tx.execute(sql, params![status.as_str(), at.to_rfc3339(), existing.id])?;

        let record = Self::fetch(&tx, &ServiceKey::Id(existing.id))?
            .ok_or_else(|| RegistryError::not_found(key))?;
        tx.commit()?;

        Ok(record)
    }

    fn record_activity(
        &self,
        identity: &ServiceIdentity,
        at: DateTime<Utc>,
    ) -> RegistryResult<ActivityRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let service_id: i64 = tx
            .query_row(
                "SELECT id FROM service WHERE name = ?1 AND version = ?2",
                params![&identity.name, &identity.version],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RegistryError::not_found(identity))?;
        upsert_activity(&tx, service_id, at)?;
        tx.commit()?;

        Ok(ActivityRecord {
            service_id,
            last_activity_time: at,
        })
    }

    fn list_activity(&self) -> RegistryResult<Vec<ActivityRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT service_id, last_activity_time FROM last_activity")?;

        let rows = stmt
            .query_map([], |row| {
                let time: String = row.get(1)?;
                Ok(ActivityRecord {
                    service_id: row.get(0)?,
                    last_activity_time: parse_time(1, &time)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}
