//! Machine inventory repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use beacon_core::{MachineRecord, MachineStatus, SourceError, StatusSnapshot, StatusSource};

use crate::database::Database;
use crate::error::StoreError;

const SELECT_LIVE: &str = "SELECT id, name, ip, cpu, memory, disk, status, created_at, updated_at \
     FROM machines WHERE deleted_at IS NULL";

/// Fields supplied when adding a machine.
#[derive(Clone, Debug)]
pub struct NewMachine {
    /// Display name.
    pub name: String,
    /// Management address.
    pub ip: String,
    /// CPU cores.
    pub cpu: i64,
    /// Memory, in GiB.
    pub memory: i64,
    /// Disk, in GiB.
    pub disk: i64,
    /// Initial state.
    pub status: MachineStatus,
}

impl NewMachine {
    /// An `offline` machine with zeroed capacity.
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
            cpu: 0,
            memory: 0,
            disk: 0,
            status: MachineStatus::Offline,
        }
    }

    /// Set CPU / memory / disk capacity.
    #[must_use]
    pub fn with_capacity(mut self, cpu: i64, memory: i64, disk: i64) -> Self {
        self.cpu = cpu;
        self.memory = memory;
        self.disk = disk;
        self
    }

    /// Set the initial status.
    #[must_use]
    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = status;
        self
    }
}

/// Row as read from SQLite, before timestamp decoding.
struct RawRow {
    id: i64,
    name: String,
    ip: String,
    cpu: i64,
    memory: i64,
    disk: i64,
    status: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            ip: row.get(2)?,
            cpu: row.get(3)?,
            memory: row.get(4)?,
            disk: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_record(self) -> Result<MachineRecord, StoreError> {
        let id = u64::try_from(self.id)
            .map_err(|_| StoreError::Malformed(format!("machine id {}", self.id)))?;
        Ok(MachineRecord {
            id,
            name: self.name,
            ip: self.ip,
            cpu: self.cpu,
            memory: self.memory,
            disk: self.disk,
            status: MachineStatus::from(self.status),
            created_at: parse_timestamp(id, &self.created_at)?,
            updated_at: parse_timestamp(id, &self.updated_at)?,
        })
    }
}

fn parse_timestamp(id: u64, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Malformed(format!("machine {id} timestamp {raw:?}: {e}")))
}

/// Reads and writes the `machines` table.
///
/// The hub only reads through [`StatusSource`]; the write side is for
/// whatever maintains the inventory (provisioning scripts, fixtures), and
/// every write is visible on the next publisher tick.
#[derive(Clone)]
pub struct MachineRepo {
    db: Database,
}

impl MachineRepo {
    /// Wrap a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add a machine and return the stored record.
    #[instrument(skip(self, machine), fields(name = %machine.name))]
    pub fn insert(&self, machine: &NewMachine) -> Result<MachineRecord, StoreError> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        let id = self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO machines (name, ip, cpu, memory, disk, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    machine.name,
                    machine.ip,
                    machine.cpu,
                    machine.memory,
                    machine.disk,
                    machine.status.as_str(),
                    stamp,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        let id = u64::try_from(id).map_err(|_| StoreError::Malformed(format!("machine id {id}")))?;

        Ok(MachineRecord {
            id,
            name: machine.name.clone(),
            ip: machine.ip.clone(),
            cpu: machine.cpu,
            memory: machine.memory,
            disk: machine.disk,
            status: machine.status.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a live machine by id.
    #[instrument(skip(self))]
    pub fn get(&self, id: u64) -> Result<MachineRecord, StoreError> {
        let raw = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_LIVE} AND id = ?1"),
                [to_sql_id(id)?],
                RawRow::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("machine {id}")),
                other => other.into(),
            })
        })?;
        raw.into_record()
    }

    /// Update the status of a live machine.
    #[instrument(skip(self), fields(status = status.as_str()))]
    pub fn set_status(&self, id: u64, status: &MachineStatus) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE machines SET status = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND deleted_at IS NULL",
                rusqlite::params![status.as_str(), Utc::now().to_rfc3339(), to_sql_id(id)?],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("machine {id}")));
        }
        Ok(())
    }

    /// Mark a machine deleted. It no longer appears in [`list`](Self::list).
    #[instrument(skip(self))]
    pub fn soft_delete(&self, id: u64) -> Result<(), StoreError> {
        let changed = self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            Ok(conn.execute(
                "UPDATE machines SET deleted_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND deleted_at IS NULL",
                rusqlite::params![now, to_sql_id(id)?],
            )?)
        })?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("machine {id}")));
        }
        Ok(())
    }

    /// All live machines, ordered by id.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<MachineRecord>, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_LIVE} ORDER BY id"))?;
            let rows = stmt
                .query_map([], RawRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(RawRow::into_record).collect()
    }
}

fn to_sql_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::NotFound(format!("machine {id}")))
}

#[async_trait]
impl StatusSource for MachineRepo {
    async fn fetch(&self) -> Result<StatusSnapshot, SourceError> {
        let repo = self.clone();
        let records = tokio::task::spawn_blocking(move || repo.list())
            .await
            .map_err(|e| SourceError::Unavailable(format!("inventory query task failed: {e}")))??;
        Ok(StatusSnapshot::new(records))
    }
}
