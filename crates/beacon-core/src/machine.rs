//! Machine inventory records and the snapshot the publisher broadcasts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported state of a machine.
///
/// Stored and serialized as a lowercase string. Values outside the known set
/// survive a round trip as [`MachineStatus::Other`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MachineStatus {
    /// Reachable and reporting.
    Online,
    /// Not reachable (the inventory default).
    #[default]
    Offline,
    /// Taken out of rotation by an operator.
    Maintenance,
    /// Any other value written by an external tool.
    Other(String),
}

impl MachineStatus {
    /// Wire / column value.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Maintenance => "maintenance",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MachineStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "online" => Self::Online,
            "offline" => Self::Offline,
            "maintenance" => Self::Maintenance,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for MachineStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<MachineStatus> for String {
    fn from(status: MachineStatus) -> Self {
        match status {
            MachineStatus::Other(s) => s,
            known => known.as_str().to_owned(),
        }
    }
}

/// One monitored machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Inventory primary key.
    pub id: u64,
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
    /// Current state.
    pub status: MachineStatus,
    /// When the record was created.
    #[serde(rename = "createTime")]
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    #[serde(rename = "updateTime")]
    pub updated_at: DateTime<Utc>,
}

impl MachineRecord {
    /// A record with zeroed capacity, `offline` status and current timestamps.
    pub fn new(id: u64, name: impl Into<String>, ip: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            ip: ip.into(),
            cpu: 0,
            memory: 0,
            disk: 0,
            status: MachineStatus::Offline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: MachineStatus) -> Self {
        self.status = status;
        self
    }

    /// Set CPU / memory / disk capacity.
    #[must_use]
    pub fn with_capacity(mut self, cpu: i64, memory: i64, disk: i64) -> Self {
        self.cpu = cpu;
        self.memory = memory;
        self.disk = disk;
        self
    }
}

/// Point-in-time list of machine records, in the order the source returned them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSnapshot(Vec<MachineRecord>);

impl StatusSnapshot {
    /// Wrap fetched records.
    pub fn new(records: Vec<MachineRecord>) -> Self {
        Self(records)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot has no records.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the records.
    pub fn records(&self) -> &[MachineRecord] {
        &self.0
    }
}

impl From<Vec<MachineRecord>> for StatusSnapshot {
    fn from(records: Vec<MachineRecord>) -> Self {
        Self(records)
    }
}
