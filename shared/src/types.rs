use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// The unique (name, version) pair a service registers under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Reachability of a registered service. Only changed by explicit start/stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Up,
    #[default]
    Down,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Up => "UP",
            ServiceStatus::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(ServiceStatus::Up),
            "DOWN" => Some(ServiceStatus::Down),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration payload: everything a caller supplies about a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,

    /// Endpoint returned by address resolution
    pub app_url: String,

    /// Address a monitor could poll; the registry never calls it
    #[serde(default)]
    pub health_check_url: String,

    #[serde(default)]
    pub description: String,

    /// Must name an entry of the version tag catalog
    pub version_tag: String,
}

impl ServiceInfo {
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity::new(self.name.clone(), self.version.clone())
    }
}

/// A registered service as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Assigned on creation, never reused
    pub id: i64,

    #[serde(flatten)]
    pub identity: ServiceIdentity,

    pub app_url: String,
    pub health_check_url: String,
    pub description: String,
    pub status: ServiceStatus,
    pub version_tag: String,

    /// Set only by a start transition
    pub last_start_time: Option<DateTime<Utc>>,

    /// Set only by a stop transition
    pub last_stop_time: Option<DateTime<Utc>>,
}

/// Most recent activity observed for a service id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub service_id: i64,
    pub last_activity_time: DateTime<Utc>,
}
