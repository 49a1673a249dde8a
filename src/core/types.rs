use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a TCDS count station (e.g. `43H1A`, `S133`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Traffic-flow orientation of a directional AADT series.
///
/// Ordering follows declaration order, which is also the order directions are
/// harvested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DirectionCode {
    Northbound,
    Southbound,
    Eastbound,
    Westbound,
}

impl DirectionCode {
    pub const ALL: [DirectionCode; 4] = [
        DirectionCode::Northbound,
        DirectionCode::Southbound,
        DirectionCode::Eastbound,
        DirectionCode::Westbound,
    ];

    /// Short code used in composite result keys (`S1_NB`).
    pub fn code(self) -> &'static str {
        match self {
            DirectionCode::Northbound => "NB",
            DirectionCode::Southbound => "SB",
            DirectionCode::Eastbound => "EB",
            DirectionCode::Westbound => "WB",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DirectionCode::Northbound => "NORTHBOUND",
            DirectionCode::Southbound => "SOUTHBOUND",
            DirectionCode::Eastbound => "EASTBOUND",
            DirectionCode::Westbound => "WESTBOUND",
        }
    }
}

impl fmt::Display for DirectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDirection(pub String);

impl fmt::Display for UnknownDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a traffic direction: {:?}", self.0)
    }
}

impl std::error::Error for UnknownDirection {}

impl FromStr for DirectionCode {
    type Err = UnknownDirection;

    /// Accepts `NB`, `NORTHBOUND` and `North Bound` style labels, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        DirectionCode::ALL
            .into_iter()
            .find(|d| folded == d.code() || folded == d.name())
            .ok_or_else(|| UnknownDirection(s.to_string()))
    }
}

/// Key a result set is stored under: the bare station ID for the two-way
/// series, `{station}_{code}` for a directional one.
pub fn result_key(station: &StationId, direction: Option<DirectionCode>) -> String {
    match direction {
        Some(d) => format!("{}_{}", station, d.code()),
        None => station.to_string(),
    }
}

/// One AADT observation as shown in the station's history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AadtRecord {
    pub year: String,
    #[serde(rename = "aadt")]
    pub count: String,
}

impl AadtRecord {
    pub fn new(year: impl Into<String>, count: impl Into<String>) -> Self {
        Self {
            year: year.into(),
            count: count.into(),
        }
    }
}

/// Why a pagination walk stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Next-page control present but disabled.
    LastPage,
    /// No next-page control within the element timeout (single-page tables).
    NoNextControl,
    /// The AADT container never became visible.
    ContainerTimeout,
    /// Reading rows or driving the next-page control raised.
    PaginationError(String),
    /// Still paginating after the configured page cap.
    PageLimitExceeded(usize),
}

impl Termination {
    /// Terminations that should fail the station even though records are kept.
    pub fn is_station_failure(&self) -> bool {
        matches!(self, Termination::PageLimitExceeded(_))
    }
}

/// Records harvested for one (station, direction) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<AadtRecord>,
    pub pages_read: usize,
    pub termination: Termination,
}

/// Snapshot of one batch, written once at the batch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDescriptor {
    pub batch_number: u64,
    pub station_ids: Vec<StationId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub successful: BTreeSet<StationId>,
    pub failed: BTreeSet<StationId>,
}

impl BatchDescriptor {
    pub fn start(batch_number: u64, station_ids: Vec<StationId>) -> Self {
        Self {
            batch_number,
            station_ids,
            start_time: Utc::now(),
            end_time: None,
            successful: BTreeSet::new(),
            failed: BTreeSet::new(),
        }
    }

    pub fn record(&mut self, station: &StationId, success: bool) {
        if success {
            self.failed.remove(station);
            self.successful.insert(station.clone());
        } else {
            self.successful.remove(station);
            self.failed.insert(station.clone());
        }
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub first_batch: Option<u64>,
    pub batches_run: usize,
    pub stations_completed: usize,
    pub stations_failed: usize,
    pub skipped_completed: usize,
    pub interrupted: bool,
}
