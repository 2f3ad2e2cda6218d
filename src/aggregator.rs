use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{RecordStore, StoredRecord};

// ─── Report shapes ───────────────────────────────────────────────

/// How records of one gear are folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// One child entry per flush record.
    #[default]
    Detailed,
    /// One hit total per gear.
    Collapsed,
}

impl FromStr for ReportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detailed" => Ok(Self::Detailed),
            "collapsed" => Ok(Self::Collapsed),
            other => Err(format!("unknown report mode '{other}'")),
        }
    }
}

/// Root of a detailed report. The `type` tags are what the dashboard
/// switches on when it merges polled trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Application {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub children: Vec<Gear>,
    /// Newest record timestamp in this report, usable as the next `since`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gear {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub children: Vec<Hit>,
}

/// One flush record as a leaf of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hit {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub count: u64,
}

/// Root of a collapsed report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub name: String,
    pub gears: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Detailed(Application),
    Collapsed(Totals),
}

impl Report {
    /// Folds records into a report. Records are ordered by `(timestamp, id)`
    /// first, and a second record with the same `(gear, timestamp)` as an
    /// earlier one is dropped, so the result does not depend on store order.
    pub fn build(name: &str, mut records: Vec<StoredRecord>, mode: ReportMode) -> Self {
        records.sort_by_key(|r| (r.timestamp, r.id));

        let mut seen = HashSet::with_capacity(records.len());
        let records: Vec<&StoredRecord> = records
            .iter()
            .filter(|&r| seen.insert((r.instance_id.as_str(), r.timestamp)))
            .collect();
        let latest = records.last().map(|r| r.timestamp);

        match mode {
            ReportMode::Detailed => {
                let mut children: Vec<Gear> = Vec::new();
                let mut index: HashMap<&str, usize> = HashMap::new();

                for record in records {
                    let slot = *index.entry(record.instance_id.as_str()).or_insert_with(|| {
                        children.push(Gear {
                            uuid: record.instance_id.clone(),
                            kind: "gear",
                            children: Vec::new(),
                        });
                        children.len() - 1
                    });
                    children[slot].children.push(Hit {
                        id: record.id.to_string(),
                        kind: "hit",
                        timestamp: record.timestamp,
                        count: record.hits,
                    });
                }

                Self::Detailed(Application {
                    name: name.to_string(),
                    kind: "application",
                    children,
                    latest,
                })
            }
            ReportMode::Collapsed => {
                let mut gears = BTreeMap::new();
                for record in records {
                    *gears.entry(record.instance_id.clone()).or_insert(0) += record.hits;
                }
                Self::Collapsed(Totals {
                    name: name.to_string(),
                    gears,
                    latest,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Detailed(app) => &app.name,
            Self::Collapsed(totals) => &totals.name,
        }
    }

    /// Newest record timestamp included, `None` for an empty report.
    pub fn latest(&self) -> Option<i64> {
        match self {
            Self::Detailed(app) => app.latest,
            Self::Collapsed(totals) => totals.latest,
        }
    }

    /// Number of gear nodes under the root.
    pub fn gear_count(&self) -> usize {
        match self {
            Self::Detailed(app) => app.children.len(),
            Self::Collapsed(totals) => totals.gears.len(),
        }
    }

    pub fn total_hits(&self) -> u64 {
        match self {
            Self::Detailed(app) => app
                .children
                .iter()
                .flat_map(|g| g.children.iter())
                .map(|h| h.count)
                .sum(),
            Self::Collapsed(totals) => totals.gears.values().sum(),
        }
    }
}

// ─── Aggregator ──────────────────────────────────────────────────

/// Read side: reconstructs hit counts of every gear from the record store.
/// Never touches any gear's in-memory accumulator.
pub struct Aggregator<S> {
    store: Arc<S>,
    application: String,
}

impl<S: RecordStore> Aggregator<S> {
    pub fn new(store: Arc<S>, application: impl Into<String>) -> Self {
        Self {
            store,
            application: application.into(),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Report over every record strictly newer than `since_ms`.
    /// A store failure is returned as-is, never as an empty report.
    pub async fn query(&self, since_ms: i64, mode: ReportMode) -> Result<Report, StoreError> {
        let records = self.store.range_query(since_ms).await?;
        tracing::debug!(since_ms, records = records.len(), ?mode, "Aggregating hits");
        Ok(Report::build(&self.application, records, mode))
    }
}
