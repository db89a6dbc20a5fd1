use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One timestamped usage reading for a resource and meter, as handed over by
/// the ingestion pipeline. Stored verbatim in the raw log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub source: String,
    pub user_id: String,
    pub project_id: String,
    pub resource_id: String,
    pub counter_name: String,
    pub counter_type: String,
    pub counter_volume: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_signature: Option<String>,
}

impl Sample {
    pub fn meter_ref(&self) -> MeterRef {
        MeterRef {
            counter_name: self.counter_name.clone(),
            counter_type: self.counter_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MeterRef {
    pub counter_name: String,
    pub counter_type: String,
}

/// User or project registry entry: the sources that have reported data for the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub id: String,
    pub source: BTreeSet<String>,
}

pub type UserRecord = RegistryRecord;
pub type ProjectRecord = RegistryRecord;

/// Latest known state of a resource. Every field except `meter` reflects the
/// most recently recorded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub resource_id: String,
    pub project_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub received_timestamp: DateTime<Utc>,
    pub metadata: Metadata,
    pub source: String,
    pub meter: BTreeSet<MeterRef>,
}

/// Half-open interval `[start, end)`; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        if let Some(start) = self.start
            && *ts < start
        {
            return false;
        }
        if let Some(end) = self.end
            && *ts >= end
        {
            return false;
        }
        true
    }
}

/// Optional constraints narrowing which samples a query considers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleFilter {
    pub user: Option<String>,
    pub project: Option<String>,
    pub meter: Option<String>,
    pub resource: Option<String>,
    pub source: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SampleFilter {
    pub fn for_meter(meter: impl Into<String>) -> Self {
        Self {
            meter: Some(meter.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_range(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

/// Arguments of a resource listing. Unlike [`SampleFilter`], `user` and
/// `project` are applied together when both are set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuery {
    pub user: Option<String>,
    pub project: Option<String>,
    /// Only resources that report this meter. With a time bound, only
    /// resources with a sample of this meter inside it.
    pub meter: Option<String>,
    pub source: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl ResourceQuery {
    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeValue {
    pub resource_id: String,
    pub value: f64,
}

/// Earliest and latest timestamps of the matching samples; both `None` when
/// nothing matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInterval {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

impl EventInterval {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Returns the value when it is set and non-empty. An empty string means
/// "no constraint", never "match empty".
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}
