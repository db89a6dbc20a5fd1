use meter_core::{ResourceRecord, Sample, SampleFilter, TimeRange, present};

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    UserId,
    ProjectId,
    ResourceId,
    CounterName,
    Source,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Eq(Field, String),
    In(Field, Vec<String>),
    /// `{ timestamp >= start, timestamp < end }`
    Timestamp(TimeRange),
}

/// Store-native query: a conjunction of clauses. An empty query matches
/// everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn with(mut self, clause: Clause) -> Self {
        self.push(clause);
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches<D: Document + ?Sized>(&self, doc: &D) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, value) => doc.field_matches(*field, value),
            Clause::In(field, values) => values.iter().any(|value| doc.field_matches(*field, value)),
            Clause::Timestamp(range) => range.contains(doc.timestamp()),
        })
    }
}

/// Anything a [`Query`] can be evaluated against in process.
pub trait Document {
    fn field_matches(&self, field: Field, value: &str) -> bool;
    fn timestamp(&self) -> &chrono::DateTime<chrono::Utc>;
}

impl Document for Sample {
    fn field_matches(&self, field: Field, value: &str) -> bool {
        match field {
            Field::UserId => self.user_id == value,
            Field::ProjectId => self.project_id == value,
            Field::ResourceId => self.resource_id == value,
            Field::CounterName => self.counter_name == value,
            Field::Source => self.source == value,
        }
    }

    fn timestamp(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.timestamp
    }
}

impl Document for ResourceRecord {
    fn field_matches(&self, field: Field, value: &str) -> bool {
        match field {
            Field::UserId => self.user_id == value,
            Field::ProjectId => self.project_id == value,
            Field::ResourceId => self.resource_id == value,
            Field::CounterName => self.meter.iter().any(|meter| meter.counter_name == value),
            Field::Source => self.source == value,
        }
    }

    fn timestamp(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.timestamp
    }
}

/// Builds the raw-log query for a filter.
///
/// `user` takes precedence over `project`: when both are set only the user
/// constraint is applied. With `require_meter` the filter must name a meter,
/// otherwise [`DbError::MissingMeter`] is returned before any store access.
pub fn translate(filter: &SampleFilter, require_meter: bool) -> Result<Query> {
    let mut query = Query::new();

    if let Some(user) = present(&filter.user) {
        query.push(Clause::Eq(Field::UserId, user.to_string()));
    } else if let Some(project) = present(&filter.project) {
        query.push(Clause::Eq(Field::ProjectId, project.to_string()));
    }

    match present(&filter.meter) {
        Some(meter) => query.push(Clause::Eq(Field::CounterName, meter.to_string())),
        None if require_meter => return Err(DbError::MissingMeter),
        None => {}
    }

    let range = filter.time_range();
    if !range.is_unbounded() {
        query.push(Clause::Timestamp(range));
    }

    if let Some(resource) = present(&filter.resource) {
        query.push(Clause::Eq(Field::ResourceId, resource.to_string()));
    }
    if let Some(source) = present(&filter.source) {
        query.push(Clause::Eq(Field::Source, source.to_string()));
    }

    Ok(query)
}
