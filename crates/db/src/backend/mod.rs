mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use meter_core::{RegistryRecord, ResourceRecord, Sample};

use crate::descriptor::ConnectionDescriptor;
use crate::error::{DbError, Result};
use crate::mapreduce::{MapReduce, Partial, map_partition, merge_partials};
use crate::query::{Clause, Field, Query};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Store-internal position of a raw-log row. Only used to resume scans.
pub type RowId = u64;

/// Rows fetched per page when a backend pages through the raw log.
pub const SCAN_PAGE_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Registry {
    User,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Resource,
    Sample,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexSpec {
    pub name: String,
    pub collection: Collection,
    pub fields: Vec<IndexField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexField {
    Query(Field),
    Timestamp,
}

/// Capabilities the engine needs from a backing store.
///
/// Every method takes `&self`; implementations must make each single-record
/// update atomic and tolerate concurrent callers.
pub trait Backend: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<()>;

    /// Brings the storage layout up to date. Runs after authentication and
    /// before any other call.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn ensure_index(&self, spec: &IndexSpec) -> Result<()>;

    /// Adds `source` to the source set of a user or project, creating the
    /// record if needed.
    fn add_registry_source(&self, registry: Registry, key: &str, source: &str) -> Result<()>;

    fn registry_record(&self, registry: Registry, key: &str) -> Result<Option<RegistryRecord>>;

    /// Registry keys, ascending. With `source`, only records whose source
    /// set contains it.
    fn registry_keys(&self, registry: Registry, source: Option<&str>) -> Result<Vec<String>>;

    /// Overwrites the latest-state fields of the sample's resource and adds
    /// the sample's meter to its meter set.
    fn upsert_resource(&self, sample: &Sample, received_timestamp: DateTime<Utc>) -> Result<()>;

    fn append_sample(&self, sample: Sample) -> Result<()>;

    fn find_resources(&self, query: &Query) -> Result<Vec<ResourceRecord>>;

    /// Resource records of the resources that have at least one raw-log row
    /// matching `query`. The default resolves the ids first and then looks
    /// them up by id.
    fn find_resources_with_samples(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        let ids = self.distinct_resource_ids(query)?;
        self.find_resources(&Query::new().with(Clause::In(Field::ResourceId, ids)))
    }

    /// Distinct `resource_id` values of raw-log rows matching the query.
    fn distinct_resource_ids(&self, query: &Query) -> Result<Vec<String>>;

    /// Up to `limit` matching raw-log rows positioned after `after`, in
    /// insertion order.
    fn scan_samples(
        &self,
        query: &Query,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<(RowId, Sample)>>;

    /// Runs `job` over the matching raw-log rows.
    ///
    /// The default pages through [`Backend::scan_samples`], maps every page
    /// into a partial result and folds the partials together, so at most one
    /// page of samples is held at a time.
    fn map_reduce<J: MapReduce>(&self, query: &Query, job: &J) -> Result<Partial<J>>
    where
        Self: Sized,
    {
        let mut total = Partial::<J>::new();
        let mut after = None;
        loop {
            let page = self.scan_samples(query, after, SCAN_PAGE_SIZE)?;
            let Some((last, _)) = page.last() else {
                break;
            };
            after = Some(*last);
            let exhausted = page.len() < SCAN_PAGE_SIZE;
            let partial = map_partition(job, page.iter().map(|(_, sample)| sample));
            total = merge_partials(job, total, partial);
            if exhausted {
                break;
            }
        }
        Ok(total)
    }
}

/// Backend selected by the descriptor's scheme.
pub enum StoreBackend {
    Sqlite(SqliteBackend),
    Memory(MemoryBackend),
}

impl StoreBackend {
    pub fn open(descriptor: &ConnectionDescriptor) -> Result<Self> {
        match descriptor.dbtype.as_str() {
            // With credentials a missing file is not created: nothing may be
            // written before authentication succeeds.
            "sqlite" => Ok(Self::Sqlite(SqliteBackend::attach(
                &descriptor.dbname,
                !descriptor.has_credentials(),
            )?)),
            "memory" => Ok(Self::Memory(MemoryBackend::new())),
            other => Err(DbError::UnsupportedScheme(other.to_string())),
        }
    }
}

macro_rules! delegate {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            StoreBackend::Sqlite($backend) => $call,
            StoreBackend::Memory($backend) => $call,
        }
    };
}

impl Backend for StoreBackend {
    fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        delegate!(self, backend => backend.authenticate(username, password))
    }

    fn initialize(&self) -> Result<()> {
        delegate!(self, backend => backend.initialize())
    }

    fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        delegate!(self, backend => backend.ensure_index(spec))
    }

    fn add_registry_source(&self, registry: Registry, key: &str, source: &str) -> Result<()> {
        delegate!(self, backend => backend.add_registry_source(registry, key, source))
    }

    fn registry_record(&self, registry: Registry, key: &str) -> Result<Option<RegistryRecord>> {
        delegate!(self, backend => backend.registry_record(registry, key))
    }

    fn registry_keys(&self, registry: Registry, source: Option<&str>) -> Result<Vec<String>> {
        delegate!(self, backend => backend.registry_keys(registry, source))
    }

    fn upsert_resource(&self, sample: &Sample, received_timestamp: DateTime<Utc>) -> Result<()> {
        delegate!(self, backend => backend.upsert_resource(sample, received_timestamp))
    }

    fn append_sample(&self, sample: Sample) -> Result<()> {
        delegate!(self, backend => backend.append_sample(sample))
    }

    fn find_resources(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        delegate!(self, backend => backend.find_resources(query))
    }

    fn find_resources_with_samples(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        delegate!(self, backend => backend.find_resources_with_samples(query))
    }

    fn distinct_resource_ids(&self, query: &Query) -> Result<Vec<String>> {
        delegate!(self, backend => backend.distinct_resource_ids(query))
    }

    fn scan_samples(
        &self,
        query: &Query,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<(RowId, Sample)>> {
        delegate!(self, backend => backend.scan_samples(query, after, limit))
    }

    fn map_reduce<J: MapReduce>(&self, query: &Query, job: &J) -> Result<Partial<J>>
    where
        Self: Sized,
    {
        delegate!(self, backend => backend.map_reduce(query, job))
    }
}
