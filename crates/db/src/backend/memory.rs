use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use meter_core::{RegistryRecord, ResourceRecord, Sample};
use parking_lot::RwLock;
use rayon::prelude::*;

use super::{Backend, IndexSpec, Registry, RowId};
use crate::error::{DbError, Result};
use crate::mapreduce::{MapReduce, Partial, map_partition, merge_partials};
use crate::query::Query;

/// Samples handed to one rayon task during map/reduce.
const PARTITION_SIZE: usize = 1024;

#[derive(Default)]
struct Collections {
    users: BTreeMap<String, BTreeSet<String>>,
    projects: BTreeMap<String, BTreeSet<String>>,
    resources: BTreeMap<String, ResourceRecord>,
    samples: Vec<Sample>,
    indexes: BTreeMap<String, IndexSpec>,
}

impl Collections {
    fn registry(&self, registry: Registry) -> &BTreeMap<String, BTreeSet<String>> {
        match registry {
            Registry::User => &self.users,
            Registry::Project => &self.projects,
        }
    }

    fn registry_mut(&mut self, registry: Registry) -> &mut BTreeMap<String, BTreeSet<String>> {
        match registry {
            Registry::User => &mut self.users,
            Registry::Project => &mut self.projects,
        }
    }
}

/// Process-local store. Useful for tests and for short-lived tools; nothing
/// survives the process.
#[derive(Default)]
pub struct MemoryBackend {
    data: RwLock<Collections>,
    credentials: Option<(String, String)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            data: RwLock::default(),
            credentials: Some((username.into(), password.into())),
        }
    }

    pub fn index_names(&self) -> Vec<String> {
        self.data.read().indexes.keys().cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.data.read().samples.len()
    }
}

impl Backend for MemoryBackend {
    fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        match &self.credentials {
            Some((user, pass)) if user == username && pass == password => Ok(()),
            _ => Err(DbError::Authentication(username.to_string())),
        }
    }

    fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        self.data
            .write()
            .indexes
            .entry(spec.name.clone())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    fn add_registry_source(&self, registry: Registry, key: &str, source: &str) -> Result<()> {
        self.data
            .write()
            .registry_mut(registry)
            .entry(key.to_string())
            .or_default()
            .insert(source.to_string());
        Ok(())
    }

    fn registry_record(&self, registry: Registry, key: &str) -> Result<Option<RegistryRecord>> {
        Ok(self
            .data
            .read()
            .registry(registry)
            .get(key)
            .map(|sources| RegistryRecord {
                id: key.to_string(),
                source: sources.clone(),
            }))
    }

    fn registry_keys(&self, registry: Registry, source: Option<&str>) -> Result<Vec<String>> {
        Ok(self
            .data
            .read()
            .registry(registry)
            .iter()
            .filter(|(_, sources)| source.is_none_or(|source| sources.contains(source)))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn upsert_resource(&self, sample: &Sample, received_timestamp: DateTime<Utc>) -> Result<()> {
        let mut data = self.data.write();
        let record = data
            .resources
            .entry(sample.resource_id.clone())
            .or_insert_with(|| ResourceRecord {
                resource_id: sample.resource_id.clone(),
                project_id: String::new(),
                user_id: String::new(),
                timestamp: sample.timestamp,
                received_timestamp,
                metadata: Default::default(),
                source: String::new(),
                meter: BTreeSet::new(),
            });
        record.project_id = sample.project_id.clone();
        record.user_id = sample.user_id.clone();
        record.timestamp = sample.timestamp;
        record.received_timestamp = received_timestamp;
        record.metadata = sample.resource_metadata.clone();
        record.source = sample.source.clone();
        record.meter.insert(sample.meter_ref());
        Ok(())
    }

    fn append_sample(&self, sample: Sample) -> Result<()> {
        self.data.write().samples.push(sample);
        Ok(())
    }

    fn find_resources(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        Ok(self
            .data
            .read()
            .resources
            .values()
            .filter(|resource| query.matches(*resource))
            .cloned()
            .collect())
    }

    fn find_resources_with_samples(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        let data = self.data.read();
        let ids: BTreeSet<&str> = data
            .samples
            .iter()
            .filter(|sample| query.matches(*sample))
            .map(|sample| sample.resource_id.as_str())
            .collect();
        Ok(ids
            .into_iter()
            .filter_map(|id| data.resources.get(id).cloned())
            .collect())
    }

    fn distinct_resource_ids(&self, query: &Query) -> Result<Vec<String>> {
        let data = self.data.read();
        let ids: BTreeSet<&String> = data
            .samples
            .iter()
            .filter(|sample| query.matches(*sample))
            .map(|sample| &sample.resource_id)
            .collect();
        Ok(ids.into_iter().cloned().collect())
    }

    fn scan_samples(
        &self,
        query: &Query,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<(RowId, Sample)>> {
        // Row ids are 1-based positions in the append-only log.
        let start = after.map(|row| row as usize).unwrap_or(0);
        let data = self.data.read();
        let Some(tail) = data.samples.get(start..) else {
            return Ok(Vec::new());
        };
        Ok(tail
            .iter()
            .zip(start + 1..)
            .filter(|(sample, _)| query.matches(*sample))
            .take(limit)
            .map(|(sample, row)| (row as RowId, sample.clone()))
            .collect())
    }

    fn map_reduce<J: MapReduce>(&self, query: &Query, job: &J) -> Result<Partial<J>> {
        let data = self.data.read();
        Ok(data
            .samples
            .par_chunks(PARTITION_SIZE)
            .map(|chunk| map_partition(job, chunk.iter().filter(|sample| query.matches(*sample))))
            .reduce(Partial::<J>::new, |left, right| {
                merge_partials(job, left, right)
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapreduce::VolumeSum;
    use crate::query::{Clause, Field};
    use chrono::TimeZone;

    fn sample(resource: &str, index: usize) -> Sample {
        Sample {
            source: "s1".to_string(),
            user_id: format!("u{}", index % 3),
            project_id: "p1".to_string(),
            resource_id: resource.to_string(),
            counter_name: "cpu".to_string(),
            counter_type: "gauge".to_string(),
            counter_volume: 1.0,
            timestamp: Utc.with_ymd_and_hms(2012, 7, 2, 10, 40, 0).unwrap(),
            resource_metadata: Default::default(),
            message_id: None,
            message_signature: None,
        }
    }

    #[test]
    fn scan_resumes_after_row_id() {
        let backend = MemoryBackend::new();
        for index in 0..5 {
            backend
                .append_sample(sample(&format!("r{index}"), index))
                .expect("append");
        }
        let first = backend.scan_samples(&Query::new(), None, 2).expect("scan");
        assert_eq!(first.len(), 2);
        let after = first.last().map(|(row, _)| *row);
        let rest = backend.scan_samples(&Query::new(), after, 10).expect("scan");
        let ids: Vec<_> = rest.iter().map(|(_, s)| s.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn scan_past_the_end_is_empty() {
        let backend = MemoryBackend::new();
        backend.append_sample(sample("r0", 0)).expect("append");
        assert!(backend.scan_samples(&Query::new(), Some(1), 10).expect("scan").is_empty());
        assert!(backend.scan_samples(&Query::new(), Some(50), 10).expect("scan").is_empty());
        let filtered = Query::new().with(Clause::Eq(Field::ResourceId, "r0".to_string()));
        let rows = backend.scan_samples(&filtered, None, 10).expect("scan");
        assert_eq!(rows.iter().map(|(row, _)| *row).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn parallel_map_reduce_matches_paged_default() {
        let backend = MemoryBackend::new();
        for index in 0..(PARTITION_SIZE * 3 + 17) {
            backend
                .append_sample(sample(&format!("r{}", index % 7), index))
                .expect("append");
        }
        let query = Query::new().with(Clause::Eq(Field::UserId, "u1".to_string()));
        let parallel = backend.map_reduce(&query, &VolumeSum).expect("parallel");

        let paged = backend
            .scan_samples(&query, None, usize::MAX)
            .expect("scan");
        let expected = map_partition(&VolumeSum, paged.iter().map(|(_, sample)| sample));
        assert_eq!(parallel, expected);
    }

    #[test]
    fn authenticate_requires_configured_credentials() {
        assert!(MemoryBackend::new().authenticate("admin", "").is_err());
        let backend = MemoryBackend::with_credentials("admin", "secret");
        backend.authenticate("admin", "secret").expect("valid");
        assert!(backend.authenticate("admin", "nope").is_err());
    }
}
