use meter_core::{RegistryRecord, ResourceQuery, ResourceRecord, Sample, SampleFilter, present};
use tracing::debug;

use crate::backend::{Backend, Registry, RowId, SCAN_PAGE_SIZE};
use crate::connection::Connection;
use crate::error::Result;
use crate::query::{Clause, Field, Query, translate};

impl<B: Backend> Connection<B> {
    /// Users that have reported data, ascending. With a non-empty `source`,
    /// only users seen from that source.
    pub fn list_users(&self, source: Option<&str>) -> Result<Vec<String>> {
        self.registry_keys(Registry::User, source)
    }

    pub fn list_projects(&self, source: Option<&str>) -> Result<Vec<String>> {
        self.registry_keys(Registry::Project, source)
    }

    pub fn user_record(&self, user_id: &str) -> Result<Option<RegistryRecord>> {
        self.backend.registry_record(Registry::User, user_id)
    }

    pub fn project_record(&self, project_id: &str) -> Result<Option<RegistryRecord>> {
        self.backend.registry_record(Registry::Project, project_id)
    }

    fn registry_keys(&self, registry: Registry, source: Option<&str>) -> Result<Vec<String>> {
        let source = source.filter(|source| !source.is_empty());
        let mut keys = self.backend.registry_keys(registry, source)?;
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Resources matching the ownership and source constraints.
    ///
    /// With a time bound the raw log decides which resources qualify, since
    /// the registry only keeps the latest timestamp of each resource.
    pub fn list_resources(&self, params: &ResourceQuery) -> Result<Vec<ResourceRecord>> {
        let mut query = Query::new();
        if let Some(user) = present(&params.user) {
            query.push(Clause::Eq(Field::UserId, user.to_string()));
        }
        if let Some(project) = present(&params.project) {
            query.push(Clause::Eq(Field::ProjectId, project.to_string()));
        }
        if let Some(meter) = present(&params.meter) {
            query.push(Clause::Eq(Field::CounterName, meter.to_string()));
        }
        if let Some(source) = present(&params.source) {
            query.push(Clause::Eq(Field::Source, source.to_string()));
        }

        let range = params.time_range();
        let mut resources = if range.is_unbounded() {
            self.backend.find_resources(&query)?
        } else {
            query.push(Clause::Timestamp(range));
            self.backend.find_resources_with_samples(&query)?
        };
        debug!(resources = resources.len(), "listed resources");
        resources.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(resources)
    }

    /// Raw samples matching `filter`, in insertion order. The meter is
    /// optional here. Samples are fetched a page at a time as the iterator
    /// advances.
    pub fn list_raw_events(&self, filter: &SampleFilter) -> Result<RawEvents<'_, B>> {
        let query = translate(filter, false)?;
        debug!(clauses = query.clauses().len(), "listing raw events");
        Ok(RawEvents::new(&self.backend, query))
    }
}

/// Single forward pass over matching raw-log rows.
pub struct RawEvents<'a, B: Backend> {
    backend: &'a B,
    query: Query,
    page_size: usize,
    after: Option<RowId>,
    page: std::vec::IntoIter<(RowId, Sample)>,
    done: bool,
}

impl<'a, B: Backend> RawEvents<'a, B> {
    fn new(backend: &'a B, query: Query) -> Self {
        Self {
            backend,
            query,
            page_size: SCAN_PAGE_SIZE,
            after: None,
            page: Vec::new().into_iter(),
            done: false,
        }
    }

    /// Rows fetched per backend round trip.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl<B: Backend> Iterator for RawEvents<'_, B> {
    type Item = Result<Sample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((row, sample)) = self.page.next() {
                self.after = Some(row);
                return Some(Ok(sample));
            }
            if self.done {
                return None;
            }
            match self
                .backend
                .scan_samples(&self.query, self.after, self.page_size)
            {
                Ok(page) => {
                    self.done = page.len() < self.page_size;
                    self.page = page.into_iter();
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
