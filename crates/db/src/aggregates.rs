use meter_core::{EventInterval, SampleFilter, VolumeValue};
use tracing::debug;

use crate::backend::Backend;
use crate::connection::Connection;
use crate::error::Result;
use crate::mapreduce::{INTERVAL_KEY, MapReduce, TimestampInterval, VolumeMax, VolumeSum};
use crate::query::translate;
use crate::temporal::coerce_timestamp;

impl<B: Backend> Connection<B> {
    /// Total volume per resource over the samples matching `filter`. The
    /// filter must name a meter.
    pub fn volume_sum(&self, filter: &SampleFilter) -> Result<Vec<VolumeValue>> {
        self.per_resource(filter, &VolumeSum)
    }

    /// Largest single volume per resource. The filter must name a meter.
    pub fn volume_max(&self, filter: &SampleFilter) -> Result<Vec<VolumeValue>> {
        self.per_resource(filter, &VolumeMax)
    }

    /// Earliest and latest timestamp among the matching samples.
    pub fn event_interval(&self, filter: &SampleFilter) -> Result<EventInterval> {
        let query = translate(filter, true)?;
        let partial = self.backend.map_reduce(&query, &TimestampInterval)?;
        let Some(&(min, max)) = partial.get(INTERVAL_KEY) else {
            return Ok(EventInterval::default());
        };
        Ok(EventInterval {
            min: Some(coerce_timestamp(min)?),
            max: Some(coerce_timestamp(max)?),
        })
    }

    fn per_resource<J>(&self, filter: &SampleFilter, job: &J) -> Result<Vec<VolumeValue>>
    where
        J: MapReduce<Key = String, Value = f64>,
    {
        let query = translate(filter, true)?;
        let partial = self.backend.map_reduce(&query, job)?;
        debug!(resources = partial.len(), "aggregated volumes");
        Ok(partial
            .into_iter()
            .map(|(resource_id, value)| VolumeValue { resource_id, value })
            .collect())
    }
}
