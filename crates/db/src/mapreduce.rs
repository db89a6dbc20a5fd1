use std::collections::BTreeMap;

use meter_core::Sample;

use crate::temporal::to_micros;

/// A two-phase aggregation over raw-log samples.
///
/// `map` emits zero or more key/value pairs per sample; `reduce` combines two
/// values for the same key. `reduce` must be associative and commutative:
/// backends may map arbitrary partitions of the input independently and merge
/// the partial results in any order, in as many passes as they like.
pub trait MapReduce: Sync {
    type Key: Ord + Send;
    type Value: Send;

    fn map(&self, sample: &Sample, emit: &mut dyn FnMut(Self::Key, Self::Value));

    fn reduce(&self, key: &Self::Key, left: Self::Value, right: Self::Value) -> Self::Value;
}

pub type Partial<J> = BTreeMap<<J as MapReduce>::Key, <J as MapReduce>::Value>;

/// Maps one partition of samples into a partial result.
pub fn map_partition<'a, J, I>(job: &J, samples: I) -> Partial<J>
where
    J: MapReduce,
    I: IntoIterator<Item = &'a Sample>,
{
    let mut partial = Partial::<J>::new();
    for sample in samples {
        job.map(sample, &mut |key: J::Key, value: J::Value| {
            combine_into(job, &mut partial, key, value)
        });
    }
    partial
}

/// Merges two partial results with the job's reduce.
pub fn merge_partials<J: MapReduce>(job: &J, mut left: Partial<J>, right: Partial<J>) -> Partial<J> {
    if left.len() < right.len() {
        return merge_partials(job, right, left);
    }
    for (key, value) in right {
        combine_into(job, &mut left, key, value);
    }
    left
}

fn combine_into<J: MapReduce>(job: &J, partial: &mut Partial<J>, key: J::Key, value: J::Value) {
    let merged = match partial.remove(&key) {
        Some(current) => job.reduce(&key, current, value),
        None => value,
    };
    partial.insert(key, merged);
}

/// Total `counter_volume` per resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeSum;

impl MapReduce for VolumeSum {
    type Key = String;
    type Value = f64;

    fn map(&self, sample: &Sample, emit: &mut dyn FnMut(String, f64)) {
        emit(sample.resource_id.clone(), sample.counter_volume);
    }

    fn reduce(&self, _key: &String, left: f64, right: f64) -> f64 {
        left + right
    }
}

/// Largest `counter_volume` per resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeMax;

impl MapReduce for VolumeMax {
    type Key = String;
    type Value = f64;

    fn map(&self, sample: &Sample, emit: &mut dyn FnMut(String, f64)) {
        emit(sample.resource_id.clone(), sample.counter_volume);
    }

    fn reduce(&self, _key: &String, left: f64, right: f64) -> f64 {
        left.max(right)
    }
}

pub const INTERVAL_KEY: &str = "timestamp";

/// Earliest and latest sample timestamp, as epoch microseconds, under a
/// single fixed key.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampInterval;

impl MapReduce for TimestampInterval {
    type Key = &'static str;
    type Value = (i64, i64);

    fn map(&self, sample: &Sample, emit: &mut dyn FnMut(&'static str, (i64, i64))) {
        let micros = to_micros(&sample.timestamp);
        emit(INTERVAL_KEY, (micros, micros));
    }

    fn reduce(&self, _key: &&'static str, left: (i64, i64), right: (i64, i64)) -> (i64, i64) {
        (left.0.min(right.0), left.1.max(right.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2012, 7, 2, 10, 40, 0).unwrap()
    }

    fn sample(resource: &str, volume: f64, offset_secs: i64) -> Sample {
        Sample {
            source: "s1".to_string(),
            user_id: "u1".to_string(),
            project_id: "p1".to_string(),
            resource_id: resource.to_string(),
            counter_name: "cpu".to_string(),
            counter_type: "gauge".to_string(),
            counter_volume: volume,
            timestamp: t0() + Duration::seconds(offset_secs),
            resource_metadata: Default::default(),
            message_id: None,
            message_signature: None,
        }
    }

    fn samples() -> Vec<Sample> {
        vec![
            sample("r1", 1.0, 0),
            sample("r2", 4.0, 30),
            sample("r1", 2.0, -10),
            sample("r3", 8.0, 5),
            sample("r2", 16.0, 90),
            sample("r1", 32.0, 45),
        ]
    }

    #[test]
    fn volume_sum_is_stable_under_partitioning() {
        let all = samples();
        let single = map_partition(&VolumeSum, &all);
        for split in 0..=all.len() {
            let (left, right) = all.split_at(split);
            let merged = merge_partials(
                &VolumeSum,
                map_partition(&VolumeSum, left),
                map_partition(&VolumeSum, right),
            );
            assert_eq!(merged, single, "split at {split}");
        }
        assert_eq!(single.get("r1"), Some(&35.0));
        assert_eq!(single.get("r2"), Some(&20.0));
        assert_eq!(single.get("r3"), Some(&8.0));
    }

    #[test]
    fn volume_max_merges_in_any_order() {
        let all = samples();
        let (left, right) = all.split_at(3);
        let a = map_partition(&VolumeMax, left);
        let b = map_partition(&VolumeMax, right);
        let forward = merge_partials(&VolumeMax, a.clone(), b.clone());
        let backward = merge_partials(&VolumeMax, b, a);
        assert_eq!(forward, backward);
        assert_eq!(forward.get("r1"), Some(&32.0));
        assert_eq!(forward.get("r2"), Some(&16.0));
    }

    #[test]
    fn interval_tracks_min_and_max() {
        let all = samples();
        let partial = map_partition(&TimestampInterval, &all);
        assert_eq!(partial.len(), 1);
        let (min, max) = partial[INTERVAL_KEY];
        assert_eq!(min, to_micros(&(t0() - Duration::seconds(10))));
        assert_eq!(max, to_micros(&(t0() + Duration::seconds(90))));
    }

    #[test]
    fn empty_partition_yields_empty_result() {
        let partial = map_partition(&TimestampInterval, &Vec::new());
        assert!(partial.is_empty());
    }
}
