#![allow(dead_code)]

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use meter_core::{Metadata, Sample};
use meter_db::{Connection, MemoryBackend, StoreBackend};
use tempfile::TempDir;

pub struct TestStore {
    pub label: &'static str,
    pub conn: Connection<StoreBackend>,
    pub path: Option<PathBuf>,
    _dir: Option<TempDir>,
}

pub fn setup_sqlite() -> TestStore {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("test.sqlite");
    let descriptor = format!("sqlite://localhost/{}", path.display());
    let conn = Connection::connect(&descriptor).expect("connect sqlite");
    TestStore {
        label: "sqlite",
        conn,
        path: Some(path),
        _dir: Some(dir),
    }
}

pub fn setup_memory() -> TestStore {
    let conn = Connection::connect("memory://localhost/test").expect("connect memory");
    TestStore {
        label: "memory",
        conn,
        path: None,
        _dir: None,
    }
}

/// One fresh store per backend, so behaviour can be asserted on both.
pub fn all_stores() -> Vec<TestStore> {
    vec![setup_sqlite(), setup_memory()]
}

pub fn memory_connection() -> Connection<MemoryBackend> {
    Connection::open(MemoryBackend::new()).expect("open memory")
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 7, 2, 10, 40, 0).unwrap()
}

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(offset_secs)
}

pub fn make_sample(
    user: &str,
    project: &str,
    resource: &str,
    meter: &str,
    volume: f64,
    source: &str,
    timestamp: DateTime<Utc>,
) -> Sample {
    Sample {
        source: source.to_string(),
        user_id: user.to_string(),
        project_id: project.to_string(),
        resource_id: resource.to_string(),
        counter_name: meter.to_string(),
        counter_type: "cumulative".to_string(),
        counter_volume: volume,
        timestamp,
        resource_metadata: Metadata::new(),
        message_id: None,
        message_signature: None,
    }
}

pub fn with_metadata(mut sample: Sample, key: &str, value: serde_json::Value) -> Sample {
    sample.resource_metadata.insert(key.to_string(), value);
    sample
}

/// Samples A and B: two users in one project, one meter.
pub fn seed_two_users(conn: &Connection<StoreBackend>) {
    conn.record_metering_data(&make_sample("u1", "p1", "r1", "instance", 1.0, "s1", t0()))
        .expect("record A");
    conn.record_metering_data(&make_sample("u2", "p1", "r2", "instance", 1.0, "s1", at(1)))
        .expect("record B");
}
