use std::io::BufRead;

use meter_core::Sample;
use meter_db::{Backend, Connection};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Default, Serialize)]
pub struct IngestStats {
    pub lines_read: usize,
    pub samples_recorded: usize,
    pub issues: Vec<IngestIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestIssue {
    pub line: usize,
    pub message: String,
}

/// Records one sample per JSON line of `reader`. Blank lines are skipped and
/// undecodable lines are reported as issues; store errors abort the load.
pub fn load_samples<B, R>(conn: &Connection<B>, reader: R) -> Result<IngestStats>
where
    B: Backend,
    R: BufRead,
{
    let mut stats = IngestStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = index + 1;
        stats.lines_read += 1;
        if line.trim().is_empty() {
            continue;
        }
        let sample: Sample = match serde_json::from_str(&line) {
            Ok(sample) => sample,
            Err(err) => {
                warn!(line = line_number, error = %err, "skipping undecodable sample");
                stats.issues.push(IngestIssue {
                    line: line_number,
                    message: err.to_string(),
                });
                continue;
            }
        };
        conn.record_metering_data(&sample)?;
        stats.samples_recorded += 1;
    }
    info!(
        lines = stats.lines_read,
        recorded = stats.samples_recorded,
        issues = stats.issues.len(),
        "sample load finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_core::SampleFilter;
    use meter_db::MemoryBackend;
    use std::io::Cursor;

    const SAMPLE_A: &str = r#"{"source":"s1","user_id":"u1","project_id":"p1","resource_id":"r1","counter_name":"instance","counter_type":"cumulative","counter_volume":1,"timestamp":"2012-07-02T10:40:00Z","resource_metadata":{"display_name":"vm-1"}}"#;
    const SAMPLE_B: &str = r#"{"source":"s1","user_id":"u2","project_id":"p1","resource_id":"r2","counter_name":"instance","counter_type":"cumulative","counter_volume":2.5,"timestamp":"2012-07-02T10:40:01Z","message_id":"m-2"}"#;

    #[test]
    fn loads_lines_and_reports_bad_ones() {
        let conn = Connection::open(MemoryBackend::new()).expect("open");
        let input = format!("{SAMPLE_A}\n\n{{not json}}\n{SAMPLE_B}\n");

        let stats = load_samples(&conn, Cursor::new(input)).expect("load");
        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.samples_recorded, 2);
        assert_eq!(stats.issues.len(), 1);
        assert_eq!(stats.issues[0].line, 3);

        assert_eq!(conn.list_users(None).expect("users"), vec!["u1", "u2"]);
        let sums = conn
            .volume_sum(&SampleFilter::for_meter("instance"))
            .expect("sum");
        let total: f64 = sums.iter().map(|value| value.value).sum();
        assert_eq!(total, 3.5);

        let events: Vec<_> = conn
            .list_raw_events(&SampleFilter::default().with_user("u2"))
            .expect("events")
            .collect::<std::result::Result<_, _>>()
            .expect("collect");
        assert_eq!(events[0].message_id.as_deref(), Some("m-2"));
    }

    #[test]
    fn missing_fields_are_issues_not_failures() {
        let conn = Connection::open(MemoryBackend::new()).expect("open");
        let stats =
            load_samples(&conn, Cursor::new(r#"{"source":"s1"}"#)).expect("load");
        assert_eq!(stats.samples_recorded, 0);
        assert_eq!(stats.issues.len(), 1);
        assert!(stats.issues[0].message.contains("missing field"));
    }
}
