use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use meter_core::{ResourceQuery, SampleFilter};

#[derive(Debug, Parser)]
#[command(name = "meter-store", version, about = "Record and query metering samples")]
pub struct Cli {
    /// Config file; created with defaults when missing.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store descriptor, e.g. sqlite://localhost/meter.sqlite. Overrides the
    /// config file and METER_DATABASE_CONNECTION.
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record samples from a JSON-lines file, or `-` for stdin.
    Record { input: String },
    /// List users, optionally only those seen from a source.
    Users {
        #[arg(long)]
        source: Option<String>,
    },
    /// List projects, optionally only those seen from a source.
    Projects {
        #[arg(long)]
        source: Option<String>,
    },
    /// List resources with their latest state.
    Resources(ResourceArgs),
    /// Print matching raw samples as JSON lines.
    Events(FilterArgs),
    /// Total volume per resource.
    Sum(FilterArgs),
    /// Largest volume per resource.
    Max(FilterArgs),
    /// Earliest and latest sample timestamp.
    Interval(FilterArgs),
}

#[derive(Debug, Args)]
pub struct ResourceArgs {
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub meter: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    /// Inclusive RFC 3339 lower bound.
    #[arg(long, value_parser = parse_time)]
    pub start: Option<DateTime<Utc>>,
    /// Exclusive RFC 3339 upper bound.
    #[arg(long, value_parser = parse_time)]
    pub end: Option<DateTime<Utc>>,
}

impl ResourceArgs {
    pub fn to_query(&self) -> ResourceQuery {
        ResourceQuery {
            user: self.user.clone(),
            project: self.project.clone(),
            meter: self.meter.clone(),
            source: self.source.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub user: Option<String>,
    /// Ignored when --user is given.
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub meter: Option<String>,
    #[arg(long)]
    pub resource: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long, value_parser = parse_time)]
    pub start: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_time)]
    pub end: Option<DateTime<Utc>>,
}

impl FilterArgs {
    pub fn to_filter(&self) -> SampleFilter {
        SampleFilter {
            user: self.user.clone(),
            project: self.project.clone(),
            meter: self.meter.clone(),
            resource: self.resource.clone(),
            source: self.source.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| format!("invalid RFC 3339 timestamp {raw:?}: {err}"))
}
