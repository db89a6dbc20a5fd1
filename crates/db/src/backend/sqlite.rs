use std::path::Path;

use chrono::{DateTime, Utc};
use meter_core::{Metadata, MeterRef, RegistryRecord, ResourceRecord, Sample};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params, params_from_iter};
use sha2::{Digest, Sha256};

use super::{Backend, Collection, IndexField, IndexSpec, Registry, RowId};
use crate::error::{DbError, Result};
use crate::query::{Clause, Field, Query};
use crate::temporal::{coerce_timestamp, to_micros};

const MIGRATION_0001: &str = include_str!("../../migrations/0001_init.sql");

const MIGRATIONS: &[(&str, &str)] = &[("0001_init", MIGRATION_0001)];

const SAMPLE_COLUMNS: &str = "rowid, source, user_id, project_id, resource_id, counter_name, \
     counter_type, counter_volume, timestamp, resource_metadata, message_id, message_signature";

/// SQLite-backed store. One connection, serialized behind a mutex; every
/// registry update runs in its own transaction.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens the store at `path`, creating and migrating it when needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = Self::attach(path, true)?;
        backend.initialize()?;
        Ok(backend)
    }

    /// Opens the store at `path` without touching its schema. With `create`
    /// unset a missing file is an error instead of a new empty store.
    /// [`Backend::initialize`] brings the schema up to date.
    pub fn attach(path: impl AsRef<Path>, create: bool) -> Result<Self> {
        let path = path.as_ref();
        let flags = if create {
            OpenFlags::default()
        } else {
            OpenFlags::default().difference(OpenFlags::SQLITE_OPEN_CREATE)
        };
        let conn = Connection::open_with_flags(path, flags)
            .and_then(|conn| {
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn.pragma_update(None, "temp_store", "MEMORY")?;
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))?;
                Ok(conn)
            })
            .map_err(|err| DbError::Unreachable(format!("{}: {}", path.display(), err)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Provisions (or replaces) credentials accepted by `authenticate`.
    pub fn create_user(&self, username: &str, password: &str) -> Result<()> {
        self.conn.lock().execute(
            r#"
            INSERT INTO store_user (username, password_sha256)
            VALUES (?1, ?2)
            ON CONFLICT(username) DO UPDATE SET password_sha256 = excluded.password_sha256
            "#,
            params![username, password_digest(password)],
        )?;
        Ok(())
    }

    /// Names of the secondary indices present on the store tables.
    pub fn index_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'index' AND tbl_name IN ('resource', 'sample') AND sql IS NOT NULL
            ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn load_resources(&self, filter: &str, values: Vec<Value>) -> Result<Vec<ResourceRecord>> {
        let conn = self.conn.lock();
        let rows = {
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT id, project_id, user_id, timestamp, received_timestamp, metadata, source
                FROM resource
                WHERE {filter}
                ORDER BY id
                "#
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_resource_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let mut meter_stmt = conn.prepare(
            r#"
            SELECT counter_name, counter_type
            FROM resource_meter
            WHERE resource_id = ?1
            "#,
        )?;
        let mut resources = Vec::with_capacity(rows.len());
        for row in rows {
            let meter = meter_stmt
                .query_map([&row.id], |meter| {
                    Ok(MeterRef {
                        counter_name: meter.get(0)?,
                        counter_type: meter.get(1)?,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;
            resources.push(ResourceRecord {
                resource_id: row.id,
                project_id: row.project_id,
                user_id: row.user_id,
                timestamp: coerce_timestamp(row.timestamp)?,
                received_timestamp: coerce_timestamp(row.received_timestamp)?,
                metadata: serde_json::from_str(&row.metadata)?,
                source: row.source,
                meter,
            });
        }
        Ok(resources)
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    for (_name, sql) in MIGRATIONS {
        tx.execute_batch(sql)?;
    }
    tx.commit()?;
    Ok(())
}

fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn registry_tables(registry: Registry) -> (&'static str, &'static str) {
    match registry {
        Registry::User => ("user_registry", "user_source"),
        Registry::Project => ("project_registry", "project_source"),
    }
}

fn table_name(collection: Collection) -> &'static str {
    match collection {
        Collection::Resource => "resource",
        Collection::Sample => "sample",
    }
}

fn column(collection: Collection, field: Field) -> Option<&'static str> {
    match (collection, field) {
        (_, Field::UserId) => Some("user_id"),
        (_, Field::ProjectId) => Some("project_id"),
        (_, Field::Source) => Some("source"),
        (Collection::Resource, Field::ResourceId) => Some("id"),
        (Collection::Sample, Field::ResourceId) => Some("resource_id"),
        (Collection::Sample, Field::CounterName) => Some("counter_name"),
        // Meter names of a resource live in resource_meter.
        (Collection::Resource, Field::CounterName) => None,
    }
}

fn index_column(collection: Collection, field: IndexField) -> Option<&'static str> {
    match field {
        IndexField::Timestamp => Some("timestamp"),
        IndexField::Query(field) => column(collection, field),
    }
}

fn predicate(collection: Collection, field: Field, rhs: &str) -> String {
    match column(collection, field) {
        Some(column) => format!("{column} {rhs}"),
        None => format!(
            "EXISTS (SELECT 1 FROM resource_meter \
             WHERE resource_meter.resource_id = resource.id \
             AND resource_meter.counter_name {rhs})"
        ),
    }
}

/// Renders a query as a `WHERE` body plus its positional parameters.
fn render(query: &Query, collection: Collection) -> (String, Vec<Value>) {
    let mut parts = Vec::new();
    let mut values = Vec::new();
    for clause in query.clauses() {
        match clause {
            Clause::Eq(field, value) => {
                parts.push(predicate(collection, *field, "= ?"));
                values.push(Value::Text(value.clone()));
            }
            Clause::In(_, candidates) if candidates.is_empty() => parts.push("0".to_string()),
            Clause::In(field, candidates) => {
                let placeholders = vec!["?"; candidates.len()].join(", ");
                parts.push(predicate(collection, *field, &format!("IN ({placeholders})")));
                values.extend(candidates.iter().cloned().map(Value::Text));
            }
            Clause::Timestamp(range) => {
                if let Some(start) = &range.start {
                    parts.push("timestamp >= ?".to_string());
                    values.push(Value::Integer(to_micros(start)));
                }
                if let Some(end) = &range.end {
                    parts.push("timestamp < ?".to_string());
                    values.push(Value::Integer(to_micros(end)));
                }
            }
        }
    }
    if parts.is_empty() {
        ("1".to_string(), values)
    } else {
        (parts.join(" AND "), values)
    }
}

struct SampleRow {
    rowid: i64,
    source: String,
    user_id: String,
    project_id: String,
    resource_id: String,
    counter_name: String,
    counter_type: String,
    counter_volume: f64,
    timestamp: i64,
    resource_metadata: String,
    message_id: Option<String>,
    message_signature: Option<String>,
}

fn row_to_sample_row(row: &Row<'_>) -> std::result::Result<SampleRow, rusqlite::Error> {
    Ok(SampleRow {
        rowid: row.get(0)?,
        source: row.get(1)?,
        user_id: row.get(2)?,
        project_id: row.get(3)?,
        resource_id: row.get(4)?,
        counter_name: row.get(5)?,
        counter_type: row.get(6)?,
        counter_volume: row.get(7)?,
        timestamp: row.get(8)?,
        resource_metadata: row.get(9)?,
        message_id: row.get(10)?,
        message_signature: row.get(11)?,
    })
}

impl SampleRow {
    fn into_sample(self) -> Result<(RowId, Sample)> {
        let metadata: Metadata = serde_json::from_str(&self.resource_metadata)?;
        Ok((
            self.rowid as RowId,
            Sample {
                source: self.source,
                user_id: self.user_id,
                project_id: self.project_id,
                resource_id: self.resource_id,
                counter_name: self.counter_name,
                counter_type: self.counter_type,
                counter_volume: self.counter_volume,
                timestamp: coerce_timestamp(self.timestamp)?,
                resource_metadata: metadata,
                message_id: self.message_id,
                message_signature: self.message_signature,
            },
        ))
    }
}

struct ResourceRow {
    id: String,
    project_id: String,
    user_id: String,
    timestamp: i64,
    received_timestamp: i64,
    metadata: String,
    source: String,
}

fn row_to_resource_row(row: &Row<'_>) -> std::result::Result<ResourceRow, rusqlite::Error> {
    Ok(ResourceRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        timestamp: row.get(3)?,
        received_timestamp: row.get(4)?,
        metadata: row.get(5)?,
        source: row.get(6)?,
    })
}

impl Backend for SqliteBackend {
    fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        let conn = self.conn.lock();
        // Runs before initialize, so the schema may not exist yet.
        let has_users: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'store_user')",
            [],
            |row| row.get(0),
        )?;
        let stored: Option<String> = if has_users {
            conn.query_row(
                "SELECT password_sha256 FROM store_user WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?
        } else {
            None
        };
        match stored {
            Some(digest) if digest == password_digest(password) => Ok(()),
            _ => Err(DbError::Authentication(username.to_string())),
        }
    }

    fn initialize(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&mut conn)
    }

    fn ensure_index(&self, spec: &IndexSpec) -> Result<()> {
        let columns = spec
            .fields
            .iter()
            .filter_map(|field| index_column(spec.collection, *field))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.lock().execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                spec.name,
                table_name(spec.collection),
                columns
            ),
            [],
        )?;
        Ok(())
    }

    fn add_registry_source(&self, registry: Registry, key: &str, source: &str) -> Result<()> {
        let (registry_table, source_table) = registry_tables(registry);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {registry_table} (id) VALUES (?1)"),
            [key],
        )?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {source_table} (registry_id, source) VALUES (?1, ?2)"),
            params![key, source],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn registry_record(&self, registry: Registry, key: &str) -> Result<Option<RegistryRecord>> {
        let (registry_table, source_table) = registry_tables(registry);
        let conn = self.conn.lock();
        let exists = conn
            .query_row(
                &format!("SELECT id FROM {registry_table} WHERE id = ?1"),
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        let Some(id) = exists else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT source FROM {source_table} WHERE registry_id = ?1 ORDER BY source"
        ))?;
        let sources = stmt.query_map([key], |row| row.get::<_, String>(0))?;
        Ok(Some(RegistryRecord {
            id,
            source: sources.collect::<std::result::Result<_, _>>()?,
        }))
    }

    fn registry_keys(&self, registry: Registry, source: Option<&str>) -> Result<Vec<String>> {
        let (registry_table, source_table) = registry_tables(registry);
        let conn = self.conn.lock();
        let keys = match source {
            Some(source) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT DISTINCT registry_id FROM {source_table} WHERE source = ?1 ORDER BY registry_id"
                ))?;
                let rows = stmt.query_map([source], |row| row.get::<_, String>(0))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!("SELECT id FROM {registry_table} ORDER BY id"))?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(keys)
    }

    fn upsert_resource(&self, sample: &Sample, received_timestamp: DateTime<Utc>) -> Result<()> {
        let metadata = serde_json::to_string(&sample.resource_metadata)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO resource (
              id, project_id, user_id, timestamp, received_timestamp, metadata, source
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5, ?6, ?7
            )
            ON CONFLICT(id) DO UPDATE SET
              project_id = excluded.project_id,
              user_id = excluded.user_id,
              timestamp = excluded.timestamp,
              received_timestamp = excluded.received_timestamp,
              metadata = excluded.metadata,
              source = excluded.source
            "#,
            params![
                sample.resource_id,
                sample.project_id,
                sample.user_id,
                to_micros(&sample.timestamp),
                to_micros(&received_timestamp),
                metadata,
                sample.source,
            ],
        )?;
        tx.execute(
            r#"
            INSERT OR IGNORE INTO resource_meter (resource_id, counter_name, counter_type)
            VALUES (?1, ?2, ?3)
            "#,
            params![sample.resource_id, sample.counter_name, sample.counter_type],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn append_sample(&self, sample: Sample) -> Result<()> {
        let metadata = serde_json::to_string(&sample.resource_metadata)?;
        self.conn.lock().execute(
            r#"
            INSERT INTO sample (
              source, user_id, project_id, resource_id, counter_name, counter_type,
              counter_volume, timestamp, resource_metadata, message_id, message_signature
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            )
            "#,
            params![
                sample.source,
                sample.user_id,
                sample.project_id,
                sample.resource_id,
                sample.counter_name,
                sample.counter_type,
                sample.counter_volume,
                to_micros(&sample.timestamp),
                metadata,
                sample.message_id,
                sample.message_signature,
            ],
        )?;
        Ok(())
    }

    fn find_resources(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        let (filter, values) = render(query, Collection::Resource);
        self.load_resources(&filter, values)
    }

    fn find_resources_with_samples(&self, query: &Query) -> Result<Vec<ResourceRecord>> {
        let (filter, values) = render(query, Collection::Sample);
        self.load_resources(
            &format!("id IN (SELECT resource_id FROM sample WHERE {filter})"),
            values,
        )
    }

    fn distinct_resource_ids(&self, query: &Query) -> Result<Vec<String>> {
        let (filter, values) = render(query, Collection::Sample);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT resource_id FROM sample WHERE {filter} ORDER BY resource_id"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn scan_samples(
        &self,
        query: &Query,
        after: Option<RowId>,
        limit: usize,
    ) -> Result<Vec<(RowId, Sample)>> {
        let (filter, mut values) = render(query, Collection::Sample);
        values.push(Value::Integer(after.map(|row| row as i64).unwrap_or(0)));
        values.push(Value::Integer(limit as i64));
        let rows = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&format!(
                r#"
                SELECT {SAMPLE_COLUMNS}
                FROM sample
                WHERE {filter} AND rowid > ?
                ORDER BY rowid ASC
                LIMIT ?
                "#
            ))?;
            let rows = stmt.query_map(params_from_iter(values.iter()), row_to_sample_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(SampleRow::into_sample).collect()
    }
}
