//! Transactional `PostgreSQL` sink.
//!
//! Each writer shard owns one connection. A batch is written as chunked
//! multi-value INSERT statements inside an explicit transaction; the batch
//! becomes visible only at COMMIT, and any failure rolls the whole batch
//! back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pg_escape::quote_identifier;
use siphon_types::batch::Batch;
use siphon_types::error::{CommitState, IngestError};
use siphon_types::record::FieldValue;
use siphon_types::schema::{FieldKind, RecordSchema};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

use crate::config::StoreConfig;
use crate::sink::{RecordSink, SinkFactory};

/// Hard `PostgreSQL` limit on bind parameters per statement.
const PG_MAX_PARAMS: usize = 65_535;
/// Upper bound on rows per multi-value INSERT regardless of column count.
const MAX_CHUNK_ROWS: usize = 1000;

/// Typed SQL parameter; the `None` arms bind typed NULLs.
enum SqlParam<'a> {
    Text(Option<&'a str>),
    Integer(Option<i64>),
    Float(Option<f64>),
    Timestamp(Option<DateTime<Utc>>),
}

impl SqlParam<'_> {
    fn as_tosql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Text(v) => v,
            Self::Integer(v) => v,
            Self::Float(v) => v,
            Self::Timestamp(v) => v,
        }
    }
}

fn sql_param<'a>(kind: FieldKind, value: Option<&'a FieldValue>) -> SqlParam<'a> {
    match (kind, value) {
        (_, Some(FieldValue::Text(s))) => SqlParam::Text(Some(s)),
        (_, Some(FieldValue::Integer(i))) => SqlParam::Integer(Some(*i)),
        (_, Some(FieldValue::Float(f))) => SqlParam::Float(Some(*f)),
        (_, Some(FieldValue::Timestamp(t))) => SqlParam::Timestamp(Some(*t)),
        (FieldKind::Text, None) => SqlParam::Text(None),
        (FieldKind::Integer, None) => SqlParam::Integer(None),
        (FieldKind::Float, None) => SqlParam::Float(None),
        (FieldKind::Timestamp, None) => SqlParam::Timestamp(None),
    }
}

fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn chunk_rows(ncols: usize) -> usize {
    (PG_MAX_PARAMS / ncols.max(1)).clamp(1, MAX_CHUNK_ROWS)
}

fn build_insert_sql(qualified_table: &str, col_list: &str, ncols: usize, rows: usize) -> String {
    use std::fmt::Write as _;

    let header = format!("INSERT INTO {qualified_table} ({col_list}) VALUES ");
    let mut sql = String::with_capacity(header.len() + rows * ncols * 6);
    sql.push_str(&header);
    let mut param = 0usize;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..ncols {
            if col > 0 {
                sql.push_str(", ");
            }
            param += 1;
            let _ = write!(sql, "${param}");
        }
        sql.push(')');
    }
    sql
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "TEXT",
        FieldKind::Integer => "BIGINT",
        FieldKind::Float => "DOUBLE PRECISION",
        FieldKind::Timestamp => "TIMESTAMPTZ",
    }
}

async fn connect_client(config: &StoreConfig) -> Result<Client, IngestError> {
    let (client, connection) = tokio_postgres::connect(&config.connection_string(), NoTls)
        .await
        .map_err(|e| {
            let auth_failure = e.code().is_some_and(|c| {
                c == &SqlState::INVALID_PASSWORD
                    || c == &SqlState::INVALID_AUTHORIZATION_SPECIFICATION
            });
            if auth_failure {
                IngestError::auth("AUTH_FAILED", format!("authentication failed: {e}"))
            } else {
                IngestError::connection(
                    "CONNECTION_FAILED",
                    format!("cannot connect to {}:{}: {e}", config.host, config.port),
                )
            }
        })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("postgres connection driver exited: {e}");
        }
    });

    Ok(client)
}

/// Connectivity and target table preflight, used by the `check` command.
///
/// # Errors
///
/// Returns a connection or auth error if the store is unreachable.
pub async fn validate(config: &StoreConfig) -> Result<String, IngestError> {
    let client = connect_client(config).await?;

    client.query_one("SELECT 1", &[]).await.map_err(|e| {
        IngestError::connection("CONNECTION_TEST_FAILED", format!("connection test failed: {e}"))
    })?;

    let table_check = client
        .query_one(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_name = $2",
            &[&config.schema, &config.table],
        )
        .await;

    let message = match table_check {
        Ok(_) => format!(
            "Connected to {}:{}/{} (table: {}.{})",
            config.host, config.port, config.database, config.schema, config.table
        ),
        Err(_) => format!(
            "Connected to {}:{}/{} (table '{}.{}' does not exist, will be created)",
            config.host, config.port, config.database, config.schema, config.table
        ),
    };

    Ok(message)
}

/// One writer shard's connection to the store.
pub struct PostgresSink {
    client: Client,
    config: StoreConfig,
    schema: Arc<RecordSchema>,
    qualified_table: String,
    col_list: String,
    rows_per_statement: usize,
}

impl PostgresSink {
    /// Connect and make sure the target table exists.
    ///
    /// # Errors
    ///
    /// Returns a connection, auth, or commit error.
    pub async fn connect(
        config: StoreConfig,
        schema: Arc<RecordSchema>,
    ) -> Result<Self, IngestError> {
        let client = connect_client(&config).await?;
        let qualified_table = qualified_name(&config.schema, &config.table);
        let col_list = schema
            .fields
            .iter()
            .map(|f| quote_identifier(&f.name).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let sink = Self {
            client,
            rows_per_statement: chunk_rows(schema.field_count()),
            qualified_table,
            col_list,
            config,
            schema,
        };
        sink.ensure_table().await?;
        Ok(sink)
    }

    async fn ensure_table(&self) -> Result<(), IngestError> {
        let create_schema = format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_identifier(&self.config.schema)
        );
        self.client.execute(create_schema.as_str(), &[]).await.map_err(|e| {
            IngestError::connection("SCHEMA_CREATE_FAILED", format!("cannot ensure schema: {e}"))
        })?;

        let columns = self
            .schema
            .fields
            .iter()
            .map(|f| format!("{} {}", quote_identifier(&f.name), column_type(f.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} ({columns})",
            self.qualified_table
        );
        self.client.execute(create_table.as_str(), &[]).await.map_err(|e| {
            IngestError::connection("TABLE_CREATE_FAILED", format!("cannot ensure table: {e}"))
        })?;
        Ok(())
    }

    fn classify_write_error(&self, op: &str, e: &tokio_postgres::Error) -> IngestError {
        if e.is_closed() || self.client.is_closed() {
            IngestError::connection("CONNECTION_LOST", format!("{op}: {e}"))
        } else {
            IngestError::commit("COMMIT_FAILED", format!("{op}: {e}"))
        }
    }

    async fn insert_chunk(
        &self,
        batch: &Batch,
        chunk_start: usize,
        chunk_end: usize,
    ) -> Result<(), IngestError> {
        let ncols = self.schema.field_count();
        let sql = build_insert_sql(
            &self.qualified_table,
            &self.col_list,
            ncols,
            chunk_end - chunk_start,
        );

        let mut params: Vec<SqlParam<'_>> =
            Vec::with_capacity((chunk_end - chunk_start).saturating_mul(ncols));
        for record in &batch.records[chunk_start..chunk_end] {
            for (idx, field) in self.schema.fields.iter().enumerate() {
                params.push(sql_param(field.kind, record.values.get(idx).and_then(Option::as_ref)));
            }
        }
        let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(SqlParam::as_tosql).collect();

        self.client.execute(sql.as_str(), &param_refs).await.map_err(|e| {
            self.classify_write_error(
                &format!(
                    "INSERT failed for {}, rows {}-{}",
                    self.qualified_table, chunk_start, chunk_end
                ),
                &e,
            )
            .with_commit_state(CommitState::BeforeCommit)
        })?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    async fn write_batch(&mut self, batch: &Batch) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }

        self.client.execute("BEGIN", &[]).await.map_err(|e| {
            self.classify_write_error("BEGIN failed", &e)
                .with_commit_state(CommitState::BeforeCommit)
        })?;

        let total = batch.len();
        for chunk_start in (0..total).step_by(self.rows_per_statement) {
            let chunk_end = (chunk_start + self.rows_per_statement).min(total);
            if let Err(err) = self.insert_chunk(batch, chunk_start, chunk_end).await {
                let _ = self.client.execute("ROLLBACK", &[]).await;
                return Err(err);
            }
        }

        self.client.execute("COMMIT", &[]).await.map_err(|e| {
            self.classify_write_error("COMMIT failed", &e)
                .with_commit_state(CommitState::AfterCommitUnknown)
        })?;

        tracing::debug!(
            shard = batch.shard,
            rows = total,
            table = self.qualified_table,
            "Committed batch"
        );
        Ok(())
    }

    async fn recover(&mut self) -> Result<(), IngestError> {
        if !self.client.is_closed() {
            return Ok(());
        }
        tracing::info!(table = self.qualified_table, "Reconnecting to store");
        self.client = connect_client(&self.config).await?;
        Ok(())
    }
}

/// [`SinkFactory`] producing one [`PostgresSink`] per writer shard.
pub struct PostgresSinkFactory {
    config: StoreConfig,
    schema: Arc<RecordSchema>,
}

impl PostgresSinkFactory {
    pub fn new(config: StoreConfig, schema: Arc<RecordSchema>) -> Self {
        Self { config, schema }
    }
}

#[async_trait]
impl SinkFactory for PostgresSinkFactory {
    async fn connect(&self, shard: usize) -> Result<Box<dyn RecordSink>, IngestError> {
        let sink = PostgresSink::connect(self.config.clone(), self.schema.clone()).await?;
        tracing::debug!(shard, "Store connection established");
        Ok(Box::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_rows_respects_param_limit() {
        // 80 columns: 65535 / 80 = 819 rows per statement.
        assert_eq!(chunk_rows(80), 819);
        // Few columns: capped by the row bound.
        assert_eq!(chunk_rows(4), MAX_CHUNK_ROWS);
        assert_eq!(chunk_rows(0), MAX_CHUNK_ROWS);
        // Very wide rows still make progress.
        assert_eq!(chunk_rows(100_000), 1);
    }

    #[test]
    fn insert_sql_numbers_params_row_major() {
        let sql = build_insert_sql("public.records", "a, b", 2, 3);
        assert_eq!(
            sql,
            "INSERT INTO public.records (a, b) VALUES ($1, $2), ($3, $4), ($5, $6)"
        );
    }

    #[test]
    fn qualified_name_quotes_only_when_needed() {
        assert_eq!(qualified_name("public", "records"), "public.records");
        assert_eq!(
            qualified_name("public", "Feed-2024"),
            "public.\"Feed-2024\""
        );
    }

    #[test]
    fn null_params_are_typed_by_column_kind() {
        assert!(matches!(
            sql_param(FieldKind::Integer, None),
            SqlParam::Integer(None)
        ));
        assert!(matches!(
            sql_param(FieldKind::Timestamp, None),
            SqlParam::Timestamp(None)
        ));
        let value = FieldValue::Float(2.5);
        assert!(matches!(
            sql_param(FieldKind::Float, Some(&value)),
            SqlParam::Float(Some(_))
        ));
    }

    #[test]
    fn column_types_cover_all_kinds() {
        assert_eq!(column_type(FieldKind::Text), "TEXT");
        assert_eq!(column_type(FieldKind::Integer), "BIGINT");
        assert_eq!(column_type(FieldKind::Float), "DOUBLE PRECISION");
        assert_eq!(column_type(FieldKind::Timestamp), "TIMESTAMPTZ");
    }
}
