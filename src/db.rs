use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder, Row};

use crate::config::{JobConfig, TableName};
use crate::error::{JobError, JobResult};
use crate::models::{DriverWeekRecord, TrialRow, UpsertOutcome};
use crate::secrets::SecretStore;
use crate::source::RecordSource;
use crate::writer::Destination;

/// Rows per INSERT statement; 13 binds each stays well under the protocol's
/// 65535 parameter limit.
const INSERT_CHUNK: usize = 1_000;

/// Keys per `IN (...)` list when looking up or deleting stored rows.
const KEY_CHUNK: usize = 5_000;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_four_week_trial.sql");

const EXTRACT_SQL: &str = r#"
WITH all_data AS (
    SELECT week_no, drn
    FROM public.vw_uber_driver_aggr_daily
    UNION ALL
    SELECT week_start AS week_no, drn
    FROM public.vw_uber_old_metrics
    LEFT JOIN quality_reporting.gsheet_driver_data ON driver_id = driver_uuid
    WHERE partition_date = current_date - 1
),
week_no_score AS (
    SELECT ROW_NUMBER() OVER (PARTITION BY drn ORDER BY week_no) AS moove_week, drn, week_no
    FROM all_data
    GROUP BY week_no, drn
)
SELECT s.drn::text AS drn,
       ws.moove_week::bigint AS moove_week,
       json_extract_path_text(s.input_json, 'country') AS country,
       json_extract_path_text(s.input_json, 'product') AS product,
       s.week_date::date AS week_date,
       s.score::float8 AS score,
       (LAG(s.score) OVER (PARTITION BY s.drn ORDER BY s.week_date))::float8
           AS last_week_ago_score,
       (LAG(s.score, 2) OVER (PARTITION BY s.drn ORDER BY s.week_date))::float8
           AS two_weeks_ago_score,
       r.asked_remittance::float8 AS asked_remittance,
       (LAG(r.asked_remittance) OVER (PARTITION BY r.drn ORDER BY r.week_date))::float8
           AS last_week_ago_asked_remittance,
       (LAG(r.asked_remittance, 2) OVER (PARTITION BY r.drn ORDER BY r.week_date))::float8
           AS two_weeks_ago_asked_remittance,
       r.cumulative_outstanding::float8 AS cumulative_outstanding
FROM scoring.scoring s
INNER JOIN public.vw_reconciliation_aggregated_weekly_mcs r
    ON s.drn = r.drn AND r.week_date = s.week_date
INNER JOIN week_no_score ws
    ON s.drn = ws.drn AND s.week_date = ws.week_no
WHERE NOT s.predicted
  AND json_extract_path_text(s.input_json, 'country') = $1
ORDER BY s.drn, s.week_date
"#;

const OUTPUT_COLUMNS: &str = "drn, moove_week, country, product, week_date, try_out_label, \
     week_score, last_week_ago_score, two_weeks_ago_score, try_out_score, \
     cumulative_outstanding, request_time, compound_key";

/// Opens a warehouse connection with credentials read from `secrets`.
pub async fn connect(secrets: &dyn SecretStore, config: &JobConfig) -> JobResult<PgConnection> {
    let credentials = secrets.credentials(&config.secret_id).await?;
    let options = PgConnectOptions::new()
        .host(&credentials.host)
        .port(config.port)
        .username(&credentials.username)
        .password(&credentials.password)
        .database(&config.database);

    let conn = PgConnection::connect_with(&options)
        .await
        .map_err(|source| JobError::Connection {
            host: credentials.host.clone(),
            source,
        })?;
    tracing::debug!(
        host = %credentials.host,
        database = %config.database,
        "connected to warehouse"
    );
    Ok(conn)
}

async fn close(conn: PgConnection) {
    if let Err(err) = conn.close().await {
        tracing::warn!(error = %err, "failed to close warehouse connection");
    }
}

/// Creates the destination schema and table. The statements are plain DDL
/// so they run on Redshift, which has no migration bookkeeping support.
pub async fn init_db(secrets: &dyn SecretStore, config: &JobConfig) -> JobResult<()> {
    let mut conn = connect(secrets, config).await?;
    let result = sqlx::raw_sql(SCHEMA_SQL).execute(&mut conn).await;
    close(conn).await;
    result.map(|_| ()).map_err(JobError::Schema)
}

pub struct WarehouseSource<'a> {
    secrets: &'a dyn SecretStore,
    config: &'a JobConfig,
}

impl<'a> WarehouseSource<'a> {
    pub fn new(secrets: &'a dyn SecretStore, config: &'a JobConfig) -> Self {
        Self { secrets, config }
    }
}

#[async_trait]
impl<'a> RecordSource for WarehouseSource<'a> {
    async fn fetch(&self, country: &str) -> JobResult<Vec<DriverWeekRecord>> {
        let mut conn = connect(self.secrets, self.config).await?;
        let result = fetch_records(&mut conn, country).await;
        close(conn).await;
        result.map_err(JobError::Extraction)
    }
}

pub async fn fetch_records(
    conn: &mut PgConnection,
    country: &str,
) -> Result<Vec<DriverWeekRecord>, sqlx::Error> {
    let rows = sqlx::query(EXTRACT_SQL)
        .bind(country)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &PgRow) -> Result<DriverWeekRecord, sqlx::Error> {
    Ok(DriverWeekRecord {
        drn: row.try_get("drn")?,
        moove_week: row.try_get("moove_week")?,
        country: row.try_get("country")?,
        product: row.try_get("product")?,
        week_date: row.try_get("week_date")?,
        week_score: row.try_get("score")?,
        last_week_ago_score: row.try_get("last_week_ago_score")?,
        two_weeks_ago_score: row.try_get("two_weeks_ago_score")?,
        asked_remittance: row.try_get("asked_remittance")?,
        last_week_ago_asked_remittance: row.try_get("last_week_ago_asked_remittance")?,
        two_weeks_ago_asked_remittance: row.try_get("two_weeks_ago_asked_remittance")?,
        cumulative_outstanding: row.try_get("cumulative_outstanding")?,
    })
}

pub struct WarehouseDestination<'a> {
    secrets: &'a dyn SecretStore,
    config: &'a JobConfig,
}

impl<'a> WarehouseDestination<'a> {
    pub fn new(secrets: &'a dyn SecretStore, config: &'a JobConfig) -> Self {
        Self { secrets, config }
    }
}

#[async_trait]
impl<'a> Destination for WarehouseDestination<'a> {
    async fn upsert(&self, batch: &[TrialRow]) -> JobResult<UpsertOutcome> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let table = &self.config.destination;
        let mut conn = connect(self.secrets, self.config).await?;
        let result = upsert_rows(&mut conn, table, batch).await;
        close(conn).await;
        result.map_err(|source| JobError::Write {
            table: table.to_string(),
            source,
        })
    }
}

/// Builds `<prefix> <table> WHERE compound_key IN ($1, $2, ...)` with one
/// bind per key. Redshift has no array parameters, so the list is spelled out.
fn keyed_statement<'a>(
    prefix: &str,
    table: &TableName,
    keys: &'a [String],
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new(format!("{prefix} {table} WHERE compound_key IN ("));
    {
        let mut separated = builder.separated(", ");
        for key in keys {
            separated.push_bind(key.as_str());
        }
        separated.push_unseparated(")");
    }
    builder
}

/// Deletes stored rows whose key is in the batch and inserts the batch, in
/// one transaction. Dropping the transaction on error rolls it back.
pub async fn upsert_rows(
    conn: &mut PgConnection,
    table: &TableName,
    batch: &[TrialRow],
) -> Result<UpsertOutcome, sqlx::Error> {
    let keys: Vec<String> = batch.iter().map(|row| row.compound_key.clone()).collect();
    let mut tx = conn.begin().await?;

    let mut existing: Vec<String> = Vec::new();
    for chunk in keys.chunks(KEY_CHUNK) {
        let mut select = keyed_statement("SELECT DISTINCT compound_key FROM", table, chunk);
        let found: Vec<String> = select.build_query_scalar().fetch_all(&mut *tx).await?;
        existing.extend(found);
    }

    for chunk in existing.chunks(KEY_CHUNK) {
        let mut delete = keyed_statement("DELETE FROM", table, chunk);
        delete.build().execute(&mut *tx).await?;
    }

    for chunk in batch.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {table} ({OUTPUT_COLUMNS}) "));
        builder.push_values(chunk, |mut values, row| {
            values
                .push_bind(row.drn.clone())
                .push_bind(row.moove_week)
                .push_bind(row.country.clone())
                .push_bind(row.product.clone())
                .push_bind(row.week_date)
                .push_bind(row.try_out_label.as_str())
                .push_bind(row.week_score)
                .push_bind(row.last_week_ago_score)
                .push_bind(row.two_weeks_ago_score)
                .push_bind(row.try_out_score)
                .push_bind(row.cumulative_outstanding)
                .push_bind(row.request_time)
                .push_bind(row.compound_key.clone());
        });
        builder.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;

    Ok(UpsertOutcome {
        replaced: existing.len(),
        inserted: batch.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableName {
        TableName::parse("scoring.four_week_trial").unwrap()
    }

    #[test]
    fn key_lookup_spells_out_in_list() {
        let keys = vec!["D-1_4".to_string(), "D-2_5".to_string(), "D-3_6".to_string()];
        let select = keyed_statement("SELECT DISTINCT compound_key FROM", &table(), &keys);
        assert_eq!(
            select.sql(),
            "SELECT DISTINCT compound_key FROM scoring.four_week_trial \
             WHERE compound_key IN ($1, $2, $3)"
        );
        assert!(!select.sql().contains("ANY"));
    }

    #[test]
    fn delete_binds_one_parameter_per_key() {
        let keys = vec!["D-1_4".to_string()];
        let delete = keyed_statement("DELETE FROM", &table(), &keys);
        assert_eq!(
            delete.sql(),
            "DELETE FROM scoring.four_week_trial WHERE compound_key IN ($1)"
        );
    }

    #[test]
    fn schema_avoids_postgres_only_ddl() {
        assert!(!SCHEMA_SQL.to_ascii_uppercase().contains("CREATE INDEX"));
        assert!(SCHEMA_SQL.contains("SORTKEY (compound_key)"));
    }
}
