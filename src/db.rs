// 🗄️ SQLite warehouse - the two snapshot fact tables, CSV import, push-down SQL
//
// Library-facing reads return the crate `Result` (driver failures become
// StorageUnavailable). The import path is application plumbing and uses anyhow.

use crate::error::{AnalyticsError, Result};
use crate::filter::{ClaimPredicate, PolicyFilter, SqlWhere};
use crate::pagination::{order_clause, Page};
use crate::records::{APPROVED, DENIED, IN_ASSESSMENT};
use crate::schema::{TableSchema, CLAIMS_SNAPSHOT_FACT, POLICY_MONTHLY_SNAPSHOT};
use crate::shaper::{Cell, RawRow};
use crate::storage::Warehouse;
use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

// ============================================================================
// CSV EXPORT ROWS (warehouse column names)
// ============================================================================

/// One claims snapshot row as exported from the warehouse
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClaimCsvRow {
    pub tpa_fee_worksheet_snapshot_fact_id: Option<String>,
    pub policy_number: Option<String>,
    pub carrier_name: Option<String>,
    pub decision: Option<String>,
    pub ongoing_rate_month: Option<i64>,
    pub is_initial_decision_flag: Option<i64>,
    pub snapshot_date: String,
    pub certificationdate: Option<String>,
    pub rfb_process_to_decision_tat: Option<i64>,
    pub retro_months: Option<i64>,
    pub initial_decisions_facilities: Option<i64>,
    pub ongoing_all_facilities: Option<i64>,
    pub retro_all_facilities: Option<i64>,
    pub initial_decisions_home_health: Option<i64>,
    pub ongoing_home_health: Option<i64>,
    pub retro_home_health: Option<i64>,
    pub initial_decisions_all_other: Option<i64>,
    pub all_other: Option<i64>,
    pub retro_all_other: Option<i64>,
}

/// One policy monthly snapshot row as exported from the warehouse.
/// Premiums stay text so the exact decimal survives the import.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PolicyCsvRow {
    pub policy_id: Option<i64>,
    pub carrier_name: Option<String>,
    pub insured_state: Option<String>,
    pub policy_residence_state: Option<String>,
    pub policy_status_dim_id: Option<String>,
    pub annualized_premium: Option<String>,
    pub lifetime_collected_premium: Option<String>,
    pub premium_frequency: Option<String>,
    pub original_effective_dt: Option<String>,
    pub policy_expiration_dt: Option<String>,
    pub in_waiver_flg: Option<String>,
    pub in_nonforfeiture_flg: Option<String>,
    pub rated_age: Option<i64>,
    pub total_active_claims: Option<i64>,
    pub total_rfbs: Option<i64>,
    pub total_approved_rfbs: Option<i64>,
    pub total_denials: Option<i64>,
    pub policy_snapshot_date: Option<String>,
}

// ============================================================================
// SETUP
// ============================================================================

pub fn setup_warehouse(conn: &Connection) -> anyhow::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Claims decision snapshot fact
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT (
            IDEMPOTENCY_HASH TEXT UNIQUE NOT NULL,
            TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID TEXT,
            POLICY_NUMBER TEXT,
            CARRIER_NAME TEXT,
            DECISION TEXT,
            ONGOING_RATE_MONTH INTEGER,
            IS_INITIAL_DECISION_FLAG INTEGER,
            SNAPSHOT_DATE TEXT NOT NULL,
            CERTIFICATIONDATE TEXT,
            RFB_PROCESS_TO_DECISION_TAT INTEGER,
            RETRO_MONTHS INTEGER,
            INITIAL_DECISIONS_FACILITIES INTEGER,
            ONGOING_ALL_FACILITIES INTEGER,
            RETRO_ALL_FACILITIES INTEGER,
            INITIAL_DECISIONS_HOME_HEALTH INTEGER,
            ONGOING_HOME_HEALTH INTEGER,
            RETRO_HOME_HEALTH INTEGER,
            INITIAL_DECISIONS_ALL_OTHER INTEGER,
            ALL_OTHER INTEGER,
            RETRO_ALL_OTHER INTEGER
        )",
        [],
    )?;

    // ==========================================================================
    // Policy monthly snapshot fact (premiums as exact decimal text)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS POLICY_MONTHLY_SNAPSHOT_FACT (
            IDEMPOTENCY_HASH TEXT UNIQUE NOT NULL,
            POLICY_ID INTEGER,
            CARRIER_NAME TEXT,
            INSURED_STATE TEXT,
            POLICY_RESIDENCE_STATE TEXT,
            POLICY_STATUS_DIM_ID TEXT,
            ANNUALIZED_PREMIUM TEXT,
            LIFETIME_COLLECTED_PREMIUM TEXT,
            PREMIUM_FREQUENCY TEXT,
            ORIGINAL_EFFECTIVE_DT TEXT,
            POLICY_EXPIRATION_DT TEXT,
            IN_WAIVER_FLG TEXT,
            IN_NONFORFEITURE_FLG TEXT,
            RATED_AGE INTEGER,
            TOTAL_ACTIVE_CLAIMS INTEGER,
            TOTAL_RFBS INTEGER,
            TOTAL_APPROVED_RFBS INTEGER,
            TOTAL_DENIALS INTEGER,
            POLICY_SNAPSHOT_DATE TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_claims_carrier_snapshot
         ON CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT(CARRIER_NAME, SNAPSHOT_DATE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_claims_snapshot
         ON CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT(SNAPSHOT_DATE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_claims_id
         ON CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT(TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_policy_carrier_snapshot
         ON POLICY_MONTHLY_SNAPSHOT_FACT(CARRIER_NAME, POLICY_SNAPSHOT_DATE)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_policy_id ON POLICY_MONTHLY_SNAPSHOT_FACT(POLICY_ID)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// IMPORT
// ============================================================================

pub fn load_claims_csv(csv_path: &Path) -> anyhow::Result<Vec<ClaimCsvRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open claims CSV {}", csv_path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: ClaimCsvRow =
            result.with_context(|| format!("Failed to deserialize claim on data line {}", line + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn load_policies_csv(csv_path: &Path) -> anyhow::Result<Vec<PolicyCsvRow>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open policies CSV {}", csv_path.display()))?;

    let mut rows = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let row: PolicyCsvRow =
            result.with_context(|| format!("Failed to deserialize policy on data line {}", line + 1))?;
        rows.push(row);
    }

    Ok(rows)
}

/// Outcome of one import pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Canonical `YYYY-MM-DD` for a warehouse date or timestamp export
pub fn normalize_date(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    let day = if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        d
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        dt.date()
    } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        dt.date()
    } else if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        dt.date_naive()
    } else {
        bail!("unrecognized date '{}'", raw);
    };
    Ok(day.format("%Y-%m-%d").to_string())
}

fn normalize_opt_date(raw: &Option<String>) -> anyhow::Result<Option<String>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => normalize_date(text).map(Some),
    }
}

/// Content hash of a (date-normalized) export row
fn idempotency_hash<T: Serialize>(row: &T) -> anyhow::Result<String> {
    let content = serde_json::to_string(row)?;
    Ok(format!("{:x}", Sha256::digest(content.as_bytes())))
}

fn is_duplicate(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl ClaimCsvRow {
    fn with_normalized_dates(&self) -> anyhow::Result<Self> {
        Ok(ClaimCsvRow {
            snapshot_date: normalize_date(&self.snapshot_date).context("SNAPSHOT_DATE")?,
            certificationdate: normalize_opt_date(&self.certificationdate).context("CERTIFICATIONDATE")?,
            ..self.clone()
        })
    }
}

impl PolicyCsvRow {
    fn with_normalized_dates(&self) -> anyhow::Result<Self> {
        Ok(PolicyCsvRow {
            original_effective_dt: normalize_opt_date(&self.original_effective_dt)
                .context("ORIGINAL_EFFECTIVE_DT")?,
            policy_expiration_dt: normalize_opt_date(&self.policy_expiration_dt)
                .context("POLICY_EXPIRATION_DT")?,
            policy_snapshot_date: normalize_opt_date(&self.policy_snapshot_date)
                .context("POLICY_SNAPSHOT_DATE")?,
            ..self.clone()
        })
    }
}

/// Insert claim rows in one transaction. Dates are stored as `YYYY-MM-DD`;
/// a row already present (same content) is skipped and counted as duplicate.
pub fn insert_claims(conn: &Connection, rows: &[ClaimCsvRow]) -> anyhow::Result<ImportStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = ImportStats::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT (
                IDEMPOTENCY_HASH,
                TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID, POLICY_NUMBER, CARRIER_NAME, DECISION,
                ONGOING_RATE_MONTH, IS_INITIAL_DECISION_FLAG, SNAPSHOT_DATE, CERTIFICATIONDATE,
                RFB_PROCESS_TO_DECISION_TAT, RETRO_MONTHS,
                INITIAL_DECISIONS_FACILITIES, ONGOING_ALL_FACILITIES, RETRO_ALL_FACILITIES,
                INITIAL_DECISIONS_HOME_HEALTH, ONGOING_HOME_HEALTH, RETRO_HOME_HEALTH,
                INITIAL_DECISIONS_ALL_OTHER, ALL_OTHER, RETRO_ALL_OTHER
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        )?;

        for (i, raw) in rows.iter().enumerate() {
            let row = raw
                .with_normalized_dates()
                .with_context(|| format!("Invalid date on claim row {}", i + 1))?;
            let hash = idempotency_hash(&row)?;

            let result = stmt.execute(params![
                hash,
                row.tpa_fee_worksheet_snapshot_fact_id,
                row.policy_number,
                row.carrier_name,
                row.decision,
                row.ongoing_rate_month,
                row.is_initial_decision_flag,
                row.snapshot_date,
                row.certificationdate,
                row.rfb_process_to_decision_tat,
                row.retro_months,
                row.initial_decisions_facilities,
                row.ongoing_all_facilities,
                row.retro_all_facilities,
                row.initial_decisions_home_health,
                row.ongoing_home_health,
                row.retro_home_health,
                row.initial_decisions_all_other,
                row.all_other,
                row.retro_all_other,
            ]);

            match result {
                Ok(_) => stats.inserted += 1,
                Err(e) if is_duplicate(&e) => stats.duplicates += 1,
                Err(e) => return Err(e).with_context(|| format!("Failed to insert claim row {}", i + 1)),
            }
        }
    }
    tx.commit()?;

    info!(inserted = stats.inserted, duplicates = stats.duplicates, "claims imported");
    Ok(stats)
}

/// Insert policy rows in one transaction; same date and duplicate rules as claims
pub fn insert_policies(conn: &Connection, rows: &[PolicyCsvRow]) -> anyhow::Result<ImportStats> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = ImportStats::default();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO POLICY_MONTHLY_SNAPSHOT_FACT (
                IDEMPOTENCY_HASH,
                POLICY_ID, CARRIER_NAME, INSURED_STATE, POLICY_RESIDENCE_STATE, POLICY_STATUS_DIM_ID,
                ANNUALIZED_PREMIUM, LIFETIME_COLLECTED_PREMIUM, PREMIUM_FREQUENCY,
                ORIGINAL_EFFECTIVE_DT, POLICY_EXPIRATION_DT, IN_WAIVER_FLG, IN_NONFORFEITURE_FLG,
                RATED_AGE, TOTAL_ACTIVE_CLAIMS, TOTAL_RFBS, TOTAL_APPROVED_RFBS, TOTAL_DENIALS,
                POLICY_SNAPSHOT_DATE
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        )?;

        for (i, raw) in rows.iter().enumerate() {
            let row = raw
                .with_normalized_dates()
                .with_context(|| format!("Invalid date on policy row {}", i + 1))?;
            let hash = idempotency_hash(&row)?;

            let result = stmt.execute(params![
                hash,
                row.policy_id,
                row.carrier_name,
                row.insured_state,
                row.policy_residence_state,
                row.policy_status_dim_id,
                row.annualized_premium,
                row.lifetime_collected_premium,
                row.premium_frequency,
                row.original_effective_dt,
                row.policy_expiration_dt,
                row.in_waiver_flg,
                row.in_nonforfeiture_flg,
                row.rated_age,
                row.total_active_claims,
                row.total_rfbs,
                row.total_approved_rfbs,
                row.total_denials,
                row.policy_snapshot_date,
            ]);

            match result {
                Ok(_) => stats.inserted += 1,
                Err(e) if is_duplicate(&e) => stats.duplicates += 1,
                Err(e) => return Err(e).with_context(|| format!("Failed to insert policy row {}", i + 1)),
            }
        }
    }
    tx.commit()?;

    info!(inserted = stats.inserted, duplicates = stats.duplicates, "policies imported");
    Ok(stats)
}

/// Row counts of (claims, policies)
pub fn verify_count(conn: &Connection) -> anyhow::Result<(i64, i64)> {
    let claims: i64 = conn.query_row(
        "SELECT COUNT(*) FROM CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT",
        [],
        |row| row.get(0),
    )?;
    let policies: i64 = conn.query_row(
        "SELECT COUNT(*) FROM POLICY_MONTHLY_SNAPSHOT_FACT",
        [],
        |row| row.get(0),
    )?;

    Ok((claims, policies))
}

// ============================================================================
// SQLITE WAREHOUSE
// ============================================================================

#[derive(Clone)]
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteWarehouse {
    pub fn new(conn: Connection) -> Self {
        SqliteWarehouse {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open an existing warehouse file
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            AnalyticsError::StorageUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(SqliteWarehouse::new(conn))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnalyticsError::StorageUnavailable("warehouse connection lock poisoned".to_string()))
    }

    /// Run `SELECT <mapped columns> FROM <table> <where> <order> <window>`
    fn select(
        &self,
        schema: &TableSchema,
        filter: SqlWhere,
        order_by: Option<String>,
        page: Option<&Page>,
    ) -> Result<Vec<RawRow>> {
        let columns: Vec<&str> = schema.column_names().collect();
        let mut sql = format!(
            "SELECT {} FROM {} {}",
            columns.join(", "),
            schema.table,
            filter.where_sql()
        );
        if let Some(order) = order_by {
            sql.push(' ');
            sql.push_str(&order);
        }

        let mut params = filter.params;
        if let Some(page) = page {
            params.push(SqlValue::Integer(page.limit as i64));
            params.push(SqlValue::Integer(page.offset as i64));
            sql.push_str(&format!(" LIMIT ?{} OFFSET ?{}", params.len() - 1, params.len()));
        }
        debug!(sql = %sql, params = params.len(), "warehouse query");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let mut out: RawRow = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    let value: SqlValue = row.get(i)?;
                    out.push((name.clone(), to_cell(schema, name, value)));
                }
                Ok(out)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn count(&self, table: &str, filter: SqlWhere) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {} {}", table, filter.where_sql());
        let conn = self.lock()?;
        let n: i64 = conn.query_row(&sql, params_from_iter(filter.params), |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

/// Decimal columns come back as exact text regardless of storage class
fn to_cell(schema: &TableSchema, column: &str, value: SqlValue) -> Cell {
    if schema.is_decimal(column) {
        match value {
            SqlValue::Text(s) => return Cell::Decimal(s),
            SqlValue::Integer(i) => return Cell::Decimal(i.to_string()),
            SqlValue::Real(r) => return Cell::Decimal(r.to_string()),
            _ => {}
        }
    }
    value.into()
}

fn claims_aggregate_sql(schema: &TableSchema) -> Result<String> {
    let decision = schema.column_for("decision")?;
    let month = schema.column_for("ongoing_rate_month")?;
    let retro = schema.column_for("retro_months")?;
    let tat = schema.column_for("turnaround_days")?;
    let category_sum = |prefix: &str| -> Result<String> {
        let cols = ["initial", "ongoing", "retro"]
            .iter()
            .map(|part| schema.column_for(&format!("{}_{}", prefix, part)).map(|c| format!("COALESCE({}, 0)", c)))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("SUM({})", cols.join(" + ")))
    };

    Ok(format!(
        "SELECT
            COUNT(*) AS TOTAL_CLAIMS,
            SUM(CASE WHEN {d} = '{approved}' THEN 1 ELSE 0 END) AS APPROVED_CLAIMS,
            SUM(CASE WHEN {d} = '{denied}' THEN 1 ELSE 0 END) AS DENIED_CLAIMS,
            SUM(CASE WHEN {d} = '{assessment}' THEN 1 ELSE 0 END) AS IN_ASSESSMENT_CLAIMS,
            AVG({tat}) AS AVG_PROCESSING_TIME_DAYS,
            SUM(CASE WHEN {r} > 0 THEN 1 ELSE 0 END) AS TOTAL_RETRO_CLAIMS,
            {facility} AS FACILITY_CLAIMS,
            {home} AS HOME_HEALTH_CLAIMS,
            {other} AS OTHER_CLAIMS,
            SUM(CASE WHEN {m} = 0 THEN 1 ELSE 0 END) AS INITIAL_DECISIONS,
            SUM(CASE WHEN {m} = 1 THEN 1 ELSE 0 END) AS ONGOING_DECISIONS,
            SUM(CASE WHEN {m} = 2 THEN 1 ELSE 0 END) AS RESTORATION_DECISIONS
         FROM {table}",
        d = decision,
        approved = APPROVED,
        denied = DENIED,
        assessment = IN_ASSESSMENT,
        tat = tat,
        r = retro,
        facility = category_sum("facility")?,
        home = category_sum("home_health")?,
        other = category_sum("other")?,
        m = month,
        table = schema.table,
    ))
}

impl Warehouse for SqliteWarehouse {
    fn query_claims(&self, predicate: &ClaimPredicate, page: Option<&Page>) -> Result<Vec<RawRow>> {
        let schema = self.claims_schema();
        let order = order_clause(schema.column_for("snapshot_date")?);
        self.select(schema, predicate.to_sql(schema)?, Some(order), page)
    }

    fn count_claims(&self, predicate: &ClaimPredicate) -> Result<u64> {
        let schema = self.claims_schema();
        self.count(schema.table, predicate.to_sql(schema)?)
    }

    fn aggregate_claims(&self, predicate: &ClaimPredicate) -> Result<Option<RawRow>> {
        let schema = self.claims_schema();
        let filter = predicate.to_sql(schema)?;
        let sql = format!("{} {}", claims_aggregate_sql(schema)?, filter.where_sql());
        debug!(sql = %sql, "warehouse aggregate");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let row = stmt
            .query_row(params_from_iter(filter.params), |row| {
                names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Ok((name.clone(), Cell::from(row.get::<_, SqlValue>(i)?))))
                    .collect::<rusqlite::Result<RawRow>>()
            })
            .optional()?;
        Ok(row)
    }

    fn find_claim(&self, claim_id: &str) -> Result<Option<RawRow>> {
        let schema = self.claims_schema();
        let filter = SqlWhere {
            clause: format!("{} = ?1", schema.column_for("claim_id")?),
            params: vec![SqlValue::Text(claim_id.to_string())],
        };
        Ok(self.select(schema, filter, None, Some(&Page { limit: 1, offset: 0 }))?.into_iter().next())
    }

    fn query_policies(&self, filter: &PolicyFilter, page: Option<&Page>) -> Result<Vec<RawRow>> {
        let schema = self.policy_schema();
        let order = order_clause(schema.column_for("snapshot_date")?);
        self.select(schema, filter.to_sql(schema)?, Some(order), page)
    }

    fn count_policies(&self, filter: &PolicyFilter) -> Result<u64> {
        let schema = self.policy_schema();
        self.count(schema.table, filter.to_sql(schema)?)
    }

    fn find_policy(&self, policy_id: i64) -> Result<Option<RawRow>> {
        let schema = self.policy_schema();
        let filter = SqlWhere {
            clause: format!("{} = ?1", schema.column_for("policy_id")?),
            params: vec![SqlValue::Integer(policy_id)],
        };
        Ok(self.select(schema, filter, None, Some(&Page { limit: 1, offset: 0 }))?.into_iter().next())
    }

    fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ClaimsSummary;
    use crate::filter::FilterSpec;
    use crate::records::ClaimRecord;
    use crate::shaper::normalize_row;
    use crate::storage::InMemoryWarehouse;
    use proptest::prelude::*;
    use std::io::Write;

    fn claim_row(id: &str, decision: &str, month: i64, flag: i64, date: &str) -> ClaimCsvRow {
        ClaimCsvRow {
            tpa_fee_worksheet_snapshot_fact_id: Some(id.to_string()),
            carrier_name: Some("Acme Life".to_string()),
            decision: Some(decision.to_string()),
            ongoing_rate_month: Some(month),
            is_initial_decision_flag: Some(flag),
            snapshot_date: date.to_string(),
            ..ClaimCsvRow::default()
        }
    }

    fn warehouse_with(claims: &[ClaimCsvRow], policies: &[PolicyCsvRow]) -> SqliteWarehouse {
        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();
        insert_claims(&conn, claims).unwrap();
        insert_policies(&conn, policies).unwrap();
        SqliteWarehouse::new(conn)
    }

    fn claim_ids(rows: Vec<RawRow>) -> Vec<String> {
        rows.into_iter()
            .map(|row| {
                let record = ClaimRecord::from_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap();
                record.claim_id.unwrap()
            })
            .collect()
    }

    fn scenario() -> Vec<ClaimCsvRow> {
        let mut rows = vec![
            claim_row("C-1", "Approved", 0, 1, "2024-03-31"),
            claim_row("C-2", "Denied", 1, 0, "2024-03-31"),
            claim_row("C-3", "In Assessment", 2, 1, "2024-02-29"),
            claim_row("C-4", "Approved", 0, 0, "2024-03-31"),
        ];
        rows[0].rfb_process_to_decision_tat = Some(10);
        rows[0].initial_decisions_facilities = Some(2);
        rows[1].rfb_process_to_decision_tat = Some(21);
        rows[1].retro_months = Some(3);
        rows[1].retro_home_health = Some(1);
        rows[2].all_other = Some(4);
        rows
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();
        setup_warehouse(&conn).unwrap();
        assert_eq!(verify_count(&conn).unwrap(), (0, 0));
    }

    #[test]
    fn test_query_applies_eligibility_and_order() {
        let store = warehouse_with(&scenario(), &[]);
        let predicate = ClaimPredicate::eligible();

        assert_eq!(claim_ids(store.query_claims(&predicate, None).unwrap()), vec!["C-1", "C-2", "C-3"]);
        assert_eq!(store.count_claims(&predicate).unwrap(), 3);

        let page = Page { limit: 2, offset: 1 };
        assert_eq!(claim_ids(store.query_claims(&predicate, Some(&page)).unwrap()), vec!["C-2", "C-3"]);
    }

    #[test]
    fn test_user_filters_push_down() {
        let store = warehouse_with(&scenario(), &[]);

        let march = FilterSpec::scoped(Some("Acme Life"), Some("2024-03-05")).unwrap();
        assert_eq!(store.count_claims(&march.predicate()).unwrap(), 2);

        let other = FilterSpec::default().with_categories(["Other"]);
        assert_eq!(claim_ids(store.query_claims(&other.predicate(), None).unwrap()), vec!["C-3"]);

        let unknown = FilterSpec::default().with_categories(["Respite"]);
        assert_eq!(store.count_claims(&unknown.predicate()).unwrap(), 0);
    }

    #[test]
    fn test_push_down_summary_matches_local_reduction() {
        let store = warehouse_with(&scenario(), &[]);
        let predicate = ClaimPredicate::eligible();

        let row = store.aggregate_claims(&predicate).unwrap().unwrap();
        let pushed = ClaimsSummary::from_aggregate_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap();

        let records: Vec<ClaimRecord> = store
            .query_claims(&predicate, None)
            .unwrap()
            .into_iter()
            .map(|row| ClaimRecord::from_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap())
            .collect();
        let local = ClaimsSummary::from_records(&records);

        assert_eq!(pushed, local);
        assert_eq!(pushed.total_claims, 3);
        assert_eq!(pushed.avg_processing_time_days, 15.5);
        assert_eq!(pushed.facility_claims, 2);
    }

    #[test]
    fn test_empty_push_down_is_zero() {
        let store = warehouse_with(&[], &[]);
        let row = store.aggregate_claims(&ClaimPredicate::eligible()).unwrap().unwrap();
        let summary = ClaimsSummary::from_aggregate_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap();
        assert_eq!(summary, ClaimsSummary::default());
    }

    #[test]
    fn test_lookups_and_decimals() {
        let policy = PolicyCsvRow {
            policy_id: Some(42),
            carrier_name: Some("Acme Life".to_string()),
            insured_state: Some("OH".to_string()),
            annualized_premium: Some("2450.75".to_string()),
            policy_snapshot_date: Some("2024-03-31".to_string()),
            ..PolicyCsvRow::default()
        };
        let store = warehouse_with(&scenario(), &[policy]);

        assert!(store.find_claim("C-4").unwrap().is_some());
        assert!(store.find_claim("nope").unwrap().is_none());

        let row = store.find_policy(42).unwrap().unwrap();
        let premium = row.iter().find(|(col, _)| col == "ANNUALIZED_PREMIUM").unwrap();
        assert_eq!(premium.1, Cell::Decimal("2450.75".to_string()));

        let ohio = PolicyFilter { state: Some("OH".to_string()), ..PolicyFilter::default() };
        assert_eq!(store.count_policies(&ohio).unwrap(), 1);
        assert!(store.ping().is_ok());
    }

    #[test]
    fn test_csv_import() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID,POLICY_NUMBER,CARRIER_NAME,DECISION,ONGOING_RATE_MONTH,\
             IS_INITIAL_DECISION_FLAG,SNAPSHOT_DATE,CERTIFICATIONDATE,RFB_PROCESS_TO_DECISION_TAT,RETRO_MONTHS,\
             INITIAL_DECISIONS_FACILITIES,ONGOING_ALL_FACILITIES,RETRO_ALL_FACILITIES,\
             INITIAL_DECISIONS_HOME_HEALTH,ONGOING_HOME_HEALTH,RETRO_HOME_HEALTH,\
             INITIAL_DECISIONS_ALL_OTHER,ALL_OTHER,RETRO_ALL_OTHER"
        )
        .unwrap();
        writeln!(file, "C-9,P-9,Acme Life,Approved,1,0,2024-01-31,,14,,1,,,,,,,,").unwrap();
        file.flush().unwrap();

        let rows = load_claims_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].rfb_process_to_decision_tat, Some(14));
        assert_eq!(rows[0].retro_months, None);

        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();
        assert_eq!(insert_claims(&conn, &rows).unwrap().inserted, 1);
        assert_eq!(verify_count(&conn).unwrap(), (1, 0));
    }

    #[test]
    fn test_missing_csv_is_an_error() {
        assert!(load_policies_csv(Path::new("/nonexistent/policies.csv")).is_err());
    }

    #[test]
    fn test_dates_normalize_on_import() {
        assert_eq!(normalize_date("2024-03-31").unwrap(), "2024-03-31");
        assert_eq!(normalize_date("2024-03-31 00:00:00").unwrap(), "2024-03-31");
        assert_eq!(normalize_date("2024-03-31T12:30:00.250").unwrap(), "2024-03-31");
        assert_eq!(normalize_date("2024-03-31T23:00:00Z").unwrap(), "2024-03-31");
        assert!(normalize_date("31/03/2024").is_err());
    }

    #[test]
    fn test_timestamp_snapshot_matches_report_month() {
        let row = claim_row("C-7", "Approved", 1, 0, "2024-03-31 00:00:00");
        let store = warehouse_with(&[row], &[]);

        let march = FilterSpec::scoped(None, Some("2024-03-15")).unwrap();
        assert_eq!(store.count_claims(&march.predicate()).unwrap(), 1);

        let row = store.aggregate_claims(&march.predicate()).unwrap().unwrap();
        let summary = ClaimsSummary::from_aggregate_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap();
        assert_eq!(summary.total_claims, 1);
    }

    #[test]
    fn test_bad_date_rejects_whole_import() {
        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();
        let rows = vec![
            claim_row("C-1", "Approved", 1, 0, "2024-03-31"),
            claim_row("C-2", "Approved", 1, 0, "March 2024"),
        ];

        let err = insert_claims(&conn, &rows).unwrap_err();
        assert!(format!("{:#}", err).contains("claim row 2"));
        assert_eq!(verify_count(&conn).unwrap(), (0, 0));
    }

    #[test]
    fn test_reimport_skips_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        setup_warehouse(&conn).unwrap();
        let policy = PolicyCsvRow {
            policy_id: Some(1),
            policy_snapshot_date: Some("2024-03-31".to_string()),
            ..PolicyCsvRow::default()
        };

        let first = insert_claims(&conn, &scenario()).unwrap();
        assert_eq!(first, ImportStats { inserted: 4, duplicates: 0 });
        insert_policies(&conn, &[policy.clone()]).unwrap();

        let again = insert_claims(&conn, &scenario()).unwrap();
        assert_eq!(again, ImportStats { inserted: 0, duplicates: 4 });
        let retimed = PolicyCsvRow {
            policy_snapshot_date: Some("2024-03-31 00:00:00".to_string()),
            ..policy
        };
        assert_eq!(insert_policies(&conn, &[retimed]).unwrap().duplicates, 1);

        assert_eq!(verify_count(&conn).unwrap(), (4, 1));
        let store = SqliteWarehouse::new(conn);
        assert_eq!(store.count_claims(&ClaimPredicate::eligible()).unwrap(), 3);
    }

    // Same export loaded into both stores, fed to both through their own paths
    fn to_raw_row(row: &ClaimCsvRow) -> RawRow {
        let value = serde_json::to_value(row).unwrap();
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(column, v)| {
                let cell = match v {
                    serde_json::Value::Null => Cell::Null,
                    serde_json::Value::Number(n) => Cell::Integer(n.as_i64().unwrap()),
                    serde_json::Value::String(s) => Cell::Text(s.clone()),
                    other => panic!("unexpected export value {}", other),
                };
                (column.clone(), cell)
            })
            .collect()
    }

    const DATES: [&str; 6] = [
        "2024-01-31",
        "2024-02-29",
        "2024-03-31",
        "2024-01-31 00:00:00",
        "2024-02-29T00:00:00",
        "2024-03-31 00:00:00",
    ];
    const DECISIONS: [&str; 3] = ["Approved", "Denied", "In Assessment"];
    const CATEGORIES: [&str; 3] = ["Facility", "Home Health", "Other"];

    fn arb_export() -> impl Strategy<Value = Vec<ClaimCsvRow>> {
        prop::collection::vec(
            (0..4usize, 0..4i64, 0..3i64, 0..DATES.len(), 0..3usize, 0..3i64, 0..3i64),
            0..30,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (decision, month, flag, date, carrier, facility, other))| ClaimCsvRow {
                    tpa_fee_worksheet_snapshot_fact_id: Some(format!("C-{}", i)),
                    carrier_name: ["Acme Life", "Beacon Mutual"].get(carrier).map(|c| c.to_string()),
                    decision: DECISIONS.get(decision).map(|d| d.to_string()),
                    ongoing_rate_month: Some(month),
                    is_initial_decision_flag: Some(flag),
                    snapshot_date: DATES[date].to_string(),
                    ongoing_all_facilities: Some(facility),
                    all_other: Some(other),
                    ..ClaimCsvRow::default()
                })
                .collect()
        })
    }

    fn arb_spec() -> impl Strategy<Value = FilterSpec> {
        (
            prop::option::of(prop::sample::select(vec!["Acme Life", "Beacon Mutual"])),
            prop::option::of(prop::sample::select(vec!["2024-01-10", "2024-02-10", "2024-03-10"])),
            prop::sample::subsequence(DECISIONS.to_vec(), 0..=3),
            prop::sample::subsequence(CATEGORIES.to_vec(), 0..=3),
        )
            .prop_map(|(carrier, report, decisions, categories)| {
                FilterSpec::scoped(carrier, report)
                    .unwrap()
                    .with_decisions(decisions)
                    .with_categories(categories)
            })
    }

    proptest! {
        #[test]
        fn prop_sqlite_agrees_with_in_memory(export in arb_export(), spec in arb_spec()) {
            let sqlite = warehouse_with(&export, &[]);
            let memory = InMemoryWarehouse::new();
            memory.insert_claim_rows(export.iter().map(to_raw_row).collect()).unwrap();

            let predicate = spec.predicate();
            prop_assert_eq!(
                sqlite.count_claims(&predicate).unwrap(),
                memory.count_claims(&predicate).unwrap()
            );
            prop_assert_eq!(
                claim_ids(sqlite.query_claims(&predicate, None).unwrap()),
                claim_ids(memory.query_claims(&predicate, None).unwrap())
            );
        }
    }
}
