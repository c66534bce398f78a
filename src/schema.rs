// 🗂️ Schema Adapters - warehouse columns → normalized field names
// One canonical record design; each warehouse layout is a column map, not a parallel code path

use crate::error::{AnalyticsError, Result};

// ============================================================================
// TABLE SCHEMA
// ============================================================================

/// Column mapping for one warehouse fact table.
///
/// `columns` pairs each warehouse column with the normalized field name the
/// core uses. Columns not listed here pass through lower-cased.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [(&'static str, &'static str)],
    /// Columns holding exact fixed-point values (surface as `Cell::Decimal`)
    pub decimal_columns: &'static [&'static str],
    /// Key columns; integers here stay exact instead of becoming floats
    pub identifier_columns: &'static [&'static str],
}

impl TableSchema {
    /// Normalized field name for a warehouse column (case-insensitive)
    pub fn field_for(&self, column: &str) -> String {
        self.columns
            .iter()
            .find(|(col, _)| col.eq_ignore_ascii_case(column))
            .map(|(_, field)| field.to_string())
            .unwrap_or_else(|| column.to_lowercase())
    }

    /// Warehouse column backing a normalized field
    pub fn column_for(&self, field: &str) -> Result<&'static str> {
        self.columns
            .iter()
            .find(|(_, f)| *f == field)
            .map(|(col, _)| *col)
            .ok_or_else(|| {
                AnalyticsError::aggregation(format!(
                    "table {} has no column mapped to field '{}'",
                    self.table, field
                ))
            })
    }

    pub fn is_decimal(&self, column: &str) -> bool {
        self.decimal_columns
            .iter()
            .any(|col| col.eq_ignore_ascii_case(column))
    }

    pub fn is_identifier(&self, column: &str) -> bool {
        self.identifier_columns
            .iter()
            .any(|col| col.eq_ignore_ascii_case(column))
    }

    /// All mapped warehouse columns, in mapping order
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(col, _)| *col)
    }
}

// ============================================================================
// CLAIMS DECISION SNAPSHOT FACT
// ============================================================================

pub const CLAIMS_SNAPSHOT_FACT: TableSchema = TableSchema {
    table: "CLAIMS_TPA_FEE_WORKSHEET_SNAPSHOT_FACT",
    columns: &[
        ("TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID", "claim_id"),
        ("POLICY_NUMBER", "policy_id"),
        ("CARRIER_NAME", "carrier_name"),
        ("DECISION", "decision"),
        ("ONGOING_RATE_MONTH", "ongoing_rate_month"),
        ("IS_INITIAL_DECISION_FLAG", "is_initial_decision_flag"),
        ("SNAPSHOT_DATE", "snapshot_date"),
        ("CERTIFICATIONDATE", "certification_date"),
        ("RFB_PROCESS_TO_DECISION_TAT", "turnaround_days"),
        ("RETRO_MONTHS", "retro_months"),
        ("INITIAL_DECISIONS_FACILITIES", "facility_initial"),
        ("ONGOING_ALL_FACILITIES", "facility_ongoing"),
        ("RETRO_ALL_FACILITIES", "facility_retro"),
        ("INITIAL_DECISIONS_HOME_HEALTH", "home_health_initial"),
        ("ONGOING_HOME_HEALTH", "home_health_ongoing"),
        ("RETRO_HOME_HEALTH", "home_health_retro"),
        ("INITIAL_DECISIONS_ALL_OTHER", "other_initial"),
        ("ALL_OTHER", "other_ongoing"),
        ("RETRO_ALL_OTHER", "other_retro"),
    ],
    decimal_columns: &[],
    identifier_columns: &["TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID", "POLICY_NUMBER"],
};

// ============================================================================
// POLICY MONTHLY SNAPSHOT FACT
// ============================================================================

pub const POLICY_MONTHLY_SNAPSHOT: TableSchema = TableSchema {
    table: "POLICY_MONTHLY_SNAPSHOT_FACT",
    columns: &[
        ("POLICY_ID", "policy_id"),
        ("CARRIER_NAME", "carrier_name"),
        ("INSURED_STATE", "insured_state"),
        ("POLICY_RESIDENCE_STATE", "residence_state"),
        ("POLICY_STATUS_DIM_ID", "status"),
        ("ANNUALIZED_PREMIUM", "annualized_premium"),
        ("LIFETIME_COLLECTED_PREMIUM", "lifetime_collected_premium"),
        ("PREMIUM_FREQUENCY", "premium_frequency"),
        ("ORIGINAL_EFFECTIVE_DT", "original_effective_date"),
        ("POLICY_EXPIRATION_DT", "expiration_date"),
        ("IN_WAIVER_FLG", "in_waiver"),
        ("IN_NONFORFEITURE_FLG", "in_nonforfeiture"),
        ("RATED_AGE", "insured_age"),
        ("TOTAL_ACTIVE_CLAIMS", "active_claims"),
        ("TOTAL_RFBS", "total_rfbs"),
        ("TOTAL_APPROVED_RFBS", "approved_rfbs"),
        ("TOTAL_DENIALS", "total_denials"),
        ("POLICY_SNAPSHOT_DATE", "snapshot_date"),
    ],
    decimal_columns: &["ANNUALIZED_PREMIUM", "LIFETIME_COLLECTED_PREMIUM"],
    identifier_columns: &["POLICY_ID"],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_columns_use_field_names() {
        assert_eq!(CLAIMS_SNAPSHOT_FACT.field_for("RFB_PROCESS_TO_DECISION_TAT"), "turnaround_days");
        assert_eq!(CLAIMS_SNAPSHOT_FACT.field_for("all_other"), "other_ongoing");
        assert_eq!(POLICY_MONTHLY_SNAPSHOT.field_for("RATED_AGE"), "insured_age");
    }

    #[test]
    fn test_unmapped_columns_are_lowercased() {
        assert_eq!(CLAIMS_SNAPSHOT_FACT.field_for("CLAIMANTNAME"), "claimantname");
        assert_eq!(CLAIMS_SNAPSHOT_FACT.field_for("Poc_Provider_Type_Desc"), "poc_provider_type_desc");
    }

    #[test]
    fn test_column_lookup() {
        assert_eq!(CLAIMS_SNAPSHOT_FACT.column_for("snapshot_date").unwrap(), "SNAPSHOT_DATE");
        assert_eq!(POLICY_MONTHLY_SNAPSHOT.column_for("snapshot_date").unwrap(), "POLICY_SNAPSHOT_DATE");
        assert!(CLAIMS_SNAPSHOT_FACT.column_for("premium").is_err());
    }

    #[test]
    fn test_decimal_columns() {
        assert!(POLICY_MONTHLY_SNAPSHOT.is_decimal("annualized_premium"));
        assert!(!POLICY_MONTHLY_SNAPSHOT.is_decimal("RATED_AGE"));
        assert!(!CLAIMS_SNAPSHOT_FACT.is_decimal("RETRO_MONTHS"));
    }
}
