// 🔎 Filter Predicate Builder
//
// Turns request parameters into one predicate over claim records.
// The core eligibility rule is always part of it; user filters are ANDed on top.
// Every predicate can be evaluated in memory (`matches`) or pushed down as SQL
// (`to_sql`); both forms must agree.

use crate::error::{AnalyticsError, Result};
use crate::pagination::{Page, PageLimits};
use crate::records::{CategoryGroup, ClaimRecord, OngoingRateMonth, PolicyRecord};
use crate::schema::TableSchema;
use chrono::{Datelike, NaiveDate};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// DATES
// ============================================================================

/// Parse a `YYYY-MM-DD` filter date
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AnalyticsError::invalid_filter(format!("malformed date '{}', expected YYYY-MM-DD", raw)))
}

/// Last calendar day of the month containing `date`
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(date)
}

// ============================================================================
// CORE ELIGIBILITY (always applied)
// ============================================================================

/// Exactly one of:
///   rate month 1 with flag 0 or 1
///   rate month 0 with flag 1
///   rate month 2 with flag 0 or 1
///
/// Initial decisions need the flag set while Ongoing and Restoration accept
/// either value. Keep the asymmetry as-is until the data owner says otherwise.
pub fn is_core_eligible(record: &ClaimRecord) -> bool {
    matches!(
        (record.rate_month(), record.is_initial_decision_flag),
        (Some(OngoingRateMonth::Ongoing), Some(0 | 1))
            | (Some(OngoingRateMonth::Initial), Some(1))
            | (Some(OngoingRateMonth::Restoration), Some(0 | 1))
    )
}

fn core_eligibility_sql(schema: &TableSchema) -> Result<String> {
    let month = schema.column_for("ongoing_rate_month")?;
    let flag = schema.column_for("is_initial_decision_flag")?;
    Ok(format!(
        "(({m} = 1 AND {f} IN (0, 1)) OR ({m} = 0 AND {f} = 1) OR ({m} = 2 AND {f} IN (0, 1)))",
        m = month,
        f = flag
    ))
}

// ============================================================================
// SQL FRAGMENT
// ============================================================================

/// A WHERE clause with positional parameters, ready for `rusqlite`
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWhere {
    pub clause: String,
    pub params: Vec<SqlValue>,
}

impl SqlWhere {
    fn new() -> Self {
        SqlWhere {
            clause: String::new(),
            params: Vec::new(),
        }
    }

    fn and(&mut self, condition: String) {
        if !self.clause.is_empty() {
            self.clause.push_str(" AND ");
        }
        self.clause.push_str(&condition);
    }

    fn placeholder(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    fn placeholders<I: IntoIterator<Item = SqlValue>>(&mut self, values: I) -> String {
        values
            .into_iter()
            .map(|v| self.placeholder(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `WHERE ...`, or empty when there is no condition
    pub fn where_sql(&self) -> String {
        if self.clause.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clause)
        }
    }
}

fn date_param(date: NaiveDate) -> SqlValue {
    SqlValue::Text(date.format("%Y-%m-%d").to_string())
}

// ============================================================================
// FILTER SPEC
// ============================================================================

/// Raw claims query parameters as they arrive over HTTP.
/// Lists are comma-separated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimsQuery {
    pub carrier_name: Option<String>,
    pub report_end_dt: Option<String>,
    pub decision_types: Option<String>,
    pub ongoing_rate_months: Option<String>,
    pub categories: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Validated, normalized claims filter for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub carrier_name: Option<String>,
    /// Already moved to month end
    pub report_date: Option<NaiveDate>,
    pub decision_types: BTreeSet<String>,
    pub ongoing_rate_months: BTreeSet<OngoingRateMonth>,
    /// Raw tokens; unknown ones are kept and match nothing
    pub categories: BTreeSet<String>,
    pub page: Page,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse a comma-separated list of rate month codes (closed domain: 0, 1, 2)
pub fn parse_rate_months(raw: Option<&str>) -> Result<BTreeSet<OngoingRateMonth>> {
    split_list(raw)
        .iter()
        .map(|token| {
            token
                .parse::<i64>()
                .ok()
                .and_then(OngoingRateMonth::from_code)
                .ok_or_else(|| {
                    AnalyticsError::invalid_filter(format!(
                        "unknown ongoing rate month '{}', expected 0, 1 or 2",
                        token
                    ))
                })
        })
        .collect()
}

impl FilterSpec {
    pub fn from_query(query: &ClaimsQuery, limits: &PageLimits) -> Result<Self> {
        let report_date = match non_empty(query.report_end_dt.as_deref()) {
            Some(raw) => Some(month_end(parse_date(&raw)?)),
            None => None,
        };

        Ok(FilterSpec {
            carrier_name: non_empty(query.carrier_name.as_deref()),
            report_date,
            decision_types: split_list(query.decision_types.as_deref()).into_iter().collect(),
            ongoing_rate_months: parse_rate_months(query.ongoing_rate_months.as_deref())?,
            categories: split_list(query.categories.as_deref()).into_iter().collect(),
            page: Page::from_params(query.limit, query.offset, limits)?,
        })
    }

    /// Carrier + report date only (summary / insights requests)
    pub fn scoped(carrier_name: Option<&str>, report_date: Option<&str>) -> Result<Self> {
        let report_date = match non_empty(report_date) {
            Some(raw) => Some(month_end(parse_date(&raw)?)),
            None => None,
        };
        Ok(FilterSpec {
            carrier_name: non_empty(carrier_name),
            report_date,
            ..FilterSpec::default()
        })
    }

    pub fn with_decisions<I, S>(mut self, decisions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decision_types = decisions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rate_months<I: IntoIterator<Item = OngoingRateMonth>>(mut self, months: I) -> Self {
        self.ongoing_rate_months = months.into_iter().collect();
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = page;
        self
    }

    pub fn predicate(&self) -> ClaimPredicate {
        ClaimPredicate::from_spec(self)
    }
}

// ============================================================================
// CLAIM PREDICATE
// ============================================================================

/// Opaque predicate over claim records. Built only through `FilterSpec` or
/// `ClaimPredicate::eligible()`, so the core rule can't be left out.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPredicate {
    carrier_name: Option<String>,
    snapshot_date: Option<NaiveDate>,
    decisions: Option<BTreeSet<String>>,
    rate_months: Option<BTreeSet<OngoingRateMonth>>,
    /// `Some(empty)` means only unknown categories were requested
    categories: Option<BTreeSet<CategoryGroup>>,
}

impl ClaimPredicate {
    /// Core eligibility only
    pub fn eligible() -> Self {
        ClaimPredicate {
            carrier_name: None,
            snapshot_date: None,
            decisions: None,
            rate_months: None,
            categories: None,
        }
    }

    pub fn from_spec(spec: &FilterSpec) -> Self {
        let categories = if spec.categories.is_empty() {
            None
        } else {
            Some(
                spec.categories
                    .iter()
                    .filter_map(|token| CategoryGroup::from_token(token))
                    .collect(),
            )
        };

        ClaimPredicate {
            carrier_name: spec.carrier_name.clone(),
            snapshot_date: spec.report_date.map(month_end),
            decisions: Some(spec.decision_types.clone()).filter(|d| !d.is_empty()),
            rate_months: Some(spec.ongoing_rate_months.clone()).filter(|m| !m.is_empty()),
            categories,
        }
    }

    pub fn matches(&self, record: &ClaimRecord) -> bool {
        if !is_core_eligible(record) {
            return false;
        }
        if let Some(carrier) = &self.carrier_name {
            if record.carrier_name.as_ref() != Some(carrier) {
                return false;
            }
        }
        if let Some(date) = self.snapshot_date {
            if record.snapshot_date != date {
                return false;
            }
        }
        if let Some(decisions) = &self.decisions {
            match &record.decision {
                Some(decision) if decisions.contains(decision) => {}
                _ => return false,
            }
        }
        if let Some(months) = &self.rate_months {
            match record.rate_month() {
                Some(month) if months.contains(&month) => {}
                _ => return false,
            }
        }
        if let Some(groups) = &self.categories {
            if !groups.iter().any(|g| record.category(*g).has_activity()) {
                return false;
            }
        }
        true
    }

    /// Same predicate as a parameterized WHERE clause over `schema`
    pub fn to_sql(&self, schema: &TableSchema) -> Result<SqlWhere> {
        let mut sql = SqlWhere::new();
        sql.and(core_eligibility_sql(schema)?);

        if let Some(carrier) = &self.carrier_name {
            let p = sql.placeholder(SqlValue::Text(carrier.clone()));
            sql.and(format!("{} = {}", schema.column_for("carrier_name")?, p));
        }
        if let Some(date) = self.snapshot_date {
            let p = sql.placeholder(date_param(date));
            sql.and(format!("{} = {}", schema.column_for("snapshot_date")?, p));
        }
        if let Some(decisions) = &self.decisions {
            let ps = sql.placeholders(decisions.iter().cloned().map(SqlValue::Text));
            sql.and(format!("{} IN ({})", schema.column_for("decision")?, ps));
        }
        if let Some(months) = &self.rate_months {
            let ps = sql.placeholders(months.iter().map(|m| SqlValue::Integer(m.code())));
            sql.and(format!("{} IN ({})", schema.column_for("ongoing_rate_month")?, ps));
        }
        if let Some(groups) = &self.categories {
            if groups.is_empty() {
                sql.and("1 = 0".to_string());
            } else {
                let mut any = Vec::new();
                for group in groups {
                    for field in group.fields() {
                        any.push(format!("{} > 0", schema.column_for(&field)?));
                    }
                }
                sql.and(format!("({})", any.join(" OR ")));
            }
        }
        Ok(sql)
    }
}

// ============================================================================
// POLICY FILTER (plain pass-through, no eligibility rule)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoliciesQuery {
    pub carrier_name: Option<String>,
    pub snapshot_date: Option<String>,
    pub policy_status: Option<String>,
    pub state: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFilter {
    pub carrier_name: Option<String>,
    /// Exact snapshot date (not moved to month end)
    pub snapshot_date: Option<NaiveDate>,
    pub status: Option<String>,
    /// Matches insured state or residence state
    pub state: Option<String>,
    pub page: Page,
}

impl PolicyFilter {
    pub fn from_query(query: &PoliciesQuery, limits: &PageLimits) -> Result<Self> {
        let snapshot_date = match non_empty(query.snapshot_date.as_deref()) {
            Some(raw) => Some(parse_date(&raw)?),
            None => None,
        };
        Ok(PolicyFilter {
            carrier_name: non_empty(query.carrier_name.as_deref()),
            snapshot_date,
            status: non_empty(query.policy_status.as_deref()),
            state: non_empty(query.state.as_deref()),
            page: Page::from_params(query.limit, query.offset, limits)?,
        })
    }

    /// Carrier + snapshot date only (metrics / insights requests)
    pub fn scoped(carrier_name: Option<&str>, snapshot_date: Option<&str>) -> Result<Self> {
        let snapshot_date = match non_empty(snapshot_date) {
            Some(raw) => Some(parse_date(&raw)?),
            None => None,
        };
        Ok(PolicyFilter {
            carrier_name: non_empty(carrier_name),
            snapshot_date,
            ..PolicyFilter::default()
        })
    }

    pub fn matches(&self, policy: &PolicyRecord) -> bool {
        if let Some(carrier) = &self.carrier_name {
            if policy.carrier_name.as_ref() != Some(carrier) {
                return false;
            }
        }
        if let Some(date) = self.snapshot_date {
            if policy.snapshot_date != Some(date) {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if policy.status.as_ref() != Some(status) {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if policy.insured_state.as_ref() != Some(state)
                && policy.residence_state.as_ref() != Some(state)
            {
                return false;
            }
        }
        true
    }

    pub fn to_sql(&self, schema: &TableSchema) -> Result<SqlWhere> {
        let mut sql = SqlWhere::new();

        if let Some(carrier) = &self.carrier_name {
            let p = sql.placeholder(SqlValue::Text(carrier.clone()));
            sql.and(format!("{} = {}", schema.column_for("carrier_name")?, p));
        }
        if let Some(date) = self.snapshot_date {
            let p = sql.placeholder(date_param(date));
            sql.and(format!("{} = {}", schema.column_for("snapshot_date")?, p));
        }
        if let Some(status) = &self.status {
            let p = sql.placeholder(SqlValue::Text(status.clone()));
            sql.and(format!("{} = {}", schema.column_for("status")?, p));
        }
        if let Some(state) = &self.state {
            let p = sql.placeholder(SqlValue::Text(state.clone()));
            sql.and(format!(
                "({} = {p} OR {} = {p})",
                schema.column_for("insured_state")?,
                schema.column_for("residence_state")?,
                p = p
            ));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::CategoryCounts;
    use crate::schema::{CLAIMS_SNAPSHOT_FACT, POLICY_MONTHLY_SNAPSHOT};
    use proptest::prelude::*;

    fn claim(decision: &str, month: i64, flag: i64) -> ClaimRecord {
        ClaimRecord {
            claim_id: Some(format!("{}-{}-{}", decision, month, flag)),
            policy_id: None,
            carrier_name: Some("Acme Life".to_string()),
            decision: Some(decision.to_string()),
            ongoing_rate_month: Some(month),
            is_initial_decision_flag: Some(flag),
            snapshot_date: NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
            certification_date: None,
            turnaround_days: None,
            retro_months: None,
            facility: CategoryCounts::default(),
            home_health: CategoryCounts::default(),
            other: CategoryCounts::default(),
        }
    }

    #[test]
    fn test_core_rule_truth_table() {
        assert!(is_core_eligible(&claim("Approved", 0, 1)));
        assert!(!is_core_eligible(&claim("Approved", 0, 0)));
        assert!(is_core_eligible(&claim("Approved", 1, 0)));
        assert!(is_core_eligible(&claim("Approved", 1, 1)));
        assert!(is_core_eligible(&claim("Approved", 2, 0)));
        assert!(is_core_eligible(&claim("Approved", 2, 1)));
        assert!(!is_core_eligible(&claim("Approved", 3, 1)));
        assert!(!is_core_eligible(&claim("Approved", 1, 2)));

        let mut missing_flag = claim("Approved", 1, 0);
        missing_flag.is_initial_decision_flag = None;
        assert!(!is_core_eligible(&missing_flag));
    }

    #[test]
    fn test_month_end() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(month_end(d(2024, 2, 3)), d(2024, 2, 29));
        assert_eq!(month_end(d(2023, 2, 28)), d(2023, 2, 28));
        assert_eq!(month_end(d(2024, 12, 1)), d(2024, 12, 31));
        assert_eq!(month_end(d(2024, 4, 30)), d(2024, 4, 30));
    }

    #[test]
    fn test_malformed_date_is_invalid_filter() {
        let query = ClaimsQuery {
            report_end_dt: Some("2024-13-40".to_string()),
            ..ClaimsQuery::default()
        };
        let err = FilterSpec::from_query(&query, &PageLimits::default()).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_from_query_parses_lists() {
        let query = ClaimsQuery {
            carrier_name: Some("Acme Life".to_string()),
            report_end_dt: Some("2024-02-10".to_string()),
            decision_types: Some("Approved, Denied,".to_string()),
            ongoing_rate_months: Some("0,2".to_string()),
            categories: Some("Facility,Home Health".to_string()),
            limit: Some(25),
            offset: Some(50),
        };
        let spec = FilterSpec::from_query(&query, &PageLimits::default()).unwrap();

        assert_eq!(spec.report_date, NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(spec.decision_types.len(), 2);
        assert!(spec.ongoing_rate_months.contains(&OngoingRateMonth::Restoration));
        assert_eq!(spec.page, Page { limit: 25, offset: 50 });
    }

    #[test]
    fn test_unknown_rate_month_is_rejected() {
        assert!(parse_rate_months(Some("0,7")).is_err());
        assert!(parse_rate_months(Some("x")).is_err());
        assert!(parse_rate_months(None).unwrap().is_empty());
    }

    #[test]
    fn test_report_date_matches_month_end_snapshot() {
        let spec = FilterSpec::scoped(Some("Acme Life"), Some("2024-02-01")).unwrap();
        assert!(spec.predicate().matches(&claim("Approved", 1, 1)));

        let other_month = FilterSpec::scoped(None, Some("2024-03-31")).unwrap();
        assert!(!other_month.predicate().matches(&claim("Approved", 1, 1)));
    }

    #[test]
    fn test_user_rate_months_stack_on_core_rule() {
        let spec = FilterSpec::default().with_rate_months([OngoingRateMonth::Initial]);
        let predicate = spec.predicate();

        assert!(predicate.matches(&claim("Approved", 0, 1)));
        assert!(!predicate.matches(&claim("Approved", 0, 0)));
        assert!(!predicate.matches(&claim("Approved", 1, 1)));
    }

    #[test]
    fn test_unknown_decision_matches_nothing() {
        let predicate = FilterSpec::default().with_decisions(["Pending Review"]).predicate();
        assert!(!predicate.matches(&claim("Approved", 1, 1)));
    }

    #[test]
    fn test_categories_are_or_combined() {
        let mut home = claim("Approved", 1, 1);
        home.home_health.retro = Some(2);
        let mut other = claim("Approved", 1, 1);
        other.other.initial = Some(1);
        let none = claim("Approved", 1, 1);

        let predicate = FilterSpec::default()
            .with_categories(["Facility", "Home Health"])
            .predicate();

        assert!(predicate.matches(&home));
        assert!(!predicate.matches(&other));
        assert!(!predicate.matches(&none));

        let unknown_only = FilterSpec::default().with_categories(["Respite"]).predicate();
        assert!(!unknown_only.matches(&home));
    }

    #[test]
    fn test_sql_shape() {
        let spec = FilterSpec::scoped(Some("Acme Life"), Some("2024-02-10"))
            .unwrap()
            .with_decisions(["Approved", "Denied"])
            .with_categories(["Other"]);
        let sql = spec.predicate().to_sql(&CLAIMS_SNAPSHOT_FACT).unwrap();

        assert!(sql.clause.starts_with("((ONGOING_RATE_MONTH = 1 AND IS_INITIAL_DECISION_FLAG IN (0, 1))"));
        assert!(sql.clause.contains("CARRIER_NAME = ?1"));
        assert!(sql.clause.contains("SNAPSHOT_DATE = ?2"));
        assert!(sql.clause.contains("DECISION IN (?3, ?4)"));
        assert!(sql.clause.contains("(INITIAL_DECISIONS_ALL_OTHER > 0 OR ALL_OTHER > 0 OR RETRO_ALL_OTHER > 0)"));
        assert_eq!(sql.params[1], SqlValue::Text("2024-02-29".to_string()));
        assert_eq!(sql.params.len(), 4);
    }

    #[test]
    fn test_policy_state_matches_either_column() {
        let policy = PolicyRecord {
            policy_id: Some(1),
            carrier_name: Some("Acme Life".to_string()),
            insured_state: Some("OH".to_string()),
            residence_state: Some("FL".to_string()),
            status: Some("ACTIVE".to_string()),
            annualized_premium: None,
            lifetime_collected_premium: None,
            premium_frequency: None,
            original_effective_date: None,
            expiration_date: None,
            in_waiver: None,
            in_nonforfeiture: None,
            insured_age: None,
            active_claims: None,
            total_rfbs: None,
            approved_rfbs: None,
            total_denials: None,
            snapshot_date: None,
        };
        let florida = PolicyFilter { state: Some("FL".to_string()), ..PolicyFilter::default() };
        let texas = PolicyFilter { state: Some("TX".to_string()), ..PolicyFilter::default() };

        assert!(florida.matches(&policy));
        assert!(!texas.matches(&policy));

        let sql = florida.to_sql(&POLICY_MONTHLY_SNAPSHOT).unwrap();
        assert_eq!(sql.clause, "(INSURED_STATE = ?1 OR POLICY_RESIDENCE_STATE = ?1)");
    }

    fn arb_claim() -> impl Strategy<Value = ClaimRecord> {
        (0i64..4, 0i64..3, prop::option::of(0i64..3)).prop_map(|(month, flag, facility)| {
            let mut c = claim("Approved", month, flag);
            c.facility.initial = facility;
            c
        })
    }

    proptest! {
        #[test]
        fn prop_filter_is_idempotent_and_order_independent(
            records in prop::collection::vec(arb_claim(), 0..40)
        ) {
            let predicate = FilterSpec::default().with_categories(["Facility"]).predicate();
            let once: Vec<ClaimRecord> = records.iter().filter(|r| predicate.matches(r)).cloned().collect();
            let twice: Vec<ClaimRecord> = once.iter().filter(|r| predicate.matches(r)).cloned().collect();
            prop_assert_eq!(&once, &twice);

            let mut reversed = records.clone();
            reversed.reverse();
            let mut from_reversed: Vec<ClaimRecord> = reversed.iter().filter(|r| predicate.matches(r)).cloned().collect();
            from_reversed.reverse();
            prop_assert_eq!(&once, &from_reversed);
        }
    }
}
