// 🏛️ Storage collaborator - what the analytics core needs from a warehouse
//
// Implementations hand back raw driver rows; normalization happens in the
// shaper, never here. Ordering contract for listings: snapshot date
// descending, ties in insertion order, then the page window.

use crate::error::{AnalyticsError, Result};
use crate::filter::{ClaimPredicate, PolicyFilter};
use crate::pagination::{paginate, Page};
use crate::records::{CategoryCounts, CategoryGroup, ClaimRecord, PolicyRecord};
use crate::schema::{TableSchema, CLAIMS_SNAPSHOT_FACT, POLICY_MONTHLY_SNAPSHOT};
use crate::shaper::{normalize_row, opt_i64, opt_string, Cell, RawRow};
use std::sync::{RwLock, RwLockReadGuard};

pub trait Warehouse: Send + Sync {
    fn claims_schema(&self) -> &'static TableSchema {
        &CLAIMS_SNAPSHOT_FACT
    }

    fn policy_schema(&self) -> &'static TableSchema {
        &POLICY_MONTHLY_SNAPSHOT
    }

    /// Eligible claims matching `predicate`, ordered, optionally windowed
    fn query_claims(&self, predicate: &ClaimPredicate, page: Option<&Page>) -> Result<Vec<RawRow>>;

    fn count_claims(&self, predicate: &ClaimPredicate) -> Result<u64>;

    /// Push-down summary row; `None` means "reduce locally"
    fn aggregate_claims(&self, _predicate: &ClaimPredicate) -> Result<Option<RawRow>> {
        Ok(None)
    }

    /// Lookup by claim id, no eligibility rule applied
    fn find_claim(&self, claim_id: &str) -> Result<Option<RawRow>>;

    fn query_policies(&self, filter: &PolicyFilter, page: Option<&Page>) -> Result<Vec<RawRow>>;

    fn count_policies(&self, filter: &PolicyFilter) -> Result<u64>;

    fn find_policy(&self, policy_id: i64) -> Result<Option<RawRow>>;

    /// Cheap connectivity probe
    fn ping(&self) -> Result<()>;
}

// ============================================================================
// TYPED RECORD → RAW ROW (seeding stores from typed data)
// ============================================================================

fn counts_cells(group: CategoryGroup, counts: &CategoryCounts) -> [(String, Cell); 3] {
    let [initial, ongoing, retro] = group.fields();
    [
        (initial, counts.initial.into()),
        (ongoing, counts.ongoing.into()),
        (retro, counts.retro.into()),
    ]
}

fn with_columns(fields: Vec<(String, Cell)>, schema: &TableSchema) -> Result<RawRow> {
    fields
        .into_iter()
        .map(|(field, cell)| Ok((schema.column_for(&field)?.to_string(), cell)))
        .collect()
}

/// Render a claim as the row a warehouse would return for it
pub fn claim_to_row(record: &ClaimRecord, schema: &TableSchema) -> Result<RawRow> {
    let mut fields: Vec<(String, Cell)> = vec![
        ("claim_id".into(), record.claim_id.clone().into()),
        ("policy_id".into(), record.policy_id.clone().into()),
        ("carrier_name".into(), record.carrier_name.clone().into()),
        ("decision".into(), record.decision.clone().into()),
        ("ongoing_rate_month".into(), record.ongoing_rate_month.into()),
        ("is_initial_decision_flag".into(), record.is_initial_decision_flag.into()),
        ("snapshot_date".into(), Some(record.snapshot_date).into()),
        ("certification_date".into(), record.certification_date.into()),
        ("turnaround_days".into(), record.turnaround_days.into()),
        ("retro_months".into(), record.retro_months.into()),
    ];
    for group in CategoryGroup::ALL {
        fields.extend(counts_cells(group, record.category(group)));
    }
    with_columns(fields, schema)
}

/// Render a policy as the row a warehouse would return for it. Premiums come
/// back as exact decimals, the way a fixed-point warehouse column does.
pub fn policy_to_row(record: &PolicyRecord, schema: &TableSchema) -> Result<RawRow> {
    let decimal = |v: Option<f64>| v.map_or(Cell::Null, |v| Cell::Decimal(format!("{:.2}", v)));
    let fields: Vec<(String, Cell)> = vec![
        ("policy_id".into(), record.policy_id.into()),
        ("carrier_name".into(), record.carrier_name.clone().into()),
        ("insured_state".into(), record.insured_state.clone().into()),
        ("residence_state".into(), record.residence_state.clone().into()),
        ("status".into(), record.status.clone().into()),
        ("annualized_premium".into(), decimal(record.annualized_premium)),
        ("lifetime_collected_premium".into(), decimal(record.lifetime_collected_premium)),
        ("premium_frequency".into(), record.premium_frequency.clone().into()),
        ("original_effective_date".into(), record.original_effective_date.into()),
        ("expiration_date".into(), record.expiration_date.into()),
        ("in_waiver".into(), record.in_waiver.clone().into()),
        ("in_nonforfeiture".into(), record.in_nonforfeiture.clone().into()),
        ("insured_age".into(), record.insured_age.into()),
        ("active_claims".into(), record.active_claims.into()),
        ("total_rfbs".into(), record.total_rfbs.into()),
        ("approved_rfbs".into(), record.approved_rfbs.into()),
        ("total_denials".into(), record.total_denials.into()),
        ("snapshot_date".into(), record.snapshot_date.into()),
    ];
    with_columns(fields, schema)
}

// ============================================================================
// IN-MEMORY WAREHOUSE
// ============================================================================

/// Rows held in memory in insertion order. Predicates are evaluated locally
/// through the normalization boundary; no push-down aggregation.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    claims: RwLock<Vec<RawRow>>,
    policies: RwLock<Vec<RawRow>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| AnalyticsError::StorageUnavailable("in-memory store lock poisoned".to_string()))
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        InMemoryWarehouse::default()
    }

    pub fn from_records(claims: &[ClaimRecord], policies: &[PolicyRecord]) -> Result<Self> {
        let store = InMemoryWarehouse::new();
        store.insert_claims(claims)?;
        store.insert_policies(policies)?;
        Ok(store)
    }

    pub fn insert_claim_rows(&self, rows: Vec<RawRow>) -> Result<()> {
        self.claims
            .write()
            .map_err(|_| AnalyticsError::StorageUnavailable("in-memory store lock poisoned".to_string()))?
            .extend(rows);
        Ok(())
    }

    pub fn insert_policy_rows(&self, rows: Vec<RawRow>) -> Result<()> {
        self.policies
            .write()
            .map_err(|_| AnalyticsError::StorageUnavailable("in-memory store lock poisoned".to_string()))?
            .extend(rows);
        Ok(())
    }

    pub fn insert_claims(&self, claims: &[ClaimRecord]) -> Result<()> {
        let rows = claims
            .iter()
            .map(|c| claim_to_row(c, &CLAIMS_SNAPSHOT_FACT))
            .collect::<Result<Vec<_>>>()?;
        self.insert_claim_rows(rows)
    }

    pub fn insert_policies(&self, policies: &[PolicyRecord]) -> Result<()> {
        let rows = policies
            .iter()
            .map(|p| policy_to_row(p, &POLICY_MONTHLY_SNAPSHOT))
            .collect::<Result<Vec<_>>>()?;
        self.insert_policy_rows(rows)
    }

    fn matching_claims(&self, predicate: &ClaimPredicate) -> Result<Vec<(ClaimRecord, RawRow)>> {
        let rows = read(&self.claims)?;
        let mut out = Vec::new();
        for row in rows.iter() {
            let record = ClaimRecord::from_row(&normalize_row(row.clone(), &CLAIMS_SNAPSHOT_FACT)?)?;
            if predicate.matches(&record) {
                out.push((record, row.clone()));
            }
        }
        Ok(out)
    }

    fn matching_policies(&self, filter: &PolicyFilter) -> Result<Vec<(PolicyRecord, RawRow)>> {
        let rows = read(&self.policies)?;
        let mut out = Vec::new();
        for row in rows.iter() {
            let record = PolicyRecord::from_row(&normalize_row(row.clone(), &POLICY_MONTHLY_SNAPSHOT)?)?;
            if filter.matches(&record) {
                out.push((record, row.clone()));
            }
        }
        Ok(out)
    }
}

impl Warehouse for InMemoryWarehouse {
    fn query_claims(&self, predicate: &ClaimPredicate, page: Option<&Page>) -> Result<Vec<RawRow>> {
        let matched = self.matching_claims(predicate)?;
        Ok(paginate(matched, |(record, _)| Some(record.snapshot_date), page)
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    fn count_claims(&self, predicate: &ClaimPredicate) -> Result<u64> {
        Ok(self.matching_claims(predicate)?.len() as u64)
    }

    fn find_claim(&self, claim_id: &str) -> Result<Option<RawRow>> {
        for row in read(&self.claims)?.iter() {
            let shaped = normalize_row(row.clone(), &CLAIMS_SNAPSHOT_FACT)?;
            if opt_string(&shaped, "claim_id")?.as_deref() == Some(claim_id) {
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    fn query_policies(&self, filter: &PolicyFilter, page: Option<&Page>) -> Result<Vec<RawRow>> {
        let matched = self.matching_policies(filter)?;
        Ok(paginate(matched, |(record, _)| record.snapshot_date, page)
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    fn count_policies(&self, filter: &PolicyFilter) -> Result<u64> {
        Ok(self.matching_policies(filter)?.len() as u64)
    }

    fn find_policy(&self, policy_id: i64) -> Result<Option<RawRow>> {
        for row in read(&self.policies)?.iter() {
            let shaped = normalize_row(row.clone(), &POLICY_MONTHLY_SNAPSHOT)?;
            if opt_i64(&shaped, "policy_id")? == Some(policy_id) {
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    fn ping(&self) -> Result<()> {
        read(&self.claims).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use chrono::NaiveDate;

    fn claim(id: &str, day: (i32, u32, u32), month: i64, flag: i64) -> ClaimRecord {
        ClaimRecord {
            claim_id: Some(id.to_string()),
            policy_id: Some("P-1".to_string()),
            carrier_name: Some("Acme Life".to_string()),
            decision: Some("Approved".to_string()),
            ongoing_rate_month: Some(month),
            is_initial_decision_flag: Some(flag),
            snapshot_date: NaiveDate::from_ymd_opt(day.0, day.1, day.2).unwrap(),
            certification_date: None,
            turnaround_days: Some(12),
            retro_months: None,
            facility: CategoryCounts { initial: Some(1), ongoing: None, retro: None },
            home_health: CategoryCounts::default(),
            other: CategoryCounts::default(),
        }
    }

    fn ids(rows: &[RawRow]) -> Vec<String> {
        rows.iter()
            .map(|row| {
                let shaped = normalize_row(row.clone(), &CLAIMS_SNAPSHOT_FACT).unwrap();
                opt_string(&shaped, "claim_id").unwrap().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_claim_round_trips_through_raw_row() {
        let original = claim("C-1", (2024, 1, 31), 1, 0);
        let row = claim_to_row(&original, &CLAIMS_SNAPSHOT_FACT).unwrap();

        assert!(row.iter().any(|(col, _)| col == "TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID"));
        let back = ClaimRecord::from_row(&normalize_row(row, &CLAIMS_SNAPSHOT_FACT).unwrap()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_policy_premiums_surface_as_decimals() {
        let policy = PolicyRecord {
            policy_id: Some(7),
            carrier_name: None,
            insured_state: None,
            residence_state: None,
            status: None,
            annualized_premium: Some(1234.5),
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
        let row = policy_to_row(&policy, &POLICY_MONTHLY_SNAPSHOT).unwrap();
        let premium = row.iter().find(|(col, _)| col == "ANNUALIZED_PREMIUM").unwrap();
        assert_eq!(premium.1, Cell::Decimal("1234.50".to_string()));
    }

    #[test]
    fn test_query_orders_and_windows() {
        let store = InMemoryWarehouse::from_records(
            &[
                claim("old", (2023, 12, 31), 1, 0),
                claim("new-a", (2024, 1, 31), 1, 0),
                claim("skip", (2024, 1, 31), 0, 0),
                claim("new-b", (2024, 1, 31), 2, 1),
            ],
            &[],
        )
        .unwrap();
        let predicate = ClaimPredicate::eligible();

        let all = store.query_claims(&predicate, None).unwrap();
        assert_eq!(ids(&all), vec!["new-a", "new-b", "old"]);

        let page = Page { limit: 1, offset: 1 };
        assert_eq!(ids(&store.query_claims(&predicate, Some(&page)).unwrap()), vec!["new-b"]);

        let far = Page { limit: 10, offset: 10 };
        assert!(store.query_claims(&predicate, Some(&far)).unwrap().is_empty());
        assert_eq!(store.count_claims(&predicate).unwrap(), 3);
    }

    #[test]
    fn test_lookup_ignores_eligibility() {
        let store = InMemoryWarehouse::from_records(&[claim("skip", (2024, 1, 31), 0, 0)], &[]).unwrap();
        assert!(store.find_claim("skip").unwrap().is_some());
        assert!(store.find_claim("missing").unwrap().is_none());

        let spec = FilterSpec::default();
        assert_eq!(store.count_claims(&spec.predicate()).unwrap(), 0);
    }

    #[test]
    fn test_numeric_claim_id_lookup_is_exact() {
        let big = 9_007_199_254_740_993_i64;
        let store = InMemoryWarehouse::new();
        store
            .insert_claim_rows(vec![vec![(
                "TPA_FEE_WORKSHEET_SNAPSHOT_FACT_ID".to_string(),
                Cell::Integer(big),
            )]])
            .unwrap();

        assert!(store.find_claim("9007199254740993").unwrap().is_some());
        assert!(store.find_claim("9007199254740992").unwrap().is_none());
    }

    #[test]
    fn test_no_push_down_by_default() {
        let store = InMemoryWarehouse::new();
        assert!(store.aggregate_claims(&ClaimPredicate::eligible()).unwrap().is_none());
        assert!(store.ping().is_ok());
    }
}
