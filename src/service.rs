// 🧭 Analytics Service - the operations the HTTP layer and CLI call
//
// request params → FilterSpec → predicate → warehouse → shaper → aggregate
// Aggregates are memoized in the injected TTL cache, keyed per operation.

use crate::aggregate::{ClaimsInsights, ClaimsSummary, CombinedDashboard, PolicyInsights, PolicyMetrics};
use crate::cache::TtlCache;
use crate::error::{AnalyticsError, Result};
use crate::filter::{ClaimPredicate, ClaimsQuery, FilterSpec, PoliciesQuery, PolicyFilter};
use crate::pagination::PageLimits;
use crate::records::{ClaimRecord, PolicyRecord};
use crate::shaper::{normalize_row, NormalizedRow, RawRow};
use crate::storage::Warehouse;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

pub const CLAIMS_LIST_PREFIX: &str = "claims:list:";
pub const CLAIMS_SUMMARY_PREFIX: &str = "claims:summary:";
pub const CLAIMS_INSIGHTS_PREFIX: &str = "claims:insights:";
pub const POLICY_METRICS_PREFIX: &str = "analytics:policy_metrics:";
pub const POLICY_INSIGHTS_PREFIX: &str = "analytics:policy_insights:";
pub const COMBINED_DASHBOARD_PREFIX: &str = "analytics:combined_dashboard:";

/// Log aggregation failures with their context before they propagate
fn traced<T>(operation: &str, context: &str, result: Result<T>) -> Result<T> {
    if let Err(AnalyticsError::Aggregation(msg)) = &result {
        error!(operation, context, error = %msg, "aggregation failed");
    }
    result
}

pub struct AnalyticsService<W: Warehouse> {
    warehouse: Arc<W>,
    cache: Arc<TtlCache>,
    limits: PageLimits,
}

impl<W: Warehouse> Clone for AnalyticsService<W> {
    fn clone(&self) -> Self {
        AnalyticsService {
            warehouse: Arc::clone(&self.warehouse),
            cache: Arc::clone(&self.cache),
            limits: self.limits,
        }
    }
}

impl<W: Warehouse> AnalyticsService<W> {
    pub fn new(warehouse: Arc<W>, cache: Arc<TtlCache>, limits: PageLimits) -> Self {
        AnalyticsService {
            warehouse,
            cache,
            limits,
        }
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn limits(&self) -> &PageLimits {
        &self.limits
    }

    /// Health probe against the warehouse
    pub fn ping(&self) -> Result<()> {
        self.warehouse.ping()
    }

    fn shape_claims(&self, rows: Vec<RawRow>) -> Result<Vec<NormalizedRow>> {
        let schema = self.warehouse.claims_schema();
        rows.into_iter().map(|row| normalize_row(row, schema)).collect()
    }

    fn shape_policies(&self, rows: Vec<RawRow>) -> Result<Vec<NormalizedRow>> {
        let schema = self.warehouse.policy_schema();
        rows.into_iter().map(|row| normalize_row(row, schema)).collect()
    }

    fn eligible_records(&self, predicate: &ClaimPredicate) -> Result<Vec<ClaimRecord>> {
        self.shape_claims(self.warehouse.query_claims(predicate, None)?)?
            .iter()
            .map(ClaimRecord::from_row)
            .collect()
    }

    fn policy_records(&self, filter: &PolicyFilter) -> Result<Vec<PolicyRecord>> {
        self.shape_policies(self.warehouse.query_policies(filter, None)?)?
            .iter()
            .map(PolicyRecord::from_row)
            .collect()
    }

    // ========================================================================
    // CLAIMS
    // ========================================================================

    pub fn claims_spec(&self, query: &ClaimsQuery) -> Result<FilterSpec> {
        FilterSpec::from_query(query, &self.limits)
    }

    /// Ordered, windowed, normalized claim rows
    pub fn get_filtered_claims(&self, spec: &FilterSpec) -> Result<Vec<NormalizedRow>> {
        info!(
            carrier = ?spec.carrier_name,
            report_date = ?spec.report_date,
            decisions = spec.decision_types.len(),
            categories = spec.categories.len(),
            limit = spec.page.limit,
            offset = spec.page.offset,
            "get_filtered_claims"
        );
        let result = self.cache.cached(CLAIMS_LIST_PREFIX, "get_filtered_claims", spec, None, || {
            let rows = self.warehouse.query_claims(&spec.predicate(), Some(&spec.page))?;
            self.shape_claims(rows)
        });
        traced("get_filtered_claims", &format!("{:?}", spec), result)
    }

    /// Same predicate as the listing, without the window
    pub fn count_claims(&self, spec: &FilterSpec) -> Result<u64> {
        info!(carrier = ?spec.carrier_name, report_date = ?spec.report_date, "count_claims");
        self.warehouse.count_claims(&spec.predicate())
    }

    pub fn get_claim_by_id(&self, claim_id: &str) -> Result<Option<NormalizedRow>> {
        info!(claim_id, "get_claim_by_id");
        let schema = self.warehouse.claims_schema();
        let result = self
            .warehouse
            .find_claim(claim_id)?
            .map(|row| normalize_row(row, schema))
            .transpose();
        traced("get_claim_by_id", claim_id, result)
    }

    pub fn get_claims_summary(&self, carrier_name: Option<&str>, report_date: Option<&str>) -> Result<ClaimsSummary> {
        info!(carrier = ?carrier_name, report_date = ?report_date, "get_claims_summary");
        let spec = FilterSpec::scoped(carrier_name, report_date)?;
        let args = (&spec.carrier_name, &spec.report_date);

        let result = self.cache.cached(CLAIMS_SUMMARY_PREFIX, "get_claims_summary", &args, None, || {
            let predicate = spec.predicate();
            match self.warehouse.aggregate_claims(&predicate)? {
                Some(row) => {
                    let shaped = normalize_row(row, self.warehouse.claims_schema())?;
                    ClaimsSummary::from_aggregate_row(&shaped)
                }
                None => Ok(ClaimsSummary::from_records(&self.eligible_records(&predicate)?)),
            }
        });
        traced("get_claims_summary", &format!("{:?}", args), result)
    }

    pub fn get_claims_insights(&self, carrier_name: Option<&str>, report_date: Option<&str>) -> Result<ClaimsInsights> {
        info!(carrier = ?carrier_name, report_date = ?report_date, "get_claims_insights");
        let spec = FilterSpec::scoped(carrier_name, report_date)?;
        let args = (&spec.carrier_name, &spec.report_date);

        let result = self.cache.cached(CLAIMS_INSIGHTS_PREFIX, "get_claims_insights", &args, None, || {
            let records = self.eligible_records(&spec.predicate())?;
            Ok(ClaimsInsights::from_records(&records))
        });
        traced("get_claims_insights", &format!("{:?}", args), result)
    }

    // ========================================================================
    // POLICIES
    // ========================================================================

    pub fn policy_filter(&self, query: &PoliciesQuery) -> Result<PolicyFilter> {
        PolicyFilter::from_query(query, &self.limits)
    }

    pub fn list_policies(&self, filter: &PolicyFilter) -> Result<Vec<NormalizedRow>> {
        info!(
            carrier = ?filter.carrier_name,
            snapshot_date = ?filter.snapshot_date,
            status = ?filter.status,
            state = ?filter.state,
            limit = filter.page.limit,
            offset = filter.page.offset,
            "list_policies"
        );
        let rows = self.warehouse.query_policies(filter, Some(&filter.page))?;
        traced("list_policies", &format!("{:?}", filter), self.shape_policies(rows))
    }

    pub fn count_policies(&self, filter: &PolicyFilter) -> Result<u64> {
        info!(carrier = ?filter.carrier_name, "count_policies");
        self.warehouse.count_policies(filter)
    }

    pub fn get_policy_by_id(&self, policy_id: i64) -> Result<Option<NormalizedRow>> {
        info!(policy_id, "get_policy_by_id");
        let schema = self.warehouse.policy_schema();
        let result = self
            .warehouse
            .find_policy(policy_id)?
            .map(|row| normalize_row(row, schema))
            .transpose();
        traced("get_policy_by_id", &policy_id.to_string(), result)
    }

    pub fn get_policy_metrics(&self, carrier_name: Option<&str>, snapshot_date: Option<&str>) -> Result<PolicyMetrics> {
        info!(carrier = ?carrier_name, snapshot_date = ?snapshot_date, "get_policy_metrics");
        let filter = PolicyFilter::scoped(carrier_name, snapshot_date)?;
        let args = (&filter.carrier_name, &filter.snapshot_date);

        let result = self.cache.cached(POLICY_METRICS_PREFIX, "get_policy_metrics", &args, None, || {
            Ok(PolicyMetrics::from_records(&self.policy_records(&filter)?))
        });
        traced("get_policy_metrics", &format!("{:?}", args), result)
    }

    pub fn get_policy_insights(&self, carrier_name: Option<&str>, snapshot_date: Option<&str>) -> Result<PolicyInsights> {
        info!(carrier = ?carrier_name, snapshot_date = ?snapshot_date, "get_policy_insights");
        let filter = PolicyFilter::scoped(carrier_name, snapshot_date)?;
        let args = (&filter.carrier_name, &filter.snapshot_date);

        let result = self.cache.cached(POLICY_INSIGHTS_PREFIX, "get_policy_insights", &args, None, || {
            Ok(PolicyInsights::from_records(&self.policy_records(&filter)?))
        });
        traced("get_policy_insights", &format!("{:?}", args), result)
    }

    // ========================================================================
    // COMBINED
    // ========================================================================

    /// Policy metrics at `snapshot_date` and claims summary at `report_date`
    pub fn get_combined_dashboard(
        &self,
        carrier_name: Option<&str>,
        snapshot_date: Option<&str>,
        report_date: Option<&str>,
    ) -> Result<CombinedDashboard> {
        info!(carrier = ?carrier_name, snapshot_date = ?snapshot_date, report_date = ?report_date, "get_combined_dashboard");
        let args = (carrier_name, snapshot_date, report_date);

        self.cache.cached(COMBINED_DASHBOARD_PREFIX, "get_combined_dashboard", &args, None, || {
            Ok(CombinedDashboard {
                policy_metrics: self.get_policy_metrics(carrier_name, snapshot_date)?,
                claims_summary: self.get_claims_summary(carrier_name, report_date)?,
                timestamp: Utc::now(),
            })
        })
    }
}
