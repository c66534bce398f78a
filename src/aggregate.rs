// 📊 Aggregation Engine - pure reductions over eligible record sets
//
// Every ratio is a percentage in 0..=100 and is 0 when its denominator is 0.
// Nulls count as 0 in sums and are left out of averages.

use crate::error::Result;
use crate::filter::is_core_eligible;
use crate::records::{CategoryGroup, ClaimRecord, PolicyRecord, APPROVED, DENIED, IN_ASSESSMENT};
use crate::shaper::{opt_f64, NormalizedRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// `part / whole * 100`, or 0 when `whole` is 0
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Mean of the present values, 0 when there are none
fn mean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0u64), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

// ============================================================================
// CLAIMS SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsSummary {
    pub total_claims: u64,
    pub approved_claims: u64,
    pub denied_claims: u64,
    pub in_assessment_claims: u64,
    pub approval_rate: f64,
    pub avg_processing_time_days: f64,
    pub total_retro_claims: u64,
    pub retro_percentage: f64,
    pub facility_claims: i64,
    pub home_health_claims: i64,
    pub other_claims: i64,
    pub initial_decisions: u64,
    pub ongoing_decisions: u64,
    pub restoration_decisions: u64,
}

/// Raw counts before the derived rates are filled in
#[derive(Debug, Default)]
struct ClaimCounts {
    total: u64,
    approved: u64,
    denied: u64,
    in_assessment: u64,
    avg_tat: f64,
    retro: u64,
    facility: i64,
    home_health: i64,
    other: i64,
    initial: u64,
    ongoing: u64,
    restoration: u64,
}

impl ClaimCounts {
    fn into_summary(self) -> ClaimsSummary {
        ClaimsSummary {
            total_claims: self.total,
            approved_claims: self.approved,
            denied_claims: self.denied,
            in_assessment_claims: self.in_assessment,
            approval_rate: percentage(self.approved, self.total),
            avg_processing_time_days: self.avg_tat,
            total_retro_claims: self.retro,
            retro_percentage: percentage(self.retro, self.total),
            facility_claims: self.facility,
            home_health_claims: self.home_health,
            other_claims: self.other,
            initial_decisions: self.initial,
            ongoing_decisions: self.ongoing,
            restoration_decisions: self.restoration,
        }
    }
}

fn count_field(row: &NormalizedRow, name: &str) -> Result<u64> {
    Ok(opt_f64(row, name)?.map_or(0, |v| v.max(0.0) as u64))
}

fn sum_field(row: &NormalizedRow, name: &str) -> Result<i64> {
    Ok(opt_f64(row, name)?.map_or(0, |v| v as i64))
}

impl ClaimsSummary {
    /// Local reduction. Ineligible records are dropped first, so callers may
    /// pass an already-filtered set or a raw one.
    pub fn from_records(records: &[ClaimRecord]) -> Self {
        let eligible: Vec<&ClaimRecord> = records.iter().filter(|r| is_core_eligible(r)).collect();
        let mut counts = ClaimCounts {
            total: eligible.len() as u64,
            avg_tat: mean(eligible.iter().filter_map(|r| r.turnaround_days).map(|d| d as f64)),
            ..ClaimCounts::default()
        };

        for record in &eligible {
            match record.decision.as_deref() {
                Some(APPROVED) => counts.approved += 1,
                Some(DENIED) => counts.denied += 1,
                Some(IN_ASSESSMENT) => counts.in_assessment += 1,
                _ => {}
            }
            if record.is_retro() {
                counts.retro += 1;
            }
            counts.facility += record.facility.total();
            counts.home_health += record.home_health.total();
            counts.other += record.other.total();
            match record.ongoing_rate_month {
                Some(0) => counts.initial += 1,
                Some(1) => counts.ongoing += 1,
                Some(2) => counts.restoration += 1,
                _ => {}
            }
        }

        counts.into_summary()
    }

    /// Build from a push-down aggregate row (already normalized)
    pub fn from_aggregate_row(row: &NormalizedRow) -> Result<Self> {
        let counts = ClaimCounts {
            total: count_field(row, "total_claims")?,
            approved: count_field(row, "approved_claims")?,
            denied: count_field(row, "denied_claims")?,
            in_assessment: count_field(row, "in_assessment_claims")?,
            avg_tat: opt_f64(row, "avg_processing_time_days")?.unwrap_or(0.0),
            retro: count_field(row, "total_retro_claims")?,
            facility: sum_field(row, "facility_claims")?,
            home_health: sum_field(row, "home_health_claims")?,
            other: sum_field(row, "other_claims")?,
            initial: count_field(row, "initial_decisions")?,
            ongoing: count_field(row, "ongoing_decisions")?,
            restoration: count_field(row, "restoration_decisions")?,
        };
        Ok(counts.into_summary())
    }

    pub fn category_breakdown(&self) -> BTreeMap<String, i64> {
        BTreeMap::from([
            (CategoryGroup::Facility.token().to_string(), self.facility_claims),
            (CategoryGroup::HomeHealth.token().to_string(), self.home_health_claims),
            (CategoryGroup::Other.token().to_string(), self.other_claims),
        ])
    }
}

// ============================================================================
// CLAIMS INSIGHTS
// ============================================================================

/// Count per distinct decision value present; null decisions are skipped
pub fn decision_breakdown(records: &[ClaimRecord]) -> BTreeMap<String, u64> {
    let mut out = BTreeMap::new();
    for record in records.iter().filter(|r| is_core_eligible(r)) {
        if let Some(decision) = &record.decision {
            *out.entry(decision.clone()).or_insert(0) += 1;
        }
    }
    out
}

/// Mean turnaround overall and per category (records with activity in it)
pub fn avg_tat_by_category(records: &[ClaimRecord]) -> BTreeMap<String, f64> {
    let eligible: Vec<&ClaimRecord> = records.iter().filter(|r| is_core_eligible(r)).collect();
    let tat = |r: &&ClaimRecord| r.turnaround_days.map(|d| d as f64);

    let mut out = BTreeMap::new();
    out.insert("Overall".to_string(), mean(eligible.iter().filter_map(tat)));
    for group in CategoryGroup::ALL {
        let avg = mean(
            eligible
                .iter()
                .filter(|r| r.category(group).has_activity())
                .filter_map(tat),
        );
        out.insert(group.token().to_string(), avg);
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetroAnalysis {
    pub total_retro_claims: u64,
    /// Mean over retro claims only
    pub avg_retro_months: f64,
    pub total_retro_facilities: i64,
    pub total_retro_home_health: i64,
    pub total_retro_other: i64,
}

impl RetroAnalysis {
    pub fn from_records(records: &[ClaimRecord]) -> Self {
        let retro: Vec<&ClaimRecord> = records
            .iter()
            .filter(|r| is_core_eligible(r) && r.is_retro())
            .collect();

        RetroAnalysis {
            total_retro_claims: retro.len() as u64,
            avg_retro_months: mean(retro.iter().filter_map(|r| r.retro_months).map(|m| m as f64)),
            total_retro_facilities: retro.iter().map(|r| r.facility.retro.unwrap_or(0)).sum(),
            total_retro_home_health: retro.iter().map(|r| r.home_health.retro.unwrap_or(0)).sum(),
            total_retro_other: retro.iter().map(|r| r.other.retro.unwrap_or(0)).sum(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimsInsights {
    pub summary: ClaimsSummary,
    pub decision_breakdown: BTreeMap<String, u64>,
    pub category_breakdown: BTreeMap<String, i64>,
    pub avg_tat_by_category: BTreeMap<String, f64>,
    pub retro_analysis: RetroAnalysis,
}

impl ClaimsInsights {
    pub fn from_records(records: &[ClaimRecord]) -> Self {
        let summary = ClaimsSummary::from_records(records);
        ClaimsInsights {
            category_breakdown: summary.category_breakdown(),
            decision_breakdown: decision_breakdown(records),
            avg_tat_by_category: avg_tat_by_category(records),
            retro_analysis: RetroAnalysis::from_records(records),
            summary,
        }
    }
}

// ============================================================================
// POLICY METRICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetrics {
    pub total_policies: u64,
    pub active_policies: u64,
    pub in_forfeiture_policies: u64,
    pub in_waiver_policies: u64,
    pub avg_premium: f64,
    pub total_premium_revenue: f64,
    pub avg_insured_age: f64,
    pub lapse_rate: f64,
    pub policies_with_claims: u64,
    pub avg_claims_per_policy: f64,
}

impl PolicyMetrics {
    /// Counts only consider policies with an id
    pub fn from_records(policies: &[PolicyRecord]) -> Self {
        let identified: Vec<&PolicyRecord> =
            policies.iter().filter(|p| p.policy_id.is_some()).collect();
        let count = |pred: fn(&PolicyRecord) -> bool| identified.iter().filter(|p| pred(p)).count() as u64;

        let total = identified.len() as u64;
        let active = count(PolicyRecord::is_active);
        let total_active_claims: i64 = policies.iter().filter_map(|p| p.active_claims).sum();

        PolicyMetrics {
            total_policies: total,
            active_policies: active,
            in_forfeiture_policies: count(PolicyRecord::is_in_nonforfeiture),
            in_waiver_policies: count(PolicyRecord::is_in_waiver),
            avg_premium: mean(policies.iter().filter_map(|p| p.annualized_premium)),
            total_premium_revenue: policies.iter().filter_map(|p| p.annualized_premium).sum(),
            avg_insured_age: mean(policies.iter().filter_map(|p| p.insured_age).map(|a| a as f64)),
            lapse_rate: percentage(total.saturating_sub(active), total),
            policies_with_claims: count(PolicyRecord::has_active_claims),
            avg_claims_per_policy: if total == 0 {
                0.0
            } else {
                total_active_claims as f64 / total as f64
            },
        }
    }
}

// ============================================================================
// POLICY INSIGHTS
// ============================================================================

const TOP_STATES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCount {
    pub state: String,
    pub policies: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePremium {
    pub state: String,
    pub total_premium: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyInsights {
    pub metrics: PolicyMetrics,
    /// Top states by policy count (count desc, state asc)
    pub state_distribution: Vec<StateCount>,
    /// Top states by annualized premium (premium desc, state asc)
    pub premium_by_state: Vec<StatePremium>,
    pub waiver_breakdown: BTreeMap<String, u64>,
    pub status_distribution: BTreeMap<String, u64>,
}

pub fn state_distribution(policies: &[PolicyRecord]) -> Vec<StateCount> {
    let mut by_state: HashMap<&str, u64> = HashMap::new();
    for policy in policies.iter().filter(|p| p.policy_id.is_some()) {
        if let Some(state) = policy.insured_state.as_deref() {
            *by_state.entry(state).or_insert(0) += 1;
        }
    }
    let mut out: Vec<StateCount> = by_state
        .into_iter()
        .map(|(state, policies)| StateCount { state: state.to_string(), policies })
        .collect();
    out.sort_by(|a, b| b.policies.cmp(&a.policies).then_with(|| a.state.cmp(&b.state)));
    out.truncate(TOP_STATES);
    out
}

pub fn premium_by_state(policies: &[PolicyRecord]) -> Vec<StatePremium> {
    let mut by_state: HashMap<&str, f64> = HashMap::new();
    for policy in policies {
        if let Some(state) = policy.insured_state.as_deref() {
            *by_state.entry(state).or_insert(0.0) += policy.annualized_premium.unwrap_or(0.0);
        }
    }
    let mut out: Vec<StatePremium> = by_state
        .into_iter()
        .map(|(state, total_premium)| StatePremium { state: state.to_string(), total_premium })
        .collect();
    out.sort_by(|a, b| {
        b.total_premium
            .total_cmp(&a.total_premium)
            .then_with(|| a.state.cmp(&b.state))
    });
    out.truncate(TOP_STATES);
    out
}

impl PolicyInsights {
    pub fn from_records(policies: &[PolicyRecord]) -> Self {
        let metrics = PolicyMetrics::from_records(policies);
        let waiver_breakdown = BTreeMap::from([
            ("In Waiver".to_string(), metrics.in_waiver_policies),
            (
                "Not In Waiver".to_string(),
                metrics.total_policies.saturating_sub(metrics.in_waiver_policies),
            ),
        ]);
        let status_distribution = BTreeMap::from([
            ("Active".to_string(), metrics.active_policies),
            (
                "Lapsed".to_string(),
                metrics.total_policies.saturating_sub(metrics.active_policies),
            ),
        ]);

        PolicyInsights {
            state_distribution: state_distribution(policies),
            premium_by_state: premium_by_state(policies),
            waiver_breakdown,
            status_distribution,
            metrics,
        }
    }
}

// ============================================================================
// COMBINED DASHBOARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedDashboard {
    pub policy_metrics: PolicyMetrics,
    pub claims_summary: ClaimsSummary,
    pub timestamp: DateTime<Utc>,
}
