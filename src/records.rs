// 📄 Records - typed views of the two warehouse fact tables
// Read-only: built from normalized rows, never written back

use crate::error::{AnalyticsError, Result};
use crate::shaper::{opt_date, opt_f64, opt_i64, opt_string, NormalizedRow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// DECISION VOCABULARY (open - unknown values are kept as-is)
// ============================================================================

pub const APPROVED: &str = "Approved";
pub const DENIED: &str = "Denied";
pub const IN_ASSESSMENT: &str = "In Assessment";

// ============================================================================
// ONGOING RATE MONTH (closed)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum OngoingRateMonth {
    Initial,
    Ongoing,
    Restoration,
}

impl OngoingRateMonth {
    pub const ALL: [OngoingRateMonth; 3] = [
        OngoingRateMonth::Initial,
        OngoingRateMonth::Ongoing,
        OngoingRateMonth::Restoration,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(OngoingRateMonth::Initial),
            1 => Some(OngoingRateMonth::Ongoing),
            2 => Some(OngoingRateMonth::Restoration),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            OngoingRateMonth::Initial => 0,
            OngoingRateMonth::Ongoing => 1,
            OngoingRateMonth::Restoration => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OngoingRateMonth::Initial => "Initial",
            OngoingRateMonth::Ongoing => "Ongoing",
            OngoingRateMonth::Restoration => "Restoration",
        }
    }
}

impl TryFrom<i64> for OngoingRateMonth {
    type Error = String;

    fn try_from(code: i64) -> std::result::Result<Self, Self::Error> {
        OngoingRateMonth::from_code(code)
            .ok_or_else(|| format!("unknown ongoing rate month {}", code))
    }
}

impl From<OngoingRateMonth> for i64 {
    fn from(month: OngoingRateMonth) -> i64 {
        month.code()
    }
}

// ============================================================================
// CARE CATEGORIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CategoryGroup {
    Facility,
    HomeHealth,
    Other,
}

impl CategoryGroup {
    pub const ALL: [CategoryGroup; 3] = [
        CategoryGroup::Facility,
        CategoryGroup::HomeHealth,
        CategoryGroup::Other,
    ];

    /// Token used in filters and breakdown keys
    pub fn token(self) -> &'static str {
        match self {
            CategoryGroup::Facility => "Facility",
            CategoryGroup::HomeHealth => "Home Health",
            CategoryGroup::Other => "Other",
        }
    }

    /// Exact token match; unknown tokens yield None
    pub fn from_token(token: &str) -> Option<Self> {
        CategoryGroup::ALL.into_iter().find(|g| g.token() == token)
    }

    /// Normalized field prefix (`facility`, `home_health`, `other`)
    pub fn field_prefix(self) -> &'static str {
        match self {
            CategoryGroup::Facility => "facility",
            CategoryGroup::HomeHealth => "home_health",
            CategoryGroup::Other => "other",
        }
    }

    /// Normalized field names of the initial/ongoing/retro sub-counts
    pub fn fields(self) -> [String; 3] {
        let prefix = self.field_prefix();
        [
            format!("{}_initial", prefix),
            format!("{}_ongoing", prefix),
            format!("{}_retro", prefix),
        ]
    }
}

/// Initial / ongoing / retro sub-decision counts for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub initial: Option<i64>,
    pub ongoing: Option<i64>,
    pub retro: Option<i64>,
}

impl CategoryCounts {
    /// Sum of the three sub-counts, null as 0
    pub fn total(&self) -> i64 {
        self.initial.unwrap_or(0) + self.ongoing.unwrap_or(0) + self.retro.unwrap_or(0)
    }

    /// Nonzero count in any sub-decision
    pub fn has_activity(&self) -> bool {
        [self.initial, self.ongoing, self.retro]
            .iter()
            .any(|c| c.map_or(false, |v| v > 0))
    }

    fn from_row(row: &NormalizedRow, group: CategoryGroup) -> Result<Self> {
        let [initial, ongoing, retro] = group.fields();
        Ok(CategoryCounts {
            initial: opt_i64(row, &initial)?,
            ongoing: opt_i64(row, &ongoing)?,
            retro: opt_i64(row, &retro)?,
        })
    }
}

// ============================================================================
// CLAIM RECORD
// ============================================================================

/// One claim-decision snapshot row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claim_id: Option<String>,
    pub policy_id: Option<String>,
    pub carrier_name: Option<String>,
    pub decision: Option<String>,
    /// Raw code; see `rate_month()` for the closed view
    pub ongoing_rate_month: Option<i64>,
    pub is_initial_decision_flag: Option<i64>,
    pub snapshot_date: NaiveDate,
    pub certification_date: Option<NaiveDate>,
    pub turnaround_days: Option<i64>,
    pub retro_months: Option<i64>,
    pub facility: CategoryCounts,
    pub home_health: CategoryCounts,
    pub other: CategoryCounts,
}

impl ClaimRecord {
    /// Build from a normalized row. Every field must be present (null is fine,
    /// except `snapshot_date` which orders every listing).
    pub fn from_row(row: &NormalizedRow) -> Result<Self> {
        let snapshot_date = opt_date(row, "snapshot_date")?
            .ok_or_else(|| AnalyticsError::aggregation("claim record has a null snapshot_date"))?;

        Ok(ClaimRecord {
            claim_id: opt_string(row, "claim_id")?,
            policy_id: opt_string(row, "policy_id")?,
            carrier_name: opt_string(row, "carrier_name")?,
            decision: opt_string(row, "decision")?,
            ongoing_rate_month: opt_i64(row, "ongoing_rate_month")?,
            is_initial_decision_flag: opt_i64(row, "is_initial_decision_flag")?,
            snapshot_date,
            certification_date: opt_date(row, "certification_date")?,
            turnaround_days: opt_i64(row, "turnaround_days")?,
            retro_months: opt_i64(row, "retro_months")?,
            facility: CategoryCounts::from_row(row, CategoryGroup::Facility)?,
            home_health: CategoryCounts::from_row(row, CategoryGroup::HomeHealth)?,
            other: CategoryCounts::from_row(row, CategoryGroup::Other)?,
        })
    }

    pub fn rate_month(&self) -> Option<OngoingRateMonth> {
        self.ongoing_rate_month.and_then(OngoingRateMonth::from_code)
    }

    pub fn category(&self, group: CategoryGroup) -> &CategoryCounts {
        match group {
            CategoryGroup::Facility => &self.facility,
            CategoryGroup::HomeHealth => &self.home_health,
            CategoryGroup::Other => &self.other,
        }
    }

    /// Retroactive claim: covers prior months
    pub fn is_retro(&self) -> bool {
        self.retro_months.map_or(false, |m| m > 0)
    }

    pub fn has_decision(&self, decision: &str) -> bool {
        self.decision.as_deref() == Some(decision)
    }
}

// ============================================================================
// POLICY RECORD
// ============================================================================

/// One policy monthly snapshot row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy_id: Option<i64>,
    pub carrier_name: Option<String>,
    pub insured_state: Option<String>,
    pub residence_state: Option<String>,
    pub status: Option<String>,
    pub annualized_premium: Option<f64>,
    pub lifetime_collected_premium: Option<f64>,
    pub premium_frequency: Option<String>,
    pub original_effective_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub in_waiver: Option<String>,
    pub in_nonforfeiture: Option<String>,
    pub insured_age: Option<i64>,
    pub active_claims: Option<i64>,
    pub total_rfbs: Option<i64>,
    pub approved_rfbs: Option<i64>,
    pub total_denials: Option<i64>,
    pub snapshot_date: Option<NaiveDate>,
}

impl PolicyRecord {
    pub fn from_row(row: &NormalizedRow) -> Result<Self> {
        Ok(PolicyRecord {
            policy_id: opt_i64(row, "policy_id")?,
            carrier_name: opt_string(row, "carrier_name")?,
            insured_state: opt_string(row, "insured_state")?,
            residence_state: opt_string(row, "residence_state")?,
            status: opt_string(row, "status")?,
            annualized_premium: opt_f64(row, "annualized_premium")?,
            lifetime_collected_premium: opt_f64(row, "lifetime_collected_premium")?,
            premium_frequency: opt_string(row, "premium_frequency")?,
            original_effective_date: opt_date(row, "original_effective_date")?,
            expiration_date: opt_date(row, "expiration_date")?,
            in_waiver: opt_string(row, "in_waiver")?,
            in_nonforfeiture: opt_string(row, "in_nonforfeiture")?,
            insured_age: opt_i64(row, "insured_age")?,
            active_claims: opt_i64(row, "active_claims")?,
            total_rfbs: opt_i64(row, "total_rfbs")?,
            approved_rfbs: opt_i64(row, "approved_rfbs")?,
            total_denials: opt_i64(row, "total_denials")?,
            snapshot_date: opt_date(row, "snapshot_date")?,
        })
    }

    /// Active: no expiration date recorded
    pub fn is_active(&self) -> bool {
        self.expiration_date.is_none()
    }

    pub fn is_in_waiver(&self) -> bool {
        self.in_waiver.as_deref() == Some("Yes")
    }

    pub fn is_in_nonforfeiture(&self) -> bool {
        self.in_nonforfeiture.as_deref() == Some("Yes")
    }

    pub fn has_active_claims(&self) -> bool {
        self.active_claims.map_or(false, |c| c > 0)
    }
}
