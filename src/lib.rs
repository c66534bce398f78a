// LTC Analytics - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod schema;      // Warehouse column → field adapters
pub mod shaper;      // Single normalization boundary
pub mod records;     // Typed claim / policy views
pub mod filter;      // Predicate builder + core eligibility rule
pub mod pagination;  // Ordering + window policy
pub mod aggregate;   // Summary statistics
pub mod cache;       // TTL memoization
pub mod storage;     // Warehouse trait + in-memory store
pub mod db;          // SQLite warehouse + CSV import
pub mod service;     // Operations exposed to the HTTP layer
pub mod config;      // Settings + logging bootstrap

// Re-export commonly used types
pub use error::{AnalyticsError, Result};
pub use schema::{TableSchema, CLAIMS_SNAPSHOT_FACT, POLICY_MONTHLY_SNAPSHOT};
pub use shaper::{normalize_row, Cell, NormalizedRow, RawRow};
pub use records::{CategoryCounts, CategoryGroup, ClaimRecord, OngoingRateMonth, PolicyRecord};
pub use filter::{
    is_core_eligible, month_end, ClaimPredicate, ClaimsQuery, FilterSpec,
    PoliciesQuery, PolicyFilter,
};
pub use pagination::{Page, PageLimits};
pub use aggregate::{
    ClaimsInsights, ClaimsSummary, CombinedDashboard, PolicyInsights, PolicyMetrics,
    RetroAnalysis,
};
pub use cache::TtlCache;
pub use storage::{InMemoryWarehouse, Warehouse};
pub use db::{
    insert_claims, insert_policies, load_claims_csv, load_policies_csv, normalize_date,
    setup_warehouse, verify_count, ImportStats, SqliteWarehouse,
};
pub use service::AnalyticsService;
pub use config::{init_logging, Settings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
