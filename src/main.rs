use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;
use std::sync::Arc;

// Use library instead of local modules
use ltc_analytics::{
    init_logging, insert_claims, insert_policies, load_claims_csv, load_policies_csv,
    setup_warehouse, verify_count, AnalyticsService, Settings, SqliteWarehouse, TtlCache,
};

fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings);

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("import") => {
            let (claims, policies) = match (args.get(2), args.get(3)) {
                (Some(c), Some(p)) => (c, p),
                _ => bail!("usage: ltc-analytics import <claims.csv> <policies.csv>"),
            };
            run_import(&settings, Path::new(claims), Path::new(policies))
        }
        Some("summary") => run_summary(
            &settings,
            args.get(2).map(String::as_str),
            args.get(3).map(String::as_str),
        ),
        _ => {
            eprintln!("usage:");
            eprintln!("  ltc-analytics import <claims.csv> <policies.csv>");
            eprintln!("  ltc-analytics summary [carrier] [report-date]");
            std::process::exit(2);
        }
    }
}

fn run_import(settings: &Settings, claims_csv: &Path, policies_csv: &Path) -> Result<()> {
    println!("🗄️  Warehouse import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load CSVs
    println!("\n📂 Loading CSV exports...");
    let claims = load_claims_csv(claims_csv)?;
    let policies = load_policies_csv(policies_csv)?;
    println!("✓ Loaded {} claim rows, {} policy rows", claims.len(), policies.len());

    // 2. Setup warehouse
    println!("\n🔧 Setting up warehouse...");
    let conn = Connection::open(&settings.database_path)
        .with_context(|| format!("Failed to open {}", settings.database_path.display()))?;
    setup_warehouse(&conn)?;
    println!("✓ Warehouse initialized with WAL mode");

    // 3. Insert rows
    println!("\n💾 Inserting rows...");
    let claim_stats = insert_claims(&conn, &claims)?;
    let policy_stats = insert_policies(&conn, &policies)?;

    // 4. Verify count
    println!("\n🔍 Verifying warehouse...");
    let (claim_count, policy_count) = verify_count(&conn)?;
    println!("✓ Inserted {} claims, {} policies", claim_stats.inserted, policy_stats.inserted);
    println!(
        "✓ Skipped duplicates: {} claims, {} policies",
        claim_stats.duplicates, policy_stats.duplicates
    );
    println!("✓ Warehouse contains {} claims, {} policies", claim_count, policy_count);

    Ok(())
}

fn run_summary(settings: &Settings, carrier: Option<&str>, report_date: Option<&str>) -> Result<()> {
    let db_path = settings.database_path.as_path();

    if !db_path.exists() {
        eprintln!("❌ Warehouse not found at {:?}", db_path);
        eprintln!("   Run: ltc-analytics import <claims.csv> <policies.csv>");
        std::process::exit(1);
    }

    let warehouse = SqliteWarehouse::open(db_path)?;
    let service = AnalyticsService::new(
        Arc::new(warehouse),
        Arc::new(TtlCache::new(false, settings.cache_ttl())),
        settings.page_limits(),
    );

    let summary = service.get_claims_summary(carrier, report_date)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
