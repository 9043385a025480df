use anyhow::{bail, Result};
use chrono::Utc;
use std::env;
use std::path::{Path, PathBuf};

use scout::{
    account_lookup, aggregate_gaps, compute_health, load_import_csv, preview_changes,
    run_research, search_queries, AnthropicProvider, CampaignContext, CollisionPolicy,
    Reconciler, ResearchLevel, ResearchRequest, ScreeningResult, SqliteStore, TargetCompany,
};

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match mode {
        "import" => run_import(args.get(2), false),
        "preview" => run_import(args.get(2), true),
        "health" => run_health(args.get(2)),
        "gaps" => run_gaps(),
        "research" => run_research_mode(args.get(2)),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("Scout Core v{}", scout::VERSION);
    println!();
    println!("Usage:");
    println!("  scout preview <file.csv>    Compare import rows against the database");
    println!("  scout import <file.csv>     Preview and apply an import");
    println!("  scout health <account-id>   Compute and store an account health score");
    println!("  scout gaps                  Goal gap analysis against the TAM pool");
    println!("  scout research <company>    Run TAM screening research for a company");
    println!();
    println!("Environment: SCOUT_DB (database path), ANTHROPIC_API_KEY (research)");
}

fn db_path() -> PathBuf {
    PathBuf::from(env::var("SCOUT_DB").unwrap_or_else(|_| "scout.db".to_string()))
}

fn run_import(csv_arg: Option<&String>, preview_only: bool) -> Result<()> {
    let Some(csv_path) = csv_arg else {
        bail!("usage: scout {} <file.csv>", if preview_only { "preview" } else { "import" });
    };

    println!("📥 TAM Import - CSV → preview → reconcile");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // 1. Load rows
    println!("\n📂 Loading rows...");
    let records = load_import_csv(Path::new(csv_path))?;
    println!("✓ Loaded {} rows from {}", records.len(), csv_path);

    // 2. Read the existing-account snapshot
    let store = SqliteStore::open(&db_path())?;
    let snapshot = account_lookup(store.list_accounts()?);
    println!("✓ Snapshot: {} existing accounts", snapshot.len());

    // 3. Classify
    let outcome = preview_changes(&records, &snapshot, CollisionPolicy::default())?;
    let s = &outcome.summary;
    println!(
        "\n🔍 Preview: {} new, {} modified, {} unchanged ({} total)",
        s.new, s.modified, s.unchanged, s.total
    );
    for change in &outcome.changes {
        for diff in &change.diffs {
            println!("   {} - {}", change.company_name, diff.describe());
        }
    }

    if preview_only {
        println!("\n✓ Preview only, nothing written");
        return Ok(());
    }

    // 4. Apply in batches
    println!("\n💾 Applying changes...");
    let result = Reconciler::new().reconcile(&store, &outcome.changes)?;
    println!("✓ {}", result.summary());
    for error in &result.errors {
        eprintln!("  ⚠ {}", error);
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if result.is_success() {
        println!("✅ Import complete: {} accounts in database", store.count_accounts()?);
    } else {
        println!("❌ Import failed: no changes were applied");
    }

    Ok(())
}

fn run_health(account_arg: Option<&String>) -> Result<()> {
    let Some(account_id) = account_arg else {
        bail!("usage: scout health <account-id>");
    };

    let store = SqliteStore::open(&db_path())?;
    let now = Utc::now();

    println!("❤️  Computing health score for {}", account_id);
    let facts = store.fetch_health_facts(account_id, now)?;
    let snapshot = compute_health(account_id, &facts.inputs(now), facts.signal_summary(now), now);
    store.upsert_health_snapshot(&snapshot)?;

    println!("\n✓ {}", snapshot.summary());
    for component in &snapshot.components {
        println!(
            "  {:<20} {:>3}/{:<3} {}",
            component.name, component.score, component.max_weight, component.explanation
        );
    }

    Ok(())
}

fn run_gaps() -> Result<()> {
    let store = SqliteStore::open(&db_path())?;

    println!("📊 Goal gap analysis");
    let goals = store.list_goals()?;
    let pool = store.tam_pool()?;
    let analysis = aggregate_gaps(&goals, &pool);

    println!("✓ {}", analysis.summary());
    println!();
    for report in &analysis.reports {
        println!(
            "  {:<28} {:>10.0} gap | {:>3}% | {} addressable ({:.0}) | {}",
            report.name,
            report.gap,
            report.progress_pct,
            report.addressable_count,
            report.addressable_value,
            report.status.as_str()
        );
    }

    Ok(())
}

fn run_research_mode(company_arg: Option<&String>) -> Result<()> {
    let Some(company_name) = company_arg else {
        bail!("usage: scout research <company>");
    };

    let Ok(api_key) = env::var("ANTHROPIC_API_KEY") else {
        bail!("ANTHROPIC_API_KEY not configured");
    };

    let campaign = CampaignContext {
        name: "General prospecting".to_string(),
        campaign_type: "outbound".to_string(),
        ..Default::default()
    };

    println!("🤖 TAM screening for {}", company_name);
    let queries = search_queries(&campaign, company_name, ResearchLevel::TamScreening);
    println!("  Suggested searches:");
    for query in &queries {
        println!("   - {}", query);
    }

    let request = ResearchRequest {
        level: ResearchLevel::TamScreening,
        campaigns: vec![campaign],
        seller: None,
        target: Some(TargetCompany {
            company_name: company_name.clone(),
            ..Default::default()
        }),
        search_results: Vec::new(),
    };

    let provider = AnthropicProvider::new(api_key);
    let result: ScreeningResult = run_research(&provider, &request)?;

    println!("\n✓ Fit score: {}/100", result.fit_score);
    println!("  {}", result.fit_rationale);
    for signal in &result.detected_signals {
        println!("  signal [{}]: {}", signal.signal_type, signal.description);
    }

    Ok(())
}
