// Scout Core - Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod db;
pub mod gaps;
pub mod health;
pub mod matching;
pub mod normalize;
pub mod reconcile;
pub mod research;

// Re-export commonly used types
pub use db::{account_lookup, load_import_csv, setup_database, SqliteStore, TamAccount};
pub use gaps::{aggregate_gaps, remaining_target, GapAnalysis, GapReport, GapStatus, Goal};
pub use health::{
    band_for, compute_health, HealthBand, HealthFacts, HealthInputs, HealthSnapshot,
    ScoreComponent, ScoringProfile, SignalSummary,
};
pub use matching::{
    preview_changes, validate_records, ChangeRecord, ChangeType, CollisionPolicy, ContactInfo,
    FieldDiff, ImportFlags, ImportRecord, MatchOutcome, MatchSummary,
};
pub use normalize::{is_unmatchable, normalize_key};
pub use reconcile::{
    AccountPlanRef, AccountUpdate, NewAccount, NewContact, ReconcileOutcome, ReconcileStore,
    Reconciler,
};
pub use research::{
    build_research_prompt, parse_research_response, run_research, search_queries,
    AccountThesis, AnthropicProvider, CampaignContext, CompletionProvider, OpportunityMap,
    ResearchError, ResearchLevel, ResearchRequest, ScreeningResult, SellerContext, TargetCompany,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
