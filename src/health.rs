// ❤️ Health Score Engine - Bounded composite account health
//
// Two disjoint scoring profiles selected by account lifecycle: outbound
// (prospect-like) weighs engagement/momentum/risk/intelligence at 25 each;
// inbound (customer-like) weighs sentiment 40, usage 30, support 20,
// engagement 10. Every component maps raw signals onto its weight through
// monotonic threshold bands, absent signal lands in the lowest band, and
// the composite is clamped by construction to [0, 100].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PROFILE & BAND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringProfile {
    Outbound,
    Inbound,
}

impl ScoringProfile {
    /// Customer-like accounts score inbound, everything else outbound.
    pub fn for_account_type(account_type: &str) -> Self {
        if account_type.eq_ignore_ascii_case("customer") {
            ScoringProfile::Inbound
        } else {
            ScoringProfile::Outbound
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringProfile::Outbound => "outbound",
            ScoringProfile::Inbound => "inbound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBand {
    Healthy,
    Monitor,
    AtRisk,
    Critical,
}

impl HealthBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBand::Healthy => "healthy",
            HealthBand::Monitor => "monitor",
            HealthBand::AtRisk => "at_risk",
            HealthBand::Critical => "critical",
        }
    }
}

/// Fixed band thresholds shared by every profile.
pub fn band_for(total_score: u32) -> HealthBand {
    if total_score >= 80 {
        HealthBand::Healthy
    } else if total_score >= 60 {
        HealthBand::Monitor
    } else if total_score >= 40 {
        HealthBand::AtRisk
    } else {
        HealthBand::Critical
    }
}

// ============================================================================
// COMPONENT INPUTS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementInputs {
    /// None = no contact on record at all.
    pub days_since_contact: Option<i64>,
    pub contact_count_30d: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MomentumInputs {
    /// Net deal-stage movement over the window, clamped to [-3, 3].
    pub stage_movement: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskInputs {
    pub open_risks: u32,
    pub critical_risks: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntelligenceInputs {
    pub trails_count: u32,
    pub stakeholders_mapped: u32,
    pub signals_30d: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundInputs {
    pub engagement: EngagementInputs,
    pub momentum: MomentumInputs,
    pub risk: RiskInputs,
    pub intelligence: IntelligenceInputs,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentInputs {
    /// NPS on the 0-10 scale.
    pub nps_score: Option<f64>,
    /// CSAT percentage, used when NPS is absent.
    pub csat_score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageInputs {
    /// Product usage percentage; None until analytics integration lands.
    pub usage_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportInputs {
    /// Open risks older than the 14-day overdue window, by severity.
    pub critical_overdue: u32,
    pub high_overdue: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundInputs {
    pub sentiment: SentimentInputs,
    pub usage: UsageInputs,
    pub support: SupportInputs,
    pub engagement: EngagementInputs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "profile", rename_all = "lowercase")]
pub enum HealthInputs {
    Outbound(OutboundInputs),
    Inbound(InboundInputs),
}

impl HealthInputs {
    pub fn profile(&self) -> ScoringProfile {
        match self {
            HealthInputs::Outbound(_) => ScoringProfile::Outbound,
            HealthInputs::Inbound(_) => ScoringProfile::Inbound,
        }
    }
}

// ============================================================================
// COMPONENT SCORING (monotonic threshold bands)
// ============================================================================

/// One weighted sub-score with its explanation for breakdown display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub score: u32,
    pub max_weight: u32,
    pub explanation: String,
}

fn component(name: &str, score: u32, max_weight: u32, explanation: String) -> ScoreComponent {
    ScoreComponent {
        name: name.to_string(),
        score: score.min(max_weight),
        max_weight,
        explanation,
    }
}

/// Engagement (0-25): contact recency plus 30-day touch frequency.
pub fn engagement_score(inputs: &EngagementInputs) -> ScoreComponent {
    let recency = match inputs.days_since_contact {
        None => 0,
        Some(d) if d <= 3 => 15,
        Some(d) if d <= 7 => 12,
        Some(d) if d <= 14 => 8,
        Some(d) if d <= 30 => 4,
        Some(_) => 0,
    };
    let frequency = match inputs.contact_count_30d {
        n if n >= 5 => 10,
        n if n >= 3 => 7,
        n if n >= 1 => 4,
        _ => 0,
    };

    let explanation = match inputs.days_since_contact {
        Some(d) => format!(
            "Last contact {} days ago; {} touchpoints in the last 30 days",
            d, inputs.contact_count_30d
        ),
        None => "No contact on record".to_string(),
    };

    component("engagement", recency + frequency, 25, explanation)
}

/// Momentum (0-25): net stage movement over the window.
pub fn momentum_score(inputs: &MomentumInputs) -> ScoreComponent {
    let movement = inputs.stage_movement.clamp(-3, 3);
    let score = match movement {
        m if m >= 2 => 25,
        1 => 18,
        0 => 12,
        -1 => 6,
        _ => 0,
    };

    component(
        "momentum",
        score,
        25,
        format!("Stage movement {:+} over the last 30 days", movement),
    )
}

/// Risk load (0-25): any open critical risk zeroes the component.
pub fn risk_score(inputs: &RiskInputs) -> ScoreComponent {
    let score = if inputs.critical_risks >= 1 {
        0
    } else {
        match inputs.open_risks {
            0 => 25,
            n if n <= 2 => 15,
            n if n <= 5 => 8,
            _ => 0,
        }
    };

    let explanation = if inputs.open_risks == 0 {
        "No open risks".to_string()
    } else {
        format!(
            "{} open risks ({} critical)",
            inputs.open_risks, inputs.critical_risks
        )
    };

    component("risk", score, 25, explanation)
}

/// Intelligence coverage (0-25): trails, stakeholder map, recent signals.
pub fn intelligence_score(inputs: &IntelligenceInputs) -> ScoreComponent {
    let trails = match inputs.trails_count {
        n if n >= 3 => 10,
        2 => 7,
        1 => 4,
        _ => 0,
    };
    let stakeholders = match inputs.stakeholders_mapped {
        n if n >= 8 => 10,
        n if n >= 4 => 7,
        n if n >= 1 => 4,
        _ => 0,
    };
    let signals = match inputs.signals_30d {
        n if n >= 5 => 5,
        n if n >= 2 => 3,
        1 => 1,
        _ => 0,
    };

    component(
        "intelligence",
        trails + stakeholders + signals,
        25,
        format!(
            "{} active trails, {} stakeholders mapped, {} signals in 30 days",
            inputs.trails_count, inputs.stakeholders_mapped, inputs.signals_30d
        ),
    )
}

/// Sentiment (0-40): NPS preferred, CSAT fallback, lowest band when absent.
pub fn sentiment_score(inputs: &SentimentInputs) -> ScoreComponent {
    let (score, explanation) = if let Some(nps) = inputs.nps_score {
        let score = match nps {
            n if n >= 9.0 => 40,
            n if n >= 7.0 => 30,
            n if n >= 5.0 => 18,
            _ => 8,
        };
        (score, format!("NPS {}", nps))
    } else if let Some(csat) = inputs.csat_score {
        let score = match csat {
            c if c >= 90.0 => 40,
            c if c >= 75.0 => 30,
            c if c >= 50.0 => 18,
            _ => 8,
        };
        (score, format!("CSAT {}%", csat))
    } else {
        (0, "No sentiment data on record".to_string())
    };

    component("sentiment", score, 40, explanation)
}

/// Product usage (0-30): absent analytics scores the lowest band.
pub fn usage_score(inputs: &UsageInputs) -> ScoreComponent {
    let (score, explanation) = match inputs.usage_percentage {
        None => (0, "No usage data on record".to_string()),
        Some(pct) => {
            let score = match pct {
                p if p >= 80.0 => 30,
                p if p >= 50.0 => 22,
                p if p >= 25.0 => 12,
                p if p > 0.0 => 6,
                _ => 0,
            };
            (score, format!("Product usage at {}%", pct))
        }
    };

    component("usage", score, 30, explanation)
}

/// Support health (0-20): any overdue critical issue zeroes the component.
pub fn support_score(inputs: &SupportInputs) -> ScoreComponent {
    let score = if inputs.critical_overdue >= 1 {
        0
    } else {
        match inputs.high_overdue {
            0 => 20,
            n if n <= 2 => 12,
            _ => 5,
        }
    };

    let explanation = if inputs.critical_overdue == 0 && inputs.high_overdue == 0 {
        "No overdue support issues".to_string()
    } else {
        format!(
            "{} critical and {} high issues overdue",
            inputs.critical_overdue, inputs.high_overdue
        )
    };

    component("support", score, 20, explanation)
}

/// Customer engagement (0-10): the inbound counterpart of engagement.
pub fn customer_engagement_score(inputs: &EngagementInputs) -> ScoreComponent {
    let recency = match inputs.days_since_contact {
        None => 0,
        Some(d) if d <= 7 => 6,
        Some(d) if d <= 14 => 4,
        Some(d) if d <= 30 => 2,
        Some(_) => 0,
    };
    let frequency = match inputs.contact_count_30d {
        n if n >= 3 => 4,
        n if n >= 1 => 2,
        _ => 0,
    };

    let explanation = match inputs.days_since_contact {
        Some(d) => format!(
            "Last contact {} days ago; {} touchpoints in the last 30 days",
            d, inputs.contact_count_30d
        ),
        None => "No contact on record".to_string(),
    };

    component("customer_engagement", recency + frequency, 10, explanation)
}

// ============================================================================
// SIGNAL SUMMARY
// ============================================================================

/// Profile-tailored counts of warning indicators, surfaced next to the
/// score so the breakdown view can explain the band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalSummary {
    Outbound {
        stalled_deals: usize,
        missing_champion: usize,
        inactive_trails: usize,
    },
    Inbound {
        escalation_risks: usize,
        sentiment_alerts: usize,
        pattern_warnings: usize,
    },
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Persisted composite score. Superseded wholesale by the next
/// computation - last write wins, no history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub account_id: String,
    pub profile: ScoringProfile,
    pub components: Vec<ScoreComponent>,
    pub total_score: u32,
    pub band: HealthBand,
    pub signal_summary: SignalSummary,
    pub computed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn component(&self, name: &str) -> Option<&ScoreComponent> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}/{} ({}) via {} profile",
            self.total_score, 100, self.band.as_str(), self.profile.as_str()
        )
    }
}

/// Compute a health snapshot from gathered inputs.
///
/// Deterministic and total: every component is a step function, so the
/// same inputs always produce the same snapshot.
pub fn compute_health(
    account_id: &str,
    inputs: &HealthInputs,
    signal_summary: SignalSummary,
    computed_at: DateTime<Utc>,
) -> HealthSnapshot {
    let components = match inputs {
        HealthInputs::Outbound(inputs) => vec![
            engagement_score(&inputs.engagement),
            momentum_score(&inputs.momentum),
            risk_score(&inputs.risk),
            intelligence_score(&inputs.intelligence),
        ],
        HealthInputs::Inbound(inputs) => vec![
            sentiment_score(&inputs.sentiment),
            usage_score(&inputs.usage),
            support_score(&inputs.support),
            customer_engagement_score(&inputs.engagement),
        ],
    };

    let total_score: u32 = components.iter().map(|c| c.score).sum();

    HealthSnapshot {
        account_id: account_id.to_string(),
        profile: inputs.profile(),
        components,
        total_score,
        band: band_for(total_score),
        signal_summary,
        computed_at,
    }
}

// ============================================================================
// FACT DERIVATION (store rows → engine inputs)
// ============================================================================

/// Raw per-account rows gathered from the store in one read pass.
///
/// Gathering fails when the store cannot be read at all; empty vectors
/// here mean legitimately-absent signal, which scores the lowest band.
#[derive(Debug, Clone, Default)]
pub struct HealthFacts {
    pub account_type: String,
    pub nps_score: Option<f64>,
    pub csat_score: Option<f64>,
    pub usage_percentage: Option<f64>,
    /// Completion timestamps of action items, newest first.
    pub completed_actions: Vec<DateTime<Utc>>,
    pub stage_movement: i32,
    /// (severity, created_at) of open risks.
    pub open_risks: Vec<(String, DateTime<Utc>)>,
    /// Last-touched timestamps of open pursuits.
    pub open_pursuits: Vec<DateTime<Utc>>,
    /// Sentiments of mapped (non-placeholder) stakeholders.
    pub stakeholder_sentiments: Vec<String>,
    pub stakeholders_mapped: u32,
    /// Last-touched timestamps of active trails.
    pub active_trails: Vec<DateTime<Utc>>,
    pub signals_30d: u32,
}

const STALE_DAYS: i64 = 14;
const ESCALATION_DAYS: i64 = 7;

impl HealthFacts {
    pub fn profile(&self) -> ScoringProfile {
        ScoringProfile::for_account_type(&self.account_type)
    }

    fn engagement(&self, now: DateTime<Utc>) -> EngagementInputs {
        let cutoff = now - Duration::days(30);
        EngagementInputs {
            days_since_contact: self
                .completed_actions
                .first()
                .map(|d| (now - *d).num_days().max(0)),
            contact_count_30d: self.completed_actions.iter().filter(|d| **d > cutoff).count()
                as u32,
        }
    }

    /// Derive the profile-appropriate engine inputs as of `now`.
    pub fn inputs(&self, now: DateTime<Utc>) -> HealthInputs {
        match self.profile() {
            ScoringProfile::Outbound => HealthInputs::Outbound(OutboundInputs {
                engagement: self.engagement(now),
                momentum: MomentumInputs {
                    stage_movement: self.stage_movement,
                },
                risk: RiskInputs {
                    open_risks: self.open_risks.len() as u32,
                    critical_risks: self
                        .open_risks
                        .iter()
                        .filter(|(severity, _)| severity == "critical")
                        .count() as u32,
                },
                intelligence: IntelligenceInputs {
                    trails_count: self.active_trails.len() as u32,
                    stakeholders_mapped: self.stakeholders_mapped,
                    signals_30d: self.signals_30d,
                },
            }),
            ScoringProfile::Inbound => {
                let overdue = now - Duration::days(STALE_DAYS);
                HealthInputs::Inbound(InboundInputs {
                    sentiment: SentimentInputs {
                        nps_score: self.nps_score,
                        csat_score: self.csat_score,
                    },
                    usage: UsageInputs {
                        usage_percentage: self.usage_percentage,
                    },
                    support: SupportInputs {
                        critical_overdue: self
                            .open_risks
                            .iter()
                            .filter(|(s, created)| s == "critical" && *created < overdue)
                            .count() as u32,
                        high_overdue: self
                            .open_risks
                            .iter()
                            .filter(|(s, created)| s == "high" && *created < overdue)
                            .count() as u32,
                    },
                    engagement: self.engagement(now),
                })
            }
        }
    }

    /// Derive the profile-tailored signal summary as of `now`.
    pub fn signal_summary(&self, now: DateTime<Utc>) -> SignalSummary {
        match self.profile() {
            ScoringProfile::Outbound => {
                let stale = now - Duration::days(STALE_DAYS);
                let has_champion = self
                    .stakeholder_sentiments
                    .iter()
                    .any(|s| s == "champion");
                SignalSummary::Outbound {
                    stalled_deals: self.open_pursuits.iter().filter(|d| **d < stale).count(),
                    missing_champion: usize::from(!self.open_pursuits.is_empty() && !has_champion),
                    inactive_trails: self.active_trails.iter().filter(|d| **d < stale).count(),
                }
            }
            ScoringProfile::Inbound => {
                let escalation = now - Duration::days(ESCALATION_DAYS);
                SignalSummary::Inbound {
                    escalation_risks: self
                        .open_risks
                        .iter()
                        .filter(|(s, created)| s == "critical" && *created < escalation)
                        .count(),
                    sentiment_alerts: self
                        .stakeholder_sentiments
                        .iter()
                        .filter(|s| *s == "blocker" || *s == "skeptic")
                        .count(),
                    pattern_warnings: self
                        .open_risks
                        .iter()
                        .filter(|(s, _)| s == "high")
                        .count(),
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
