// 📊 Goal/Gap Aggregator - Goal attainment vs. addressable TAM
//
// Rolls leaf goals (vertical-tagged, no children) up against the matching
// TAM pool: how far each goal is from target, and how much qualified
// opportunity exists in that vertical to close the gap. Pure function of
// its inputs; the store only supplies the goal set and the pool.

use serde::{Deserialize, Serialize};

use crate::db::TamAccount;

// ============================================================================
// GOAL NODE
// ============================================================================

/// A target in the goal tree. `current_value` is maintained externally
/// (won revenue, closed logos); this module never derives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub goal_id: String,
    pub name: String,
    /// "revenue" or "logos".
    pub goal_type: String,
    pub category: Option<String>,
    pub vertical: Option<String>,
    pub target_value: f64,
    pub current_value: f64,
    pub parent_goal_id: Option<String>,
}

impl Goal {
    pub fn has_children(&self, all: &[Goal]) -> bool {
        all.iter()
            .any(|g| g.parent_goal_id.as_deref() == Some(self.goal_id.as_str()))
    }

    pub fn is_leaf(&self, all: &[Goal]) -> bool {
        self.vertical.is_some() && !self.has_children(all)
    }
}

/// Unallocated portion of a parent goal: target minus the sum of its
/// children's targets.
pub fn remaining_target(goal: &Goal, all: &[Goal]) -> f64 {
    let allocated: f64 = all
        .iter()
        .filter(|g| g.parent_goal_id.as_deref() == Some(goal.goal_id.as_str()))
        .map(|g| g.target_value)
        .sum();
    goal.target_value - allocated
}

// ============================================================================
// GAP REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Achieved,
    OnTrack,
    AtRisk,
    OffTrack,
}

impl GapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapStatus::Achieved => "achieved",
            GapStatus::OnTrack => "on_track",
            GapStatus::AtRisk => "at_risk",
            GapStatus::OffTrack => "off_track",
        }
    }
}

/// Same four-tier ladder as health banding, applied to progress percent.
pub fn status_for(progress_pct: i64) -> GapStatus {
    if progress_pct >= 100 {
        GapStatus::Achieved
    } else if progress_pct >= 70 {
        GapStatus::OnTrack
    } else if progress_pct >= 40 {
        GapStatus::AtRisk
    } else {
        GapStatus::OffTrack
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapReport {
    pub goal_id: String,
    pub name: String,
    pub goal_type: String,
    pub vertical: String,
    pub target_value: f64,
    pub current_value: f64,
    pub gap: f64,
    pub progress_pct: i64,
    pub addressable_count: usize,
    pub addressable_value: f64,
    pub status: GapStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapAnalysis {
    /// Leaf-goal reports, largest gap first.
    pub reports: Vec<GapReport>,
    pub total_gap: f64,
    pub total_addressable_value: f64,
    pub achieved: usize,
    pub on_track: usize,
    pub at_risk: usize,
    pub off_track: usize,
}

impl GapAnalysis {
    pub fn summary(&self) -> String {
        format!(
            "{} goals: total gap {:.0}, addressable {:.0} | {} achieved, {} on track, {} at risk, {} off track",
            self.reports.len(),
            self.total_gap,
            self.total_addressable_value,
            self.achieved,
            self.on_track,
            self.at_risk,
            self.off_track
        )
    }
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Compute the gap report for every leaf goal against the TAM pool.
///
/// The pool should already be filtered to actionable statuses by the
/// caller; matching here is purely on the vertical tag. A goal with no
/// matching pool entities still produces a row with zero addressable
/// value. Does not mutate goals or pool.
pub fn aggregate_gaps(goals: &[Goal], pool: &[TamAccount]) -> GapAnalysis {
    let mut reports: Vec<GapReport> = goals
        .iter()
        .filter(|g| g.is_leaf(goals))
        .map(|goal| gap_report(goal, pool))
        .collect();

    // Largest gaps first.
    reports.sort_by(|a, b| {
        b.gap
            .partial_cmp(&a.gap)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut analysis = GapAnalysis {
        total_gap: reports.iter().map(|r| r.gap).sum(),
        total_addressable_value: reports.iter().map(|r| r.addressable_value).sum(),
        ..Default::default()
    };

    for report in &reports {
        match report.status {
            GapStatus::Achieved => analysis.achieved += 1,
            GapStatus::OnTrack => analysis.on_track += 1,
            GapStatus::AtRisk => analysis.at_risk += 1,
            GapStatus::OffTrack => analysis.off_track += 1,
        }
    }

    analysis.reports = reports;
    analysis
}

fn gap_report(goal: &Goal, pool: &[TamAccount]) -> GapReport {
    let vertical = goal.vertical.clone().unwrap_or_default();

    let gap = (goal.target_value - goal.current_value).max(0.0);
    let progress_pct = if goal.target_value > 0.0 {
        (100.0 * goal.current_value / goal.target_value).round() as i64
    } else {
        0
    };

    let matching: Vec<&TamAccount> = pool
        .iter()
        .filter(|a| a.vertical.as_deref() == Some(vertical.as_str()))
        .collect();

    let addressable_value = matching
        .iter()
        .map(|a| a.estimated_deal_value.unwrap_or(0.0))
        .sum();

    GapReport {
        goal_id: goal.goal_id.clone(),
        name: goal.name.clone(),
        goal_type: goal.goal_type.clone(),
        vertical,
        target_value: goal.target_value,
        current_value: goal.current_value,
        gap,
        progress_pct,
        addressable_count: matching.len(),
        addressable_value,
        status: status_for(progress_pct),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_goal(id: &str, vertical: Option<&str>, target: f64, current: f64) -> Goal {
        Goal {
            goal_id: id.to_string(),
            name: format!("Goal {}", id),
            goal_type: "revenue".to_string(),
            category: None,
            vertical: vertical.map(|v| v.to_string()),
            target_value: target,
            current_value: current,
            parent_goal_id: None,
        }
    }

    fn create_pool_account(name: &str, vertical: &str, value: f64) -> TamAccount {
        TamAccount {
            tam_account_id: format!("tam-{}", name),
            company_name: name.to_string(),
            status: "Qualified".to_string(),
            vertical: Some(vertical.to_string()),
            website: None,
            fit_tier: None,
            estimated_deal_value: Some(value),
            company_summary: None,
            fit_rationale: None,
            account_type: "prospect".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_gap_and_progress() {
        let goals = vec![create_goal("g1", Some("Healthcare"), 100.0, 30.0)];
        let analysis = aggregate_gaps(&goals, &[]);

        assert_eq!(analysis.reports.len(), 1);
        let report = &analysis.reports[0];
        assert_eq!(report.gap, 70.0);
        assert_eq!(report.progress_pct, 30);
        assert_eq!(report.addressable_count, 0);
        assert_eq!(report.addressable_value, 0.0);
        assert_eq!(report.status, GapStatus::OffTrack);
    }

    #[test]
    fn test_gap_never_negative() {
        let goals = vec![create_goal("g1", Some("Healthcare"), 100.0, 150.0)];
        let analysis = aggregate_gaps(&goals, &[]);

        assert_eq!(analysis.reports[0].gap, 0.0);
        assert_eq!(analysis.reports[0].status, GapStatus::Achieved);
    }

    #[test]
    fn test_zero_target_progress_is_zero_not_nan() {
        let goals = vec![create_goal("g1", Some("Healthcare"), 0.0, 0.0)];
        let analysis = aggregate_gaps(&goals, &[]);

        assert_eq!(analysis.reports[0].progress_pct, 0);
        assert_eq!(analysis.reports[0].gap, 0.0);
    }

    #[test]
    fn test_status_ladder() {
        assert_eq!(status_for(100), GapStatus::Achieved);
        assert_eq!(status_for(99), GapStatus::OnTrack);
        assert_eq!(status_for(70), GapStatus::OnTrack);
        assert_eq!(status_for(69), GapStatus::AtRisk);
        assert_eq!(status_for(40), GapStatus::AtRisk);
        assert_eq!(status_for(39), GapStatus::OffTrack);
    }

    #[test]
    fn test_pool_matching_by_vertical() {
        let goals = vec![create_goal("g1", Some("Healthcare"), 500.0, 100.0)];
        let pool = vec![
            create_pool_account("Acme", "Healthcare", 120.0),
            create_pool_account("Borealis", "Healthcare", 80.0),
            create_pool_account("Cirrus", "Energy", 400.0),
        ];

        let analysis = aggregate_gaps(&goals, &pool);
        let report = &analysis.reports[0];

        assert_eq!(report.addressable_count, 2);
        assert_eq!(report.addressable_value, 200.0);
    }

    #[test]
    fn test_sorted_by_descending_gap() {
        let goals = vec![
            create_goal("small", Some("Energy"), 100.0, 90.0),
            create_goal("large", Some("Healthcare"), 1000.0, 100.0),
            create_goal("medium", Some("Retail"), 300.0, 100.0),
        ];

        let analysis = aggregate_gaps(&goals, &[]);
        let order: Vec<&str> = analysis.reports.iter().map(|r| r.goal_id.as_str()).collect();
        assert_eq!(order, vec!["large", "medium", "small"]);
    }

    #[test]
    fn test_non_leaf_goals_excluded() {
        let mut parent = create_goal("parent", Some("Healthcare"), 1000.0, 0.0);
        parent.vertical = Some("Healthcare".to_string());
        let mut child = create_goal("child", Some("Healthcare"), 400.0, 100.0);
        child.parent_goal_id = Some("parent".to_string());
        let untagged = create_goal("untagged", None, 500.0, 0.0);

        let goals = vec![parent, child, untagged];
        let analysis = aggregate_gaps(&goals, &[]);

        // Only the tagged childless goal survives.
        assert_eq!(analysis.reports.len(), 1);
        assert_eq!(analysis.reports[0].goal_id, "child");
    }

    #[test]
    fn test_totals_and_status_counts() {
        let goals = vec![
            create_goal("a", Some("Healthcare"), 100.0, 100.0), // achieved
            create_goal("b", Some("Energy"), 100.0, 75.0),      // on_track
            create_goal("c", Some("Retail"), 100.0, 50.0),      // at_risk
            create_goal("d", Some("MedTech"), 100.0, 10.0),     // off_track
        ];

        let analysis = aggregate_gaps(&goals, &[]);

        assert_eq!(analysis.achieved, 1);
        assert_eq!(analysis.on_track, 1);
        assert_eq!(analysis.at_risk, 1);
        assert_eq!(analysis.off_track, 1);
        assert_eq!(analysis.total_gap, 0.0 + 25.0 + 50.0 + 90.0);
    }

    #[test]
    fn test_remaining_target() {
        let parent = create_goal("parent", None, 1000.0, 0.0);
        let mut child_a = create_goal("a", Some("Healthcare"), 400.0, 0.0);
        child_a.parent_goal_id = Some("parent".to_string());
        let mut child_b = create_goal("b", Some("Energy"), 250.0, 0.0);
        child_b.parent_goal_id = Some("parent".to_string());

        let goals = vec![parent.clone(), child_a, child_b];
        assert_eq!(remaining_target(&parent, &goals), 350.0);
    }
}
