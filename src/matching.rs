// 🔍 Entity Matcher - Classify import rows against the account snapshot
//
// Pure classification: (import rows, existing-account snapshot) →
// per-record change set. Never touches the store. The reconciler consumes
// the output; the preview endpoint surfaces it for human approval.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::db::TamAccount;
use crate::normalize::normalize_key;

// ============================================================================
// IMPORT RECORD
// ============================================================================

/// One candidate row from an external source (spreadsheet export, lead
/// list). Transient - lives only for the duration of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub company_name: String,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub vertical: Option<String>,

    /// Fit tier A/B/C; unqualified rows default to "C" at apply time.
    #[serde(default)]
    pub fit_tier: Option<String>,

    #[serde(default)]
    pub estimated_deal_value: Option<f64>,

    #[serde(default)]
    pub company_summary: Option<String>,

    /// Optional person attached to the row (lead imports carry one,
    /// account imports usually don't).
    #[serde(default)]
    pub contact: Option<ContactInfo>,

    #[serde(default)]
    pub flags: ImportFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub job_title: Option<String>,
}

/// Categorical flags carried through from the source list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportFlags {
    #[serde(default)]
    pub is_hot: bool,

    #[serde(default)]
    pub attended_conference: bool,

    #[serde(default)]
    pub attended_webinar: bool,
}

// ============================================================================
// CHANGE SET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Modified,
    Unchanged,
}

impl ChangeType {
    fn sort_rank(self) -> u8 {
        match self {
            ChangeType::New => 0,
            ChangeType::Modified => 1,
            ChangeType::Unchanged => 2,
        }
    }
}

/// Field-level difference between an incoming row and the matched account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub old: Option<String>,
    pub new: String,
}

impl FieldDiff {
    pub fn describe(&self) -> String {
        match &self.old {
            Some(old) => format!("{}: {} → {}", self.field, old, self.new),
            None => format!("{}: added {}", self.field, self.new),
        }
    }
}

/// Matcher output for one (deduplicated) import key.
///
/// `target_id` is present exactly when `change_type != New`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_type: ChangeType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Display name - first-seen casing for new records, stored casing
    /// for matched ones.
    pub company_name: String,

    /// Account-level payload after in-batch merging.
    pub record: ImportRecord,

    /// People collected from every row that mapped to this key.
    #[serde(default)]
    pub contacts: Vec<ContactInfo>,

    #[serde(default)]
    pub diffs: Vec<FieldDiff>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    pub new: usize,
    pub modified: usize,
    pub unchanged: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub changes: Vec<ChangeRecord>,
    pub summary: MatchSummary,
}

/// What to do when two distinct rows normalize to the same key.
///
/// The source behavior silently merges them (first match wins). That also
/// merges two genuinely different companies that happen to share a name -
/// a known, unresolved ambiguity. `StrictUnique` rejects the batch instead
/// of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    #[default]
    FirstMatchWins,
    StrictUnique,
}

// ============================================================================
// MATCHER
// ============================================================================

/// Classify import rows against a snapshot of existing accounts.
///
/// The snapshot map is keyed by normalized company name (see
/// [`crate::db::account_lookup`]). Rows that normalize to a key absent from
/// the snapshot are `New`; matched rows get a field-by-field diff with
/// null-safe semantics: a present incoming value can add or replace, an
/// absent incoming value never clears what is stored.
///
/// Rows within one batch that share a key are merged before matching, so
/// the second row is compared against the first row's provisional result
/// rather than the stale snapshot.
pub fn preview_changes(
    records: &[ImportRecord],
    existing: &HashMap<String, TamAccount>,
    policy: CollisionPolicy,
) -> Result<MatchOutcome> {
    validate_records(records)?;

    let mut changes: Vec<ChangeRecord> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = normalize_key(&record.company_name);

        if let Some(&idx) = seen.get(&key) {
            if policy == CollisionPolicy::StrictUnique {
                bail!(
                    "duplicate company name in batch: '{}' collides with '{}'",
                    record.company_name,
                    changes[idx].company_name
                );
            }
            merge_into(&mut changes[idx], record, existing.get(&key));
            continue;
        }

        let change = match existing.get(&key) {
            None => ChangeRecord {
                change_type: ChangeType::New,
                target_id: None,
                company_name: record.company_name.trim().to_string(),
                record: record.clone(),
                contacts: record.contact.clone().into_iter().collect(),
                diffs: Vec::new(),
            },
            Some(account) => {
                let diffs = diff_against(record, account);
                ChangeRecord {
                    change_type: if diffs.is_empty() {
                        ChangeType::Unchanged
                    } else {
                        ChangeType::Modified
                    },
                    target_id: Some(account.tam_account_id.clone()),
                    company_name: account.company_name.clone(),
                    record: record.clone(),
                    contacts: record.contact.clone().into_iter().collect(),
                    diffs,
                }
            }
        };

        seen.insert(key, changes.len());
        changes.push(change);
    }

    // New first, then modified, then unchanged (stable within each class).
    changes.sort_by_key(|c| c.change_type.sort_rank());

    let summary = MatchSummary {
        new: count_of(&changes, ChangeType::New),
        modified: count_of(&changes, ChangeType::Modified),
        unchanged: count_of(&changes, ChangeType::Unchanged),
        total: changes.len(),
    };

    Ok(MatchOutcome { changes, summary })
}

/// Reject malformed batches before any matching happens.
///
/// A row whose company name normalizes to the empty key can never be
/// matched or safely auto-created, so the whole batch is refused up front.
pub fn validate_records(records: &[ImportRecord]) -> Result<()> {
    for (i, record) in records.iter().enumerate() {
        if normalize_key(&record.company_name).is_empty() {
            bail!("row {}: company_name is required", i + 1);
        }
    }
    Ok(())
}

/// Fold a duplicate-key row into the change produced by the first row.
///
/// Absent payload fields are filled from the later row, contacts
/// accumulate, and matched records get their diffs recomputed against the
/// stored account (an unchanged match can upgrade to modified when the
/// later row adds data).
fn merge_into(change: &mut ChangeRecord, record: &ImportRecord, account: Option<&TamAccount>) {
    fill_absent(&mut change.record.website, &record.website);
    fill_absent(&mut change.record.vertical, &record.vertical);
    fill_absent(&mut change.record.fit_tier, &record.fit_tier);
    fill_absent(&mut change.record.company_summary, &record.company_summary);
    if change.record.estimated_deal_value.is_none() {
        change.record.estimated_deal_value = record.estimated_deal_value;
    }
    change.record.flags.is_hot |= record.flags.is_hot;
    change.record.flags.attended_conference |= record.flags.attended_conference;
    change.record.flags.attended_webinar |= record.flags.attended_webinar;

    if let Some(contact) = &record.contact {
        change.contacts.push(contact.clone());
    }

    if let Some(account) = account {
        change.diffs = diff_against(&change.record, account);
        change.change_type = if change.diffs.is_empty() {
            ChangeType::Unchanged
        } else {
            ChangeType::Modified
        };
    }
}

fn fill_absent(slot: &mut Option<String>, incoming: &Option<String>) {
    if slot.is_none() {
        *slot = incoming.clone();
    }
}

/// Null-safe field comparison between an incoming row and a stored account.
///
/// `vertical` and `fit_tier` replace on difference; `website`,
/// `estimated_deal_value`, and `company_summary` only fill gaps - an
/// import never downgrades data someone entered by hand.
fn diff_against(record: &ImportRecord, account: &TamAccount) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if let Some(incoming) = &record.vertical {
        if account.vertical.as_deref() != Some(incoming.as_str()) {
            diffs.push(FieldDiff {
                field: "vertical".to_string(),
                old: account.vertical.clone(),
                new: incoming.clone(),
            });
        }
    }

    if let Some(incoming) = &record.fit_tier {
        if account.fit_tier.as_deref() != Some(incoming.as_str()) {
            diffs.push(FieldDiff {
                field: "fit_tier".to_string(),
                old: account.fit_tier.clone(),
                new: incoming.clone(),
            });
        }
    }

    if let Some(incoming) = &record.website {
        if account.website.is_none() {
            diffs.push(FieldDiff {
                field: "website".to_string(),
                old: None,
                new: incoming.clone(),
            });
        }
    }

    if let Some(incoming) = record.estimated_deal_value {
        if account.estimated_deal_value.is_none() {
            diffs.push(FieldDiff {
                field: "estimated_deal_value".to_string(),
                old: None,
                new: format!("{}", incoming),
            });
        }
    }

    if let Some(incoming) = &record.company_summary {
        if account.company_summary.is_none() {
            diffs.push(FieldDiff {
                field: "company_summary".to_string(),
                old: None,
                new: incoming.clone(),
            });
        }
    }

    diffs
}

fn count_of(changes: &[ChangeRecord], ty: ChangeType) -> usize {
    changes.iter().filter(|c| c.change_type == ty).count()
}

// ============================================================================
// TESTS
// ============================================================================
