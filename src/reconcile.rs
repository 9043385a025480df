// ⚖️ Batch Reconciler - Two-phase apply of a reviewed change set
//
// Phase 1 creates missing parent accounts in fixed-size batches; phase 2
// applies entity writes (account updates, contact inserts) in fixed-size
// batches, resolving parent links through the phase-1 lookup. Batches are
// independently committed or independently failed - one bad batch never
// blocks the rest of the run, and the outcome reports what happened
// instead of throwing on partial failure.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::matching::{ChangeRecord, ChangeType, ContactInfo, ImportRecord};
use crate::normalize::normalize_key;

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Write-side payload for an auto-created TAM account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub company_name: String,
    pub status: String,
    pub fit_tier: String,
    pub vertical: Option<String>,
    pub website: Option<String>,
    pub estimated_deal_value: Option<f64>,
    pub company_summary: Option<String>,
    pub fit_rationale: String,
}

/// Id + name of a freshly created account, fed back into the parent lookup.
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub tam_account_id: String,
    pub company_name: String,
}

/// Field updates for a matched account; `None` leaves the column alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub vertical: Option<String>,
    pub website: Option<String>,
    pub fit_tier: Option<String>,
    pub estimated_deal_value: Option<f64>,
    pub company_summary: Option<String>,
}

impl AccountUpdate {
    pub fn from_record(record: &ImportRecord) -> Self {
        AccountUpdate {
            vertical: record.vertical.clone(),
            website: record.website.clone(),
            fit_tier: record.fit_tier.clone(),
            estimated_deal_value: record.estimated_deal_value,
            company_summary: record.company_summary.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vertical.is_none()
            && self.website.is_none()
            && self.fit_tier.is_none()
            && self.estimated_deal_value.is_none()
            && self.company_summary.is_none()
    }
}

/// Write-side payload for an imported contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub company_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub is_hot: bool,
    pub attended_conference: bool,
    pub attended_webinar: bool,
    pub tam_account_id: Option<String>,
    pub account_plan_id: Option<String>,
}

/// Minimal account-plan reference for the optional child link.
#[derive(Debug, Clone)]
pub struct AccountPlanRef {
    pub account_plan_id: String,
    pub account_name: String,
}

/// The datastore contract the reconciler writes through.
///
/// Batch writes are atomic per call, not across calls - the reconciler
/// never asks for a cross-batch transaction.
pub trait ReconcileStore {
    fn insert_accounts(&self, batch: &[NewAccount]) -> Result<Vec<CreatedAccount>>;
    fn update_account(&self, tam_account_id: &str, update: &AccountUpdate) -> Result<()>;
    /// Insert a batch of contacts, returning how many were actually
    /// inserted (idempotency-hash duplicates are skipped, not errors).
    fn insert_contacts(&self, batch: &[NewContact]) -> Result<usize>;
    fn list_account_plans(&self) -> Result<Vec<AccountPlanRef>>;
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Accounts plus contacts created this run.
    pub created: usize,
    /// Subset of `created`: parent accounts auto-created in phase 1.
    pub parents_created: usize,
    pub updated: usize,
    /// Unchanged records, plus contact rows skipped as duplicates.
    pub skipped: usize,
    pub linked_to_parent: usize,
    pub linked_to_plan: usize,
    pub errors: Vec<String>,
}

impl ReconcileOutcome {
    /// Partial failure is still success; only an all-failed run is not.
    pub fn is_success(&self) -> bool {
        let any_success = self.created > 0 || self.updated > 0 || self.skipped > 0;
        any_success || self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut msg = format!(
            "Created {}, updated {}, skipped {}. Linked {} to accounts, {} to plans.",
            self.created, self.updated, self.skipped, self.linked_to_parent, self.linked_to_plan
        );
        if !self.errors.is_empty() {
            msg.push_str(&format!(" ({} errors)", self.errors.len()));
        }
        msg
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    /// Records per write batch (default: 50).
    pub batch_size: usize,
}

impl Reconciler {
    pub fn new() -> Self {
        Reconciler { batch_size: 50 }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Reconciler {
            batch_size: batch_size.max(1),
        }
    }

    /// Apply a matcher change set through the store.
    ///
    /// Only a failure to read the account-plan snapshot is fatal; every
    /// write failure is recorded in the outcome and the run continues.
    /// Phase 2 never starts before phase 1 has finished - the parent
    /// lookup must be fully populated first.
    pub fn reconcile<S: ReconcileStore>(
        &self,
        store: &S,
        changes: &[ChangeRecord],
    ) -> Result<ReconcileOutcome> {
        let plans = store
            .list_account_plans()
            .context("reconcile: failed to read account plan snapshot")?;

        let mut plan_lookup: HashMap<String, String> = HashMap::new();
        for plan in plans {
            plan_lookup.insert(normalize_key(&plan.account_name), plan.account_plan_id);
        }

        let mut outcome = ReconcileOutcome::default();

        // Parent lookup starts from the already-matched targets; phase 1
        // fills in the missing companies.
        let mut parent_ids: HashMap<String, String> = HashMap::new();
        for change in changes {
            if let Some(id) = &change.target_id {
                parent_ids.insert(normalize_key(&change.company_name), id.clone());
            }
        }

        self.precreate_parents(store, changes, &mut parent_ids, &mut outcome);
        self.apply_entities(store, changes, &parent_ids, &plan_lookup, &mut outcome);

        Ok(outcome)
    }

    /// Phase 1: bulk-create the distinct missing parent accounts.
    fn precreate_parents<S: ReconcileStore>(
        &self,
        store: &S,
        changes: &[ChangeRecord],
        parent_ids: &mut HashMap<String, String>,
        outcome: &mut ReconcileOutcome,
    ) {
        let missing: Vec<&ChangeRecord> = changes
            .iter()
            .filter(|c| c.change_type == ChangeType::New)
            .filter(|c| !parent_ids.contains_key(&normalize_key(&c.company_name)))
            .collect();

        for (i, chunk) in missing.chunks(self.batch_size).enumerate() {
            let batch: Vec<NewAccount> = chunk.iter().map(|c| new_account_payload(c)).collect();

            match store.insert_accounts(&batch) {
                Ok(created) => {
                    outcome.parents_created += created.len();
                    outcome.created += created.len();
                    for account in created {
                        parent_ids
                            .insert(normalize_key(&account.company_name), account.tam_account_id);
                    }
                }
                Err(e) => {
                    log::warn!("parent batch {} failed: {:#}", i + 1, e);
                    outcome.errors.push(format!("Batch {}: {}", i + 1, e));
                }
            }
        }
    }

    /// Phase 2: per-batch account updates and contact inserts, parent
    /// links resolved through the phase-1 lookup.
    fn apply_entities<S: ReconcileStore>(
        &self,
        store: &S,
        changes: &[ChangeRecord],
        parent_ids: &HashMap<String, String>,
        plan_lookup: &HashMap<String, String>,
        outcome: &mut ReconcileOutcome,
    ) {
        for (i, chunk) in changes.chunks(self.batch_size).enumerate() {
            let mut contacts: Vec<NewContact> = Vec::new();

            for change in chunk {
                match change.change_type {
                    ChangeType::New => {
                        // The account itself was handled in phase 1.
                    }
                    ChangeType::Modified => {
                        let update = AccountUpdate::from_record(&change.record);
                        match change.target_id.as_deref() {
                            Some(id) if !update.is_empty() => {
                                match store.update_account(id, &update) {
                                    Ok(()) => outcome.updated += 1,
                                    Err(e) => outcome.errors.push(format!(
                                        "Failed to update {}: {}",
                                        change.company_name, e
                                    )),
                                }
                            }
                            _ => outcome.skipped += 1,
                        }
                    }
                    ChangeType::Unchanged => outcome.skipped += 1,
                }

                let key = normalize_key(&change.company_name);
                for contact in &change.contacts {
                    let tam_account_id = parent_ids.get(&key).cloned();
                    // Optional link: unresolved plans stay null, never
                    // blocking the contact itself.
                    let account_plan_id = plan_lookup.get(&key).cloned();

                    if tam_account_id.is_some() {
                        outcome.linked_to_parent += 1;
                    }
                    if account_plan_id.is_some() {
                        outcome.linked_to_plan += 1;
                    }

                    contacts.push(contact_payload(
                        change,
                        contact,
                        tam_account_id,
                        account_plan_id,
                    ));
                }
            }

            if !contacts.is_empty() {
                let attempted = contacts.len();
                match store.insert_contacts(&contacts) {
                    Ok(inserted) => {
                        outcome.created += inserted;
                        outcome.skipped += attempted - inserted;
                    }
                    Err(e) => outcome.errors.push(format!("Batch {}: {}", i + 1, e)),
                }
            }
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

fn new_account_payload(change: &ChangeRecord) -> NewAccount {
    let record = &change.record;
    NewAccount {
        company_name: change.company_name.clone(),
        status: "Prospecting".to_string(),
        fit_tier: record.fit_tier.clone().unwrap_or_else(|| "C".to_string()),
        vertical: record.vertical.clone(),
        website: record.website.clone(),
        estimated_deal_value: record.estimated_deal_value,
        company_summary: record.company_summary.clone(),
        fit_rationale: record
            .company_summary
            .clone()
            .unwrap_or_else(|| "Auto-created from import".to_string()),
    }
}

fn contact_payload(
    change: &ChangeRecord,
    contact: &ContactInfo,
    tam_account_id: Option<String>,
    account_plan_id: Option<String>,
) -> NewContact {
    NewContact {
        company_name: change.company_name.clone(),
        first_name: contact.first_name.clone(),
        last_name: contact.last_name.clone(),
        email: contact.email.clone(),
        job_title: contact.job_title.clone(),
        is_hot: change.record.flags.is_hot,
        attended_conference: change.record.flags.attended_conference,
        attended_webinar: change.record.flags.attended_webinar,
        tam_account_id,
        account_plan_id,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{preview_changes, CollisionPolicy, ImportFlags, ImportRecord};
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// In-memory store with injectable per-call failures.
    struct MockStore {
        created_accounts: RefCell<Vec<NewAccount>>,
        updated: RefCell<Vec<(String, AccountUpdate)>>,
        contacts: RefCell<Vec<NewContact>>,
        insert_account_calls: RefCell<usize>,
        insert_contact_calls: RefCell<usize>,
        fail_account_batches: HashSet<usize>,
        fail_contact_batches: HashSet<usize>,
        fail_update_ids: HashSet<String>,
        fail_plan_read: bool,
        plans: Vec<AccountPlanRef>,
        next_id: RefCell<usize>,
    }

    impl MockStore {
        fn new() -> Self {
            MockStore {
                created_accounts: RefCell::new(Vec::new()),
                updated: RefCell::new(Vec::new()),
                contacts: RefCell::new(Vec::new()),
                insert_account_calls: RefCell::new(0),
                insert_contact_calls: RefCell::new(0),
                fail_account_batches: HashSet::new(),
                fail_contact_batches: HashSet::new(),
                fail_update_ids: HashSet::new(),
                fail_plan_read: false,
                plans: Vec::new(),
                next_id: RefCell::new(0),
            }
        }
    }

    impl ReconcileStore for MockStore {
        fn insert_accounts(&self, batch: &[NewAccount]) -> Result<Vec<CreatedAccount>> {
            let call = {
                let mut calls = self.insert_account_calls.borrow_mut();
                *calls += 1;
                *calls
            };
            if self.fail_account_batches.contains(&call) {
                anyhow::bail!("simulated write failure");
            }

            let mut created = Vec::new();
            for account in batch {
                let id = {
                    let mut next = self.next_id.borrow_mut();
                    *next += 1;
                    format!("tam-{}", next)
                };
                created.push(CreatedAccount {
                    tam_account_id: id,
                    company_name: account.company_name.clone(),
                });
                self.created_accounts.borrow_mut().push(account.clone());
            }
            Ok(created)
        }

        fn update_account(&self, tam_account_id: &str, update: &AccountUpdate) -> Result<()> {
            if self.fail_update_ids.contains(tam_account_id) {
                anyhow::bail!("simulated update failure");
            }
            self.updated
                .borrow_mut()
                .push((tam_account_id.to_string(), update.clone()));
            Ok(())
        }

        fn insert_contacts(&self, batch: &[NewContact]) -> Result<usize> {
            let call = {
                let mut calls = self.insert_contact_calls.borrow_mut();
                *calls += 1;
                *calls
            };
            if self.fail_contact_batches.contains(&call) {
                anyhow::bail!("simulated write failure");
            }
            self.contacts.borrow_mut().extend(batch.iter().cloned());
            Ok(batch.len())
        }

        fn list_account_plans(&self) -> Result<Vec<AccountPlanRef>> {
            if self.fail_plan_read {
                anyhow::bail!("simulated snapshot read failure");
            }
            Ok(self.plans.clone())
        }
    }

    fn create_record(name: &str) -> ImportRecord {
        ImportRecord {
            company_name: name.to_string(),
            website: None,
            vertical: None,
            fit_tier: None,
            estimated_deal_value: None,
            company_summary: None,
            contact: None,
            flags: ImportFlags::default(),
        }
    }

    fn create_record_with_contact(name: &str, first: &str, last: &str) -> ImportRecord {
        let mut record = create_record(name);
        record.contact = Some(ContactInfo {
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(format!(
                "{}.{}@example.com",
                first.to_lowercase(),
                last.to_lowercase()
            )),
            job_title: None,
        });
        record
    }

    fn changes_for(records: &[ImportRecord]) -> Vec<ChangeRecord> {
        preview_changes(records, &HashMap::new(), CollisionPolicy::default())
            .unwrap()
            .changes
    }

    #[test]
    fn test_120_new_records_three_batches_middle_failure() {
        let records: Vec<ImportRecord> =
            (0..120).map(|i| create_record(&format!("Company {}", i))).collect();
        let changes = changes_for(&records);

        let mut store = MockStore::new();
        store.fail_account_batches.insert(2);

        let outcome = Reconciler::with_batch_size(50)
            .reconcile(&store, &changes)
            .unwrap();

        assert_eq!(*store.insert_account_calls.borrow(), 3);
        assert_eq!(outcome.created, 70);
        assert_eq!(outcome.parents_created, 70);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Batch 2:"), "{:?}", outcome.errors);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_batch_sizes_are_50_50_20() {
        let records: Vec<ImportRecord> =
            (0..120).map(|i| create_record(&format!("Company {}", i))).collect();
        let changes = changes_for(&records);

        let store = MockStore::new();
        Reconciler::with_batch_size(50)
            .reconcile(&store, &changes)
            .unwrap();

        assert_eq!(store.created_accounts.borrow().len(), 120);
        assert_eq!(*store.insert_account_calls.borrow(), 3);
    }

    #[test]
    fn test_dedup_creates_single_parent_first_seen_casing() {
        let records = vec![create_record("Acme Inc"), create_record("acme inc ")];
        let changes = changes_for(&records);

        let store = MockStore::new();
        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.parents_created, 1);
        let created = store.created_accounts.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].company_name, "Acme Inc");
        assert_eq!(created[0].status, "Prospecting");
        assert_eq!(created[0].fit_tier, "C");
    }

    #[test]
    fn test_contacts_linked_to_phase1_parent() {
        let records = vec![create_record_with_contact("Acme Inc", "Dana", "Reyes")];
        let changes = changes_for(&records);

        let store = MockStore::new();
        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.parents_created, 1);
        assert_eq!(outcome.created, 2); // parent + contact
        assert_eq!(outcome.linked_to_parent, 1);

        let contacts = store.contacts.borrow();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].tam_account_id.as_deref(), Some("tam-1"));
        assert!(contacts[0].account_plan_id.is_none());
    }

    #[test]
    fn test_unresolved_parent_does_not_block_contact() {
        let records = vec![create_record_with_contact("Acme Inc", "Dana", "Reyes")];
        let changes = changes_for(&records);

        let mut store = MockStore::new();
        store.fail_account_batches.insert(1);

        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.parents_created, 0);
        assert_eq!(outcome.errors.len(), 1);
        // Contact still lands, with a null parent link.
        let contacts = store.contacts.borrow();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].tam_account_id.is_none());
        assert_eq!(outcome.linked_to_parent, 0);
    }

    #[test]
    fn test_optional_plan_link_resolved() {
        let records = vec![create_record_with_contact("Acme Inc", "Dana", "Reyes")];
        let changes = changes_for(&records);

        let mut store = MockStore::new();
        store.plans.push(AccountPlanRef {
            account_plan_id: "plan-1".to_string(),
            account_name: "ACME INC".to_string(),
        });

        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.linked_to_plan, 1);
        let contacts = store.contacts.borrow();
        assert_eq!(contacts[0].account_plan_id.as_deref(), Some("plan-1"));
    }

    #[test]
    fn test_modified_change_updates_target() {
        let mut record = create_record("Acme Inc");
        record.vertical = Some("Healthcare".to_string());

        let changes = vec![ChangeRecord {
            change_type: ChangeType::Modified,
            target_id: Some("tam-9".to_string()),
            company_name: "Acme Inc".to_string(),
            record,
            contacts: Vec::new(),
            diffs: Vec::new(),
        }];

        let store = MockStore::new();
        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.updated, 1);
        let updated = store.updated.borrow();
        assert_eq!(updated[0].0, "tam-9");
        assert_eq!(updated[0].1.vertical.as_deref(), Some("Healthcare"));
    }

    #[test]
    fn test_update_failure_recorded_and_run_continues() {
        let mut bad = create_record("Acme Inc");
        bad.vertical = Some("Healthcare".to_string());
        let mut good = create_record("Borealis Labs");
        good.vertical = Some("Energy".to_string());

        let changes = vec![
            ChangeRecord {
                change_type: ChangeType::Modified,
                target_id: Some("tam-bad".to_string()),
                company_name: "Acme Inc".to_string(),
                record: bad,
                contacts: Vec::new(),
                diffs: Vec::new(),
            },
            ChangeRecord {
                change_type: ChangeType::Modified,
                target_id: Some("tam-good".to_string()),
                company_name: "Borealis Labs".to_string(),
                record: good,
                contacts: Vec::new(),
                diffs: Vec::new(),
            },
        ];

        let mut store = MockStore::new();
        store.fail_update_ids.insert("tam-bad".to_string());

        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("Acme Inc"));
        assert!(outcome.is_success());
    }

    #[test]
    fn test_unchanged_counted_as_skipped() {
        let changes = vec![ChangeRecord {
            change_type: ChangeType::Unchanged,
            target_id: Some("tam-1".to_string()),
            company_name: "Acme Inc".to_string(),
            record: create_record("Acme Inc"),
            contacts: Vec::new(),
            diffs: Vec::new(),
        }];

        let store = MockStore::new();
        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.created, 0);
    }

    #[test]
    fn test_plan_snapshot_read_failure_is_fatal() {
        let changes = changes_for(&[create_record("Acme Inc")]);

        let mut store = MockStore::new();
        store.fail_plan_read = true;

        let result = Reconciler::new().reconcile(&store, &changes);
        assert!(result.is_err());
        // Nothing was written.
        assert!(store.created_accounts.borrow().is_empty());
        assert!(store.contacts.borrow().is_empty());
    }

    #[test]
    fn test_all_failed_run_is_not_success() {
        let records = vec![create_record("Acme Inc")];
        let changes = changes_for(&records);

        let mut store = MockStore::new();
        store.fail_account_batches.insert(1);

        let outcome = Reconciler::new().reconcile(&store, &changes).unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_contact_batch_failure_isolated() {
        let records: Vec<ImportRecord> = (0..4)
            .map(|i| create_record_with_contact(&format!("Company {}", i), "Ana", "Lee"))
            .collect();
        let changes = changes_for(&records);

        let mut store = MockStore::new();
        store.fail_contact_batches.insert(1);

        let outcome = Reconciler::with_batch_size(2)
            .reconcile(&store, &changes)
            .unwrap();

        // 4 parents created, first contact batch of 2 failed, second landed.
        assert_eq!(outcome.parents_created, 4);
        assert_eq!(store.contacts.borrow().len(), 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Batch 1:"));
    }
}
