// 🗄️ SQLite store - accounts, contacts, goals, signals, health snapshots
//
// Single-file store behind the reconciler's write contract and the health
// engine's fact gathering. Every reconciliation run re-reads its snapshot
// from here; nothing is cached across requests.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use crate::gaps::Goal;
use crate::health::{HealthFacts, HealthSnapshot, ScoringProfile};
use crate::matching::{ContactInfo, ImportFlags, ImportRecord};
use crate::normalize::normalize_key;
use crate::reconcile::{
    AccountPlanRef, AccountUpdate, CreatedAccount, NewAccount, NewContact, ReconcileStore,
};

// ============================================================================
// CANONICAL ENTITY
// ============================================================================

/// A persisted TAM account. Created by the reconciler or by hand, mutated
/// by later runs, never hard-deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TamAccount {
    pub tam_account_id: String,
    pub company_name: String,
    pub status: String,
    pub vertical: Option<String>,
    pub website: Option<String>,
    pub fit_tier: Option<String>,
    pub estimated_deal_value: Option<f64>,
    pub company_summary: Option<String>,
    pub fit_rationale: Option<String>,
    /// "prospect" or "customer"; selects the health scoring profile.
    pub account_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Build the normalized-key lookup the matcher runs against.
pub fn account_lookup(accounts: Vec<TamAccount>) -> HashMap<String, TamAccount> {
    let mut lookup = HashMap::new();
    for account in accounts {
        lookup.insert(normalize_key(&account.company_name), account);
    }
    lookup
}

// ============================================================================
// STORE
// ============================================================================

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {:?}", path))?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========================================================================
    // ACCOUNTS
    // ========================================================================

    pub fn list_accounts(&self) -> Result<Vec<TamAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT tam_account_id, company_name, status, vertical, website, fit_tier,
                    estimated_deal_value, company_summary, fit_rationale, account_type,
                    created_at, updated_at
             FROM tam_accounts
             ORDER BY company_name",
        )?;

        let accounts = stmt
            .query_map([], map_account_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// The pool of actionable accounts the gap aggregator matches against.
    pub fn tam_pool(&self) -> Result<Vec<TamAccount>> {
        let mut stmt = self.conn.prepare(
            "SELECT tam_account_id, company_name, status, vertical, website, fit_tier,
                    estimated_deal_value, company_summary, fit_rationale, account_type,
                    created_at, updated_at
             FROM tam_accounts
             WHERE status IN ('Qualified', 'Researching', 'Pursuing')
             ORDER BY company_name",
        )?;

        let accounts = stmt
            .query_map([], map_account_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    pub fn get_account(&self, tam_account_id: &str) -> Result<Option<TamAccount>> {
        let account = self
            .conn
            .query_row(
                "SELECT tam_account_id, company_name, status, vertical, website, fit_tier,
                        estimated_deal_value, company_summary, fit_rationale, account_type,
                        created_at, updated_at
                 FROM tam_accounts
                 WHERE tam_account_id = ?1",
                params![tam_account_id],
                map_account_row,
            )
            .optional()?;

        Ok(account)
    }

    pub fn count_accounts(&self) -> Result<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tam_accounts", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_contacts(&self) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM prospect_contacts",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // GOALS
    // ========================================================================

    pub fn insert_goal(&self, goal: &Goal) -> Result<()> {
        self.conn.execute(
            "INSERT INTO goals (
                goal_id, name, goal_type, category, vertical,
                target_value, current_value, parent_goal_id, is_active
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
            params![
                goal.goal_id,
                goal.name,
                goal.goal_type,
                goal.category,
                goal.vertical,
                goal.target_value,
                goal.current_value,
                goal.parent_goal_id,
            ],
        )?;
        Ok(())
    }

    pub fn list_goals(&self) -> Result<Vec<Goal>> {
        let mut stmt = self.conn.prepare(
            "SELECT goal_id, name, goal_type, category, vertical,
                    target_value, current_value, parent_goal_id
             FROM goals
             WHERE is_active = 1
             ORDER BY name",
        )?;

        let goals = stmt
            .query_map([], |row| {
                Ok(Goal {
                    goal_id: row.get(0)?,
                    name: row.get(1)?,
                    goal_type: row.get(2)?,
                    category: row.get(3)?,
                    vertical: row.get(4)?,
                    target_value: row.get(5)?,
                    current_value: row.get(6)?,
                    parent_goal_id: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(goals)
    }

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Gather every raw fact the health engine needs for one account.
    ///
    /// Fails when the account cannot be read at all (data unavailable);
    /// empty result sets are legitimately-absent signal, not errors.
    pub fn fetch_health_facts(
        &self,
        tam_account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<HealthFacts> {
        let account: Option<(String, Option<f64>, Option<f64>, Option<f64>)> = self
            .conn
            .query_row(
                "SELECT account_type, nps_score, csat_score, usage_percentage
                 FROM tam_accounts
                 WHERE tam_account_id = ?1",
                params![tam_account_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("health: failed to read account")?;

        let Some((account_type, nps_score, csat_score, usage_percentage)) = account else {
            bail!("health: account not found: {}", tam_account_id);
        };

        let completed_actions = self.datetime_column(
            "SELECT updated_at FROM action_items
             WHERE account_id = ?1 AND status = 'completed'
             ORDER BY updated_at DESC LIMIT 10",
            tam_account_id,
        )?;

        let cutoff_30d = (now - Duration::days(30)).to_rfc3339();
        let stage_movement: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM stage_transitions
             WHERE account_id = ?1 AND recorded_at > ?2",
            params![tam_account_id, cutoff_30d],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT severity, created_at FROM risks
             WHERE account_id = ?1 AND status = 'open'",
        )?;
        let open_risks = stmt
            .query_map(params![tam_account_id], |row| {
                let severity: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                Ok((severity, parse_datetime(&created_at)))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let open_pursuits = self.datetime_column(
            "SELECT updated_at FROM pursuits
             WHERE account_id = ?1 AND stage NOT IN ('closed_won', 'closed_lost')",
            tam_account_id,
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT sentiment, is_placeholder FROM stakeholders WHERE account_id = ?1",
        )?;
        let mut stakeholder_sentiments = Vec::new();
        let mut stakeholders_mapped = 0u32;
        let rows = stmt.query_map(params![tam_account_id], |row| {
            let sentiment: Option<String> = row.get(0)?;
            let is_placeholder: bool = row.get(1)?;
            Ok((sentiment, is_placeholder))
        })?;
        for row in rows {
            let (sentiment, is_placeholder) = row?;
            stakeholders_mapped += 1;
            if !is_placeholder {
                if let Some(sentiment) = sentiment {
                    stakeholder_sentiments.push(sentiment);
                }
            }
        }

        let active_trails = self.datetime_column(
            "SELECT updated_at FROM trails
             WHERE account_id = ?1 AND status IN ('exploring', 'linked')",
            tam_account_id,
        )?;

        let signals_30d: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM account_signals
             WHERE account_id = ?1 AND signal_date >= ?2",
            params![tam_account_id, cutoff_30d],
            |row| row.get(0),
        )?;

        Ok(HealthFacts {
            account_type,
            nps_score,
            csat_score,
            usage_percentage,
            completed_actions,
            stage_movement: stage_movement.clamp(-3, 3) as i32,
            open_risks,
            open_pursuits,
            stakeholder_sentiments,
            stakeholders_mapped,
            active_trails,
            signals_30d: signals_30d as u32,
        })
    }

    /// Persist a snapshot, superseding any previous one for the account.
    pub fn upsert_health_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let components = serde_json::to_string(&snapshot.components)?;
        let signal_summary = serde_json::to_string(&snapshot.signal_summary)?;

        self.conn.execute(
            "INSERT INTO account_health_scores (
                account_id, profile, total_score, health_band,
                components, signal_summary, calculated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(account_id) DO UPDATE SET
                profile = excluded.profile,
                total_score = excluded.total_score,
                health_band = excluded.health_band,
                components = excluded.components,
                signal_summary = excluded.signal_summary,
                calculated_at = excluded.calculated_at",
            params![
                snapshot.account_id,
                snapshot.profile.as_str(),
                snapshot.total_score,
                snapshot.band.as_str(),
                components,
                signal_summary,
                snapshot.computed_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    pub fn get_health_snapshot(&self, tam_account_id: &str) -> Result<Option<HealthSnapshot>> {
        let row: Option<(String, u32, String, String, String)> = self
            .conn
            .query_row(
                "SELECT profile, total_score, components, signal_summary, calculated_at
                 FROM account_health_scores
                 WHERE account_id = ?1",
                params![tam_account_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((profile, total_score, components, signal_summary, calculated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(HealthSnapshot {
            account_id: tam_account_id.to_string(),
            profile: if profile == "inbound" {
                ScoringProfile::Inbound
            } else {
                ScoringProfile::Outbound
            },
            components: serde_json::from_str(&components)
                .context("health: corrupt component breakdown")?,
            total_score,
            band: crate::health::band_for(total_score),
            signal_summary: serde_json::from_str(&signal_summary)
                .context("health: corrupt signal summary")?,
            computed_at: parse_datetime(&calculated_at),
        }))
    }

    fn datetime_column(&self, sql: &str, account_id: &str) -> Result<Vec<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map(params![account_id], |row| {
                let raw: String = row.get(0)?;
                Ok(parse_datetime(&raw))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

// ============================================================================
// RECONCILE STORE IMPLEMENTATION
// ============================================================================

impl ReconcileStore for SqliteStore {
    /// One transaction per batch: the batch commits or fails as a unit,
    /// independent of every other batch.
    fn insert_accounts(&self, batch: &[NewAccount]) -> Result<Vec<CreatedAccount>> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut created = Vec::with_capacity(batch.len());

        for account in batch {
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO tam_accounts (
                    tam_account_id, company_name, status, vertical, website, fit_tier,
                    estimated_deal_value, company_summary, fit_rationale, account_type,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'prospect', ?10, ?10)",
                params![
                    id,
                    account.company_name,
                    account.status,
                    account.vertical,
                    account.website,
                    account.fit_tier,
                    account.estimated_deal_value,
                    account.company_summary,
                    account.fit_rationale,
                    now,
                ],
            )
            .with_context(|| format!("failed to create {}", account.company_name))?;

            created.push(CreatedAccount {
                tam_account_id: id,
                company_name: account.company_name.clone(),
            });
        }

        tx.commit()?;
        Ok(created)
    }

    fn update_account(&self, tam_account_id: &str, update: &AccountUpdate) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE tam_accounts SET
                vertical = COALESCE(?1, vertical),
                website = COALESCE(?2, website),
                fit_tier = COALESCE(?3, fit_tier),
                estimated_deal_value = COALESCE(?4, estimated_deal_value),
                company_summary = COALESCE(?5, company_summary),
                updated_at = ?6
             WHERE tam_account_id = ?7",
            params![
                update.vertical,
                update.website,
                update.fit_tier,
                update.estimated_deal_value,
                update.company_summary,
                Utc::now().to_rfc3339(),
                tam_account_id,
            ],
        )?;

        if changed == 0 {
            bail!("account not found: {}", tam_account_id);
        }
        Ok(())
    }

    /// Idempotency-hashed insert: a contact already imported is skipped,
    /// which is what makes re-running an interrupted apply safe.
    fn insert_contacts(&self, batch: &[NewContact]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0;

        for contact in batch {
            let hash = contact_idempotency_hash(contact);
            inserted += tx.execute(
                "INSERT OR IGNORE INTO prospect_contacts (
                    contact_id, idempotency_hash, company_name, first_name, last_name,
                    email, job_title, is_hot, attended_conference, attended_webinar,
                    tam_account_id, account_plan_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    hash,
                    contact.company_name,
                    contact.first_name,
                    contact.last_name,
                    contact.email,
                    contact.job_title,
                    contact.is_hot,
                    contact.attended_conference,
                    contact.attended_webinar,
                    contact.tam_account_id,
                    contact.account_plan_id,
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn list_account_plans(&self) -> Result<Vec<AccountPlanRef>> {
        let mut stmt = self
            .conn
            .prepare("SELECT account_plan_id, account_name FROM account_plans")?;

        let plans = stmt
            .query_map([], |row| {
                Ok(AccountPlanRef {
                    account_plan_id: row.get(0)?,
                    account_name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(plans)
    }
}

/// Duplicate-detection hash, distinct from identity (the contact's UUID).
fn contact_idempotency_hash(contact: &NewContact) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}",
            normalize_key(&contact.company_name),
            contact.email.as_deref().unwrap_or("").to_lowercase(),
            contact.first_name.to_lowercase(),
            contact.last_name.to_lowercase(),
        )
        .as_bytes(),
    );
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tam_accounts (
            tam_account_id TEXT PRIMARY KEY,
            company_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Prospecting',
            vertical TEXT,
            website TEXT,
            fit_tier TEXT,
            estimated_deal_value REAL,
            company_summary TEXT,
            fit_rationale TEXT,
            account_type TEXT NOT NULL DEFAULT 'prospect',
            nps_score REAL,
            csat_score REAL,
            usage_percentage REAL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prospect_contacts (
            contact_id TEXT PRIMARY KEY,
            idempotency_hash TEXT UNIQUE NOT NULL,
            company_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            job_title TEXT,
            is_hot INTEGER NOT NULL DEFAULT 0,
            attended_conference INTEGER NOT NULL DEFAULT 0,
            attended_webinar INTEGER NOT NULL DEFAULT 0,
            tam_account_id TEXT,
            account_plan_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_plans (
            account_plan_id TEXT PRIMARY KEY,
            account_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS goals (
            goal_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            goal_type TEXT NOT NULL,
            category TEXT,
            vertical TEXT,
            target_value REAL NOT NULL DEFAULT 0,
            current_value REAL NOT NULL DEFAULT 0,
            parent_goal_id TEXT,
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_health_scores (
            account_id TEXT PRIMARY KEY,
            profile TEXT NOT NULL,
            total_score INTEGER NOT NULL,
            health_band TEXT NOT NULL,
            components TEXT NOT NULL,
            signal_summary TEXT NOT NULL,
            calculated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS action_items (
            action_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pursuits (
            pursuit_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stage_transitions (
            transition_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            delta INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS risks (
            risk_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stakeholders (
            stakeholder_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            sentiment TEXT,
            is_placeholder INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trails (
            trail_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            status TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS account_signals (
            signal_id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            signal_date TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_name ON tam_accounts(company_name)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contacts_hash ON prospect_contacts(idempotency_hash)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contacts_account ON prospect_contacts(tam_account_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_goals_parent ON goals(parent_goal_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn map_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TamAccount> {
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(TamAccount {
        tam_account_id: row.get(0)?,
        company_name: row.get(1)?,
        status: row.get(2)?,
        vertical: row.get(3)?,
        website: row.get(4)?,
        fit_tier: row.get(5)?,
        estimated_deal_value: row.get(6)?,
        company_summary: row.get(7)?,
        fit_rationale: row.get(8)?,
        account_type: row.get(9)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// CSV LOADING
// ============================================================================

/// One row of the import spreadsheet, headers as exported.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Company_Name")]
    company_name: String,

    #[serde(rename = "Website", default)]
    website: Option<String>,

    #[serde(rename = "Vertical", default)]
    vertical: Option<String>,

    #[serde(rename = "Fit_Tier", default)]
    fit_tier: Option<String>,

    #[serde(rename = "Estimated_Deal_Value", default)]
    estimated_deal_value: Option<f64>,

    #[serde(rename = "Company_Summary", default)]
    company_summary: Option<String>,

    #[serde(rename = "First_Name", default)]
    first_name: Option<String>,

    #[serde(rename = "Last_Name", default)]
    last_name: Option<String>,

    #[serde(rename = "Email", default)]
    email: Option<String>,

    #[serde(rename = "Job_Title", default)]
    job_title: Option<String>,

    #[serde(rename = "Is_Hot", default)]
    is_hot: Option<bool>,

    #[serde(rename = "Attended_Conference", default)]
    attended_conference: Option<bool>,

    #[serde(rename = "Attended_Webinar", default)]
    attended_webinar: Option<bool>,
}

/// Load structured import rows from a CSV export.
pub fn load_import_csv(csv_path: &Path) -> Result<Vec<ImportRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open CSV file")?;

    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let row: CsvRow = result.context("Failed to deserialize import row")?;

        let contact = match (&row.first_name, &row.last_name) {
            (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
                Some(ContactInfo {
                    first_name: first.clone(),
                    last_name: last.clone(),
                    email: none_if_empty(row.email.clone()),
                    job_title: none_if_empty(row.job_title.clone()),
                })
            }
            _ => None,
        };

        records.push(ImportRecord {
            company_name: row.company_name,
            website: none_if_empty(row.website),
            vertical: none_if_empty(row.vertical),
            fit_tier: none_if_empty(row.fit_tier),
            estimated_deal_value: row.estimated_deal_value,
            company_summary: none_if_empty(row.company_summary),
            contact,
            flags: ImportFlags {
                is_hot: row.is_hot.unwrap_or(false),
                attended_conference: row.attended_conference.unwrap_or(false),
                attended_webinar: row.attended_webinar.unwrap_or(false),
            },
        });
    }

    Ok(records)
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{compute_health, HealthBand, HealthInputs, OutboundInputs, SignalSummary};
    use crate::matching::{preview_changes, CollisionPolicy};
    use crate::reconcile::Reconciler;

    fn create_new_account(name: &str) -> NewAccount {
        NewAccount {
            company_name: name.to_string(),
            status: "Prospecting".to_string(),
            fit_tier: "C".to_string(),
            vertical: None,
            website: None,
            estimated_deal_value: None,
            company_summary: None,
            fit_rationale: "Auto-created from import".to_string(),
        }
    }

    fn create_contact(company: &str, first: &str, last: &str) -> NewContact {
        NewContact {
            company_name: company.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(format!("{}@example.com", first.to_lowercase())),
            job_title: None,
            is_hot: false,
            attended_conference: false,
            attended_webinar: false,
            tam_account_id: None,
            account_plan_id: None,
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

    #[test]
    fn test_insert_and_list_accounts() {
        let store = SqliteStore::open_in_memory().unwrap();

        let created = store
            .insert_accounts(&[
                create_new_account("Acme Inc"),
                create_new_account("Borealis"),
            ])
            .unwrap();
        assert_eq!(created.len(), 2);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].company_name, "Acme Inc");
        assert_eq!(accounts[0].status, "Prospecting");
        assert_eq!(accounts[0].account_type, "prospect");
    }

    #[test]
    fn test_update_account_coalesces_absent_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut account = create_new_account("Acme Inc");
        account.vertical = Some("Retail".to_string());
        let created = store.insert_accounts(&[account]).unwrap();
        let id = &created[0].tam_account_id;

        store
            .update_account(
                id,
                &AccountUpdate {
                    website: Some("acme.example".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.website.as_deref(), Some("acme.example"));
        // Absent update fields left the stored value alone.
        assert_eq!(account.vertical.as_deref(), Some("Retail"));
    }

    #[test]
    fn test_update_missing_account_is_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.update_account("nope", &AccountUpdate::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_contact_insert_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        let contact = create_contact("Acme Inc", "Dana", "Reyes");

        let first = store.insert_contacts(&[contact.clone()]).unwrap();
        assert_eq!(first, 1);

        // Same person again: skipped, not duplicated, not an error.
        let second = store.insert_contacts(&[contact]).unwrap();
        assert_eq!(second, 0);
        assert_eq!(store.count_contacts().unwrap(), 1);
    }

    #[test]
    fn test_health_snapshot_upsert_last_write_wins() {
        let store = SqliteStore::open_in_memory().unwrap();

        let signals = SignalSummary::Outbound {
            stalled_deals: 0,
            missing_champion: 0,
            inactive_trails: 0,
        };
        let inputs = HealthInputs::Outbound(OutboundInputs::default());

        let first = compute_health("acct-1", &inputs, signals.clone(), Utc::now());
        store.upsert_health_snapshot(&first).unwrap();

        let mut second = compute_health("acct-1", &inputs, signals, Utc::now());
        second.total_score = 85;
        second.band = HealthBand::Healthy;
        store.upsert_health_snapshot(&second).unwrap();

        let stored = store.get_health_snapshot("acct-1").unwrap().unwrap();
        assert_eq!(stored.total_score, 85);
        assert_eq!(stored.band, HealthBand::Healthy);
    }

    #[test]
    fn test_fetch_health_facts_missing_account_fails() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.fetch_health_facts("ghost", Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_fetch_health_facts_gathers_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let created = store
            .insert_accounts(&[create_new_account("Acme Inc")])
            .unwrap();
        let id = created[0].tam_account_id.clone();
        let now = Utc::now();

        store
            .conn
            .execute(
                "INSERT INTO action_items (action_id, account_id, status, updated_at)
                 VALUES ('a1', ?1, 'completed', ?2)",
                params![id, (now - Duration::days(2)).to_rfc3339()],
            )
            .unwrap();
        store
            .conn
            .execute(
                "INSERT INTO risks (risk_id, account_id, severity, status, created_at)
                 VALUES ('r1', ?1, 'critical', 'open', ?2)",
                params![id, (now - Duration::days(1)).to_rfc3339()],
            )
            .unwrap();
        store
            .conn
            .execute(
                "INSERT INTO stage_transitions (transition_id, account_id, delta, recorded_at)
                 VALUES ('s1', ?1, 2, ?2)",
                params![id, (now - Duration::days(5)).to_rfc3339()],
            )
            .unwrap();

        let facts = store.fetch_health_facts(&id, now).unwrap();
        assert_eq!(facts.account_type, "prospect");
        assert_eq!(facts.completed_actions.len(), 1);
        assert_eq!(facts.open_risks.len(), 1);
        assert_eq!(facts.stage_movement, 2);
    }

    #[test]
    fn test_end_to_end_import_then_rerun_is_stable() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut first = create_record("Acme Inc");
        first.vertical = Some("Healthcare".to_string());
        let records = vec![first, create_record("acme inc ")];

        // First run: empty snapshot, one deduplicated new record.
        let snapshot = account_lookup(store.list_accounts().unwrap());
        let outcome = preview_changes(&records, &snapshot, CollisionPolicy::default()).unwrap();
        assert_eq!(outcome.summary.new, 1);

        let applied = Reconciler::new()
            .reconcile(&store, &outcome.changes)
            .unwrap();
        assert_eq!(applied.parents_created, 1);

        let accounts = store.list_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].company_name, "Acme Inc");
        assert_eq!(accounts[0].vertical.as_deref(), Some("Healthcare"));

        // Second run with the same input: re-classified, nothing created.
        let snapshot = account_lookup(store.list_accounts().unwrap());
        let outcome = preview_changes(&records, &snapshot, CollisionPolicy::default()).unwrap();
        assert_eq!(outcome.summary.new, 0);

        let applied = Reconciler::new()
            .reconcile(&store, &outcome.changes)
            .unwrap();
        assert_eq!(applied.created, 0);
        assert_eq!(store.count_accounts().unwrap(), 1);
    }

    #[test]
    fn test_load_import_csv() {
        let path = std::env::temp_dir().join("scout_import_test.csv");
        std::fs::write(
            &path,
            "Company_Name,Website,Vertical,Fit_Tier,Estimated_Deal_Value,Company_Summary,First_Name,Last_Name,Email,Job_Title,Is_Hot,Attended_Conference,Attended_Webinar\n\
             Acme Inc,acme.example,Healthcare,A,120000,,Dana,Reyes,dana@acme.example,CTO,true,false,true\n\
             Borealis Labs,,,,,,,,,,,,\n",
        )
        .unwrap();

        let records = load_import_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].company_name, "Acme Inc");
        assert_eq!(records[0].vertical.as_deref(), Some("Healthcare"));
        assert_eq!(records[0].estimated_deal_value, Some(120000.0));
        let contact = records[0].contact.as_ref().unwrap();
        assert_eq!(contact.first_name, "Dana");
        assert!(records[0].flags.is_hot);
        assert!(records[0].flags.attended_webinar);

        assert!(records[1].contact.is_none());
        assert!(records[1].website.is_none());
    }
}
