//! Postgres store (feature `postgres`).
//!
//! Pair uniqueness of screening rows is a table constraint, so concurrent
//! launches for the same pair converge on one row via `ON CONFLICT`. Change
//! notifications come from a trigger over `LISTEN dealflow_events`.

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{DealStore, StoreEvent, StoreResult};
use crate::error::StoreError;
use crate::types::{
    AuditEntry, Company, CompanyProfile, Criterion, EntityKind, EntityNote, HistoricalDeal,
    LinkedEntity, MeetingNote, ProcessingStatus, Screening, ScreeningOutcome, ScreeningResult,
    ScreeningState, Stage, YearlyFinancials,
};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");
const EVENTS_CHANNEL: &str = "dealflow_events";

pub struct PostgresStore {
    pool: PgPool,
    events: broadcast::Sender<StoreEvent>,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let (events, _) = broadcast::channel(256);
        let store = Self { pool, events };
        store.spawn_listener().await?;
        tracing::info!(max_connections, "PostgresStore connected");
        Ok(store)
    }

    /// Create tables, constraints and notification triggers if missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn spawn_listener(&self) -> StoreResult<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(EVENTS_CHANNEL).await?;
        let events = self.events.clone();

        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if let Some(event) = parse_notification(notification.payload()) {
                            let _ = events.send(event);
                        }
                    }
                    Err(e) => {
                        // PgListener reconnects on the next recv; keep going.
                        tracing::warn!(error = %e, "PostgresStore: notification stream error");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Ok(())
    }
}

fn parse_notification(payload: &str) -> Option<StoreEvent> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let id = value["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
    let company_id = value["company_id"].as_str().and_then(|s| Uuid::parse_str(s).ok());
    match value["table"].as_str()? {
        "screenings" => Some(StoreEvent::ScreeningsChanged { company_id: company_id? }),
        "companies" => Some(StoreEvent::CompanyChanged { company_id: id }),
        "meeting_notes" => Some(StoreEvent::MeetingNoteChanged { note_id: id }),
        _ => None,
    }
}

fn invalid<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::InvalidRow(e.to_string())
}

fn company_from_row(row: &PgRow) -> StoreResult<Company> {
    let stage: String = row.try_get("stage")?;
    let Json(financials): Json<Vec<YearlyFinancials>> = row.try_get("financials")?;
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        sector: row.try_get("sector")?,
        segment: row.try_get("segment")?,
        country: row.try_get("country")?,
        financials,
        enterprise_value: row.try_get("enterprise_value")?,
        focus: row.try_get("focus")?,
        stage: stage.parse::<Stage>().map_err(invalid)?,
        status: row.try_get("status")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn deal_from_row(row: &PgRow) -> StoreResult<HistoricalDeal> {
    Ok(HistoricalDeal {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        target: row.try_get("target")?,
        acquirer: row.try_get("acquirer")?,
        sector: row.try_get("sector")?,
        announced_year: row.try_get("announced_year")?,
        enterprise_value: row.try_get("enterprise_value")?,
        revenue: row.try_get("revenue")?,
        ebitda: row.try_get("ebitda")?,
        description: row.try_get("description")?,
    })
}

fn criterion_from_row(row: &PgRow) -> StoreResult<Criterion> {
    Ok(Criterion {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        prompt: row.try_get("prompt")?,
    })
}

fn screening_from_row(row: &PgRow) -> StoreResult<Screening> {
    let state: String = row.try_get("state")?;
    let result: Option<String> = row.try_get("result")?;
    let result = match result {
        Some(r) => Some(r.parse::<ScreeningResult>().map_err(invalid)?),
        None => None,
    };
    Screening::from_parts(
        row.try_get("id")?,
        row.try_get("company_id")?,
        row.try_get("criteria_id")?,
        state.parse::<ScreeningState>().map_err(invalid)?,
        result,
        row.try_get("remarks")?,
        row.try_get("run_id")?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    )
    .map_err(StoreError::InvalidRow)
}

fn meeting_note_from_row(row: &PgRow) -> StoreResult<MeetingNote> {
    let status: String = row.try_get("processing_status")?;
    let structured: Option<Json<serde_json::Value>> = row.try_get("structured_json")?;
    let Json(matched): Json<Vec<LinkedEntity>> = row.try_get("matched_companies")?;
    Ok(MeetingNote {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        raw_text: row.try_get("raw_text")?,
        structured_json: structured.map(|Json(v)| v),
        tags: row.try_get("tags")?,
        matched_companies: matched,
        processing_status: status.parse::<ProcessingStatus>().map_err(invalid)?,
        created_at: row.try_get("created_at")?,
    })
}

fn entity_note_from_row(row: &PgRow) -> StoreResult<EntityNote> {
    let kind: String = row.try_get("entity_kind")?;
    Ok(EntityNote {
        id: row.try_get("id")?,
        entity_id: row.try_get("entity_id")?,
        entity_kind: kind.parse::<EntityKind>().map_err(invalid)?,
        meeting_note_id: row.try_get("meeting_note_id")?,
        excerpt: row.try_get("excerpt")?,
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> StoreResult<CompanyProfile> {
    let employees: Option<i64> = row.try_get("employees")?;
    let Json(raw): Json<serde_json::Value> = row.try_get("raw")?;
    Ok(CompanyProfile {
        provider_id: row.try_get("provider_id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        country: row.try_get("country")?,
        sector: row.try_get("sector")?,
        employees: employees.map(|e| e.max(0) as u64),
        revenue: row.try_get("revenue")?,
        description: row.try_get("description")?,
        raw,
        fetched_at: row.try_get("fetched_at")?,
    })
}

#[async_trait]
impl DealStore for PostgresStore {
    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        let rows = sqlx::query("SELECT * FROM companies ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn get_company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        let row = sqlx::query("SELECT * FROM companies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(company_from_row).transpose()
    }

    async fn upsert_company(&self, company: Company) -> StoreResult<Company> {
        let row = sqlx::query(
            r#"
            INSERT INTO companies (id, name, sector, segment, country, financials,
                                   enterprise_value, focus, stage, status, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, sector = EXCLUDED.sector, segment = EXCLUDED.segment,
                country = EXCLUDED.country, financials = EXCLUDED.financials,
                enterprise_value = EXCLUDED.enterprise_value, focus = EXCLUDED.focus,
                stage = EXCLUDED.stage, status = EXCLUDED.status, active = EXCLUDED.active,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(&company.sector)
        .bind(&company.segment)
        .bind(&company.country)
        .bind(Json(&company.financials))
        .bind(company.enterprise_value)
        .bind(&company.focus)
        .bind(company.stage.as_str())
        .bind(&company.status)
        .bind(company.active)
        .bind(company.created_at)
        .fetch_one(&self.pool)
        .await?;
        company_from_row(&row)
    }

    async fn set_company_stage(
        &self,
        id: Uuid,
        stage: Stage,
        status: Option<String>,
    ) -> StoreResult<Company> {
        let row = sqlx::query(
            "UPDATE companies SET stage = $2, status = $3, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(stage.as_str())
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("company", id))?;
        company_from_row(&row)
    }

    async fn company_names(&self) -> StoreResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query("SELECT id, name FROM companies WHERE active ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("id")?, r.try_get("name")?)))
            .collect()
    }

    async fn list_historical_deals(&self) -> StoreResult<Vec<HistoricalDeal>> {
        let rows = sqlx::query("SELECT * FROM historical_deals ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(deal_from_row).collect()
    }

    async fn get_historical_deal(&self, id: Uuid) -> StoreResult<Option<HistoricalDeal>> {
        let row = sqlx::query("SELECT * FROM historical_deals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deal_from_row).transpose()
    }

    async fn upsert_historical_deal(&self, deal: HistoricalDeal) -> StoreResult<HistoricalDeal> {
        let row = sqlx::query(
            r#"
            INSERT INTO historical_deals (id, name, target, acquirer, sector, announced_year,
                                          enterprise_value, revenue, ebitda, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name, target = EXCLUDED.target, acquirer = EXCLUDED.acquirer,
                sector = EXCLUDED.sector, announced_year = EXCLUDED.announced_year,
                enterprise_value = EXCLUDED.enterprise_value, revenue = EXCLUDED.revenue,
                ebitda = EXCLUDED.ebitda, description = EXCLUDED.description
            RETURNING *
            "#,
        )
        .bind(deal.id)
        .bind(&deal.name)
        .bind(&deal.target)
        .bind(&deal.acquirer)
        .bind(&deal.sector)
        .bind(deal.announced_year)
        .bind(deal.enterprise_value)
        .bind(deal.revenue)
        .bind(deal.ebitda)
        .bind(&deal.description)
        .fetch_one(&self.pool)
        .await?;
        deal_from_row(&row)
    }

    async fn historical_deal_names(&self) -> StoreResult<Vec<(Uuid, String)>> {
        let rows = sqlx::query("SELECT id, name FROM historical_deals ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("id")?, r.try_get("name")?)))
            .collect()
    }

    async fn list_criteria(&self) -> StoreResult<Vec<Criterion>> {
        let rows = sqlx::query("SELECT * FROM criteria ORDER BY name, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(criterion_from_row).collect()
    }

    async fn get_criterion(&self, id: Uuid) -> StoreResult<Option<Criterion>> {
        let row = sqlx::query("SELECT * FROM criteria WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(criterion_from_row).transpose()
    }

    async fn insert_criterion(&self, criterion: Criterion) -> StoreResult<Criterion> {
        let row = sqlx::query("INSERT INTO criteria (id, name, prompt) VALUES ($1, $2, $3) RETURNING *")
            .bind(criterion.id)
            .bind(&criterion.name)
            .bind(&criterion.prompt)
            .fetch_one(&self.pool)
            .await?;
        criterion_from_row(&row)
    }

    async fn update_criterion(&self, criterion: Criterion) -> StoreResult<Criterion> {
        let row = sqlx::query("UPDATE criteria SET name = $2, prompt = $3 WHERE id = $1 RETURNING *")
            .bind(criterion.id)
            .bind(&criterion.name)
            .bind(&criterion.prompt)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("criterion", criterion.id))?;
        criterion_from_row(&row)
    }

    async fn delete_criterion(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM criteria WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_pending_screening(
        &self,
        company_id: Uuid,
        criteria_id: Uuid,
    ) -> StoreResult<Screening> {
        let row = sqlx::query(
            r#"
            INSERT INTO screenings (id, company_id, criteria_id, state, result, remarks, run_id,
                                    created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', NULL, NULL, $4, now(), now())
            ON CONFLICT ON CONSTRAINT screenings_pair_unique DO UPDATE SET
                state = 'pending', result = NULL, remarks = NULL,
                run_id = EXCLUDED.run_id, updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(criteria_id)
        .bind(Uuid::new_v4())
        .fetch_one(&self.pool)
        .await?;
        screening_from_row(&row)
    }

    async fn list_screenings(&self) -> StoreResult<Vec<Screening>> {
        let rows = sqlx::query("SELECT * FROM screenings ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(screening_from_row).collect()
    }

    async fn list_screenings_for_company(&self, company_id: Uuid) -> StoreResult<Vec<Screening>> {
        let rows = sqlx::query("SELECT * FROM screenings WHERE company_id = $1 ORDER BY created_at, id")
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(screening_from_row).collect()
    }

    async fn finish_screening(
        &self,
        id: Uuid,
        run_id: Uuid,
        outcome: ScreeningOutcome,
    ) -> StoreResult<bool> {
        let (state, result, remarks) = match outcome {
            ScreeningOutcome::Completed { result, remarks } => {
                (ScreeningState::Completed, result, remarks)
            }
            ScreeningOutcome::Failed { remarks } => {
                (ScreeningState::Failed, ScreeningResult::Error, Some(remarks))
            }
        };
        let updated = sqlx::query(
            r#"
            UPDATE screenings SET state = $3, result = $4, remarks = $5, updated_at = now()
            WHERE id = $1 AND run_id = $2 AND state = 'pending'
            "#,
        )
        .bind(id)
        .bind(run_id)
        .bind(state.as_str())
        .bind(result.as_str())
        .bind(remarks)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn delete_screenings_for_company(&self, company_id: Uuid) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM screenings WHERE company_id = $1")
            .bind(company_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote> {
        let row = sqlx::query(
            r#"
            INSERT INTO meeting_notes (id, file_name, raw_text, structured_json, tags,
                                       matched_companies, processing_status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(note.id)
        .bind(&note.file_name)
        .bind(&note.raw_text)
        .bind(note.structured_json.as_ref().map(Json))
        .bind(&note.tags)
        .bind(Json(&note.matched_companies))
        .bind(note.processing_status.as_str())
        .bind(note.created_at)
        .fetch_one(&self.pool)
        .await?;
        meeting_note_from_row(&row)
    }

    async fn get_meeting_note(&self, id: Uuid) -> StoreResult<Option<MeetingNote>> {
        let row = sqlx::query("SELECT * FROM meeting_notes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(meeting_note_from_row).transpose()
    }

    async fn list_meeting_notes(&self) -> StoreResult<Vec<MeetingNote>> {
        let rows = sqlx::query("SELECT * FROM meeting_notes ORDER BY created_at DESC, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(meeting_note_from_row).collect()
    }

    async fn claim_meeting_note(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE meeting_notes SET processing_status = 'processing' WHERE id = $1 AND processing_status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get_meeting_note(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found("meeting note", id)),
        }
    }

    async fn save_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote> {
        let row = sqlx::query(
            r#"
            UPDATE meeting_notes SET structured_json = $2, tags = $3, matched_companies = $4,
                                     processing_status = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(note.id)
        .bind(note.structured_json.as_ref().map(Json))
        .bind(&note.tags)
        .bind(Json(&note.matched_companies))
        .bind(note.processing_status.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("meeting note", note.id))?;
        meeting_note_from_row(&row)
    }

    async fn insert_entity_note(&self, note: EntityNote) -> StoreResult<EntityNote> {
        let row = sqlx::query(
            r#"
            INSERT INTO entity_notes (id, entity_id, entity_kind, meeting_note_id, excerpt, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(note.id)
        .bind(note.entity_id)
        .bind(note.entity_kind.as_str())
        .bind(note.meeting_note_id)
        .bind(&note.excerpt)
        .bind(note.created_at)
        .fetch_one(&self.pool)
        .await?;
        entity_note_from_row(&row)
    }

    async fn list_entity_notes(&self, entity_id: Uuid) -> StoreResult<Vec<EntityNote>> {
        let rows = sqlx::query("SELECT * FROM entity_notes WHERE entity_id = $1 ORDER BY created_at")
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_note_from_row).collect()
    }

    async fn list_all_entity_notes(&self) -> StoreResult<Vec<EntityNote>> {
        let rows = sqlx::query("SELECT * FROM entity_notes ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_note_from_row).collect()
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_log (id, company_id, action, detail, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(entry.company_id)
        .bind(&entry.action)
        .bind(Json(&entry.detail))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit(&self, company_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE company_id = $1 ORDER BY created_at")
            .bind(company_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let Json(detail): Json<serde_json::Value> = row.try_get("detail")?;
                Ok(AuditEntry {
                    id: row.try_get("id")?,
                    company_id: row.try_get("company_id")?,
                    action: row.try_get("action")?,
                    detail,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn find_profiles_by_name(&self, fragment: &str) -> StoreResult<Vec<CompanyProfile>> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM company_profiles WHERE name ILIKE $1 ORDER BY name LIMIT 50")
            .bind(format!("%{}%", fragment))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn get_profile(&self, provider_id: &str) -> StoreResult<Option<CompanyProfile>> {
        let row = sqlx::query("SELECT * FROM company_profiles WHERE provider_id = $1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn upsert_profile(&self, profile: CompanyProfile) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO company_profiles (provider_id, name, domain, country, sector, employees,
                                          revenue, description, raw, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_id) DO UPDATE SET
                name = EXCLUDED.name, domain = EXCLUDED.domain, country = EXCLUDED.country,
                sector = EXCLUDED.sector, employees = EXCLUDED.employees,
                revenue = EXCLUDED.revenue, description = EXCLUDED.description,
                raw = EXCLUDED.raw, fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(&profile.provider_id)
        .bind(&profile.name)
        .bind(&profile.domain)
        .bind(&profile.country)
        .bind(&profile.sector)
        .bind(profile.employees.map(|e| e.min(i64::MAX as u64) as i64))
        .bind(profile.revenue)
        .bind(&profile.description)
        .bind(Json(&profile.raw))
        .bind(profile.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
