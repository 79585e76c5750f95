//! Structured store: the single source of truth for companies, criteria,
//! screening rows, meeting notes and the enrichment cache.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    AuditEntry, Company, CompanyProfile, Criterion, EntityNote, HistoricalDeal, MeetingNote,
    Screening, ScreeningOutcome, Stage,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Change notifications pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ScreeningsChanged { company_id: Uuid },
    CompanyChanged { company_id: Uuid },
    MeetingNoteChanged { note_id: Uuid },
}

#[async_trait]
pub trait DealStore: Send + Sync {
    // ---- companies ----
    async fn list_companies(&self) -> StoreResult<Vec<Company>>;
    async fn get_company(&self, id: Uuid) -> StoreResult<Option<Company>>;
    async fn upsert_company(&self, company: Company) -> StoreResult<Company>;
    async fn set_company_stage(
        &self,
        id: Uuid,
        stage: Stage,
        status: Option<String>,
    ) -> StoreResult<Company>;
    /// `(id, name)` of every active company, in storage order.
    async fn company_names(&self) -> StoreResult<Vec<(Uuid, String)>>;

    // ---- historical deals ----
    async fn list_historical_deals(&self) -> StoreResult<Vec<HistoricalDeal>>;
    async fn get_historical_deal(&self, id: Uuid) -> StoreResult<Option<HistoricalDeal>>;
    async fn upsert_historical_deal(&self, deal: HistoricalDeal) -> StoreResult<HistoricalDeal>;
    async fn historical_deal_names(&self) -> StoreResult<Vec<(Uuid, String)>>;

    // ---- criteria ----
    async fn list_criteria(&self) -> StoreResult<Vec<Criterion>>;
    async fn get_criterion(&self, id: Uuid) -> StoreResult<Option<Criterion>>;
    async fn insert_criterion(&self, criterion: Criterion) -> StoreResult<Criterion>;
    async fn update_criterion(&self, criterion: Criterion) -> StoreResult<Criterion>;
    async fn delete_criterion(&self, id: Uuid) -> StoreResult<bool>;

    // ---- screenings ----
    /// Insert a pending row for the pair, or reset the existing one to pending.
    /// At most one row per `(company_id, criteria_id)` ever exists.
    async fn upsert_pending_screening(
        &self,
        company_id: Uuid,
        criteria_id: Uuid,
    ) -> StoreResult<Screening>;
    async fn list_screenings(&self) -> StoreResult<Vec<Screening>>;
    async fn list_screenings_for_company(&self, company_id: Uuid) -> StoreResult<Vec<Screening>>;
    /// Apply a terminal outcome if the row is still pending under `run_id`.
    /// Returns false when the row was reset, deleted or already finished.
    async fn finish_screening(
        &self,
        id: Uuid,
        run_id: Uuid,
        outcome: ScreeningOutcome,
    ) -> StoreResult<bool>;
    async fn delete_screenings_for_company(&self, company_id: Uuid) -> StoreResult<usize>;

    // ---- meeting notes ----
    async fn insert_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote>;
    async fn get_meeting_note(&self, id: Uuid) -> StoreResult<Option<MeetingNote>>;
    async fn list_meeting_notes(&self) -> StoreResult<Vec<MeetingNote>>;
    /// Move a pending note to processing. Returns false if it was not pending.
    async fn claim_meeting_note(&self, id: Uuid) -> StoreResult<bool>;
    async fn save_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote>;

    // ---- entity notes ----
    async fn insert_entity_note(&self, note: EntityNote) -> StoreResult<EntityNote>;
    async fn list_entity_notes(&self, entity_id: Uuid) -> StoreResult<Vec<EntityNote>>;
    async fn list_all_entity_notes(&self) -> StoreResult<Vec<EntityNote>>;

    // ---- audit ----
    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()>;
    async fn list_audit(&self, company_id: Uuid) -> StoreResult<Vec<AuditEntry>>;

    // ---- enrichment cache ----
    async fn find_profiles_by_name(&self, fragment: &str) -> StoreResult<Vec<CompanyProfile>>;
    async fn get_profile(&self, provider_id: &str) -> StoreResult<Option<CompanyProfile>>;
    async fn upsert_profile(&self, profile: CompanyProfile) -> StoreResult<()>;

    /// Push channel for change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}
