//! In-process store backed by `parking_lot` locks.
//!
//! Every operation takes the lock once, so check-then-write sequences such as
//! the screening upsert are atomic. Collections keep insertion order, which the
//! fuzzy matcher relies on for tie-breaking.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{DealStore, StoreEvent, StoreResult};
use crate::error::StoreError;
use crate::types::{
    AuditEntry, Company, CompanyProfile, Criterion, EntityNote, HistoricalDeal, MeetingNote,
    ProcessingStatus, Screening, ScreeningOutcome, Stage,
};

#[derive(Default)]
struct Tables {
    companies: Vec<Company>,
    deals: Vec<HistoricalDeal>,
    criteria: Vec<Criterion>,
    screenings: Vec<Screening>,
    meeting_notes: Vec<MeetingNote>,
    entity_notes: Vec<EntityNote>,
    audit: Vec<AuditEntry>,
    profiles: Vec<CompanyProfile>,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
    events: broadcast::Sender<StoreEvent>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            tables: RwLock::new(Tables::default()),
            events,
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DealStore for InMemoryStore {
    async fn list_companies(&self) -> StoreResult<Vec<Company>> {
        Ok(self.tables.read().companies.clone())
    }

    async fn get_company(&self, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(self.tables.read().companies.iter().find(|c| c.id == id).cloned())
    }

    async fn upsert_company(&self, mut company: Company) -> StoreResult<Company> {
        company.updated_at = Utc::now();
        {
            let mut tables = self.tables.write();
            match tables.companies.iter_mut().find(|c| c.id == company.id) {
                Some(existing) => *existing = company.clone(),
                None => tables.companies.push(company.clone()),
            }
        }
        self.notify(StoreEvent::CompanyChanged { company_id: company.id });
        Ok(company)
    }

    async fn set_company_stage(
        &self,
        id: Uuid,
        stage: Stage,
        status: Option<String>,
    ) -> StoreResult<Company> {
        let updated = {
            let mut tables = self.tables.write();
            let company = tables
                .companies
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| StoreError::not_found("company", id))?;
            company.stage = stage;
            company.status = status;
            company.updated_at = Utc::now();
            company.clone()
        };
        self.notify(StoreEvent::CompanyChanged { company_id: id });
        Ok(updated)
    }

    async fn company_names(&self) -> StoreResult<Vec<(Uuid, String)>> {
        Ok(self
            .tables
            .read()
            .companies
            .iter()
            .filter(|c| c.active)
            .map(|c| (c.id, c.name.clone()))
            .collect())
    }

    async fn list_historical_deals(&self) -> StoreResult<Vec<HistoricalDeal>> {
        Ok(self.tables.read().deals.clone())
    }

    async fn get_historical_deal(&self, id: Uuid) -> StoreResult<Option<HistoricalDeal>> {
        Ok(self.tables.read().deals.iter().find(|d| d.id == id).cloned())
    }

    async fn upsert_historical_deal(&self, deal: HistoricalDeal) -> StoreResult<HistoricalDeal> {
        let mut tables = self.tables.write();
        match tables.deals.iter_mut().find(|d| d.id == deal.id) {
            Some(existing) => *existing = deal.clone(),
            None => tables.deals.push(deal.clone()),
        }
        Ok(deal)
    }

    async fn historical_deal_names(&self) -> StoreResult<Vec<(Uuid, String)>> {
        Ok(self
            .tables
            .read()
            .deals
            .iter()
            .map(|d| (d.id, d.name.clone()))
            .collect())
    }

    async fn list_criteria(&self) -> StoreResult<Vec<Criterion>> {
        Ok(self.tables.read().criteria.clone())
    }

    async fn get_criterion(&self, id: Uuid) -> StoreResult<Option<Criterion>> {
        Ok(self.tables.read().criteria.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_criterion(&self, criterion: Criterion) -> StoreResult<Criterion> {
        let mut tables = self.tables.write();
        if tables.criteria.iter().any(|c| c.id == criterion.id) {
            return Err(StoreError::Conflict(format!("criterion {} already exists", criterion.id)));
        }
        tables.criteria.push(criterion.clone());
        Ok(criterion)
    }

    async fn update_criterion(&self, criterion: Criterion) -> StoreResult<Criterion> {
        let mut tables = self.tables.write();
        let existing = tables
            .criteria
            .iter_mut()
            .find(|c| c.id == criterion.id)
            .ok_or_else(|| StoreError::not_found("criterion", criterion.id))?;
        *existing = criterion.clone();
        Ok(criterion)
    }

    async fn delete_criterion(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        let before = tables.criteria.len();
        tables.criteria.retain(|c| c.id != id);
        Ok(tables.criteria.len() != before)
    }

    async fn upsert_pending_screening(
        &self,
        company_id: Uuid,
        criteria_id: Uuid,
    ) -> StoreResult<Screening> {
        let row = {
            let mut tables = self.tables.write();
            match tables
                .screenings
                .iter_mut()
                .find(|s| s.company_id == company_id && s.criteria_id == criteria_id)
            {
                Some(existing) => {
                    existing.reset_pending();
                    existing.clone()
                }
                None => {
                    let row = Screening::pending(company_id, criteria_id);
                    tables.screenings.push(row.clone());
                    row
                }
            }
        };
        self.notify(StoreEvent::ScreeningsChanged { company_id });
        Ok(row)
    }

    async fn list_screenings(&self) -> StoreResult<Vec<Screening>> {
        Ok(self.tables.read().screenings.clone())
    }

    async fn list_screenings_for_company(&self, company_id: Uuid) -> StoreResult<Vec<Screening>> {
        Ok(self
            .tables
            .read()
            .screenings
            .iter()
            .filter(|s| s.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn finish_screening(
        &self,
        id: Uuid,
        run_id: Uuid,
        outcome: ScreeningOutcome,
    ) -> StoreResult<bool> {
        let company_id = {
            let mut tables = self.tables.write();
            match tables
                .screenings
                .iter_mut()
                .find(|s| s.id == id && s.run_id == run_id && s.is_pending())
            {
                Some(row) => {
                    row.apply(&outcome);
                    row.company_id
                }
                None => return Ok(false),
            }
        };
        self.notify(StoreEvent::ScreeningsChanged { company_id });
        Ok(true)
    }

    async fn delete_screenings_for_company(&self, company_id: Uuid) -> StoreResult<usize> {
        let removed = {
            let mut tables = self.tables.write();
            let before = tables.screenings.len();
            tables.screenings.retain(|s| s.company_id != company_id);
            before - tables.screenings.len()
        };
        if removed > 0 {
            self.notify(StoreEvent::ScreeningsChanged { company_id });
        }
        Ok(removed)
    }

    async fn insert_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote> {
        self.tables.write().meeting_notes.push(note.clone());
        self.notify(StoreEvent::MeetingNoteChanged { note_id: note.id });
        Ok(note)
    }

    async fn get_meeting_note(&self, id: Uuid) -> StoreResult<Option<MeetingNote>> {
        Ok(self.tables.read().meeting_notes.iter().find(|n| n.id == id).cloned())
    }

    async fn list_meeting_notes(&self) -> StoreResult<Vec<MeetingNote>> {
        Ok(self.tables.read().meeting_notes.clone())
    }

    async fn claim_meeting_note(&self, id: Uuid) -> StoreResult<bool> {
        let claimed = {
            let mut tables = self.tables.write();
            let note = tables
                .meeting_notes
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or_else(|| StoreError::not_found("meeting note", id))?;
            if note.processing_status == ProcessingStatus::Pending {
                note.processing_status = ProcessingStatus::Processing;
                true
            } else {
                false
            }
        };
        if claimed {
            self.notify(StoreEvent::MeetingNoteChanged { note_id: id });
        }
        Ok(claimed)
    }

    async fn save_meeting_note(&self, note: MeetingNote) -> StoreResult<MeetingNote> {
        {
            let mut tables = self.tables.write();
            let existing = tables
                .meeting_notes
                .iter_mut()
                .find(|n| n.id == note.id)
                .ok_or_else(|| StoreError::not_found("meeting note", note.id))?;
            *existing = note.clone();
        }
        self.notify(StoreEvent::MeetingNoteChanged { note_id: note.id });
        Ok(note)
    }

    async fn insert_entity_note(&self, note: EntityNote) -> StoreResult<EntityNote> {
        self.tables.write().entity_notes.push(note.clone());
        Ok(note)
    }

    async fn list_entity_notes(&self, entity_id: Uuid) -> StoreResult<Vec<EntityNote>> {
        Ok(self
            .tables
            .read()
            .entity_notes
            .iter()
            .filter(|n| n.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn list_all_entity_notes(&self) -> StoreResult<Vec<EntityNote>> {
        Ok(self.tables.read().entity_notes.clone())
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.tables.write().audit.push(entry);
        Ok(())
    }

    async fn list_audit(&self, company_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .tables
            .read()
            .audit
            .iter()
            .filter(|a| a.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn find_profiles_by_name(&self, fragment: &str) -> StoreResult<Vec<CompanyProfile>> {
        let needle = fragment.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .read()
            .profiles
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn get_profile(&self, provider_id: &str) -> StoreResult<Option<CompanyProfile>> {
        Ok(self
            .tables
            .read()
            .profiles
            .iter()
            .find(|p| p.provider_id == provider_id)
            .cloned())
    }

    async fn upsert_profile(&self, profile: CompanyProfile) -> StoreResult<()> {
        let mut tables = self.tables.write();
        match tables.profiles.iter_mut().find(|p| p.provider_id == profile.provider_id) {
            Some(existing) => *existing = profile,
            None => tables.profiles.push(profile),
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
