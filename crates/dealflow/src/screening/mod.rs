//! Screening orchestrator: queue one pending row per (company, criterion)
//! pair, classify each in the background under a concurrency cap, and promote
//! companies once a human decides.

pub mod classifier;
pub mod summary;
pub mod watcher;

pub use summary::{derive_progress, derive_summary, CompanyScreeningSummary, ScreeningProgress};
pub use watcher::ProgressWatcher;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ScreeningConfig;
use crate::error::{ScreeningError, StoreError};
use crate::llm::{GenerationConfig, LLMProvider};
use crate::store::DealStore;
use crate::types::{AuditEntry, Company, Criterion, Screening, ScreeningOutcome, Stage};

pub const STATUS_PASSED: &str = "screening_passed";
pub const STATUS_OVERRIDE: &str = "screening_override";
pub const STATUS_NO_SCREENING: &str = "no_screening";

#[derive(Debug, Clone, Serialize)]
pub struct LaunchFailure {
    pub company_id: Uuid,
    pub criteria_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub queued: Vec<Screening>,
    pub failures: Vec<LaunchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub company: Company,
    /// Summary as it stood just before the rows were removed.
    pub summary: CompanyScreeningSummary,
    pub status: Option<String>,
    pub deleted_rows: usize,
}

/// What a background dispatch needs, cloned into each task.
#[derive(Clone)]
struct Dispatcher {
    store: Arc<dyn DealStore>,
    llm: Option<Arc<dyn LLMProvider>>,
    permits: Arc<Semaphore>,
    generation: GenerationConfig,
    config: ScreeningConfig,
}

impl Dispatcher {
    async fn run(self, row: Screening, criterion: Criterion) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let outcome = match (&self.llm, self.store.get_company(row.company_id).await) {
            (None, _) => ScreeningOutcome::Failed {
                remarks: "no LLM provider configured".to_string(),
            },
            (_, Err(e)) => ScreeningOutcome::Failed {
                remarks: format!("could not load company: {}", e),
            },
            (_, Ok(None)) => ScreeningOutcome::Failed {
                remarks: "company no longer exists".to_string(),
            },
            (Some(llm), Ok(Some(company))) => {
                classifier::classify(
                    llm.as_ref(),
                    &company,
                    &criterion,
                    &self.generation,
                    self.config.classification_timeout(),
                )
                .await
            }
        };

        match self.store.finish_screening(row.id, row.run_id(), outcome.clone()).await {
            Ok(true) => tracing::info!(
                screening = %row.id,
                company = %row.company_id,
                criterion = %criterion.name,
                outcome = ?outcome,
                "Screening finished"
            ),
            Ok(false) => tracing::debug!(screening = %row.id, "Screening was reset or removed, dropping stale result"),
            // The row stays pending; re-launching the pair is the recovery path.
            Err(e) => tracing::error!(screening = %row.id, error = %e, "Failed to store screening result"),
        }
    }
}

pub struct ScreeningOrchestrator {
    dispatcher: Dispatcher,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl ScreeningOrchestrator {
    pub fn new(
        store: Arc<dyn DealStore>,
        llm: Option<Arc<dyn LLMProvider>>,
        config: ScreeningConfig,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            dispatcher: Dispatcher {
                store,
                llm,
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                generation,
                config,
            },
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn store(&self) -> &dyn DealStore {
        self.dispatcher.store.as_ref()
    }

    /// Queue every (company, criterion) pair as pending, then dispatch the
    /// queued rows in the background. Returns once queuing is done.
    pub async fn launch_screening(&self, company_ids: &[Uuid], criteria: &[Criterion]) -> LaunchReport {
        let mut failures = Vec::new();

        let mut known = Vec::with_capacity(company_ids.len());
        for &company_id in company_ids {
            match self.store().get_company(company_id).await {
                Ok(Some(_)) => known.push(company_id),
                Ok(None) => failures.extend(criteria.iter().map(|c| LaunchFailure {
                    company_id,
                    criteria_id: c.id,
                    error: StoreError::not_found("company", company_id).to_string(),
                })),
                Err(e) => failures.extend(criteria.iter().map(|c| LaunchFailure {
                    company_id,
                    criteria_id: c.id,
                    error: e.to_string(),
                })),
            }
        }

        let pairs: Vec<(Uuid, &Criterion)> = known
            .iter()
            .flat_map(|company_id| criteria.iter().map(move |c| (*company_id, c)))
            .collect();
        let upserts = join_all(
            pairs
                .iter()
                .map(|(company_id, criterion)| self.store().upsert_pending_screening(*company_id, criterion.id)),
        )
        .await;

        let mut queued = Vec::with_capacity(pairs.len());
        let mut handles = Vec::with_capacity(pairs.len());
        for ((company_id, criterion), result) in pairs.into_iter().zip(upserts) {
            match result {
                Ok(row) => {
                    let task = self.dispatcher.clone().run(row.clone(), criterion.clone());
                    handles.push(tokio::spawn(task));
                    queued.push(row);
                }
                Err(e) => failures.push(LaunchFailure {
                    company_id,
                    criteria_id: criterion.id,
                    error: e.to_string(),
                }),
            }
        }

        {
            let mut in_flight = self.in_flight.lock();
            in_flight.retain(|h| !h.is_finished());
            in_flight.extend(handles);
        }

        tracing::info!(
            companies = company_ids.len(),
            criteria = criteria.len(),
            queued = queued.len(),
            failed = failures.len(),
            "Screening launched"
        );
        LaunchReport { queued, failures }
    }

    /// Wait for every dispatch launched so far.
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.in_flight.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Screening dispatch task panicked");
            }
        }
    }

    pub async fn summary(&self, company_id: Uuid) -> Result<CompanyScreeningSummary, ScreeningError> {
        let rows = self.store().list_screenings_for_company(company_id).await?;
        Ok(derive_summary(company_id, &rows))
    }

    pub async fn progress(&self) -> Result<ScreeningProgress, ScreeningError> {
        let rows = self.store().list_screenings().await?;
        Ok(derive_progress(&rows))
    }

    /// Promote a company to L1 regardless of outcome, absorbing its screening
    /// rows into the status field. Safe to call repeatedly.
    pub async fn move_to_l1(&self, company_id: Uuid) -> Result<PromotionOutcome, ScreeningError> {
        let company = self
            .store()
            .get_company(company_id)
            .await?
            .ok_or_else(|| StoreError::not_found("company", company_id))?;
        let summary = self.summary(company_id).await?;

        let status = if summary.total == 0 {
            // Nothing to absorb: keep what an earlier promotion recorded.
            if company.stage >= Stage::L1 && company.status.is_some() {
                company.status.clone()
            } else {
                Some(STATUS_NO_SCREENING.to_string())
            }
        } else if summary.all_passed {
            Some(STATUS_PASSED.to_string())
        } else {
            Some(STATUS_OVERRIDE.to_string())
        };
        let stage = company.stage.max(Stage::L1);

        let updated = self.store().set_company_stage(company_id, stage, status.clone()).await?;
        let deleted_rows = self.store().delete_screenings_for_company(company_id).await?;
        self.store()
            .append_audit(AuditEntry::new(
                company_id,
                "move_to_l1",
                serde_json::json!({
                    "from_stage": company.stage,
                    "to_stage": stage,
                    "status": status,
                    "summary": summary,
                    "deleted_rows": deleted_rows,
                }),
            ))
            .await?;

        tracing::info!(
            company = %company_id,
            status = status.as_deref().unwrap_or("-"),
            deleted_rows,
            "Company moved to L1"
        );
        Ok(PromotionOutcome {
            company: updated,
            summary,
            status,
            deleted_rows,
        })
    }

    // ---- criteria ----

    pub async fn list_criteria(&self) -> Result<Vec<Criterion>, ScreeningError> {
        Ok(self.store().list_criteria().await?)
    }

    pub async fn create_criterion(&self, name: &str, prompt: &str) -> Result<Criterion, ScreeningError> {
        let (name, prompt) = validate_criterion(name, prompt)?;
        Ok(self.store().insert_criterion(Criterion::new(name, prompt)).await?)
    }

    /// Existing screening rows keep their results; only future launches see the edit.
    pub async fn update_criterion(&self, id: Uuid, name: &str, prompt: &str) -> Result<Criterion, ScreeningError> {
        let (name, prompt) = validate_criterion(name, prompt)?;
        Ok(self
            .store()
            .update_criterion(Criterion {
                id,
                name: name.to_string(),
                prompt: prompt.to_string(),
            })
            .await?)
    }

    pub async fn delete_criterion(&self, id: Uuid) -> Result<bool, ScreeningError> {
        Ok(self.store().delete_criterion(id).await?)
    }
}

fn validate_criterion<'a>(name: &'a str, prompt: &'a str) -> Result<(&'a str, &'a str), ScreeningError> {
    let name = name.trim();
    let prompt = prompt.trim();
    if name.is_empty() {
        return Err(ScreeningError::InvalidCriterion("name must not be empty".into()));
    }
    if prompt.is_empty() {
        return Err(ScreeningError::InvalidCriterion("prompt must not be empty".into()));
    }
    Ok((name, prompt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testing::ScriptedProvider;
    use crate::types::{ScreeningResult, ScreeningState};
    use std::time::Duration;

    fn orchestrator(store: Arc<InMemoryStore>, llm: Option<Arc<dyn LLMProvider>>, max_concurrent: usize) -> ScreeningOrchestrator {
        let config = ScreeningConfig {
            max_concurrent,
            classification_timeout_secs: 5,
            poll_interval_secs: 1,
        };
        ScreeningOrchestrator::new(store, llm, config, GenerationConfig::default())
    }

    #[tokio::test]
    async fn test_criterion_validation() {
        let orch = orchestrator(Arc::new(InMemoryStore::new()), None, 1);
        assert!(matches!(
            orch.create_criterion("  ", "prompt").await,
            Err(ScreeningError::InvalidCriterion(_))
        ));
        let c = orch.create_criterion(" Size ", " Revenue > 10M ").await.unwrap();
        assert_eq!(c.name, "Size");
        assert_eq!(orch.list_criteria().await.unwrap().len(), 1);
        assert!(orch.delete_criterion(c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_company_reported_not_queued() {
        let store = Arc::new(InMemoryStore::new());
        let orch = orchestrator(store.clone(), None, 1);
        let report = orch
            .launch_screening(&[Uuid::new_v4()], &[Criterion::new("a", "b"), Criterion::new("c", "d")])
            .await;
        assert!(report.queued.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(store.list_screenings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_without_llm_rows_fail() {
        let store = Arc::new(InMemoryStore::new());
        let company = store.upsert_company(Company::new("Acme")).await.unwrap();
        let orch = orchestrator(store.clone(), None, 2);
        orch.launch_screening(&[company.id], &[Criterion::new("a", "b")]).await;
        orch.wait_idle().await;

        let rows = store.list_screenings().await.unwrap();
        assert_eq!(rows[0].state(), ScreeningState::Failed);
        assert_eq!(rows[0].result(), Some(ScreeningResult::Error));
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_cap() {
        let llm = Arc::new(
            ScriptedProvider::responder(|_| {
                Ok(crate::llm::ChatResponse::Content(r#"{"result":"pass"}"#.into()))
            })
            .with_delay(Duration::from_millis(30)),
        );

        let store = Arc::new(InMemoryStore::new());
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(store.upsert_company(Company::new(format!("Co {}", i))).await.unwrap().id);
        }
        let criteria: Vec<Criterion> = (0..3).map(|i| Criterion::new(format!("c{}", i), "p")).collect();

        let orch = orchestrator(store.clone(), Some(llm.clone()), 2);
        let started = std::time::Instant::now();
        let report = orch.launch_screening(&ids, &criteria).await;
        assert_eq!(report.queued.len(), 12);
        orch.wait_idle().await;

        // 12 calls of 30ms through 2 permits cannot finish in under 6 rounds.
        assert!(started.elapsed() >= Duration::from_millis(170));
        assert_eq!(llm.calls().len(), 12);
        let progress = orch.progress().await.unwrap();
        assert_eq!(progress.passed.len(), 4);
    }

    #[tokio::test]
    async fn test_move_to_l1_status() {
        let store = Arc::new(InMemoryStore::new());
        let company = store.upsert_company(Company::new("Acme")).await.unwrap();
        let llm: Arc<dyn LLMProvider> = Arc::new(ScriptedProvider::responder(|_| {
            Ok(crate::llm::ChatResponse::Content(r#"{"result":"pass","remarks":"ok"}"#.into()))
        }));
        let orch = orchestrator(store.clone(), Some(llm), 2);
        orch.launch_screening(&[company.id], &[Criterion::new("a", "b")]).await;
        orch.wait_idle().await;

        let first = orch.move_to_l1(company.id).await.unwrap();
        assert_eq!(first.status.as_deref(), Some(STATUS_PASSED));
        assert_eq!(first.deleted_rows, 1);
        assert_eq!(first.company.stage, Stage::L1);

        let second = orch.move_to_l1(company.id).await.unwrap();
        assert_eq!(second.summary.total, 0);
        assert_eq!(second.status.as_deref(), Some(STATUS_PASSED));
        assert_eq!(store.list_audit(company.id).await.unwrap().len(), 2);
    }
}
