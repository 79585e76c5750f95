//! End-to-end screening: launch, dispatch, derived views and promotion.

use anyhow::anyhow;
use std::sync::Arc;
use std::time::Duration;

use dealflow::config::ScreeningConfig;
use dealflow::screening::{STATUS_NO_SCREENING, STATUS_OVERRIDE, STATUS_PASSED};
use dealflow::testing::ScriptedProvider;
use dealflow::types::ScreeningOutcome;
use dealflow::{
    ChatMessage, ChatResponse, Company, Criterion, DealStore, GenerationConfig, InMemoryStore,
    LLMProvider, ScreeningOrchestrator, ScreeningResult, ScreeningState, Stage,
};

/// Answers by criterion name, found in the classification request.
fn answer_by_criterion(messages: &[ChatMessage]) -> anyhow::Result<ChatResponse> {
    let request = messages
        .iter()
        .rev()
        .find_map(|m| m.content.clone())
        .unwrap_or_default();
    let verdict = if request.contains("Criterion \"margin\"") {
        "inconclusive"
    } else if request.contains("Criterion \"leverage\"") {
        return Err(anyhow!("connection reset by peer"));
    } else if request.contains("Criterion \"geography\"") {
        "fail"
    } else {
        "pass"
    };
    Ok(ChatResponse::Content(format!(
        r#"{{"result": "{}", "remarks": "checked"}}"#,
        verdict
    )))
}

fn orchestrator(store: Arc<InMemoryStore>, llm: Arc<dyn LLMProvider>) -> ScreeningOrchestrator {
    ScreeningOrchestrator::new(
        store,
        Some(llm),
        ScreeningConfig {
            max_concurrent: 3,
            ..Default::default()
        },
        GenerationConfig::default(),
    )
}

async fn seed_company(store: &InMemoryStore, name: &str) -> Company {
    store.upsert_company(Company::new(name)).await.unwrap()
}

async fn seed_criteria(orchestrator: &ScreeningOrchestrator, names: &[&str]) -> Vec<Criterion> {
    let mut criteria = Vec::new();
    for name in names {
        criteria.push(
            orchestrator
                .create_criterion(name, &format!("Evaluate {}", name))
                .await
                .unwrap(),
        );
    }
    criteria
}

#[tokio::test]
async fn test_launch_and_complete_scenario() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedProvider::responder(answer_by_criterion));
    let orchestrator = orchestrator(store.clone(), llm.clone());
    let company = seed_company(&store, "Nordic Freight AB").await;
    let criteria = seed_criteria(&orchestrator, &["size", "growth", "margin", "sector", "leverage"]).await;
    let queued_later = orchestrator.create_criterion("management", "Evaluate management").await.unwrap();

    let report = orchestrator.launch_screening(&[company.id], &criteria).await;
    assert_eq!(report.queued.len(), 5);
    assert!(report.failures.is_empty());
    orchestrator.wait_idle().await;

    // A sixth criterion queued but not yet dispatched.
    store.upsert_pending_screening(company.id, queued_later.id).await.unwrap();

    let summary = orchestrator.summary(company.id).await.unwrap();
    assert_eq!(summary.total, 6);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.passed, 3);
    assert_eq!(summary.inconclusive, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.failed, 0);
    assert!(!summary.all_passed);

    let rows = store.list_screenings_for_company(company.id).await.unwrap();
    let transport_failed = rows
        .iter()
        .find(|r| r.state() == ScreeningState::Failed)
        .unwrap();
    assert_eq!(transport_failed.result(), Some(ScreeningResult::Error));
    assert!(transport_failed.remarks().unwrap().contains("connection reset"));

    let progress = orchestrator.progress().await.unwrap();
    assert_eq!(progress.in_progress.len(), 1);
    assert!(progress.passed.is_empty());
}

#[tokio::test]
async fn test_business_fail_is_completed_not_errored() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Arc::new(ScriptedProvider::responder(answer_by_criterion)));
    let company = seed_company(&store, "Baltic Tools").await;
    let criteria = seed_criteria(&orchestrator, &["size", "geography"]).await;

    orchestrator.launch_screening(&[company.id], &criteria).await;
    orchestrator.wait_idle().await;

    let summary = orchestrator.summary(company.id).await.unwrap();
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errored, 0);
    let progress = orchestrator.progress().await.unwrap();
    assert_eq!(progress.not_passed.len(), 1);
}

#[tokio::test]
async fn test_rerun_resets_rows_in_place() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(
        ScriptedProvider::responder(|_| Ok(ChatResponse::Content(r#"{"result":"pass"}"#.into())))
            .with_delay(Duration::from_millis(150)),
    );
    let orchestrator = orchestrator(store.clone(), llm);
    let a = seed_company(&store, "Alpha").await;
    let b = seed_company(&store, "Beta").await;
    let criteria = seed_criteria(&orchestrator, &["size", "growth", "sector"]).await;

    orchestrator.launch_screening(&[a.id, b.id], &criteria).await;
    orchestrator.wait_idle().await;
    let first = store.list_screenings().await.unwrap();
    assert_eq!(first.len(), 6);
    assert!(first.iter().all(|r| r.state() == ScreeningState::Completed));

    orchestrator.launch_screening(&[a.id, b.id], &criteria).await;
    let reset = store.list_screenings().await.unwrap();
    assert_eq!(reset.len(), 6);
    for row in &reset {
        assert_eq!(row.state(), ScreeningState::Pending);
        assert_eq!(row.result(), None);
        assert_eq!(row.remarks(), None);
        assert!(first.iter().any(|f| f.id == row.id));
    }

    orchestrator.wait_idle().await;
    let done = store.list_screenings().await.unwrap();
    assert_eq!(done.len(), 6);
    assert!(done.iter().all(|r| r.result() == Some(ScreeningResult::Pass)));
}

#[tokio::test]
async fn test_concurrent_launches_keep_one_row_per_pair() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedProvider::responder(|_| {
        Ok(ChatResponse::Content(r#"{"result":"pass"}"#.into()))
    }));
    let orchestrator = orchestrator(store.clone(), llm);
    let a = seed_company(&store, "Alpha").await;
    let b = seed_company(&store, "Beta").await;
    let criteria = seed_criteria(&orchestrator, &["size", "growth", "sector"]).await;

    let companies = [a.id, b.id];
    tokio::join!(
        orchestrator.launch_screening(&companies, &criteria),
        orchestrator.launch_screening(&companies, &criteria),
    );
    orchestrator.wait_idle().await;

    let rows = store.list_screenings().await.unwrap();
    assert_eq!(rows.len(), 6);
    let mut pairs: Vec<_> = rows.iter().map(|r| (r.company_id, r.criteria_id)).collect();
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), 6);
    assert!(rows.iter().all(|r| !r.is_pending()));
}

#[tokio::test]
async fn test_stale_dispatch_cannot_overwrite_reset_row() {
    let store = InMemoryStore::new();
    let company = seed_company(&store, "Alpha").await;
    let criterion = Criterion::new("size", "Revenue above 10m");

    let first = store.upsert_pending_screening(company.id, criterion.id).await.unwrap();
    let second = store.upsert_pending_screening(company.id, criterion.id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_ne!(first.run_id(), second.run_id());

    let stale = store
        .finish_screening(
            first.id,
            first.run_id(),
            ScreeningOutcome::Completed { result: ScreeningResult::Fail, remarks: None },
        )
        .await
        .unwrap();
    assert!(!stale);

    let current = store
        .finish_screening(
            second.id,
            second.run_id(),
            ScreeningOutcome::Completed { result: ScreeningResult::Pass, remarks: None },
        )
        .await
        .unwrap();
    assert!(current);

    let rows = store.list_screenings().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].result(), Some(ScreeningResult::Pass));
}

#[tokio::test]
async fn test_promotion_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let llm = Arc::new(ScriptedProvider::responder(|_| {
        Ok(ChatResponse::Content(r#"{"result":"pass"}"#.into()))
    }));
    let orchestrator = orchestrator(store.clone(), llm);
    let company = seed_company(&store, "Alpha").await;
    let criteria = seed_criteria(&orchestrator, &["size", "growth"]).await;

    orchestrator.launch_screening(&[company.id], &criteria).await;
    orchestrator.wait_idle().await;

    let first = orchestrator.move_to_l1(company.id).await.unwrap();
    assert_eq!(first.company.stage, Stage::L1);
    assert_eq!(first.status.as_deref(), Some(STATUS_PASSED));
    assert_eq!(first.deleted_rows, 2);

    let second = orchestrator.move_to_l1(company.id).await.unwrap();
    assert_eq!(second.company.stage, Stage::L1);
    assert_eq!(second.company.status.as_deref(), Some(STATUS_PASSED));
    assert_eq!(second.deleted_rows, 0);

    assert!(store.list_screenings_for_company(company.id).await.unwrap().is_empty());
    assert_eq!(store.list_audit(company.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_promotion_statuses() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(store.clone(), Arc::new(ScriptedProvider::responder(answer_by_criterion)));
    let unscreened = seed_company(&store, "Gamma").await;
    let overridden = seed_company(&store, "Delta").await;
    let criteria = seed_criteria(&orchestrator, &["size", "geography"]).await;

    orchestrator.launch_screening(&[overridden.id], &criteria).await;
    orchestrator.wait_idle().await;

    let outcome = orchestrator.move_to_l1(unscreened.id).await.unwrap();
    assert_eq!(outcome.status.as_deref(), Some(STATUS_NO_SCREENING));

    let outcome = orchestrator.move_to_l1(overridden.id).await.unwrap();
    assert_eq!(outcome.status.as_deref(), Some(STATUS_OVERRIDE));
    assert_eq!(outcome.summary.failed, 1);
}
