use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use dealflow::config::DealflowConfig;
use dealflow::documents::DOCUMENT_TOOLS;
use dealflow::testing::{tool_call, ScriptedProvider};
use dealflow::types::{EntityKind, ProcessingStatus};
use dealflow::{
    AgentError, ChatResponse, Company, DealStore, DocumentAgent, DocumentError, InMemoryStore, MeetingNote,
    StructuredDocument, ToolRegistry, ToolServices,
};

fn agent(store: Arc<InMemoryStore>, llm: Arc<ScriptedProvider>) -> DocumentAgent {
    let config = DealflowConfig::default();
    let services = ToolServices::new(store.clone(), Arc::new(config.clone())).with_llm(llm.clone());
    let registry = ToolRegistry::with_builtin_tools(&services);
    DocumentAgent::new(llm, &registry, store, &config)
}

#[tokio::test]
async fn test_process_note_links_companies_and_completes() {
    let store = Arc::new(InMemoryStore::new());
    let company = store.upsert_company(Company::new("Nordic Freight AB")).await.unwrap();
    let note = store
        .insert_meeting_note(MeetingNote::new(
            "2024-05-02-intro.txt",
            "Intro call with Nordic Freight. Management open to a minority deal in Q3.",
        ))
        .await
        .unwrap();

    let structured = format!(
        "```json\n{}\n```",
        json!({
            "summary": "Intro call with Nordic Freight about a minority deal.",
            "key_points": ["Open to minority stake"],
            "action_items": ["Send NDA"],
            "tags": ["logistics", "minority"],
            "matched_companies": [{ "id": company.id, "name": "Nordic Freight AB", "type": "company" }]
        })
    );
    let llm = Arc::new(ScriptedProvider::new(vec![
        ChatResponse::ToolCalls(vec![tool_call("m1", "find_entity_match", r#"{"name": "Nordic Freight"}"#)]),
        ChatResponse::ToolCalls(vec![tool_call(
            "a1",
            "attach_note",
            &json!({
                "entity_id": company.id,
                "entity_type": "company",
                "excerpt": "Management open to a minority deal in Q3."
            })
            .to_string(),
        )]),
        ChatResponse::Content(structured),
    ]));
    let agent = agent(store.clone(), llm.clone());

    let document = agent.process_note(note.id, CancellationToken::new()).await.unwrap().unwrap();
    match &document {
        StructuredDocument::Structured { tags, matched_companies, action_items, .. } => {
            assert_eq!(tags, &vec!["logistics".to_string(), "minority".to_string()]);
            assert_eq!(action_items.len(), 1);
            assert_eq!(matched_companies[0].id, company.id);
            assert_eq!(matched_companies[0].kind, EntityKind::Company);
        }
        other => panic!("expected structured document, got {:?}", other),
    }

    let saved = store.get_meeting_note(note.id).await.unwrap().unwrap();
    assert_eq!(saved.processing_status, ProcessingStatus::Completed);
    assert_eq!(saved.tags.len(), 2);
    assert!(saved.structured_json.is_some());

    let attached = store.list_entity_notes(company.id).await.unwrap();
    assert_eq!(attached.len(), 1);
    assert_eq!(attached[0].meeting_note_id, Some(note.id));

    let calls = llm.calls();
    let mut offered = calls[0].tool_names.clone();
    offered.sort();
    assert_eq!(offered, vec!["attach_note".to_string(), "find_entity_match".to_string()]);
    assert_eq!(DOCUMENT_TOOLS.len(), 2);

    // Already processed: nothing to do.
    assert!(agent.process_note(note.id, CancellationToken::new()).await.unwrap().is_none());
    assert_eq!(llm.calls().len(), 3);
}

#[tokio::test]
async fn test_unstructured_answer_is_kept_raw() {
    let store = Arc::new(InMemoryStore::new());
    let note = store
        .insert_meeting_note(MeetingNote::new("notes.txt", "Weekly pipeline sync."))
        .await
        .unwrap();
    let llm = Arc::new(ScriptedProvider::new(vec![ChatResponse::Content(
        "The meeting covered the weekly pipeline.".to_string(),
    )]));
    let agent = agent(store.clone(), llm);

    let document = agent.process_note(note.id, CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(
        document,
        StructuredDocument::Raw { raw_response: "The meeting covered the weekly pipeline.".to_string() }
    );
    let saved = store.get_meeting_note(note.id).await.unwrap().unwrap();
    assert_eq!(saved.processing_status, ProcessingStatus::Completed);
    assert_eq!(saved.structured_json.unwrap()["status"], "raw");
}

#[tokio::test]
async fn test_model_failure_marks_note_failed() {
    let store = Arc::new(InMemoryStore::new());
    let note = store
        .insert_meeting_note(MeetingNote::new("notes.txt", "Board update."))
        .await
        .unwrap();
    let agent = agent(store.clone(), Arc::new(ScriptedProvider::failing("503 Service Unavailable")));

    let err = agent.process_note(note.id, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, DocumentError::Agent(_)));
    let saved = store.get_meeting_note(note.id).await.unwrap().unwrap();
    assert_eq!(saved.processing_status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn test_unknown_note_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let agent = agent(store, Arc::new(ScriptedProvider::new(Vec::new())));
    let err = agent.process_note(uuid::Uuid::new_v4(), CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, DocumentError::Store(dealflow::StoreError::NotFound { .. })));
}

#[tokio::test]
async fn test_dropped_caller_still_finishes_note() {
    let store = Arc::new(InMemoryStore::new());
    let note = store
        .insert_meeting_note(MeetingNote::new("notes.txt", "Call with a freight forwarder."))
        .await
        .unwrap();
    let llm = Arc::new(
        ScriptedProvider::new(vec![ChatResponse::Content("Short call, nothing to link.".to_string())])
            .with_delay(Duration::from_millis(300)),
    );
    let agent = agent(store.clone(), llm);

    // The caller gives up while the model is still answering.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        agent.process_note(note.id, CancellationToken::new()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let saved = store.get_meeting_note(note.id).await.unwrap().unwrap();
    assert_eq!(saved.processing_status, ProcessingStatus::Completed);
    assert_eq!(saved.structured_json.unwrap()["status"], "raw");

    assert!(agent.process_note(note.id, CancellationToken::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancelled_processing_marks_note_failed() {
    let store = Arc::new(InMemoryStore::new());
    let note = store
        .insert_meeting_note(MeetingNote::new("notes.txt", "Board update."))
        .await
        .unwrap();
    let llm = Arc::new(ScriptedProvider::new(vec![ChatResponse::Content("late".to_string())]));
    let agent = agent(store.clone(), llm.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = agent.process_note(note.id, cancel).await.unwrap_err();
    assert!(matches!(err, DocumentError::Agent(AgentError::Cancelled)));
    assert!(llm.calls().is_empty());

    let saved = store.get_meeting_note(note.id).await.unwrap().unwrap();
    assert_eq!(saved.processing_status, ProcessingStatus::Failed);
    assert!(agent.process_note(note.id, CancellationToken::new()).await.unwrap().is_none());
}
