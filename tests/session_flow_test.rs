use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jobsearch_backend::error::Result;
use jobsearch_backend::models::criteria::ExtractedRequirement;
use jobsearch_backend::models::job::JobPosting;
use jobsearch_backend::services::{
    aggregator_service::AggregatorService,
    extractor_service::ExtractorService,
    history_service::{ChatStore, MemoryChatStore},
    scoring_service::{ScoringService, DEFAULT_WEIGHTS},
    search_service::SearchService,
    session_service::SessionManager,
    source_service::{JobSource, SourceRegistry},
};

/// Answers after a delay, long enough for a connection to die mid-search.
struct SlowSource {
    delay: Duration,
}

#[async_trait]
impl JobSource for SlowSource {
    fn id(&self) -> &str {
        "linkedin"
    }

    async fn search(&self, _criteria: &ExtractedRequirement) -> Result<Vec<JobPosting>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![JobPosting {
            title: "Rust Engineer".into(),
            company: "Acme".into(),
            location: Some("remote".into()),
            description: String::new(),
            skills: ["rust".to_string()].into_iter().collect::<BTreeSet<_>>(),
            source: "linkedin".into(),
            url: Some("https://jobs.example/rust/1".into()),
            posted_at: None,
        }])
    }
}

fn manager(store: Arc<dyn ChatStore>, source_delay: Duration) -> SessionManager {
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(SlowSource {
        delay: source_delay,
    }));
    let aggregator = AggregatorService::new(
        registry,
        Arc::new(tokio::sync::Semaphore::new(2)),
        Duration::from_secs(2),
        Duration::from_secs(5),
    );
    let extractor = ExtractorService::new(None, Duration::from_millis(10), 0.35);
    let scoring = ScoringService::new(DEFAULT_WEIGHTS, 0.3, 10);
    SessionManager::new(
        SearchService::new(extractor, aggregator, scoring),
        store,
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn search_in_flight_when_connection_dies_is_persisted_and_replayed() {
    let store: Arc<MemoryChatStore> = Arc::new(MemoryChatStore::new());
    let mgr = manager(store.clone(), Duration::from_millis(200));

    let ctx = mgr.connect("u1", None).await.unwrap();
    let chat_id = ctx.chat_id.clone();

    mgr.handle_envelope(&chat_id, "u1", r#"{"message":"remote rust engineer"}"#)
        .await;

    // Connection dies before the slow source has answered.
    mgr.disconnect(&chat_id, ctx.conn_id).await;
    drop(ctx);

    // The detached pipeline task still completes and persists.
    let mut persisted = false;
    for _ in 0..100 {
        if store.load_chat(&chat_id).await.unwrap().is_some() {
            persisted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(persisted, "exchange was not persisted after disconnect");

    // Resuming within the grace period replays the full exchange.
    let mut resumed = mgr.connect("u1", Some(chat_id.clone())).await.unwrap();
    assert!(resumed.resumed);
    let envelope = tokio::time::timeout(Duration::from_secs(1), resumed.outbound.recv())
        .await
        .expect("no replay envelope")
        .expect("outbound closed");

    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["type"], "chat_history");
    let messages = json["data"]["chats"][0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["sender"], "user");
    assert_eq!(messages[0]["content"], "remote rust engineer");
    assert_eq!(messages[1]["sender"], "bot");
    assert_eq!(messages[1]["jobs"][0]["title"], "Rust Engineer");
}

#[tokio::test]
async fn two_searches_on_one_chat_persist_in_dispatch_order() {
    let store: Arc<MemoryChatStore> = Arc::new(MemoryChatStore::new());
    let mgr = manager(store.clone(), Duration::from_millis(50));

    let ctx = mgr.connect("u1", None).await.unwrap();
    let chat_id = ctx.chat_id.clone();

    // The per-chat lock serializes the two pipeline tasks.
    mgr.handle_envelope(&chat_id, "u1", r#"{"message":"rust engineer"}"#)
        .await;
    mgr.handle_envelope(&chat_id, "u1", r#"{"message":"senior rust engineer"}"#)
        .await;

    let mut done = false;
    for _ in 0..100 {
        if let Some(chat) = store.load_chat(&chat_id).await.unwrap() {
            if chat.messages.len() == 4 {
                done = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(done, "both exchanges should persist");

    let chat = store.load_chat(&chat_id).await.unwrap().unwrap();
    assert_eq!(chat.messages[0].content, "rust engineer");
    assert_eq!(chat.messages[2].content, "senior rust engineer");
}
