//! Long-term memory integration tests
//!
//! Deduplication, curation cadence and recall into the system prompt

use std::sync::Arc;

use companion_runtime::UserInput;
use companion_runtime::db::{
    ConversationRepo, ConversationStore, FactRepo, FactStore, FactSubject, Memory, MemoryRepo,
    MemoryStore, ProfileRepo,
};
use companion_runtime::memory::{CurationReport, CuratorSettings, EmbeddingIndex, MemoryCurator};
use companion_runtime::message::ChatMessage;
use companion_runtime::{DbPool, Error};

mod common;

use common::{Harness, RecordingTts, ScriptedModel, TableEmbedder, setup_test_db, test_context};

const EXTRACTION: &str = r#"{
    "memories": [
        {"content": "Hoang got a new job", "importance": 0.9, "confidence": 0.8, "tags": ["career"]},
        {"content": "Hoang said hi", "importance": 0.1, "confidence": 0.9, "tags": []},
        {"content": "   ", "importance": 0.9, "confidence": 0.9, "tags": []}
    ],
    "user_facts": [{"name": "pet", "value": "cat", "type": "pets"}],
    "character_facts": [{"name": "mood", "value": "cheerful", "type": "state"}]
}"#;

fn embedder() -> TableEmbedder {
    TableEmbedder::new(&[
        ("We went to the beach", [1.0, 0.0, 0.0]),
        ("We visited the beach", [1.1, 0.0, 0.0]),
        ("Hoang adopted a cat", [0.0, 5.0, 0.0]),
        ("Do you remember my cat?", [0.0, 5.2, 0.0]),
        ("Hoang got a new job", [0.0, 0.0, 9.0]),
    ])
}

fn index(pool: &DbPool) -> Arc<EmbeddingIndex> {
    Arc::new(EmbeddingIndex::new(
        Arc::new(embedder()),
        Arc::new(MemoryRepo::new(pool.clone())),
    ))
}

fn curator(pool: &DbPool, model: ScriptedModel) -> MemoryCurator {
    MemoryCurator::new(
        Arc::new(model),
        index(pool),
        Arc::new(ConversationRepo::new(pool.clone())),
        Arc::new(FactRepo::new(pool.clone())),
        ProfileRepo::new(pool.clone()),
    )
}

/// Create `conv-1` holding `count` alternating messages
fn seed_conversation(pool: &DbPool, count: usize) -> ConversationRepo {
    let repo = ConversationRepo::new(pool.clone());
    repo.create_if_absent("conv-1", 10, "ene", "hoang").unwrap();
    for i in 0..count {
        let message = if i % 2 == 0 {
            ChatMessage::user(format!("message {i}"))
        } else {
            ChatMessage::assistant(format!("reply {i}"))
        };
        repo.append("conv-1", &message).unwrap();
    }
    repo
}

#[tokio::test]
async fn test_near_duplicate_is_rejected() {
    let pool = setup_test_db();
    let index = index(&pool);
    let repo = MemoryRepo::new(pool.clone());

    index
        .add_memory(Memory::new("hoang", "ene", "We went to the beach", Vec::new()))
        .await
        .unwrap();

    let duplicate = index
        .add_memory(Memory::new("hoang", "ene", "We visited the beach", Vec::new()))
        .await;
    match duplicate {
        Err(Error::DuplicateMemory { distance, .. }) => assert!((distance - 0.1).abs() < 1e-4),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(repo.count().unwrap(), 1);

    let stored = index
        .add_memory(Memory::new("hoang", "ene", "Hoang adopted a cat", Vec::new()))
        .await
        .unwrap();
    assert_eq!(stored.embedding, vec![0.0, 5.0, 0.0]);
    assert_eq!(repo.count().unwrap(), 2);
    assert_eq!(repo.list_embeddings().unwrap().len(), 2);
}

#[tokio::test]
async fn test_summary_follows_cadence() {
    let pool = setup_test_db();
    let conversations = seed_conversation(&pool, 19);
    let curator = curator(&pool, ScriptedModel::new(&[]).with_summary("  They talked about exams.  "));
    let ctx = test_context();

    let report = curator.curate(&ctx).await;
    assert!(!report.summarized);
    assert!(conversations.get("conv-1").unwrap().unwrap().current_summary.is_none());

    conversations
        .append("conv-1", &ChatMessage::assistant("reply 19"))
        .unwrap();
    let report = curator.curate(&ctx).await;

    assert!(report.summarized);
    assert_eq!(
        conversations
            .get("conv-1")
            .unwrap()
            .unwrap()
            .current_summary
            .as_deref(),
        Some("They talked about exams.")
    );
}

#[tokio::test]
async fn test_zero_cadence_never_summarizes() {
    let pool = setup_test_db();
    seed_conversation(&pool, 20);
    let curator = curator(&pool, ScriptedModel::new(&[])).with_settings(CuratorSettings {
        summary_cadence: 0,
        ..CuratorSettings::default()
    });

    assert!(!curator.should_summarize(20));
    assert!(!curator.curate(&test_context()).await.summarized);
}

#[tokio::test]
async fn test_extraction_applies_floor_and_stores_facts() {
    let pool = setup_test_db();
    seed_conversation(&pool, 4);
    let curator = curator(&pool, ScriptedModel::new(&[]).with_extraction(EXTRACTION));

    let report = curator.curate(&test_context()).await;

    assert_eq!(report.stored, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.facts, 2);

    let memories = MemoryRepo::new(pool.clone()).list("hoang", "ene").unwrap();
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].content, "Hoang got a new job");
    assert_eq!(memories[0].tags, vec!["career"]);
    assert_eq!(memories[0].source.as_deref(), Some("conv-1"));

    let facts = FactRepo::new(pool.clone());
    let user_facts = facts.latest(&FactSubject::User("hoang".to_string())).unwrap();
    assert_eq!(user_facts.len(), 1);
    assert_eq!(user_facts[0].value, "cat");
    let character_facts = facts
        .latest(&FactSubject::Character("ene".to_string()))
        .unwrap();
    assert_eq!(character_facts[0].name, "mood");

    // Same extraction again: the memory is now a duplicate
    let report = curator.curate(&test_context()).await;
    assert_eq!(report.stored, 0);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn test_malformed_extraction_is_contained() {
    let pool = setup_test_db();
    seed_conversation(&pool, 2);
    let curator = curator(&pool, ScriptedModel::new(&[]).with_extraction("not json at all"));

    let report = curator.curate(&test_context()).await;

    assert_eq!(report, CurationReport::default());
    assert_eq!(MemoryRepo::new(pool).count().unwrap(), 0);
}

#[tokio::test]
async fn test_recalled_memories_reach_system_prompt() {
    let h = Harness::new(ScriptedModel::new(&["Of course I do!"]), RecordingTts::default())
        .with_memory(embedder());
    MemoryRepo::new(h.pool.clone())
        .create(&Memory::new("hoang", "ene", "Hoang adopted a cat", vec![0.0, 5.0, 0.0]))
        .unwrap();

    h.agent
        .stream(test_context(), UserInput::text("Do you remember my cat?"))
        .await
        .unwrap()
        .collect()
        .await;

    let requests = h.model.chat_requests();
    let system = requests[0].system.as_deref().unwrap();
    assert!(system.contains("Hoang adopted a cat"));
}

#[tokio::test]
async fn test_curated_facts_refresh_cached_prompt() {
    let h = Harness::new(ScriptedModel::new(&["Nice."]).with_extraction(EXTRACTION), RecordingTts::default())
        .with_memory(embedder());

    for text in ["I have news", "Guess what"] {
        h.agent
            .stream(test_context(), UserInput::text(text))
            .await
            .unwrap()
            .collect()
            .await;
    }

    let requests = h.model.chat_requests();
    assert_eq!(requests.len(), 2);
    let first = requests[0].system.as_deref().unwrap_or_default();
    let second = requests[1].system.as_deref().unwrap_or_default();
    assert!(!first.contains("pet: cat"));
    assert!(second.contains("pet: cat"));
    assert!(second.contains("mood: cheerful"));
}

#[tokio::test]
async fn test_dedupe_is_per_user_and_character() {
    let pool = setup_test_db();
    let index = index(&pool);
    let repo = MemoryRepo::new(pool.clone());

    index
        .add_memory(Memory::new("hoang", "ene", "We went to the beach", Vec::new()))
        .await
        .unwrap();

    // Same content for another character, then another user: both are new
    index
        .add_memory(Memory::new("hoang", "miku", "We went to the beach", Vec::new()))
        .await
        .unwrap();
    index
        .add_memory(Memory::new("linh", "ene", "We visited the beach", Vec::new()))
        .await
        .unwrap();
    assert_eq!(repo.count().unwrap(), 3);

    // Within the same pair it is still a duplicate
    let duplicate = index
        .add_memory(Memory::new("hoang", "miku", "We visited the beach", Vec::new()))
        .await;
    assert!(matches!(duplicate, Err(Error::DuplicateMemory { .. })));
    assert_eq!(repo.list("hoang", "miku").unwrap().len(), 1);
}

#[tokio::test]
async fn test_recall_never_crosses_users() {
    let h = Harness::new(ScriptedModel::new(&["I hope she gets better."]), RecordingTts::default())
        .with_memory(TableEmbedder::new(&[("How is my sister?", [3.0, 3.0, 0.0])]));
    let memories = MemoryRepo::new(h.pool.clone());
    memories
        .create(&Memory::new("linh", "ene", "Linh's sister is in hospital", vec![3.0, 3.0, 0.0]))
        .unwrap();
    memories
        .create(&Memory::new("hoang", "miku", "Hoang's sister plays piano", vec![3.0, 3.0, 0.0]))
        .unwrap();
    memories
        .create(&Memory::new("hoang", "ene", "Hoang's sister started university", vec![3.0, 3.2, 0.0]))
        .unwrap();

    h.agent
        .stream(test_context(), UserInput::text("How is my sister?"))
        .await
        .unwrap()
        .collect()
        .await;

    let requests = h.model.chat_requests();
    let system = requests[0].system.as_deref().unwrap();
    assert!(system.contains("Hoang's sister started university"));
    assert!(!system.contains("Linh's sister is in hospital"));
    assert!(!system.contains("plays piano"));
}
