use std::{collections::BTreeSet, fs, path::PathBuf};

use time::OffsetDateTime;
use uuid::Uuid;

use arbiter::{
    analysis::{
        AnalysisErrorKind,
        ports::HistoryPort,
        types::{
            AnalysisRecord, AnalysisRequest, Framework, ReasoningStep, ResponseFlags,
            SafetyStatus, TradeoffScores,
        },
    },
    history::{
        FileHistoryStore, HistoryBackend, HistoryConfig, HistoryError, InMemoryHistoryStore,
        build_history_store,
    },
};

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("arbiter-history-test-{}", Uuid::now_v7()))
}

fn record_at(unix_seconds: i64, recommendation: &str) -> AnalysisRecord {
    AnalysisRecord {
        id: Uuid::new_v4().to_string(),
        request: AnalysisRequest {
            scenario: "Should a lifeguard save one swimmer or five?".to_string(),
            frameworks: BTreeSet::from([Framework::Utilitarian, Framework::Care]),
            caller_id: None,
        },
        steps: vec![ReasoningStep {
            index: 1,
            description: "Count lives at stake.".to_string(),
        }],
        outcomes: Vec::new(),
        tradeoffs: TradeoffScores {
            utilitarian_harm: 3.0,
            ..TradeoffScores::default()
        },
        evaluation: None,
        recommendation: recommendation.to_string(),
        created_at: OffsetDateTime::from_unix_timestamp(unix_seconds)
            .expect("timestamp should be valid"),
        safety_status: SafetyStatus::Verified,
        flags: ResponseFlags::default(),
        rejection_reason: None,
    }
}

#[tokio::test]
async fn file_store_round_trips_and_replaces_on_same_id() {
    let dir = temp_dir();
    let store = FileHistoryStore::new(dir.clone());
    let mut record = record_at(1_760_000_000, "Save the five.");

    store.put(&record).await.expect("first put should succeed");
    record.recommendation = "Save the five, then reassess.".to_string();
    store.put(&record).await.expect("second put should succeed");

    let loaded = store.get(&record.id).await.expect("record should load");
    assert_eq!(loaded, record);
    assert_eq!(store.recent(10).await.expect("list").len(), 1);

    let leftovers: Vec<_> = fs::read_dir(&dir)
        .expect("dir should exist")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files must not linger");

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn file_store_reports_missing_and_invalid_ids_as_not_found() {
    let dir = temp_dir();
    let store = FileHistoryStore::new(dir.clone());

    let err = store
        .get(&Uuid::new_v4().to_string())
        .await
        .expect_err("missing id should fail");
    assert_eq!(err.kind, AnalysisErrorKind::NotFound);

    let err = store
        .get("../../etc/passwd")
        .await
        .expect_err("path-like id should fail");
    assert_eq!(err.kind, AnalysisErrorKind::NotFound);

    assert!(matches!(
        store.load("not-a-uuid"),
        Err(HistoryError::InvalidId(_))
    ));

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn file_store_lists_newest_first_and_skips_corrupt_files() {
    let dir = temp_dir();
    let store = FileHistoryStore::new(dir.clone());
    let oldest = record_at(1_760_000_000, "oldest");
    let middle = record_at(1_760_000_100, "middle");
    let newest = record_at(1_760_000_200, "newest");
    for record in [&middle, &oldest, &newest] {
        store.put(record).await.expect("put should succeed");
    }
    fs::write(dir.join(format!("{}.json", Uuid::new_v4())), "{ not json")
        .expect("corrupt file should be written");

    let recent = store.recent(2).await.expect("list should succeed");
    let recommendations: Vec<_> = recent
        .iter()
        .map(|record| record.recommendation.as_str())
        .collect();
    assert_eq!(recommendations, vec!["newest", "middle"]);

    let all = store.recent(10).await.expect("list should succeed");
    assert_eq!(all.len(), 3);

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn file_store_lists_nothing_before_first_write() {
    let store = FileHistoryStore::new(temp_dir());
    assert!(store.recent(10).await.expect("list should succeed").is_empty());
}

#[tokio::test]
async fn file_store_rejects_unknown_envelope_version() {
    let dir = temp_dir();
    let store = FileHistoryStore::new(dir.clone());
    let record = record_at(1_760_000_000, "versioned");
    store.put(&record).await.expect("put should succeed");

    let path = dir.join(format!("{}.json", record.id));
    let content = fs::read_to_string(&path).expect("record file should exist");
    let mut envelope: serde_json::Value =
        serde_json::from_str(&content).expect("envelope should be json");
    envelope["version"] = serde_json::json!(99);
    fs::write(&path, envelope.to_string()).expect("envelope should be rewritten");

    assert!(matches!(
        store.load(&record.id),
        Err(HistoryError::UnsupportedVersion { found: 99, .. })
    ));
    let err = store.get(&record.id).await.expect_err("get should fail");
    assert_eq!(err.kind, AnalysisErrorKind::PersistenceFailed);

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn memory_store_orders_and_limits_like_file_store() {
    let store = InMemoryHistoryStore::new();
    let first = record_at(1_760_000_000, "first");
    let second = record_at(1_760_000_050, "second");
    store.put(&first).await.expect("put should succeed");
    store.put(&second).await.expect("put should succeed");
    store.put(&second).await.expect("repeat put should succeed");

    assert_eq!(store.len().await, 2);
    let recent = store.recent(1).await.expect("list should succeed");
    assert_eq!(recent[0].id, second.id);

    let err = store
        .get(&Uuid::new_v4().to_string())
        .await
        .expect_err("missing id should fail");
    assert_eq!(err.kind, AnalysisErrorKind::NotFound);
}

#[tokio::test]
async fn configured_backend_selects_store() {
    let config = HistoryConfig {
        backend: HistoryBackend::Memory,
        dir: temp_dir(),
    };
    let store = build_history_store(&config);
    let record = record_at(1_760_000_000, "configured");
    store.put(&record).await.expect("put should succeed");
    assert_eq!(
        store.get(&record.id).await.expect("get should succeed").id,
        record.id
    );
    assert!(!config.dir.exists(), "memory backend never touches disk");
}
