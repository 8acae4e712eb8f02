mod helpers;

use helpers::{save_fact, SpikeEmbedding, TestDir};
use mneme::cli;
use mneme::config::SearchConfig;
use mneme::journal::NewSummary;
use mneme::memory::search::{SearchEngine, SearchMethod};
use mneme::memory::store::IndexStore;
use mneme::memory::sync::IndexSyncer;
use mneme::memory::types::TimeRange;
use mneme::MemoryError;

#[tokio::test]
async fn saved_fact_is_searchable_and_in_context() {
    let dir = TestDir::new();
    let tag = format!("zebracorn{}", std::process::id());
    let fact = save_fact(&dir.log, &format!("The deploy key is stored under {tag}"), &[&tag]);

    cli::search::sync(&dir.config, false).unwrap();

    let response = cli::search::search(&dir.config, &tag, SearchMethod::Keyword, None, TimeRange::all())
        .await
        .unwrap();
    assert!(response.count >= 1);
    assert!(response.results.iter().any(|h| h.id == fact.id));
    assert!(response.results[0].score > 0.0);

    // Session-start context reads the log, not the index.
    let ctx = cli::session::context(&dir.config, None, None).unwrap();
    assert!(ctx.text.contains(&fact.content));
}

#[test]
fn context_sees_facts_the_index_has_not() {
    let dir = TestDir::new();
    let fact = save_fact(&dir.log, "written after the last sync", &[]);

    let ctx = cli::session::context(&dir.config, Some("sess-1"), Some("/work")).unwrap();
    assert!(ctx.session_start_id.is_some());
    assert!(ctx.text.contains("written after the last sync"));
    assert_eq!(ctx.context.recent_facts[0].id, fact.id);
    assert!(!dir.log.index_path().exists());
}

#[tokio::test]
async fn search_without_an_index_is_a_validation_error() {
    let dir = TestDir::new();
    let err = cli::search::search(&dir.config, "anything", SearchMethod::Hybrid, None, TimeRange::all())
        .await
        .unwrap_err();
    let err = err.downcast_ref::<MemoryError>().unwrap();
    assert!(matches!(err, MemoryError::IndexNotFound { .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn hybrid_degrades_to_keyword_without_embeddings() {
    let dir = TestDir::new();
    save_fact(&dir.log, "sqlite full text search", &[]);
    cli::search::sync(&dir.config, false).unwrap();

    let response = cli::search::search(&dir.config, "sqlite", SearchMethod::Hybrid, Some(5), TimeRange::all())
        .await
        .unwrap();
    assert_eq!(response.requested, SearchMethod::Hybrid);
    assert_eq!(response.method, SearchMethod::Keyword);
    assert_eq!(response.count, 1);
}

#[tokio::test]
async fn search_honours_day_bounds() {
    let dir = TestDir::new();
    let fact = save_fact(&dir.log, "quarterly budget review", &[]);
    cli::search::sync(&dir.config, false).unwrap();
    let today = mneme::journal::today();

    let search = |range: TimeRange| cli::search::search(&dir.config, "budget", SearchMethod::Keyword, None, range);

    let recent = search(TimeRange::from_args(Some(1), None, None, today).unwrap()).await.unwrap();
    assert_eq!(recent.results[0].id, fact.id);

    let before = TimeRange::from_args(None, None, Some("2000-01-01"), today).unwrap();
    assert_eq!(search(before).await.unwrap().count, 0);

    let after = today.succ_opt().unwrap().format("%Y-%m-%d").to_string();
    let later = TimeRange::from_args(None, Some(&after), None, today).unwrap();
    assert_eq!(search(later).await.unwrap().count, 0);
}

#[tokio::test]
async fn deleted_fact_leaves_search_and_context_until_restored() {
    let dir = TestDir::new();
    let keep = save_fact(&dir.log, "walnut harvest schedule", &[]);
    let gone = save_fact(&dir.log, "walnut tree pruning notes", &[]);
    cli::search::sync(&dir.config, false).unwrap();

    let search = || cli::search::search(&dir.config, "walnut", SearchMethod::Keyword, None, TimeRange::all());
    let hit_ids = |resp: mneme::memory::search::SearchResponse| {
        resp.results.into_iter().map(|h| h.id).collect::<Vec<_>>()
    };
    assert_eq!(search().await.unwrap().count, 2);

    let report = cli::manage::delete(&dir.config, vec![gone.id.clone()]).unwrap();
    assert_eq!(report.changed, 1);

    // Gone from the index before any sync, and a sync does not bring it back.
    assert_eq!(hit_ids(search().await.unwrap()), vec![keep.id.clone()]);
    cli::search::sync(&dir.config, false).unwrap();
    assert_eq!(hit_ids(search().await.unwrap()), vec![keep.id.clone()]);

    let ctx = cli::session::context(&dir.config, None, None).unwrap();
    assert!(!ctx.text.contains("pruning"));
    let stats = cli::stats::stats(&dir.config).unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.deleted_entries, 1);

    let restored = cli::manage::restore(&dir.config, vec![gone.id.clone()]).unwrap();
    assert_eq!(restored.changed, 1);
    cli::search::sync(&dir.config, false).unwrap();
    let mut ids = hit_ids(search().await.unwrap());
    ids.sort();
    let mut expected = vec![keep.id, gone.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn delete_requires_an_id() {
    let dir = TestDir::new();
    let err = cli::manage::delete(&dir.config, vec!["  ".into()]).unwrap_err();
    assert_eq!(err.downcast_ref::<MemoryError>().unwrap().exit_code(), 2);
}

#[test]
fn hybrid_fuses_keyword_and_vector_rankings() {
    let dir = TestDir::new();
    let both = save_fact(&dir.log, "green tea brewing temperature", &[]);
    save_fact(&dir.log, "tea", &[]);
    save_fact(&dir.log, "rust borrow checker rules", &[]);

    let mut store = IndexStore::open(dir.log.index_path()).unwrap();
    IndexSyncer::new(&mut store, &SpikeEmbedding, &dir.config.index)
        .sync_all(&dir.log, false)
        .unwrap();

    let engine = SearchEngine::new(&store, &SearchConfig::default());
    let response = engine
        .search("green tea brewing", SearchMethod::Hybrid, 3, &SpikeEmbedding)
        .unwrap();
    assert_eq!(response.method, SearchMethod::Hybrid);
    assert_eq!(response.results[0].id, both.id);

    // Top of both lists: 1/61 + 1/61.
    let expected = 2.0 / 61.0;
    assert!((response.results[0].score - expected).abs() < 1e-9);
    assert!(response.results.iter().all(|h| h.content != "rust borrow checker rules" || h.score < expected));
}

#[test]
fn summaries_are_searchable_and_deduplicated_per_session() {
    let dir = TestDir::new();
    let summary = || NewSummary {
        session_id: Some("sess-42".into()),
        topic: "migration".into(),
        summary: "moved the importer onto the new parser".into(),
        ..Default::default()
    };
    let first = cli::write::save_summary(&dir.config, summary()).unwrap();
    let second = cli::write::save_summary(&dir.config, summary()).unwrap();
    assert!(matches!(first, mneme::journal::SummaryOutcome::Saved { .. }));
    assert!(matches!(second, mneme::journal::SummaryOutcome::AlreadySaved { .. }));

    let report = cli::search::sync(&dir.config, false).unwrap();
    assert_eq!(report.chunks_upserted, 1);
}
