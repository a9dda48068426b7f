//! End-to-end turn scenarios against a file-backed database.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chatmem_agent::{ChatMemory, EXTRACT_INSTRUCTION, IndexSource, SqliteIndexSource};
use chatmem_core::config::ChatmemConfig;
use chatmem_core::error::Result;
use chatmem_core::index::{InMemoryIndex, IndexedItem, SemanticIndex};
use chatmem_core::metrics::MetricsObserver;
use chatmem_core::observer::SharedObserver;
use chatmem_core::persistence::ContextStore;
use chatmem_core::summarizer::{CONSOLIDATE_INSTRUCTION, COMPRESS_INSTRUCTION, Summarizer};
use chatmem_core::types::{MemoryItem, Namespace, SessionId, Turn};
use chrono::Utc;
use chatmem_core::window::is_summary_marker;

fn config(dir: &tempfile::TempDir) -> ChatmemConfig {
    let mut config = ChatmemConfig::default();
    config.persistence.db_path = dir.path().join("chat_context.db");
    config.workers.debounce_ms = 10;
    config.workers.poll_interval_ms = 50;
    config
}

fn scripted_summarizer() -> Arc<dyn Summarizer> {
    Arc::new(|instruction: &str, _: &str| -> Result<String> {
        if instruction == COMPRESS_INSTRUCTION {
            Ok("The user walked through a long numbered checklist.".to_string())
        } else if instruction == EXTRACT_INSTRUCTION {
            Ok(r#"["User is testing the memory pipeline"]"#.to_string())
        } else {
            Ok("[]".to_string())
        }
    })
}

fn history(n: usize) -> Vec<Turn> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Turn::human(format!("step {i}"))
            } else {
                Turn::assistant(format!("done with step {i}"))
            }
        })
        .collect()
}

#[test]
fn overflowing_turn_is_compacted_in_the_background() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let session = SessionId::from("thread-e2e");

    let seed = ContextStore::open(&config.persistence.db_path, &config.persistence).expect("open");
    assert_eq!(seed.save(&session, &history(22), "").expect("seed"), 1);

    let metrics = Arc::new(MetricsObserver::new());
    let observer: SharedObserver = metrics.clone();
    let source = SqliteIndexSource::new(dir.path().join("memory.db"), config.persistence.clone());
    let memory = ChatMemory::new(config, source, scripted_summarizer(), observer).expect("pipeline");
    memory.start().expect("start");

    let mut turn = memory.begin_turn(&session).expect("begin");
    assert_eq!(turn.history().len(), 22);
    turn.push(Turn::assistant("all steps recorded"));
    let report = turn.commit().expect("commit");
    assert_eq!(report.version, 2);
    assert_eq!(report.turns, 23);
    assert!(report.compaction_scheduled);
    assert!(report.extraction_scheduled);

    memory.shutdown().expect("shutdown");

    let (ctx, version) = seed.load(&session).expect("load");
    let ctx = ctx.expect("present");
    assert_eq!(version, 3);
    assert_eq!(ctx.turns.len(), 9);
    assert!(is_summary_marker(&ctx.turns[0]));
    assert_eq!(ctx.turns[8].text, "all steps recorded");
    assert_eq!(ctx.summary, "The user walked through a long numbered checklist.");

    let facts = memory.recall(&session, "testing memory", None).expect("recall");
    assert_eq!(facts, vec!["User is testing the memory pipeline".to_string()]);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.jobs_submitted, 2);
    assert_eq!(snapshot.batches_failed, 0);
}

#[test]
fn short_sessions_schedule_no_compaction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(&dir);
    config.extraction.enabled = false;
    let session = SessionId::from("thread-short");
    let memory = ChatMemory::new(
        config,
        chatmem_core::index::InMemoryIndex::new(),
        scripted_summarizer(),
        chatmem_core::observer::noop(),
    )
    .expect("pipeline");

    let mut turn = memory.begin_turn(&session).expect("begin");
    assert!(turn.history().is_empty());
    turn.push(Turn::human("hello"));
    turn.push(Turn::assistant("hi there"));
    let report = turn.commit().expect("commit");

    assert_eq!(report.version, 1);
    assert!(!report.compaction_scheduled);
    assert!(!report.extraction_scheduled);
    assert_eq!(memory.stats().compress.depth, 0);
}

#[test]
fn concurrent_turns_on_one_session_are_serialized() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let db_path = config.persistence.db_path.clone();
    let persistence = config.persistence.clone();
    let session = SessionId::from("thread-busy");
    let memory = Arc::new(
        ChatMemory::new(
            config,
            chatmem_core::index::InMemoryIndex::new(),
            scripted_summarizer(),
            chatmem_core::observer::noop(),
        )
        .expect("pipeline"),
    );

    let handles: Vec<_> = (0..2)
        .map(|worker| {
            let memory = Arc::clone(&memory);
            let session = session.clone();
            std::thread::spawn(move || {
                for i in 0..5 {
                    let mut turn = memory.begin_turn(&session).expect("begin");
                    turn.push(Turn::human(format!("worker {worker} message {i}")));
                    turn.commit().expect("commit");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }

    let store = ContextStore::open(&db_path, &persistence).expect("open");
    let (ctx, version) = store.load(&session).expect("load");
    assert_eq!(version, 10);
    assert_eq!(ctx.expect("present").turns.len(), 10);
    assert!(!memory.lock().is_tracked(session.as_str()));
    memory.shutdown().expect("shutdown");
}

fn seed_fact(index: &InMemoryIndex, session: &SessionId, key: &str, content: &str, hours: i64) {
    let item = MemoryItem::new(content, Utc::now() - chrono::Duration::hours(hours));
    index
        .put(&Namespace::new("user_prefs", session), key, &item)
        .expect("seed fact");
}

#[test]
fn scheduled_maintenance_prunes_and_consolidates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let session = SessionId::from("thread-upkeep");
    let index = InMemoryIndex::new();
    seed_fact(&index, &session, "old", "used to live in Oslo", 24 * 40);
    for (key, fact) in [("a", "likes tea"), ("b", "drinks green tea"), ("c", "owns a bike")] {
        seed_fact(&index, &session, key, fact, 1);
    }

    let summarizer: Arc<dyn Summarizer> = Arc::new(|instruction: &str, _: &str| -> Result<String> {
        if instruction == CONSOLIDATE_INSTRUCTION {
            Ok(r#"["likes green tea", "owns a bike"]"#.to_string())
        } else {
            Ok("[]".to_string())
        }
    });
    let memory = ChatMemory::new(config(&dir), index.clone(), summarizer, chatmem_core::observer::noop())
        .expect("pipeline");
    memory.start().expect("start");
    assert!(memory.schedule_maintenance(&session));
    memory.shutdown().expect("shutdown");

    let ns = Namespace::new("user_prefs", &session);
    assert_eq!(index.len(&ns), 2);
    let mut facts: Vec<_> = index
        .search(&ns, "", 10)
        .expect("list")
        .into_iter()
        .map(|item| item.value.content)
        .collect();
    facts.sort();
    assert_eq!(facts, ["likes green tea", "owns a bike"]);
}

#[test]
fn maintenance_is_not_scheduled_when_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(&dir);
    config.maintenance.enabled = false;
    let memory = ChatMemory::new(
        config,
        InMemoryIndex::new(),
        scripted_summarizer(),
        chatmem_core::observer::noop(),
    )
    .expect("pipeline");

    assert!(!memory.schedule_maintenance(&SessionId::from("thread-off")));
    assert_eq!(memory.stats().maintain.depth, 0);
}

#[test]
fn recall_for_queries_with_the_newest_turn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = config(&dir);
    config.long_term.search_limit = 1;
    config.long_term.search_oversample = 1;
    let session = SessionId::from("thread-recall");
    let index = InMemoryIndex::new();
    seed_fact(&index, &session, "coffee", "Prefers dark roast coffee", 1);
    seed_fact(&index, &session, "city", "Lives in Lisbon", 1);
    let memory = ChatMemory::new(config, index, scripted_summarizer(), chatmem_core::observer::noop())
        .expect("pipeline");

    let turns = vec![
        Turn::human("Where do I live?"),
        Turn::assistant("Let me check."),
        Turn::human("Which coffee roast do I like?"),
    ];
    let facts = memory.recall_for(&session, &turns).expect("recall");
    assert_eq!(facts, vec!["Prefers dark roast coffee".to_string()]);
    assert!(memory.recall_for(&session, &[]).expect("empty").is_empty());
}

/// Index whose searches take a while, counting how many handles were opened.
#[derive(Clone)]
struct SlowIndex {
    inner: InMemoryIndex,
    delay: Duration,
}

impl SemanticIndex for SlowIndex {
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()> {
        self.inner.put(ns, key, item)
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>> {
        std::thread::sleep(self.delay);
        self.inner.search(ns, query, limit)
    }

    fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        self.inner.delete(ns, key)
    }
}

struct SlowSource {
    index: SlowIndex,
    opens: Arc<AtomicUsize>,
}

impl IndexSource for SlowSource {
    type Index = SlowIndex;

    fn open(&self) -> Result<Self::Index> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.index.clone())
    }
}

#[test]
fn recalls_on_different_sessions_run_in_parallel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let delay = Duration::from_millis(200);
    let opens = Arc::new(AtomicUsize::new(0));
    let source = SlowSource {
        index: SlowIndex {
            inner: InMemoryIndex::new(),
            delay,
        },
        opens: Arc::clone(&opens),
    };
    let memory = Arc::new(
        ChatMemory::new(config(&dir), source, scripted_summarizer(), chatmem_core::observer::noop())
            .expect("pipeline"),
    );

    let started = Instant::now();
    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|id| {
            let memory = Arc::clone(&memory);
            std::thread::spawn(move || memory.recall(&SessionId::from(id), "anything", None))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("thread").expect("recall").is_empty());
    }

    assert!(started.elapsed() < delay * 2 - Duration::from_millis(20));
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}
