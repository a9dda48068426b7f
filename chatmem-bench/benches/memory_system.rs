//! chatmem benchmark suite.
//!
//! Hot paths on the foreground side of a turn plus the scoring loops the
//! background workers run:
//!   effective_strength_200 ........ decay scoring over a full search fetch
//!   char_jaccard_pair ............. one near-duplicate check
//!   window_compress_25_turns ...... compaction with an instant summarizer
//!   keyed_lock_uncontended ........ acquire + release on a fresh key
//!   long_term_search_top5_of_200 .. in-memory search with reinforcement

use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

use chatmem_core::config::LongTermConfig;
use chatmem_core::decay::{char_jaccard, effective_strength};
use chatmem_core::error::Result;
use chatmem_core::index::{InMemoryIndex, SemanticIndex};
use chatmem_core::lock::KeyedLock;
use chatmem_core::long_term::LongTermMemory;
use chatmem_core::types::{ManualClock, MemoryItem, Namespace, SessionId, Turn};
use chatmem_core::window::ShortTermWindow;

fn make_item(i: i64) -> MemoryItem {
    MemoryItem::new(
        format!("fact number {i} about the user's weekly routine"),
        Utc::now() - Duration::hours(i),
    )
}

fn instant_summary(_: &str, text: &str) -> Result<String> {
    Ok(format!("{} lines summarized", text.lines().count()))
}

fn bench_effective_strength(c: &mut Criterion) {
    let items: Vec<_> = (0..200).map(make_item).collect();
    let now = Utc::now();
    c.bench_function("effective_strength_200", |b| {
        b.iter(|| {
            let total: f64 = items
                .iter()
                .map(|item| effective_strength(black_box(item), 0.005, now))
                .sum();
            black_box(total);
        });
    });
}

fn bench_char_jaccard(c: &mut Criterion) {
    c.bench_function("char_jaccard_pair", |b| {
        b.iter(|| {
            black_box(char_jaccard(
                black_box("I like Python for data work"),
                black_box("I like python for data analysis"),
            ));
        });
    });
}

fn bench_window_compress(c: &mut Criterion) {
    let window = ShortTermWindow::default();
    let turns: Vec<_> = (0..25)
        .map(|i| Turn::human(format!("message {i} with a little body text")))
        .collect();
    c.bench_function("window_compress_25_turns", |b| {
        b.iter(|| {
            let patch = window
                .compress(black_box(&turns), "earlier summary", &instant_summary)
                .expect("compress");
            black_box(patch);
        });
    });
}

fn bench_keyed_lock(c: &mut Criterion) {
    let lock = KeyedLock::new();
    c.bench_function("keyed_lock_uncontended", |b| {
        b.iter(|| {
            let guard = lock.acquire(black_box("session-1"));
            black_box(&guard);
        });
    });
}

fn bench_long_term_search(c: &mut Criterion) {
    let index = InMemoryIndex::new();
    let session = SessionId::from("bench");
    let ns = Namespace::new("user_prefs", &session);
    for i in 0..200 {
        index
            .put(&ns, &format!("k{i}"), &make_item(i))
            .expect("seed");
    }
    let memory = LongTermMemory::new(index, LongTermConfig::default())
        .with_clock(Arc::new(ManualClock::new(Utc::now())));

    c.bench_function("long_term_search_top5_of_200", |b| {
        b.iter(|| {
            let hits = memory
                .search(black_box("weekly routine"), &session, 5)
                .expect("search");
            black_box(hits);
        });
    });
}

criterion_group!(
    benches,
    bench_effective_strength,
    bench_char_jaccard,
    bench_window_compress,
    bench_keyed_lock,
    bench_long_term_search,
);
criterion_main!(benches);
