//! Property-based tests for chatmem core.
//!
//! Window compaction, decay scoring and near-duplicate detection must hold
//! their shape for arbitrary inputs, not just the hand-picked cases in the
//! unit tests.

use proptest::prelude::*;

use chatmem_core::decay::{char_jaccard, decayed, reinforced};
use chatmem_core::error::Result;
use chatmem_core::types::{Turn, TurnKind};
use chatmem_core::window::{ShortTermWindow, is_summary_marker};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_turn() -> impl Strategy<Value = Turn> {
    (
        prop_oneof![
            Just(TurnKind::Human),
            Just(TurnKind::Assistant),
            Just(TurnKind::System)
        ],
        "[a-z ]{0,40}",
    )
        .prop_map(|(kind, text)| Turn::new(kind, text))
}

fn echo(_: &str, text: &str) -> Result<String> {
    Ok(format!("{} chars", text.len()))
}

// ---------------------------------------------------------------------------
// Property: compaction keeps exactly the newest `keep` turns behind a marker
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn compaction_partitions_the_window(
        turns in prop::collection::vec(arb_turn(), 0..60),
        (threshold, keep) in (1usize..30).prop_flat_map(|t| (Just(t), 0..t)),
    ) {
        let window = ShortTermWindow::new(threshold, keep).expect("valid window");
        let patch = window.compress(&turns, "", &echo).expect("compress");

        if turns.len() <= threshold {
            prop_assert!(patch.is_none());
        } else {
            let patch = patch.expect("overflow yields a patch");
            prop_assert_eq!(patch.turns.len(), keep + 1);
            prop_assert!(is_summary_marker(&patch.turns[0]));
            prop_assert_eq!(&patch.turns[1..], &turns[turns.len() - keep..]);
        }
    }
}

// ---------------------------------------------------------------------------
// Property: decay never grows strength and stays within [0, strength]
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn decay_is_monotone_and_bounded(
        strength in 0.0..=1.0f64,
        rate in 0.0..0.1f64,
        h1 in 0.0..10_000.0f64,
        h2 in 0.0..10_000.0f64,
    ) {
        let (early, late) = if h1 <= h2 { (h1, h2) } else { (h2, h1) };
        let a = decayed(strength, rate, early);
        let b = decayed(strength, rate, late);
        prop_assert!(b <= a + 1e-12);
        prop_assert!(a <= strength + 1e-12);
        prop_assert!(b >= 0.0);
    }

    #[test]
    fn reinforcement_is_capped(strength in 0.0..=1.0f64, delta in -1.0..=1.0f64) {
        let r = reinforced(strength, delta);
        prop_assert!(r >= strength);
        prop_assert!(r <= 1.0);
    }
}

// ---------------------------------------------------------------------------
// Property: character Jaccard is a symmetric similarity in [0, 1]
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn jaccard_is_symmetric_and_bounded(a in "\\PC{0,30}", b in "\\PC{0,30}") {
        let ab = char_jaccard(&a, &b);
        prop_assert!((ab - char_jaccard(&b, &a)).abs() < 1e-12);
        prop_assert!((0.0..=1.0).contains(&ab));
    }

    #[test]
    fn nonempty_text_is_identical_to_itself(a in "[a-zA-Z ]{1,30}") {
        prop_assert!((char_jaccard(&a, &a) - 1.0).abs() < 1e-12);
    }
}
