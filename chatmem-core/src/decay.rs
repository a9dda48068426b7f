//! Exponential forgetting and reinforcement for long-term facts.
//!
//! Effective strength is derived at read time:
//!   E = S · e^(−λ·h)
//!
//! Where:
//!   S = stored strength in (0, 1]
//!   λ = decay rate per hour (default 0.005)
//!   h = hours since the fact was last matched or retrieved
//!
//! With the default rate a fact keeps ≈0.995 after one hour, ≈0.887 after a
//! day, ≈0.434 after a week and ≈0.027 after thirty days.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::types::MemoryItem;

/// `strength · e^(−rate · hours)`. Negative elapsed time counts as zero.
#[must_use]
pub fn decayed(strength: f64, rate: f64, hours: f64) -> f64 {
    if strength <= 0.0 {
        return 0.0;
    }
    strength * (-rate * hours.max(0.0)).exp()
}

/// Effective strength of `item` at `now`.
#[must_use]
pub fn effective_strength(item: &MemoryItem, rate: f64, now: DateTime<Utc>) -> f64 {
    decayed(item.strength, rate, item.hours_idle(now))
}

/// Stored strength after one reinforcement, capped at 1.0.
#[must_use]
pub fn reinforced(strength: f64, delta: f64) -> f64 {
    (strength.max(0.0) + delta.abs()).min(1.0)
}

// ---------------------------------------------------------------------------
// Near-duplicate detection
// ---------------------------------------------------------------------------

/// Jaccard similarity of the character sets of `a` and `b`, case-insensitive.
///
/// A coarse heuristic: word order and repetition are ignored, so unrelated
/// short strings can score high. Empty input scores 0.
#[must_use]
pub fn char_jaccard(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<char> = a.chars().flat_map(char::to_lowercase).collect();
    let set_b: HashSet<char> = b.chars().flat_map(char::to_lowercase).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Whether `a` and `b` are similar enough to reinforce instead of insert.
#[must_use]
pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    char_jaccard(a, b) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const RATE: f64 = 0.005;

    #[test]
    fn decay_reference_points() {
        assert!((decayed(1.0, RATE, 0.0) - 1.0).abs() < 1e-12);
        assert!((decayed(1.0, RATE, 24.0) - 0.887).abs() < 0.001);
        assert!((decayed(1.0, RATE, 168.0) - 0.432).abs() < 0.003);
        assert!((decayed(1.0, RATE, 720.0) - 0.027).abs() < 0.001);
    }

    #[test]
    fn effective_strength_uses_last_access() {
        let start = Utc::now();
        let item = MemoryItem::new("prefers dark mode", start);
        let later = start + Duration::hours(24);
        assert!((effective_strength(&item, RATE, later) - 0.887).abs() < 0.001);
        assert!((effective_strength(&item, RATE, start - Duration::hours(5)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reinforcement_is_capped() {
        assert!((reinforced(0.5, 0.2) - 0.7).abs() < 1e-12);
        assert!((reinforced(0.95, 0.2) - 1.0).abs() < 1e-12);
        assert!((reinforced(0.1, -0.2) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn case_only_difference_is_a_duplicate() {
        assert!(is_near_duplicate("I like Python", "I like python", 0.85));
        assert!((char_jaccard("abc", "ABC") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unrelated_text_is_not_a_duplicate() {
        assert!(!is_near_duplicate("I like Python", "Lives in Berlin", 0.85));
        assert!(char_jaccard("", "x").abs() < f64::EPSILON);
    }
}
