//! Impact scoring, ranking, and priority policies.
//!
//! Two recency weightings coexist:
//!
//! - [`aggregation_recency_weight`] feeds group-level composite scores
//!   (last 30 days weigh 2.0, last 90 days 1.5, older 1.0).
//! - [`recency_multiplier`] feeds per-batch impact scores in reports
//!   (last 30 days weigh 1.5, older 1.0).
//!
//! Priority assignment is table driven; see [`PriorityPolicy`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Rating assumed for feedback that carries none.
pub const DEFAULT_RATING: f64 = 3.0;

/// Per-item rating impact: `(6 - r) / 5`, so one star weighs `1.0` and
/// five stars weigh `0.2`. Missing or non-positive ratings are unrated.
pub fn rating_impact(rating: Option<f32>) -> Option<f64> {
    match rating {
        Some(r) if r > 0.0 => Some((6.0 - r as f64) / 5.0),
        _ => None,
    }
}

/// Multiplier applied to an item's impact in report batches.
pub fn recency_multiplier(days_since_posted: f64) -> f64 {
    if days_since_posted <= 30.0 {
        1.5
    } else {
        1.0
    }
}

/// Per-item weight summed into a group's recency score.
pub fn aggregation_recency_weight(days_since_posted: f64) -> f64 {
    if days_since_posted <= 30.0 {
        2.0
    } else if days_since_posted <= 90.0 {
        1.5
    } else {
        1.0
    }
}

/// Composite score for an aggregated group.
pub fn group_composite_score(count: u64, avg_rating: f64, recency_score: f64) -> f64 {
    count as f64 * avg_rating * recency_score
}

/// Weighted score used by the per-LOB top feedback view.
pub fn weighted_feedback_score(count: u64, avg_rating: f64) -> f64 {
    count as f64 * avg_rating
}

/// One item's contribution to a batch impact score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactInput {
    pub rating: Option<f32>,
    pub days_since_posted: f64,
}

/// Impact score of a batch of feedback.
///
/// Each item scores its [`rating_impact`] (or `1.0` when unrated) times its
/// [`recency_multiplier`]. The mean item score is then scaled by the
/// fraction of rated items, when any item is rated.
pub fn batch_impact_score(items: &[ImpactInput]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    let mut rated = 0usize;
    for item in items {
        let base = match rating_impact(item.rating) {
            Some(impact) => {
                rated += 1;
                impact
            }
            None => 1.0,
        };
        total += base * recency_multiplier(item.days_since_posted);
    }

    let n = items.len() as f64;
    let mean = total / n;
    if rated > 0 {
        mean * (rated as f64 / n)
    } else {
        mean
    }
}

/// Severity of a drafted ticket on a `1..` scale.
pub fn severity(unique_users: u64, mentions: u64) -> u64 {
    ((unique_users * 2 + mentions) / 10).max(1)
}

/// Composite priority score: `(unique_users × 3 + mentions) × importance`.
pub fn composite_score(unique_users: u64, mentions: u64, importance: f64) -> f64 {
    (unique_users as f64 * 3.0 + mentions as f64) * importance
}

/// Sort `items` by `score` descending. Equal scores keep their input order.
/// NaN scores compare as equal.
pub fn rank_descending<T, F>(items: &mut [T], score: F)
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| score(b).partial_cmp(&score(a)).unwrap_or(Ordering::Equal));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }

    /// Issue tracker priority number (0 urgent .. 4 low).
    pub fn level(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            Priority::P0 => "Urgent",
            Priority::P1 => "Critical",
            Priority::P2 => "High",
            Priority::P3 => "Medium",
            Priority::P4 => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named threshold tables mapping a composite score to a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityPolicy {
    /// Three tiers: `> 100` P0, `> 50` P1, otherwise P2.
    Roadmap,
    /// Five tiers: `> 150` P0, `> 100` P1, `> 40` P2, `> 15` P3, otherwise P4.
    #[default]
    Escalation,
}

const ROADMAP_TIERS: &[(f64, Priority)] = &[(100.0, Priority::P0), (50.0, Priority::P1)];
const ROADMAP_FLOOR: Priority = Priority::P2;

const ESCALATION_TIERS: &[(f64, Priority)] = &[
    (150.0, Priority::P0),
    (100.0, Priority::P1),
    (40.0, Priority::P2),
    (15.0, Priority::P3),
];
const ESCALATION_FLOOR: Priority = Priority::P4;

impl PriorityPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityPolicy::Roadmap => "roadmap",
            PriorityPolicy::Escalation => "escalation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "roadmap" => Some(PriorityPolicy::Roadmap),
            "escalation" => Some(PriorityPolicy::Escalation),
            _ => None,
        }
    }

    pub fn priority_for(&self, score: f64) -> Priority {
        let (tiers, floor) = match self {
            PriorityPolicy::Roadmap => (ROADMAP_TIERS, ROADMAP_FLOOR),
            PriorityPolicy::Escalation => (ESCALATION_TIERS, ESCALATION_FLOOR),
        };
        tiers
            .iter()
            .find(|(threshold, _)| score > *threshold)
            .map(|(_, p)| *p)
            .unwrap_or(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rating_impact() {
        assert_eq!(rating_impact(Some(1.0)), Some(1.0));
        assert!((rating_impact(Some(5.0)).unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(rating_impact(None), None);
        assert_eq!(rating_impact(Some(0.0)), None);
    }

    #[test]
    fn test_recency_weights() {
        assert_eq!(aggregation_recency_weight(1.0), 2.0);
        assert_eq!(aggregation_recency_weight(30.0), 2.0);
        assert_eq!(aggregation_recency_weight(60.0), 1.5);
        assert_eq!(aggregation_recency_weight(365.0), 1.0);
        assert_eq!(recency_multiplier(10.0), 1.5);
        assert_eq!(recency_multiplier(31.0), 1.0);
    }

    #[test]
    fn test_batch_impact_all_rated() {
        let items = [
            ImpactInput { rating: Some(1.0), days_since_posted: 5.0 },
            ImpactInput { rating: Some(1.0), days_since_posted: 100.0 },
        ];
        // (1.5 + 1.0) / 2 * 1.0
        assert!((batch_impact_score(&items) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_batch_impact_partially_rated() {
        let items = [
            ImpactInput { rating: Some(1.0), days_since_posted: 100.0 },
            ImpactInput { rating: None, days_since_posted: 1.0 },
        ];
        // ((1.0 + 1.5) / 2) * (1 / 2)
        assert!((batch_impact_score(&items) - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_batch_impact_unrated_and_empty() {
        assert_eq!(batch_impact_score(&[]), 0.0);
        let items = [
            ImpactInput { rating: None, days_since_posted: 1.0 },
            ImpactInput { rating: None, days_since_posted: 90.0 },
        ];
        // no scaling without ratings
        assert!((batch_impact_score(&items) - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_severity_floor() {
        assert_eq!(severity(0, 0), 1);
        assert_eq!(severity(2, 1), 1);
        assert_eq!(severity(10, 5), 2);
        assert_eq!(severity(40, 20), 10);
    }

    #[test]
    fn test_composite_score() {
        assert_eq!(composite_score(10, 5, 1.0), 35.0);
        assert_eq!(composite_score(10, 5, 2.0), 70.0);
    }

    #[test]
    fn test_roadmap_policy() {
        let p = PriorityPolicy::Roadmap;
        assert_eq!(p.priority_for(101.0), Priority::P0);
        assert_eq!(p.priority_for(100.0), Priority::P1);
        assert_eq!(p.priority_for(51.0), Priority::P1);
        assert_eq!(p.priority_for(50.0), Priority::P2);
        assert_eq!(p.priority_for(0.0), Priority::P2);
    }

    #[test]
    fn test_escalation_policy() {
        let p = PriorityPolicy::Escalation;
        assert_eq!(p.priority_for(151.0), Priority::P0);
        assert_eq!(p.priority_for(150.0), Priority::P1);
        assert_eq!(p.priority_for(100.5), Priority::P1);
        assert_eq!(p.priority_for(41.0), Priority::P2);
        assert_eq!(p.priority_for(16.0), Priority::P3);
        assert_eq!(p.priority_for(15.0), Priority::P4);
        assert_eq!(Priority::P0.level(), 0);
        assert_eq!(Priority::P4.label(), "Low");
    }

    #[test]
    fn test_rank_ties_keep_input_order() {
        let mut items = vec![("a", 10.0), ("b", 30.0), ("c", 30.0), ("d", 5.0)];
        rank_descending(&mut items, |(_, s)| *s);
        let names: Vec<_> = items.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(PriorityPolicy::parse("roadmap"), Some(PriorityPolicy::Roadmap));
        assert_eq!(PriorityPolicy::parse("urgent"), None);
        assert_eq!(PriorityPolicy::default(), PriorityPolicy::Escalation);
    }

    proptest! {
        #[test]
        fn prop_batch_impact_bounded(
            ratings in proptest::collection::vec(proptest::option::of(1.0f32..=5.0), 0..40),
            days in 0.0f64..400.0,
        ) {
            let items: Vec<_> = ratings
                .iter()
                .map(|r| ImpactInput { rating: *r, days_since_posted: days })
                .collect();
            let score = batch_impact_score(&items);
            prop_assert!(score >= 0.0);
            prop_assert!(score <= 1.5 + 1e-9);
        }

        #[test]
        fn prop_policy_monotonic(a in 0.0f64..500.0, b in 0.0f64..500.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            for policy in [PriorityPolicy::Roadmap, PriorityPolicy::Escalation] {
                prop_assert!(policy.priority_for(hi) <= policy.priority_for(lo));
            }
        }
    }
}
