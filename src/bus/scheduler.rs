//! Harmonic scheduler: scores ready nodes and picks one per tick.
//!
//! Four signals, each normalized into `[0, 1]`:
//!
//! | Signal | Formula |
//! |--------|---------|
//! | demand | `tanh(queued / demand_scale)` |
//! | freshness | `tanh(secs_since_last_run / freshness_horizon)`, 1 if never run |
//! | priority | `1 - e^-clamp(priority, 0, 10)` |
//! | resonance | Jaccard(node tags, intent tags), 0 if both empty |
//!
//! The score is the weighted sum. Weights need not sum to 1.
//!
//! `last_run` is stamped after every tick, failed ones included, so a node
//! whose tick keeps failing loses freshness like any other and cannot hold
//! the loop.
//!
//! # Tie-break
//!
//! [`Scheduler::select`] keeps the first candidate with the maximum score and
//! only replaces it on a strictly greater one. Candidates are fed in node
//! registration order, so among equal scores the earliest-registered node wins.
//! This is deterministic but depends on registration order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_DEMAND_SCALE: f64 = 4.0;
pub const DEFAULT_FRESHNESS_HORIZON_SECS: f64 = 5.0;
const PRIORITY_CEILING: f64 = 10.0;

/// Non-negative signal weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub demand: f64,
    pub freshness: f64,
    pub priority: f64,
    pub resonance: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            demand: 0.4,
            freshness: 0.2,
            priority: 0.25,
            resonance: 0.15,
        }
    }
}

impl Weights {
    /// Negative or non-finite weights become 0.
    pub fn sanitized(self) -> Self {
        let fix = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        Self {
            demand: fix(self.demand),
            freshness: fix(self.freshness),
            priority: fix(self.priority),
            resonance: fix(self.resonance),
        }
    }
}

/// What the scheduler is allowed to see of a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    /// Sum of queue lengths across the node's input ports.
    pub queued: usize,
    pub last_run: Option<DateTime<Utc>>,
    pub priority: f64,
    pub tags: &'a BTreeSet<String>,
}

/// Individual signals and the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub demand: f64,
    pub freshness: f64,
    pub priority: f64,
    pub resonance: f64,
    pub total: f64,
}

pub fn demand(queued: usize, scale: f64) -> f64 {
    (queued as f64 / scale.max(f64::EPSILON)).tanh()
}

pub fn freshness(last_run: Option<DateTime<Utc>>, now: DateTime<Utc>, horizon_secs: f64) -> f64 {
    match last_run {
        None => 1.0,
        Some(at) => {
            let elapsed = (now - at).num_milliseconds().max(0) as f64 / 1000.0;
            (elapsed / horizon_secs.max(f64::EPSILON)).tanh()
        }
    }
}

pub fn priority_signal(priority: f64) -> f64 {
    if !priority.is_finite() {
        return 0.0;
    }
    1.0 - (-priority.clamp(0.0, PRIORITY_CEILING)).exp()
}

/// Jaccard similarity; two empty sets score 0.
pub fn resonance(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Scoring state injected into the orchestrator.
#[derive(Debug, Clone)]
pub struct Scheduler {
    intent_tags: BTreeSet<String>,
    weights: Weights,
    demand_scale: f64,
    freshness_horizon_secs: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Weights::default())
    }
}

impl Scheduler {
    pub fn new(weights: Weights) -> Self {
        Self {
            intent_tags: BTreeSet::new(),
            weights: weights.sanitized(),
            demand_scale: DEFAULT_DEMAND_SCALE,
            freshness_horizon_secs: DEFAULT_FRESHNESS_HORIZON_SECS,
        }
    }

    pub fn with_scales(mut self, demand_scale: f64, freshness_horizon_secs: f64) -> Self {
        if demand_scale.is_finite() && demand_scale > 0.0 {
            self.demand_scale = demand_scale;
        }
        if freshness_horizon_secs.is_finite() && freshness_horizon_secs > 0.0 {
            self.freshness_horizon_secs = freshness_horizon_secs;
        }
        self
    }

    pub fn with_intent_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_intent_tags(tags);
        self
    }

    /// Replace the resonance target.
    pub fn set_intent_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent_tags = tags.into_iter().map(Into::into).collect();
    }

    pub fn intent_tags(&self) -> &BTreeSet<String> {
        &self.intent_tags
    }

    pub fn set_weights(&mut self, weights: Weights) {
        self.weights = weights.sanitized();
    }

    pub fn weights(&self) -> Weights {
        self.weights
    }

    pub fn breakdown(&self, node: &NodeView<'_>, now: DateTime<Utc>) -> ScoreBreakdown {
        let d = demand(node.queued, self.demand_scale);
        let f = freshness(node.last_run, now, self.freshness_horizon_secs);
        let p = priority_signal(node.priority);
        let r = resonance(node.tags, &self.intent_tags);
        let w = self.weights;
        ScoreBreakdown {
            demand: d,
            freshness: f,
            priority: p,
            resonance: r,
            total: w.demand * d + w.freshness * f + w.priority * p + w.resonance * r,
        }
    }

    pub fn score(&self, node: &NodeView<'_>, now: DateTime<Utc>) -> f64 {
        self.breakdown(node, now).total
    }

    /// Pick the highest-scoring candidate; the first one wins ties.
    pub fn select<'a, K, I>(&self, candidates: I, now: DateTime<Utc>) -> Option<(K, ScoreBreakdown)>
    where
        I: IntoIterator<Item = (K, NodeView<'a>)>,
    {
        let mut best: Option<(K, ScoreBreakdown)> = None;
        for (key, view) in candidates {
            let b = self.breakdown(&view, now);
            let better = match &best {
                None => true,
                Some((_, current)) => b.total > current.total,
            };
            if better {
                best = Some((key, b));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resonance_edge_cases() {
        let empty = BTreeSet::new();
        assert_eq!(resonance(&empty, &empty), 0.0);
        assert_eq!(resonance(&tags(&["a"]), &empty), 0.0);
        assert_eq!(resonance(&tags(&["a", "b"]), &tags(&["a", "b"])), 1.0);
        assert!((resonance(&tags(&["a", "b"]), &tags(&["b", "c"])) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_demand_saturates() {
        assert_eq!(demand(0, 4.0), 0.0);
        assert!(demand(1, 4.0) < demand(4, 4.0));
        assert!(demand(1000, 4.0) <= 1.0);
        let gain_low = demand(2, 4.0) - demand(1, 4.0);
        let gain_high = demand(20, 4.0) - demand(19, 4.0);
        assert!(gain_high < gain_low);
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        assert_eq!(freshness(None, now, 5.0), 1.0);
        assert_eq!(freshness(Some(now), now, 5.0), 0.0);
        let old = freshness(Some(now - Duration::seconds(10)), now, 5.0);
        let recent = freshness(Some(now - Duration::seconds(1)), now, 5.0);
        assert!(old > recent);
        // Clock skew never goes negative.
        assert_eq!(freshness(Some(now + Duration::seconds(3)), now, 5.0), 0.0);
    }

    #[test]
    fn test_priority_signal_compresses() {
        assert_eq!(priority_signal(0.0), 0.0);
        assert_eq!(priority_signal(-4.0), 0.0);
        assert_eq!(priority_signal(f64::NAN), 0.0);
        assert!(priority_signal(1.0) < priority_signal(2.0));
        assert_eq!(priority_signal(10.0), priority_signal(50.0));
        assert!(priority_signal(10.0) < 1.0);
    }

    #[test]
    fn test_select_prefers_higher_score() {
        let sched = Scheduler::default().with_intent_tags(["x"]);
        let now = Utc::now();
        let x = tags(&["x"]);
        let y = tags(&["y"]);
        let candidates = vec![
            ("low", NodeView { queued: 1, last_run: Some(now), priority: 1.0, tags: &y }),
            ("high", NodeView { queued: 1, last_run: Some(now), priority: 1.0, tags: &x }),
        ];
        let (winner, breakdown) = sched.select(candidates, now).unwrap();
        assert_eq!(winner, "high");
        assert_eq!(breakdown.resonance, 1.0);
    }

    #[test]
    fn test_select_ties_go_to_first() {
        let sched = Scheduler::default();
        let now = Utc::now();
        let t = BTreeSet::new();
        let view = NodeView { queued: 2, last_run: None, priority: 1.0, tags: &t };
        let (winner, _) = sched
            .select(vec![("a", view), ("b", view), ("c", view)], now)
            .unwrap();
        assert_eq!(winner, "a");
        assert!(sched.select(Vec::<(&str, NodeView)>::new(), now).is_none());
    }

    #[test]
    fn test_weights_sanitized() {
        let mut sched = Scheduler::default();
        sched.set_weights(Weights {
            demand: -1.0,
            freshness: f64::NAN,
            priority: 2.0,
            resonance: 0.0,
        });
        let w = sched.weights();
        assert_eq!(w.demand, 0.0);
        assert_eq!(w.freshness, 0.0);
        assert_eq!(w.priority, 2.0);
    }

    proptest! {
        #[test]
        fn test_resonance_bounds(
            a in prop::collection::btree_set("[a-e]", 0..5),
            b in prop::collection::btree_set("[a-e]", 0..5),
        ) {
            let r = resonance(&a, &b);
            prop_assert!((0.0..=1.0).contains(&r));
            prop_assert_eq!(r, resonance(&b, &a));
            if !a.is_empty() {
                prop_assert_eq!(resonance(&a, &a), 1.0);
            }
        }

        #[test]
        fn test_score_within_weight_sum(queued in 0usize..500, priority in -5.0f64..50.0) {
            let sched = Scheduler::default();
            let t = BTreeSet::new();
            let view = NodeView { queued, last_run: None, priority, tags: &t };
            let w = sched.weights();
            let s = sched.score(&view, Utc::now());
            prop_assert!(s >= 0.0);
            prop_assert!(s <= w.demand + w.freshness + w.priority + w.resonance + 1e-12);
        }
    }
}
