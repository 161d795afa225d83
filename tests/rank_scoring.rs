// tests/rank_scoring.rs

mod common;

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use pain_funnel::insight::{Category, ClassifiedInsight};
use pain_funnel::rank::{
    base_score_from_components, engagement_norm, rank, recency_norm, score_insight,
    BusinessImpact, NoValidation, ScoreComponents, ValidationLookup, ValidationSignal,
};
use pain_funnel::record::Engagement;
use pain_funnel::store::InsightFilter;

use common::insight;

struct Signals(HashMap<String, ValidationSignal>);

impl ValidationLookup for Signals {
    fn lookup(&self, insight: &ClassifiedInsight) -> Option<ValidationSignal> {
        self.0.get(&insight.record_id).copied()
    }
}

const FULL: ValidationSignal = ValidationSignal {
    matches_category: true,
    wtp_confirmed: true,
    business_impact: BusinessImpact::High,
};

#[test]
fn engagement_of_45_points_and_23_comments() {
    let e = engagement_norm(Engagement {
        score: 45,
        comment_count: 23,
    });
    assert!((e - 0.701).abs() < 1e-3, "{e}");
}

#[test]
fn weighted_sum_from_rounded_components() {
    let c = ScoreComponents {
        relevance: 0.9,
        frustration: 1.0,
        engagement: 0.701,
        wtp: 1.0,
        recency: 1.0,
        validation_bonus: 0.0,
    };
    assert!((base_score_from_components(&c) - 91.02).abs() < 1e-9);
}

#[test]
fn three_day_old_frustrated_payer_scores_high() {
    let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
    let mut i = insight("b", Category::Payments);
    i.screening_confidence = Some(0.9);
    i.frustration_level = 5;
    i.willingness_to_pay = true;
    i.engagement = Engagement {
        score: 45,
        comment_count: 23,
    };
    i.source_created_at = now - Duration::days(3);

    let s = score_insight(&i, &NoValidation, now);
    // Unrounded engagement is 0.70067, one hundredth below the rounded case.
    assert!((s.score - 91.01).abs() < 1e-9, "{}", s.score);
    assert_eq!(s.score, s.base_score);
    assert!(!s.validated);
}

#[test]
fn recency_buckets_at_their_edges() {
    assert_eq!(recency_norm(Duration::days(7) - Duration::seconds(1)), 1.0);
    assert_eq!(recency_norm(Duration::days(7)), 0.7);
    assert_eq!(recency_norm(Duration::days(30)), 0.4);
    assert_eq!(recency_norm(Duration::days(90)), 0.2);
    assert_eq!(recency_norm(Duration::days(-1)), 1.0);
}

fn random_insights(rng: &mut StdRng, n: usize, now: chrono::DateTime<Utc>) -> Vec<ClassifiedInsight> {
    (0..n)
        .map(|k| {
            let mut i = insight(&format!("r{k:03}"), Category::ALL[k % Category::ALL.len()]);
            i.screening_confidence = if rng.random_bool(0.2) {
                None
            } else {
                Some(rng.random_range(0.0..=1.0))
            };
            i.frustration_level = rng.random_range(1..=5);
            i.willingness_to_pay = rng.random_bool(0.5);
            i.engagement = Engagement {
                score: rng.random_range(0..100_000),
                comment_count: rng.random_range(0..5_000),
            };
            i.source_created_at = now - Duration::hours(rng.random_range(0..24 * 200));
            i.classified_at = now - Duration::minutes(rng.random_range(0..600));
            i
        })
        .collect()
}

fn random_signals(rng: &mut StdRng, items: &[ClassifiedInsight]) -> Signals {
    let impacts = [BusinessImpact::Low, BusinessImpact::Medium, BusinessImpact::High];
    Signals(
        items
            .iter()
            .filter_map(|i| {
                if !rng.random_bool(0.4) {
                    return None;
                }
                let s = ValidationSignal {
                    matches_category: rng.random_bool(0.5),
                    wtp_confirmed: rng.random_bool(0.5),
                    business_impact: impacts[rng.random_range(0..3)],
                };
                Some((i.record_id.clone(), s))
            })
            .collect(),
    )
}

#[test]
fn scores_stay_within_bounds() {
    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(11);
    let items = random_insights(&mut rng, 200, now);
    let signals = random_signals(&mut rng, &items);

    for s in rank(&items, &InsightFilter::default(), &signals, now) {
        assert!((0.0..=100.0).contains(&s.base_score), "{s:?}");
        assert!((0.0..=100.0).contains(&s.score), "{s:?}");
        assert!((0.0..=0.35 + 1e-12).contains(&s.components.validation_bonus));
    }
}

#[test]
fn full_corroboration_never_lowers_a_score() {
    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(5);
    let items = random_insights(&mut rng, 100, now);
    let signals = Signals(items.iter().map(|i| (i.record_id.clone(), FULL)).collect());

    for i in &items {
        let plain = score_insight(i, &NoValidation, now);
        let boosted = score_insight(i, &signals, now);
        assert!(boosted.score >= plain.score, "{} < {}", boosted.score, plain.score);
        assert!(boosted.validated);
    }
}

#[test]
fn ranking_is_bit_identical_and_order_independent() {
    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(99);
    let items = random_insights(&mut rng, 150, now);
    let signals = random_signals(&mut rng, &items);

    let first = rank(&items, &InsightFilter::default(), &signals, now);

    let mut shuffled = items.clone();
    shuffled.shuffle(&mut rng);
    let second = rank(&shuffled, &InsightFilter::default(), &signals, now);

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.record_id, b.record_id);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
    }
    for pair in first.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn filter_applies_before_ranking() {
    let now = Utc::now();
    let mut a = insight("a", Category::Payments);
    a.willingness_to_pay = true;
    let b = insight("b", Category::Inventory);

    let filter = InsightFilter {
        wtp_only: true,
        ..InsightFilter::default()
    };
    let ranked = rank(&[a, b], &filter, &NoValidation, now);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].record_id, "a");
}
