// tests/monotonic_admission.rs
//
// Raising the screening threshold can only shrink the set of records that
// reach deep classification.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pain_funnel::classify::MockModel;
use pain_funnel::config::FunnelConfig;
use pain_funnel::insight::ModelTier;
use pain_funnel::store::MemoryStore;

use common::*;

/// Confidence per record id, in hundredths so they survive a JSON round trip.
fn confidences(seed: u64, n: usize) -> HashMap<String, f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let c = rng.random_range(0..=100) as f64 / 100.0;
            (format!("rec-{i:03}"), c)
        })
        .collect()
}

fn screener_for(conf: HashMap<String, f64>) -> Arc<MockModel> {
    Arc::new(MockModel::new(ModelTier::Fast, move |prompt| {
        let c = conf
            .iter()
            .find(|(id, _)| prompt.contains(&format!("[{id}]")))
            .map(|(_, c)| *c)
            .unwrap_or(0.0);
        Ok(screen_json(true, c))
    }))
}

async fn deep_calls_at(threshold: f64, conf: &HashMap<String, f64>, n: usize) -> usize {
    let store = Arc::new(MemoryStore::with_records(records(n)));
    let deep = high(DEEP_OK);
    let cfg = FunnelConfig {
        screening_threshold: threshold,
        concurrency: 4,
        ..FunnelConfig::default()
    };
    let f = funnel(&store, cfg, screener_for(conf.clone()), deep.clone());
    f.run(f.new_context()).await.unwrap();
    deep.calls()
}

#[tokio::test]
async fn deep_calls_never_grow_with_threshold() {
    for seed in [1u64, 7, 42] {
        let n = 40;
        let conf = confidences(seed, n);
        let mut prev = usize::MAX;
        for step in 0..=10 {
            let t = step as f64 / 10.0;
            let calls = deep_calls_at(t, &conf, n).await;
            let expected = conf.values().filter(|c| **c >= t).count();
            assert_eq!(calls, expected, "seed {seed} threshold {t}");
            assert!(calls <= prev, "seed {seed}: {calls} > {prev} at {t}");
            prev = calls;
        }
    }
}

#[tokio::test]
async fn threshold_zero_admits_every_relevant_record() {
    let conf = confidences(3, 10);
    assert_eq!(deep_calls_at(0.0, &conf, 10).await, 10);
}
