//! Train the ensemble and predict the next session's range.
//!
//! Run with: cargo run --example predict_next_session

use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use rust_range_ensemble::data::DailyBar;
use rust_range_ensemble::predictor::{EnsemblePredictor, PredictorConfig};
use rust_range_ensemble::validation::regression_report;

fn synthetic_series(n: usize, seed: u64, scale: f64, beta: f64) -> Vec<DailyBar> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut driver_rng = ChaCha8Rng::seed_from_u64(1);
    let noise = Normal::new(0.0, 0.008).expect("valid normal");
    let driver = Normal::new(0.0003, 0.01).expect("valid normal");

    let start: NaiveDate = "2023-01-02".parse().expect("valid date");
    let mut close = 100.0 * scale;
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let shared = driver.sample(&mut driver_rng);
        let ret = beta * shared + noise.sample(&mut rng);
        close *= 1.0 + ret;
        let spread = close * 0.012 * (1.0 + noise.sample(&mut rng).abs() * 20.0);
        bars.push(DailyBar {
            date: start + Duration::days(i as i64),
            open: close * (1.0 - ret / 2.0),
            high: close + spread / 2.0,
            low: close - spread / 2.0,
            close,
            volume: 1_000_000.0 * scale * (1.0 + noise.sample(&mut rng).abs() * 10.0),
        });
    }
    bars
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let primary = synthetic_series(250, 11, 1.0, 1.0);
    let peer = synthetic_series(250, 21, 0.6, 0.8);
    let index = synthetic_series(250, 31, 4.0, 1.0);

    let mut predictor = EnsemblePredictor::new(PredictorConfig::default());
    let samples = predictor.train(&primary, &peer, &index)?;
    println!(
        "Trained on {} samples ({} features, schema v{})",
        samples.len(),
        samples.num_features(),
        predictor.schema().version()
    );

    // In-sample fit quality over the trailing quarter of the sample set.
    let tail = samples.len() - samples.len() / 4;
    let mut pred_low = Vec::new();
    let mut pred_high = Vec::new();
    for i in tail..samples.len() {
        let p = predictor.predict_sample(samples.dates[i], &samples.features[i], true)?;
        pred_low.push(p.final_low);
        pred_high.push(p.final_high);
    }
    let low_report = regression_report(&samples.target_low[tail..], &pred_low);
    let high_report = regression_report(&samples.target_high[tail..], &pred_high);
    println!(
        "Trailing fit: low MAPE {:.3}% (p90 {:.3}%), high MAPE {:.3}% (R2 {:.3})",
        low_report.mape * 100.0,
        low_report.p90_ape * 100.0,
        high_report.mape * 100.0,
        high_report.r2,
    );

    let names = predictor.schema().names().to_vec();
    let mut importance: Vec<(String, f64)> = names
        .into_iter()
        .zip(predictor.trees().low_model().feature_importance().iter().copied())
        .collect();
    importance.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    println!("Top low-model features:");
    for (name, weight) in importance.iter().take(5) {
        println!("  {name:<28} {weight:.3}");
    }

    let result = predictor.predict_next(&primary, &peer, &index, true)?;
    let last_close = primary.last().map(|b| b.close).unwrap_or_default();

    println!("\n=== Next-Session Forecast (after {}) ===", result.date);
    println!("Last close:     {:.2}", last_close);
    println!("Regime:         {}", result.regime);
    println!("Bayesian:       {:.2} / {:.2}", result.bayesian_low, result.bayesian_high);
    println!("Tree ensemble:  {:.2} / {:.2} (range {:.2})", result.tree_low, result.tree_high, result.tree_range);
    println!(
        "Weights (low):  bayes {:.2} / tree {:.2}",
        result.weights.bayesian_low, result.weights.tree_low
    );
    println!(
        "Final:          {:.2} / {:.2}{}",
        result.final_low,
        result.final_high,
        if result.range_reconciled { "  [range reconciled]" } else { "" }
    );
    println!("Confidence:     {:.2}", result.confidence);

    Ok(())
}
