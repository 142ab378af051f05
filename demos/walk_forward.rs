//! Walk-forward validation over synthetic correlated series.
//!
//! Run with: cargo run --example walk_forward

use chrono::{Duration, NaiveDate};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use rust_range_ensemble::data::{align_series, DailyBar};
use rust_range_ensemble::features::FeatureEngineer;
use rust_range_ensemble::predictor::PredictorConfig;
use rust_range_ensemble::validation::{WalkForwardConfig, WalkForwardValidator};

/// Synthetic random-walk series correlated with a shared driver.
fn synthetic_series(n: usize, seed: u64, scale: f64, beta: f64) -> Vec<DailyBar> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut driver_rng = ChaCha8Rng::seed_from_u64(1);
    let noise = Normal::new(0.0, 0.008).expect("valid normal");
    let driver = Normal::new(0.0003, 0.01).expect("valid normal");

    let start: NaiveDate = "2022-01-03".parse().expect("valid date");
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

    let primary = synthetic_series(400, 10, 1.0, 1.0);
    let peer = synthetic_series(400, 20, 0.6, 0.8);
    let index = synthetic_series(400, 30, 4.0, 1.0);

    let aligned = align_series(&primary, &peer, &index)?;
    let samples = FeatureEngineer::default().build_samples(&aligned)?;
    println!("Engineered {} samples x {} features", samples.len(), samples.num_features());

    let validator = WalkForwardValidator::new(
        WalkForwardConfig {
            initial_train_size: 150,
            validation_window: 30,
            step_size: 30,
        },
        PredictorConfig::default(),
    );
    let summary = validator.run(&samples)?;

    println!("\n=== Walk-Forward Results ({} folds) ===", summary.folds.len());
    println!(
        "{:<6} {:>8} {:>8} {:>12} {:>12} {:>10}",
        "fold", "train", "val", "mape (off)", "mape (on)", "dir joint"
    );
    for fold in &summary.folds {
        println!(
            "{:<6} {:>8} {:>8} {:>11.3}% {:>11.3}% {:>9.1}%",
            fold.step,
            fold.train_samples,
            fold.val_samples,
            fold.uncalibrated.mape() * 100.0,
            fold.calibrated.mape() * 100.0,
            fold.calibrated.dir_joint * 100.0,
        );
    }

    println!("\nMean calibrated MAPE low/high: {:.3}% / {:.3}%",
        summary.mean_calibrated.mape_low * 100.0,
        summary.mean_calibrated.mape_high * 100.0,
    );
    println!("Calibrated MAPE std across folds: {:.3}%", summary.calibrated_mape_std * 100.0);
    println!(
        "Calibration success rate: {:.0}% of folds",
        summary.calibration_success_rate * 100.0
    );

    Ok(())
}
