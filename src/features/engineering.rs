//! Feature engineering: assembles the fixed-length, schema-versioned vector
//! every model consumes.
//!
//! The schema (count, order, names) is a contract. The engineer asserts the
//! assembled length against it and raises a hard error on mismatch, never a
//! silent truncation or pad. Every value passes through the central
//! sanitizer before a model sees it, on the training and inference paths
//! alike.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::data::{AlignedSeries, SampleSet};
use crate::error::PredictorError;
use crate::features::calendar;
use crate::features::technical as ta;

/// Feature engineering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Window for the cross-asset return correlation
    pub corr_window: usize,
    /// Window for price-position features
    pub position_window: usize,
    /// Moving-average periods (SMA and EMA ratios)
    pub ma_periods: Vec<usize>,
    /// Rate-of-change periods
    pub roc_periods: Vec<usize>,
    /// Rolling return std-dev windows
    pub std_periods: Vec<usize>,
    /// RSI period
    pub rsi_period: usize,
    /// ATR period
    pub atr_period: usize,
    /// Stochastic %K period
    pub stoch_period: usize,
    /// Lag offsets for return/volatility lag features
    pub lag_periods: Vec<usize>,
    /// Include the lag and interaction blocks
    pub extended: bool,
    /// Magnitude bound applied by the sanitizer
    pub sanitize_bound: f64,
    /// Schema version tag carried by the produced schema
    pub schema_version: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            corr_window: 10,
            position_window: 20,
            ma_periods: vec![5, 10, 20],
            roc_periods: vec![5, 10],
            std_periods: vec![5, 10, 20],
            rsi_period: 14,
            atr_period: 14,
            stoch_period: 14,
            lag_periods: vec![1, 2, 5],
            extended: true,
            sanitize_bound: 1000.0,
            schema_version: 1,
        }
    }
}

/// Versioned feature schema: ordered names plus the indices of the signals
/// the regime detector reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSchema {
    version: u32,
    names: Vec<String>,
    volatility_idx: Option<usize>,
    momentum_idx: Option<usize>,
    volume_idx: Option<usize>,
}

impl FeatureSchema {
    fn new(version: u32, names: Vec<String>) -> Self {
        let find = |n: &str| names.iter().position(|x| x == n);
        let volatility_idx = find("primary_ret_std_10");
        let momentum_idx = find("primary_roc_5");
        let volume_idx = find("primary_volume_norm");
        Self {
            version,
            names,
            volatility_idx,
            momentum_idx,
            volume_idx,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Extract the regime-detection signals from a schema-conformant vector.
    ///
    /// Absent signals fall back to neutral values (0 volatility, 0 momentum,
    /// unit volume), which classify as the Normal regime.
    pub fn regime_signals(&self, features: &[f64]) -> crate::ensemble::RegimeSignals {
        let get = |idx: Option<usize>, default: f64| {
            idx.and_then(|i| features.get(i).copied()).unwrap_or(default)
        };
        crate::ensemble::RegimeSignals {
            volatility: get(self.volatility_idx, 0.0),
            momentum: get(self.momentum_idx, 0.0),
            volume_ratio: get(self.volume_idx, 1.0),
        }
    }
}

/// Replace non-finite values with 0 and clamp magnitude.
///
/// This is the mandatory last step before any value reaches a model.
pub fn sanitize(value: f64, bound: f64) -> f64 {
    if !value.is_finite() {
        0.0
    } else {
        value.clamp(-bound, bound)
    }
}

/// Builds one feature vector per aligned trading day.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    config: FeatureConfig,
    schema: FeatureSchema,
}

/// Precomputed per-series indicator columns shared by every row assembly.
struct SeriesContext {
    dates: Vec<NaiveDate>,
    primary_returns: Vec<f64>,
    peer_returns: Vec<f64>,
    index_returns: Vec<f64>,
    primary_vol: Vec<f64>,
    peer_vol: Vec<f64>,
    index_vol: Vec<f64>,
    primary_vol_norm: Vec<f64>,
    peer_vol_norm: Vec<f64>,
    index_vol_norm: Vec<f64>,
    corr: Vec<f64>,
    sma_ratios: Vec<Vec<f64>>,
    ema_ratios: Vec<Vec<f64>>,
    primary_position: Vec<f64>,
    primary_rocs: Vec<Vec<f64>>,
    primary_stds: Vec<Vec<f64>>,
    atr: Vec<f64>,
    bb_position: Vec<f64>,
    rsi: Vec<f64>,
    macd: Vec<f64>,
    stoch: Vec<f64>,
    obv: Vec<f64>,
    vwap_ratio: Vec<f64>,
    volume_roc: Vec<f64>,
    pvt: Vec<f64>,
    bb_squeeze: Vec<f64>,
    vol_ratio: Vec<f64>,
    tr_norm: Vec<f64>,
    vol_breakout: Vec<f64>,
    peer_roc: Vec<f64>,
    index_roc: Vec<f64>,
    peer_position: Vec<f64>,
    index_position: Vec<f64>,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        let schema = FeatureSchema::new(config.schema_version, Self::feature_names(&config));
        Self { config, schema }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Ordered feature names for `config`; the assembly in `vector_at` must
    /// emit values in exactly this order.
    fn feature_names(config: &FeatureConfig) -> Vec<String> {
        let mut names = Vec::new();

        // Base cross-asset block
        for asset in ["primary", "peer", "index"] {
            names.push(format!("{asset}_return"));
        }
        for asset in ["primary", "peer", "index"] {
            names.push(format!("{asset}_volatility"));
        }
        for asset in ["primary", "peer", "index"] {
            names.push(format!("{asset}_volume_norm"));
        }
        names.push(format!("primary_peer_corr_{}", config.corr_window));

        // Primary technical block
        for p in &config.ma_periods {
            names.push(format!("primary_sma_{p}_ratio"));
        }
        for p in &config.ma_periods {
            names.push(format!("primary_ema_{p}_ratio"));
        }
        names.push(format!("primary_position_{}", config.position_window));
        for p in &config.roc_periods {
            names.push(format!("primary_roc_{p}"));
        }
        for p in &config.std_periods {
            names.push(format!("primary_ret_std_{p}"));
        }
        names.push(format!("primary_atr_{}", config.atr_period));
        names.push("primary_bb_position".to_string());
        names.push(format!("primary_rsi_{}", config.rsi_period));
        names.push("primary_macd".to_string());
        names.push(format!("primary_stoch_{}", config.stoch_period));
        names.push("primary_obv_norm".to_string());
        names.push("primary_vwap_ratio".to_string());
        names.push("primary_volume_roc_5".to_string());
        names.push("primary_pvt_norm".to_string());
        names.push("primary_bb_squeeze".to_string());
        names.push("primary_vol_ratio_5_20".to_string());
        names.push("primary_true_range_norm".to_string());
        names.push("primary_vol_breakout".to_string());

        // Cross-asset technical block
        names.push("peer_roc_5".to_string());
        names.push("index_roc_5".to_string());
        names.push(format!("peer_position_{}", config.position_window));
        names.push(format!("index_position_{}", config.position_window));

        if config.extended {
            for lag in &config.lag_periods {
                names.push(format!("primary_return_lag_{lag}"));
            }
            for lag in &config.lag_periods {
                names.push(format!("primary_volatility_lag_{lag}"));
            }
            names.push("peer_return_lag_1".to_string());

            names.push("cross_momentum_ratio".to_string());
            names.push("cross_volatility_ratio".to_string());
            names.push("index_volatility_ratio".to_string());
            names.push("cross_momentum_product".to_string());
            names.push("cross_position_spread".to_string());
            names.push("corr_momentum".to_string());
        }

        // Temporal block
        for day in ["mon", "tue", "wed", "thu", "fri"] {
            names.push(format!("dow_{day}"));
        }
        for week in 1..=4 {
            names.push(format!("week_of_month_{week}"));
        }
        names.push("opex_week".to_string());
        names.push("quarter_start".to_string());
        names.push("quarter_end".to_string());
        names.push("january".to_string());
        names.push("year_end".to_string());
        names.push("days_from_holiday".to_string());
        names.push("days_to_holiday".to_string());
        names.push("month_progress".to_string());
        names.push("quarter_progress".to_string());
        names.push("year_progress".to_string());
        names.push("earnings_season".to_string());
        names.push("earnings_distance".to_string());

        names
    }

    fn context(&self, series: &AlignedSeries) -> SeriesContext {
        let closes: Vec<f64> = series.primary.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = series.primary.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = series.primary.iter().map(|b| b.low).collect();
        let volumes: Vec<f64> = series.primary.iter().map(|b| b.volume).collect();
        let peer_closes: Vec<f64> = series.peer.iter().map(|b| b.close).collect();
        let index_closes: Vec<f64> = series.index.iter().map(|b| b.close).collect();

        let primary_returns = ta::returns(&closes);
        let peer_returns = ta::returns(&peer_closes);
        let index_returns = ta::returns(&index_closes);

        let primary_vol = ta::intraday_volatility(
            &highs,
            &lows,
            &closes,
        );
        let peer_vol = ta::intraday_volatility(
            &series.peer.iter().map(|b| b.high).collect::<Vec<_>>(),
            &series.peer.iter().map(|b| b.low).collect::<Vec<_>>(),
            &peer_closes,
        );
        let index_vol = ta::intraday_volatility(
            &series.index.iter().map(|b| b.high).collect::<Vec<_>>(),
            &series.index.iter().map(|b| b.low).collect::<Vec<_>>(),
            &index_closes,
        );

        let sma_ratios = self
            .config
            .ma_periods
            .iter()
            .map(|&p| ta::ratio_to(&closes, &ta::sma(&closes, p)))
            .collect();
        let ema_ratios = self
            .config
            .ma_periods
            .iter()
            .map(|&p| ta::ratio_to(&closes, &ta::ema(&closes, p)))
            .collect();
        let primary_rocs = self
            .config
            .roc_periods
            .iter()
            .map(|&p| ta::rate_of_change(&closes, p))
            .collect();
        let primary_stds = self
            .config
            .std_periods
            .iter()
            .map(|&p| ta::rolling_std(&primary_returns, p))
            .collect();

        SeriesContext {
            dates: series.dates(),
            corr: ta::rolling_correlation(&primary_returns, &peer_returns, self.config.corr_window),
            primary_vol_norm: ta::volume_normalized(&volumes),
            peer_vol_norm: ta::volume_normalized(
                &series.peer.iter().map(|b| b.volume).collect::<Vec<_>>(),
            ),
            index_vol_norm: ta::volume_normalized(
                &series.index.iter().map(|b| b.volume).collect::<Vec<_>>(),
            ),
            primary_position: ta::price_position(&closes, self.config.position_window),
            atr: ta::atr(&highs, &lows, &closes, self.config.atr_period),
            bb_position: ta::bollinger_position(&closes, self.config.position_window),
            rsi: ta::rsi(&closes, self.config.rsi_period),
            macd: ta::macd_line(&closes, 12, 26),
            stoch: ta::stochastic_k(&highs, &lows, &closes, self.config.stoch_period),
            obv: ta::obv_normalized(&closes, &volumes),
            vwap_ratio: ta::vwap_ratio(&highs, &lows, &closes, &volumes),
            volume_roc: ta::rate_of_change(&volumes, 5),
            pvt: ta::pvt_normalized(&closes, &volumes),
            bb_squeeze: ta::relative_std(&closes, self.config.position_window),
            vol_ratio: ta::volatility_ratio(&primary_vol, 5, 20),
            tr_norm: ta::true_range_normalized(&highs, &lows, &closes),
            vol_breakout: ta::volatility_breakout(&primary_vol, 20),
            peer_roc: ta::rate_of_change(&peer_closes, 5),
            index_roc: ta::rate_of_change(&index_closes, 5),
            peer_position: ta::price_position(&peer_closes, self.config.position_window),
            index_position: ta::price_position(&index_closes, self.config.position_window),
            primary_returns,
            peer_returns,
            index_returns,
            primary_vol,
            peer_vol,
            index_vol,
            sma_ratios,
            ema_ratios,
            primary_rocs,
            primary_stds,
        }
    }

    fn vector_at(&self, ctx: &SeriesContext, i: usize) -> Result<Vec<f64>, PredictorError> {
        let mut v = Vec::with_capacity(self.schema.len());

        v.push(ctx.primary_returns[i]);
        v.push(ctx.peer_returns[i]);
        v.push(ctx.index_returns[i]);
        v.push(ctx.primary_vol[i]);
        v.push(ctx.peer_vol[i]);
        v.push(ctx.index_vol[i]);
        v.push(ctx.primary_vol_norm[i]);
        v.push(ctx.peer_vol_norm[i]);
        v.push(ctx.index_vol_norm[i]);
        v.push(ctx.corr[i]);

        for col in &ctx.sma_ratios {
            v.push(col[i]);
        }
        for col in &ctx.ema_ratios {
            v.push(col[i]);
        }
        v.push(ctx.primary_position[i]);
        for col in &ctx.primary_rocs {
            v.push(col[i]);
        }
        for col in &ctx.primary_stds {
            v.push(col[i]);
        }
        v.push(ctx.atr[i]);
        v.push(ctx.bb_position[i]);
        v.push(ctx.rsi[i]);
        v.push(ctx.macd[i]);
        v.push(ctx.stoch[i]);
        v.push(ctx.obv[i]);
        v.push(ctx.vwap_ratio[i]);
        v.push(ctx.volume_roc[i]);
        v.push(ctx.pvt[i]);
        v.push(ctx.bb_squeeze[i]);
        v.push(ctx.vol_ratio[i]);
        v.push(ctx.tr_norm[i]);
        v.push(ctx.vol_breakout[i]);

        v.push(ctx.peer_roc[i]);
        v.push(ctx.index_roc[i]);
        v.push(ctx.peer_position[i]);
        v.push(ctx.index_position[i]);

        if self.config.extended {
            for &lag in &self.config.lag_periods {
                v.push(if i >= lag { ctx.primary_returns[i - lag] } else { 0.0 });
            }
            for &lag in &self.config.lag_periods {
                v.push(if i >= lag { ctx.primary_vol[i - lag] } else { 0.0 });
            }
            v.push(if i >= 1 { ctx.peer_returns[i - 1] } else { 0.0 });

            let roc = ctx.primary_rocs.first().map(|c| c[i]).unwrap_or(0.0);
            v.push(ta::safe_ratio(roc, ctx.peer_roc[i]));
            v.push(ta::safe_ratio(ctx.primary_vol[i], ctx.peer_vol[i]));
            v.push(ta::safe_ratio(ctx.primary_vol[i], ctx.index_vol[i]));
            v.push(roc * ctx.index_roc[i]);
            v.push(ctx.primary_position[i] - ctx.peer_position[i]);
            v.push(ctx.corr[i] * roc);
        }

        let date = ctx.dates[i];
        let weekday = date.weekday();
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            v.push(if weekday == day { 1.0 } else { 0.0 });
        }
        let wom = calendar::week_of_month(date);
        for week in 1..=4 {
            v.push(if wom == week { 1.0 } else { 0.0 });
        }
        v.push(if calendar::is_opex_week(date) { 1.0 } else { 0.0 });
        v.push(if calendar::is_quarter_start(date) { 1.0 } else { 0.0 });
        v.push(if calendar::is_quarter_end(date) { 1.0 } else { 0.0 });
        v.push(if date.month() == 1 { 1.0 } else { 0.0 });
        v.push(if calendar::is_year_end(date) { 1.0 } else { 0.0 });
        v.push(calendar::days_from_holiday(date));
        v.push(calendar::days_to_holiday(date));
        v.push(calendar::month_progress(date));
        v.push(calendar::quarter_progress(date));
        v.push(calendar::year_progress(date));
        v.push(if calendar::in_earnings_season(date) { 1.0 } else { 0.0 });
        v.push(calendar::earnings_distance(date));

        if v.len() != self.schema.len() {
            return Err(PredictorError::SchemaMismatch {
                expected: self.schema.len(),
                actual: v.len(),
            });
        }

        for value in &mut v {
            *value = sanitize(*value, self.config.sanitize_bound);
        }

        Ok(v)
    }

    /// Build the training sample set: one row per aligned day (skipping the
    /// first, which lacks a prior close, and the last, which lacks a
    /// next-session target).
    pub fn build_samples(&self, series: &AlignedSeries) -> Result<SampleSet, PredictorError> {
        let n = series.len();
        if n < 3 {
            return Err(PredictorError::InsufficientData { needed: 3, got: n });
        }
        let ctx = self.context(series);
        let mut samples = SampleSet::new(self.schema.names.to_vec());
        for i in 1..n - 1 {
            let v = self.vector_at(&ctx, i)?;
            samples.push(
                ctx.dates[i],
                v,
                series.primary[i + 1].low,
                series.primary[i + 1].high,
            );
        }
        Ok(samples)
    }

    /// Build the feature vector for the most recent aligned day, used to
    /// predict the following session.
    pub fn build_latest_vector(
        &self,
        series: &AlignedSeries,
    ) -> Result<(NaiveDate, Vec<f64>), PredictorError> {
        let n = series.len();
        if n < 2 {
            return Err(PredictorError::InsufficientData { needed: 2, got: n });
        }
        let ctx = self.context(series);
        let v = self.vector_at(&ctx, n - 1)?;
        Ok((ctx.dates[n - 1], v))
    }
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DailyBar;
    use chrono::Duration;

    fn synthetic_series(n: usize) -> AlignedSeries {
        let start: NaiveDate = "2024-01-02".parse().unwrap();
        let mut primary = Vec::new();
        let mut peer = Vec::new();
        let mut index = Vec::new();
        for i in 0..n {
            let date = start + Duration::days(i as i64);
            let base = 100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.05;
            primary.push(DailyBar {
                date,
                open: base - 0.3,
                high: base + 1.2,
                low: base - 1.1,
                close: base,
                volume: 1_000_000.0 + (i as f64 * 0.7).cos() * 50_000.0,
            });
            peer.push(DailyBar {
                date,
                open: base * 0.5,
                high: base * 0.5 + 0.8,
                low: base * 0.5 - 0.7,
                close: base * 0.5 + 0.1,
                volume: 500_000.0,
            });
            index.push(DailyBar {
                date,
                open: base * 4.0,
                high: base * 4.0 + 3.0,
                low: base * 4.0 - 3.0,
                close: base * 4.0 + 0.5,
                volume: 5_000_000.0,
            });
        }
        AlignedSeries { primary, peer, index }
    }

    #[test]
    fn vectors_match_schema_length() {
        let engineer = FeatureEngineer::default();
        let series = synthetic_series(60);
        let samples = engineer.build_samples(&series).unwrap();
        assert_eq!(samples.len(), 58);
        for row in &samples.features {
            assert_eq!(row.len(), engineer.schema().len());
            assert!(row.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn schema_exposes_regime_signal_indices() {
        let engineer = FeatureEngineer::default();
        let schema = engineer.schema();
        assert!(schema.index_of("primary_ret_std_10").is_some());
        assert!(schema.index_of("primary_roc_5").is_some());
        assert!(schema.index_of("primary_volume_norm").is_some());
    }

    #[test]
    fn compact_schema_drops_extended_blocks() {
        let full = FeatureEngineer::default();
        let compact = FeatureEngineer::new(FeatureConfig {
            extended: false,
            ..FeatureConfig::default()
        });
        assert!(compact.schema().len() < full.schema().len());
        assert!(compact.schema().index_of("cross_momentum_ratio").is_none());
    }

    #[test]
    fn sanitizer_replaces_and_clamps() {
        assert_eq!(sanitize(f64::NAN, 1000.0), 0.0);
        assert_eq!(sanitize(f64::INFINITY, 1000.0), 0.0);
        assert_eq!(sanitize(-2500.0, 1000.0), -1000.0);
        assert_eq!(sanitize(3.5, 1000.0), 3.5);
    }

    #[test]
    fn targets_are_next_session_bounds() {
        let engineer = FeatureEngineer::default();
        let series = synthetic_series(10);
        let samples = engineer.build_samples(&series).unwrap();
        assert_eq!(samples.target_low[0], series.primary[2].low);
        assert_eq!(samples.target_high[0], series.primary[2].high);
        assert_eq!(samples.dates[0], series.primary[1].date);
    }

    #[test]
    fn latest_vector_uses_final_day() {
        let engineer = FeatureEngineer::default();
        let series = synthetic_series(30);
        let (date, v) = engineer.build_latest_vector(&series).unwrap();
        assert_eq!(date, series.primary[29].date);
        assert_eq!(v.len(), engineer.schema().len());
    }

    #[test]
    fn identical_input_yields_identical_vectors() {
        let engineer = FeatureEngineer::default();
        let series = synthetic_series(40);
        let a = engineer.build_samples(&series).unwrap();
        let b = engineer.build_samples(&series).unwrap();
        assert_eq!(a.features, b.features);
    }
}
