//! Data types for daily equity bars and engineered sample sets.

use std::collections::BTreeMap;
use std::ops::Range;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PredictorError;

/// One trading day of OHLCV data for a single symbol.
///
/// Prices and volume are validated upstream (non-negative); the crate
/// assumes clean input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Session date (unique, ordered key within a series)
    pub date: NaiveDate,
    /// Opening price
    pub open: f64,
    /// Session high
    pub high: f64,
    /// Session low
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

impl DailyBar {
    /// Intraday range relative to the close, 0 on a degenerate close.
    pub fn intraday_volatility(&self) -> f64 {
        if self.close > 0.0 {
            (self.high - self.low) / self.close
        } else {
            0.0
        }
    }
}

/// Three date-aligned daily series: the predicted asset, a correlated peer
/// and a broad index. All three vectors share length and date order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedSeries {
    pub primary: Vec<DailyBar>,
    pub peer: Vec<DailyBar>,
    pub index: Vec<DailyBar>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Dates shared by all three series, in order.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.primary.iter().map(|b| b.date).collect()
    }
}

/// Inner-join three daily series on date.
///
/// Only dates present in all three inputs are kept. Fails fast when a series
/// is absent entirely, and reports insufficient data when the intersection is
/// too small to engineer a single sample.
pub fn align_series(
    primary: &[DailyBar],
    peer: &[DailyBar],
    index: &[DailyBar],
) -> Result<AlignedSeries, PredictorError> {
    if primary.is_empty() {
        return Err(PredictorError::MissingSeries("primary"));
    }
    if peer.is_empty() {
        return Err(PredictorError::MissingSeries("peer"));
    }
    if index.is_empty() {
        return Err(PredictorError::MissingSeries("index"));
    }

    let peer_by_date: BTreeMap<NaiveDate, &DailyBar> =
        peer.iter().map(|b| (b.date, b)).collect();
    let index_by_date: BTreeMap<NaiveDate, &DailyBar> =
        index.iter().map(|b| (b.date, b)).collect();

    let mut out = AlignedSeries {
        primary: Vec::new(),
        peer: Vec::new(),
        index: Vec::new(),
    };

    for bar in primary {
        if let (Some(p), Some(i)) = (peer_by_date.get(&bar.date), index_by_date.get(&bar.date)) {
            out.primary.push(bar.clone());
            out.peer.push((*p).clone());
            out.index.push((*i).clone());
        }
    }

    if out.len() < 2 {
        return Err(PredictorError::InsufficientData {
            needed: 2,
            got: out.len(),
        });
    }

    Ok(out)
}

/// Column-oriented sample set: one row per trading day, a fixed-length
/// feature vector plus next-session low/high targets.
///
/// Built once by feature engineering and immutable afterwards; all splits are
/// temporal (never shuffled).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSet {
    /// Ordered feature names; the schema contract every consumer shares
    pub feature_names: Vec<String>,
    /// Sample dates, ascending
    pub dates: Vec<NaiveDate>,
    /// Feature matrix (rows = samples)
    pub features: Vec<Vec<f64>>,
    /// Next-session low per sample
    pub target_low: Vec<f64>,
    /// Next-session high per sample
    pub target_high: Vec<f64>,
}

impl SampleSet {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            dates: Vec::new(),
            features: Vec::new(),
            target_low: Vec::new(),
            target_high: Vec::new(),
        }
    }

    pub fn push(&mut self, date: NaiveDate, features: Vec<f64>, low: f64, high: f64) {
        debug_assert!(high >= low, "target high below target low on {date}");
        self.dates.push(date);
        self.features.push(features);
        self.target_low.push(low);
        self.target_high.push(high);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Copy of the rows in `range`.
    pub fn slice(&self, range: Range<usize>) -> SampleSet {
        SampleSet {
            feature_names: self.feature_names.clone(),
            dates: self.dates[range.clone()].to_vec(),
            features: self.features[range.clone()].to_vec(),
            target_low: self.target_low[range.clone()].to_vec(),
            target_high: self.target_high[range].to_vec(),
        }
    }

    /// Temporal split: rows before `idx` and rows from `idx` on.
    pub fn split_at(&self, idx: usize) -> (SampleSet, SampleSet) {
        let idx = idx.min(self.len());
        (self.slice(0..idx), self.slice(idx..self.len()))
    }

    /// Temporal split by fraction, earliest rows first.
    pub fn split_fraction(&self, train_fraction: f64) -> (SampleSet, SampleSet) {
        let idx = (self.len() as f64 * train_fraction).round() as usize;
        self.split_at(idx)
    }

    /// Copy of every row outside `range`; used for out-of-fold training.
    pub fn without_range(&self, range: Range<usize>) -> SampleSet {
        let mut out = SampleSet::new(self.feature_names.clone());
        for i in 0..self.len() {
            if !range.contains(&i) {
                out.push(
                    self.dates[i],
                    self.features[i].clone(),
                    self.target_low[i],
                    self.target_high[i],
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64) -> DailyBar {
        DailyBar {
            date: date.parse().unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn align_keeps_only_shared_dates() {
        let primary = vec![bar("2024-01-02", 100.0), bar("2024-01-03", 101.0), bar("2024-01-04", 102.0)];
        let peer = vec![bar("2024-01-02", 50.0), bar("2024-01-04", 51.0)];
        let index = vec![bar("2024-01-02", 400.0), bar("2024-01-03", 401.0), bar("2024-01-04", 402.0)];

        let aligned = align_series(&primary, &peer, &index).unwrap();
        assert_eq!(aligned.len(), 2);
        assert_eq!(aligned.dates(), vec![
            "2024-01-02".parse::<NaiveDate>().unwrap(),
            "2024-01-04".parse::<NaiveDate>().unwrap(),
        ]);
    }

    #[test]
    fn align_rejects_missing_series() {
        let bars = vec![bar("2024-01-02", 100.0)];
        let err = align_series(&bars, &[], &bars).unwrap_err();
        assert!(matches!(err, PredictorError::MissingSeries("peer")));
    }

    #[test]
    fn split_is_temporal() {
        let mut set = SampleSet::new(vec!["f".to_string()]);
        for i in 0..10 {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap();
            set.push(date, vec![i as f64], 10.0, 11.0);
        }
        let (train, test) = set.split_fraction(0.8);
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert!(train.dates.last().unwrap() < test.dates.first().unwrap());
    }

    #[test]
    fn without_range_removes_middle() {
        let mut set = SampleSet::new(vec!["f".to_string()]);
        for i in 0..6 {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1 + i as u32).unwrap();
            set.push(date, vec![i as f64], 1.0, 2.0);
        }
        let rest = set.without_range(2..4);
        assert_eq!(rest.len(), 4);
        assert_eq!(rest.features[2][0], 4.0);
    }
}
