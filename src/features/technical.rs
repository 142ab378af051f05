//! Technical indicator arithmetic over price/volume slices.
//!
//! Every function returns a vector aligned to its input and is NaN-free by
//! construction: degenerate denominators and insufficient history substitute
//! the documented neutral default (0, 0.5, 50 or 1) instead of propagating
//! NaN/Infinity. The central sanitizer in `engineering` still runs over the
//! assembled vector as a second line of defense.

const EPS: f64 = 1e-8;

/// Day-over-day close returns. First element is 0; a non-positive prior
/// close yields 0.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; closes.len()];
    for i in 1..closes.len() {
        if closes[i - 1] > 0.0 {
            out[i] = (closes[i] - closes[i - 1]) / closes[i - 1];
        }
    }
    out
}

/// Intraday volatility `(high - low) / close`, 0 on a degenerate close.
pub fn intraday_volatility(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|i| {
            if closes[i] > 0.0 {
                (highs[i] - lows[i]) / closes[i]
            } else {
                0.0
            }
        })
        .collect()
}

/// Volume normalized by the full-series mean volume, 0 when the mean is 0.
pub fn volume_normalized(volumes: &[f64]) -> Vec<f64> {
    if volumes.is_empty() {
        return Vec::new();
    }
    let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
    if mean <= EPS {
        return vec![0.0; volumes.len()];
    }
    volumes.iter().map(|v| v / mean).collect()
}

/// Trailing Pearson correlation of two return series over `window`
/// observations ending at each index. Defaults to 0.5 with fewer than
/// `window` observations or a near-zero variance denominator.
pub fn rolling_correlation(x: &[f64], y: &[f64], window: usize) -> Vec<f64> {
    let n = x.len().min(y.len());
    let mut out = vec![0.5; n];
    if window < 2 {
        return out;
    }
    for i in 0..n {
        if i + 1 < window {
            continue;
        }
        let xs = &x[i + 1 - window..=i];
        let ys = &y[i + 1 - window..=i];
        let mx = xs.iter().sum::<f64>() / window as f64;
        let my = ys.iter().sum::<f64>() / window as f64;
        let mut cov = 0.0;
        let mut vx = 0.0;
        let mut vy = 0.0;
        for (a, b) in xs.iter().zip(ys.iter()) {
            cov += (a - mx) * (b - my);
            vx += (a - mx).powi(2);
            vy += (b - my).powi(2);
        }
        let denom = (vx * vy).sqrt();
        if denom > EPS {
            out[i] = cov / denom;
        }
    }
    out
}

/// Simple moving average with partial windows at the head.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        let len = (i + 1).min(period) as f64;
        out.push(sum / len);
    }
    out
}

/// Exponential moving average seeded with the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut current = values[0];
    for &v in values {
        current = alpha * v + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Ratio of each value to its moving average, 1 when the average is ~0.
pub fn ratio_to(values: &[f64], baseline: &[f64]) -> Vec<f64> {
    values
        .iter()
        .zip(baseline.iter())
        .map(|(v, b)| if b.abs() > EPS { v / b } else { 1.0 })
        .collect()
}

/// Position of each value within its trailing `window` min/max range,
/// in [0, 1]; 0.5 on insufficient history or a degenerate range.
pub fn price_position(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![0.5; values.len()];
    for i in 0..values.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        let min = slice.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = slice.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if max - min > EPS {
            out[i] = (values[i] - min) / (max - min);
        }
    }
    out
}

/// Rate of change over `period` days, 0 on insufficient history or a
/// non-positive base value.
pub fn rate_of_change(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    for i in period..values.len() {
        if values[i - period] > 0.0 {
            out[i] = (values[i] - values[i - period]) / values[i - period];
        }
    }
    out
}

/// Trailing population standard deviation over `window`, 0 on insufficient
/// history.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    if window < 2 {
        return out;
    }
    for i in 0..values.len() {
        if i + 1 < window {
            continue;
        }
        let slice = &values[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / window as f64;
        out[i] = var.sqrt();
    }
    out
}

/// True range per day: `max(high - low, |high - prev_close|, |low - prev_close|)`.
/// The first day uses plain high − low.
pub fn true_range(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|i| {
            let hl = highs[i] - lows[i];
            if i == 0 {
                hl
            } else {
                let pc = closes[i - 1];
                hl.max((highs[i] - pc).abs()).max((lows[i] - pc).abs())
            }
        })
        .collect()
}

/// Average true range: trailing mean of true range over `period`, partial at
/// the head.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    sma(&true_range(highs, lows, closes), period)
}

/// Bollinger position `(price - sma) / (2 * std)` over `period`, 0 on a
/// degenerate deviation or insufficient history.
pub fn bollinger_position(values: &[f64], period: usize) -> Vec<f64> {
    let mas = sma(values, period);
    let stds = rolling_std(values, period);
    (0..values.len())
        .map(|i| {
            if i + 1 >= period && stds[i] > EPS {
                (values[i] - mas[i]) / (2.0 * stds[i])
            } else {
                0.0
            }
        })
        .collect()
}

/// Wilder-style RSI mapped to 0..100, neutral 50 on insufficient history or
/// zero average loss and gain.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; values.len()];
    if values.len() <= period {
        return out;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);
    for i in period + 1..values.len() {
        let delta = values[i] - values[i - 1];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss < EPS {
        if avg_gain < EPS {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD line: EMA(12) − EMA(26).
pub fn macd_line(values: &[f64], fast: usize, slow: usize) -> Vec<f64> {
    let f = ema(values, fast);
    let s = ema(values, slow);
    f.iter().zip(s.iter()).map(|(a, b)| a - b).collect()
}

/// Stochastic %K over `period`, 0..100; neutral 50 on insufficient history
/// or a flat range.
pub fn stochastic_k(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; closes.len()];
    for i in 0..closes.len() {
        if i + 1 < period {
            continue;
        }
        let hh = highs[i + 1 - period..=i]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let ll = lows[i + 1 - period..=i]
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        if hh - ll > EPS {
            out[i] = (closes[i] - ll) / (hh - ll) * 100.0;
        }
    }
    out
}

/// On-balance volume normalized by total series volume, keeping the feature
/// within roughly [-1, 1].
pub fn obv_normalized(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let total: f64 = volumes.iter().sum();
    let mut out = vec![0.0; closes.len()];
    if total <= EPS {
        return out;
    }
    let mut obv = 0.0;
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            obv += volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv -= volumes[i];
        }
        out[i] = obv / total;
    }
    out
}

/// Ratio of close to cumulative volume-weighted average price, 1 when VWAP
/// is degenerate.
pub fn vwap_ratio(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let mut out = vec![1.0; closes.len()];
    let mut pv = 0.0;
    let mut vol = 0.0;
    for i in 0..closes.len() {
        let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
        pv += typical * volumes[i];
        vol += volumes[i];
        if vol > EPS {
            let vwap = pv / vol;
            if vwap > EPS {
                out[i] = closes[i] / vwap;
            }
        }
    }
    out
}

/// Price-volume trend normalized by total series volume.
pub fn pvt_normalized(closes: &[f64], volumes: &[f64]) -> Vec<f64> {
    let total: f64 = volumes.iter().sum();
    let mut out = vec![0.0; closes.len()];
    if total <= EPS {
        return out;
    }
    let mut pvt = 0.0;
    for i in 1..closes.len() {
        if closes[i - 1] > 0.0 {
            pvt += volumes[i] * (closes[i] - closes[i - 1]) / closes[i - 1];
        }
        out[i] = pvt / total;
    }
    out
}

/// Relative standard deviation `std / sma` over `window` (Bollinger
/// squeeze), 0 on a degenerate mean.
pub fn relative_std(values: &[f64], window: usize) -> Vec<f64> {
    let mas = sma(values, window);
    let stds = rolling_std(values, window);
    (0..values.len())
        .map(|i| if mas[i].abs() > EPS { stds[i] / mas[i] } else { 0.0 })
        .collect()
}

/// Ratio of trailing short-window mean to trailing long-window mean of a
/// volatility series, 1 on a degenerate long mean.
pub fn volatility_ratio(vols: &[f64], short: usize, long: usize) -> Vec<f64> {
    let short_ma = sma(vols, short);
    let long_ma = sma(vols, long);
    (0..vols.len())
        .map(|i| {
            if long_ma[i] > EPS {
                short_ma[i] / long_ma[i]
            } else {
                1.0
            }
        })
        .collect()
}

/// Deviation of current volatility from its trailing `window` mean,
/// relative to that mean; 0 on a degenerate mean.
pub fn volatility_breakout(vols: &[f64], window: usize) -> Vec<f64> {
    let mas = sma(vols, window);
    (0..vols.len())
        .map(|i| {
            if mas[i] > EPS {
                (vols[i] - mas[i]) / mas[i]
            } else {
                0.0
            }
        })
        .collect()
}

/// True range normalized by the close, 0 on a degenerate close.
pub fn true_range_normalized(highs: &[f64], lows: &[f64], closes: &[f64]) -> Vec<f64> {
    let tr = true_range(highs, lows, closes);
    (0..closes.len())
        .map(|i| if closes[i] > 0.0 { tr[i] / closes[i] } else { 0.0 })
        .collect()
}

/// Guarded ratio used by interaction features: 0 when the denominator is
/// within `1e-8` of zero.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < EPS {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn returns_guard_zero_prior() {
        let r = returns(&[0.0, 10.0, 11.0]);
        assert_eq!(r[0], 0.0);
        assert_eq!(r[1], 0.0);
        assert_relative_eq!(r[2], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn zero_volatility_series_stays_neutral() {
        // 30 flat days: every indicator lands on its documented default.
        let closes = vec![100.0; 30];
        let highs = vec![100.0; 30];
        let lows = vec![100.0; 30];

        let vol = intraday_volatility(&highs, &lows, &closes);
        let bb = bollinger_position(&closes, 20);
        let r = rsi(&closes, 14);
        let roc = rate_of_change(&closes, 5);
        for i in 0..30 {
            assert_eq!(vol[i], 0.0);
            assert_eq!(bb[i], 0.0);
            assert_eq!(r[i], 50.0);
            assert_eq!(roc[i], 0.0);
            assert!(vol[i].is_finite() && bb[i].is_finite());
        }
    }

    #[test]
    fn correlation_defaults_then_tracks() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.01).collect();
        let y = x.clone();
        let corr = rolling_correlation(&x, &y, 10);
        assert_eq!(corr[5], 0.5); // insufficient history
        assert_relative_eq!(corr[15], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn correlation_degenerate_denominator_defaults() {
        let x = vec![1.0; 20];
        let y: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let corr = rolling_correlation(&x, &y, 10);
        assert_eq!(corr[15], 0.5);
    }

    #[test]
    fn price_position_bounds() {
        let mut v: Vec<f64> = (0..25).map(|i| i as f64).collect();
        let pos = price_position(&v, 20);
        assert_eq!(pos[5], 0.5); // insufficient history
        assert_relative_eq!(pos[24], 1.0, epsilon = 1e-12);
        v.reverse();
        let pos = price_position(&v, 20);
        assert_relative_eq!(pos[24], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn atr_uses_gap_to_prev_close() {
        let highs = vec![10.0, 15.0];
        let lows = vec![9.0, 14.0];
        let closes = vec![9.5, 14.5];
        let tr = true_range(&highs, &lows, &closes);
        assert_relative_eq!(tr[1], 5.5, epsilon = 1e-12); // |15 - 9.5|
    }

    #[test]
    fn sma_partial_head() {
        let v = vec![2.0, 4.0, 6.0, 8.0];
        let m = sma(&v, 3);
        assert_relative_eq!(m[0], 2.0);
        assert_relative_eq!(m[1], 3.0);
        assert_relative_eq!(m[3], 6.0);
    }

    #[test]
    fn safe_ratio_guards_tiny_denominator() {
        assert_eq!(safe_ratio(5.0, 1e-12), 0.0);
        assert_relative_eq!(safe_ratio(6.0, 2.0), 3.0);
    }
}
